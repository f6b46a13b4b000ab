use crate::error::ScanError;
use std::fmt;
use std::ops::RangeInclusive;

/// An inclusive, validated range of TCP ports (`1 <= start <= end <= 65535`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self, ScanError> {
        if start == 0 {
            return Err(ScanError::PortOutOfRange(0));
        }
        if start > end {
            return Err(ScanError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse a range specifier.
    ///
    /// Supported formats:
    /// - single port number: `80`
    /// - inclusive range: `8000-8010`
    /// - surrounding whitespace is ignored
    pub fn parse(s: &str) -> Result<Self, ScanError> {
        let s = s.trim();
        if let Some((a, b)) = s.split_once('-') {
            let start = parse_port_str(a.trim())?;
            let end = parse_port_str(b.trim())?;
            return Self::new(start, end);
        }
        let p = parse_port_str(s)?;
        Self::new(p, p)
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    /// Number of ports in the range. Never zero.
    pub fn count(&self) -> u64 {
        u64::from(self.end - self.start) + 1
    }

    /// Lazy, single-pass sequence of every port in the range.
    pub fn ports(&self) -> RangeInclusive<u16> {
        self.start..=self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

fn parse_port_str(s: &str) -> Result<u16, ScanError> {
    let val: u32 = s
        .parse::<u32>()
        .map_err(|_| ScanError::InvalidPort(s.to_string()))?;
    if val == 0 || val > 65535 {
        return Err(ScanError::PortOutOfRange(val));
    }
    Ok(val as u16)
}

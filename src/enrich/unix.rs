//! `lsof` based lookup for Linux, macOS and the BSDs.

use async_trait::async_trait;

use super::{join_host_port, run_command, Platform, Resolver};
use crate::error::EnrichError;
use crate::types::{PortDetail, ProcessRow, UNAVAILABLE};

#[derive(Debug, Clone)]
pub struct LsofResolver {
    program: String,
}

impl LsofResolver {
    pub fn new() -> Self {
        Self::with_program("lsof")
    }

    /// Use a different `lsof` binary (or a missing one, in tests).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

impl Default for LsofResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolver for LsofResolver {
    fn platform(&self) -> Platform {
        Platform::Unix
    }

    async fn lookup(&self, port: u16) -> Result<Option<ProcessRow>, EnrichError> {
        let filter = format!("-iTCP:{port}");
        // lsof exits non-zero when nothing matches; that is a miss, not a failure.
        match run_command(&self.program, &["-nP", filter.as_str(), "-sTCP:LISTEN"]).await {
            Ok(out) => Ok(parse_lsof(&out)),
            Err(EnrichError::Failed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn fallback(&self, host: &str, port: u16) -> PortDetail {
        PortDetail {
            protocol: "TCP".into(),
            state: "LISTEN".into(),
            local_address: join_host_port(host, port),
            ..PortDetail::unavailable(port)
        }
    }
}

/// Parse `lsof -nP -iTCP:<port> -sTCP:LISTEN` output.
///
/// Columns: COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME [(STATE)].
/// The header is skipped and the first row with a full set of columns wins.
pub fn parse_lsof(output: &str) -> Option<ProcessRow> {
    output.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 9 {
            return None;
        }
        let state = fields
            .get(9)
            .map(|s| s.trim_start_matches('(').trim_end_matches(')'))
            .filter(|s| !s.is_empty())
            .unwrap_or("LISTEN");
        Some(ProcessRow {
            process_name: fields[0].to_string(),
            pid: fields[1].to_string(),
            owner: fields[2].to_string(),
            protocol: fields[7].to_string(),
            local_address: fields[8].to_string(),
            foreign_address: UNAVAILABLE.to_string(),
            state: state.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
COMMAND   PID  USER   FD   TYPE   DEVICE SIZE/OFF NODE NAME
nginx    1234  root    6u  IPv4    31337      0t0  TCP *:8080 (LISTEN)
nginx    1240 www     6u  IPv4    31337      0t0  TCP *:8080 (LISTEN)
";

    #[test]
    fn parses_first_row() {
        let row = parse_lsof(SAMPLE).unwrap();
        assert_eq!(row.process_name, "nginx");
        assert_eq!(row.pid, "1234");
        assert_eq!(row.owner, "root");
        assert_eq!(row.protocol, "TCP");
        assert_eq!(row.local_address, "*:8080");
        assert_eq!(row.state, "LISTEN");
        assert_eq!(row.foreign_address, UNAVAILABLE);
    }

    #[test]
    fn missing_state_column_defaults_to_listen() {
        let out = "COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME\n\
                   sshd 99 root 3u IPv6 1 0t0 TCP [::1]:22\n";
        let row = parse_lsof(out).unwrap();
        assert_eq!(row.local_address, "[::1]:22");
        assert_eq!(row.state, "LISTEN");
    }

    #[test]
    fn header_only_or_short_rows_yield_nothing() {
        assert!(parse_lsof("").is_none());
        assert!(parse_lsof("COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME\n").is_none());
        assert!(parse_lsof("COMMAND PID\nfoo 1 bar\n").is_none());
    }

    #[test]
    fn fallback_reports_listen_with_local_address() {
        let d = LsofResolver::new().fallback("127.0.0.1", 8080);
        assert_eq!(d.protocol, "TCP");
        assert_eq!(d.state, "LISTEN");
        assert_eq!(d.local_address, "127.0.0.1:8080");
        assert!(d.is_unresolved());
        assert_eq!(d.foreign_address, UNAVAILABLE);
    }
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ScanError;
use crate::ports::PortRange;

/// Placeholder for data that could not be retrieved.
pub const UNAVAILABLE: &str = "N/A";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_ENRICH_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything one scan invocation needs to know.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub host: String,
    pub start_port: u16,
    pub end_port: u16,
    pub workers: usize,
    pub connect_timeout: Duration,
    pub enrich_timeout: Duration,
    /// Overall wall-clock bound; the scan is cancelled when it elapses.
    pub deadline: Option<Duration>,
    pub enrich: bool,
}

impl ScanConfig {
    pub fn new(host: impl Into<String>, start_port: u16, end_port: u16, workers: usize) -> Self {
        Self {
            host: host.into(),
            start_port,
            end_port,
            workers,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            enrich_timeout: DEFAULT_ENRICH_TIMEOUT,
            deadline: None,
            enrich: true,
        }
    }

    /// Check the invariants and return the port range to scan.
    pub fn validate(&self) -> Result<PortRange, ScanError> {
        if self.host.trim().is_empty() {
            return Err(ScanError::EmptyHost);
        }
        if self.workers == 0 {
            return Err(ScanError::NoWorkers);
        }
        PortRange::new(self.start_port, self.end_port)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, 1, 1024, num_cpus::get().max(1))
    }
}

/// One row reported by the OS process/socket table for a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRow {
    pub process_name: String,
    pub pid: String,
    pub owner: String,
    pub protocol: String,
    pub local_address: String,
    pub foreign_address: String,
    pub state: String,
}

impl Default for ProcessRow {
    fn default() -> Self {
        Self {
            process_name: UNAVAILABLE.into(),
            pid: UNAVAILABLE.into(),
            owner: UNAVAILABLE.into(),
            protocol: UNAVAILABLE.into(),
            local_address: UNAVAILABLE.into(),
            foreign_address: UNAVAILABLE.into(),
            state: UNAVAILABLE.into(),
        }
    }
}

/// Details about one open port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortDetail {
    pub port: u16,
    pub protocol: String,
    pub local_address: String,
    pub foreign_address: String,
    pub state: String,
    pub process_name: String,
    pub pid: String,
    pub owner: String,
}

impl PortDetail {
    /// A detail where every field except `port` is the sentinel.
    pub fn unavailable(port: u16) -> Self {
        Self::from_row(port, ProcessRow::default())
    }

    pub fn from_row(port: u16, row: ProcessRow) -> Self {
        Self {
            port,
            protocol: row.protocol,
            local_address: row.local_address,
            foreign_address: row.foreign_address,
            state: row.state,
            process_name: row.process_name,
            pid: row.pid,
            owner: row.owner,
        }
    }

    /// True when no process information could be attached.
    pub fn is_unresolved(&self) -> bool {
        self.process_name == UNAVAILABLE && self.pid == UNAVAILABLE && self.owner == UNAVAILABLE
    }
}

/// Aggregate results and progress counters for one scan.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ScanReport {
    pub host: String,
    pub start_port: u16,
    pub end_port: u16,
    pub scanned_total: u64,
    pub scanned_done: u64,
    pub open_count: u64,
    pub cancelled: bool,
    pub started_at: String,
    pub finished_at: String,
    pub entries: Vec<PortDetail>,
}

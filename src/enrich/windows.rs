//! `netstat -ano` + `tasklist` based lookup for Windows.

use async_trait::async_trait;
use log::debug;

use super::{run_command, Platform, Resolver};
use crate::error::EnrichError;
use crate::types::{ProcessRow, UNAVAILABLE};

#[derive(Debug, Clone)]
pub struct NetstatResolver {
    netstat: String,
    tasklist: String,
}

impl NetstatResolver {
    pub fn new() -> Self {
        Self::with_programs("netstat", "tasklist")
    }

    pub fn with_programs(netstat: impl Into<String>, tasklist: impl Into<String>) -> Self {
        Self {
            netstat: netstat.into(),
            tasklist: tasklist.into(),
        }
    }
}

impl Default for NetstatResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolver for NetstatResolver {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    async fn lookup(&self, port: u16) -> Result<Option<ProcessRow>, EnrichError> {
        let table = run_command(&self.netstat, &["-ano"]).await?;
        let Some(mut row) = parse_netstat(&table, port) else {
            return Ok(None);
        };

        let filter = format!("PID eq {}", row.pid);
        let args = ["/V", "/FO", "CSV", "/NH", "/FI", filter.as_str()];
        match run_command(&self.tasklist, &args).await {
            Ok(out) => {
                if let Some((name, owner)) = parse_tasklist(&out) {
                    row.process_name = name;
                    row.owner = owner;
                }
            }
            Err(e) => debug!("tasklist lookup for pid {} failed: {e}", row.pid),
        }
        Ok(Some(row))
    }
}

/// Find the TCP row whose local address is bound to `port`.
///
/// Rows look like `TCP  0.0.0.0:135  0.0.0.0:0  LISTENING  1234`. A
/// `LISTENING` row is preferred over established connections on that port.
pub fn parse_netstat(output: &str, port: u16) -> Option<ProcessRow> {
    let mut first_match = None;
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 || !fields[0].eq_ignore_ascii_case("TCP") {
            continue;
        }
        let bound = fields[1]
            .rsplit_once(':')
            .and_then(|(_, p)| p.parse::<u16>().ok());
        if bound != Some(port) {
            continue;
        }
        let row = ProcessRow {
            protocol: fields[0].to_string(),
            local_address: fields[1].to_string(),
            foreign_address: fields[2].to_string(),
            state: fields[3].to_string(),
            pid: fields[4].to_string(),
            ..ProcessRow::default()
        };
        if row.state.eq_ignore_ascii_case("LISTENING") {
            return Some(row);
        }
        first_match.get_or_insert(row);
    }
    first_match
}

/// Extract `(image name, user name)` from `tasklist /V /FO CSV /NH` output.
///
/// When no task matches, tasklist prints a single `INFO:` line instead of a
/// record; that yields `None`.
pub fn parse_tasklist(output: &str) -> Option<(String, String)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(output.trim().as_bytes());
    let record = reader.records().next()?.ok()?;
    if record.len() < 2 {
        return None;
    }
    let name = record.get(0).filter(|s| !s.is_empty())?.to_string();
    let owner = record
        .get(6)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNAVAILABLE)
        .to_string();
    Some((name, owner))
}

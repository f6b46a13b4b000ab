use thiserror::Error;

/// Errors that stop a scan before any probing happens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("invalid port range {start}-{end} (start > end)")]
    InvertedRange { start: u16, end: u16 },

    #[error("port out of range: {0} (expected 1-65535)")]
    PortOutOfRange(u32),

    #[error("invalid port value: {0}")]
    InvalidPort(String),

    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("host must not be empty")]
    EmptyHost,
}

/// Why a process lookup produced no information. Never escapes a worker.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("`{program}` is not available: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}")]
    Failed { program: String, status: std::process::ExitStatus },

    #[error("lookup timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("lookup cancelled")]
    Cancelled,

    #[error("enrichment not supported on this platform")]
    Unsupported,
}

//! Library crate for ghost-portscan: concurrent TCP port scanning with
//! process ownership enrichment.
pub mod enrich;
pub mod error;
pub mod ports;
pub mod probe;
pub mod progress;
pub mod scanner;
pub mod types;

pub use error::{EnrichError, ScanError};
pub use scanner::{scan, Scanner};
pub use types::{PortDetail, ScanConfig, ScanReport};

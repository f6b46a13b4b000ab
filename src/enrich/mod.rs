//! Process enrichment: map an open port to the process that owns it.
//!
//! Each platform gets its own [`Resolver`]; all text parsing of external
//! utilities lives behind that trait. Lookups are best-effort: whatever goes
//! wrong, the caller still gets a [`PortDetail`] with sentinel fields.

use async_trait::async_trait;
use log::debug;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::EnrichError;
use crate::types::{PortDetail, ProcessRow};

pub mod unix;
pub mod windows;

pub use unix::LsofResolver;
pub use windows::NetstatResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
    Unsupported,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(unix) {
            Platform::Unix
        } else {
            Platform::Unsupported
        }
    }
}

/// Looks up the owner of a listening TCP port.
#[async_trait]
pub trait Resolver: Send + Sync {
    fn platform(&self) -> Platform;

    /// Zero or one row describing `port`. `Ok(None)` means nothing matched.
    async fn lookup(&self, port: u16) -> Result<Option<ProcessRow>, EnrichError>;

    /// Detail reported when `lookup` produced nothing usable.
    fn fallback(&self, _host: &str, port: u16) -> PortDetail {
        PortDetail::unavailable(port)
    }
}

/// Resolver for platforms without a known introspection utility.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedResolver;

#[async_trait]
impl Resolver for UnsupportedResolver {
    fn platform(&self) -> Platform {
        Platform::Unsupported
    }

    async fn lookup(&self, _port: u16) -> Result<Option<ProcessRow>, EnrichError> {
        Err(EnrichError::Unsupported)
    }
}

/// Pick the resolver for `platform`. Done once per scan.
pub fn for_platform(platform: Platform) -> Arc<dyn Resolver> {
    match platform {
        Platform::Unix => Arc::new(LsofResolver::new()),
        Platform::Windows => Arc::new(NetstatResolver::new()),
        Platform::Unsupported => Arc::new(UnsupportedResolver),
    }
}

/// Run one bounded lookup and turn the outcome into a [`PortDetail`].
pub async fn resolve(
    resolver: &dyn Resolver,
    host: &str,
    port: u16,
    timeout: Duration,
    cancel: &CancellationToken,
) -> PortDetail {
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EnrichError::Cancelled),
        res = time::timeout(timeout, resolver.lookup(port)) => {
            res.unwrap_or_else(|_| Err(EnrichError::TimedOut(timeout)))
        }
    };

    match outcome {
        Ok(Some(row)) => PortDetail::from_row(port, row),
        Ok(None) => {
            debug!("no process row for port {port}");
            resolver.fallback(host, port)
        }
        Err(e) => {
            debug!("enrichment for port {port} unavailable: {e}");
            resolver.fallback(host, port)
        }
    }
}

/// Run an external utility and return its stdout.
///
/// The child is killed if the returned future is dropped (timeout/cancel).
pub(crate) async fn run_command(program: &str, args: &[&str]) -> Result<String, EnrichError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| EnrichError::Unavailable {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(EnrichError::Failed {
            program: program.to_string(),
            status: output.status,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `host:port`, bracketing IPv6 literals.
pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UNAVAILABLE;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SlowResolver {
        dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Resolver for SlowResolver {
        fn platform(&self) -> Platform {
            Platform::Unsupported
        }

        async fn lookup(&self, _port: u16) -> Result<Option<ProcessRow>, EnrichError> {
            let _flag = DropFlag(self.dropped.clone());
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
    }

    #[test]
    fn join_host_port_brackets_ipv6() {
        assert_eq!(join_host_port("localhost", 22), "localhost:22");
        assert_eq!(join_host_port("::1", 22), "[::1]:22");
        assert_eq!(join_host_port("[::1]", 22), "[::1]:22");
    }

    #[test]
    fn current_platform_is_known_on_ci_targets() {
        let p = Platform::current();
        if cfg!(unix) {
            assert_eq!(p, Platform::Unix);
        } else if cfg!(windows) {
            assert_eq!(p, Platform::Windows);
        }
        assert_eq!(for_platform(p).platform(), p);
    }

    #[tokio::test]
    async fn unsupported_resolver_yields_sentinels() {
        let cancel = CancellationToken::new();
        let d = resolve(&UnsupportedResolver, "localhost", 8080, Duration::from_secs(1), &cancel).await;
        assert_eq!(d, PortDetail::unavailable(8080));
    }

    #[tokio::test]
    async fn slow_lookup_times_out_and_is_dropped() {
        let dropped = Arc::new(AtomicBool::new(false));
        let resolver = SlowResolver { dropped: dropped.clone() };
        let cancel = CancellationToken::new();
        let d = resolve(&resolver, "localhost", 9000, Duration::from_millis(50), &cancel).await;
        assert_eq!(d.process_name, UNAVAILABLE);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancelled_lookup_falls_back() {
        let resolver = SlowResolver { dropped: Arc::new(AtomicBool::new(false)) };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let d = resolve(&resolver, "localhost", 9000, Duration::from_secs(30), &cancel).await;
        assert_eq!(d, PortDetail::unavailable(9000));
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let err = run_command("ghost-portscan-no-such-utility", &[]).await.unwrap_err();
        assert!(matches!(err, EnrichError::Unavailable { .. }));
    }
}

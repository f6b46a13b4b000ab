use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{self, TcpStream};
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Decides whether a single TCP port is open.
///
/// A closed, filtered or unreachable port is an ordinary `false`, not an error.
#[async_trait]
pub trait Prober: Send + Sync {
    /// `addrs` are the host's resolved addresses; an empty slice means the
    /// host did not resolve.
    async fn probe(
        &self,
        addrs: &[IpAddr],
        port: u16,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> bool;
}

/// Plain TCP connect probe. No data is sent; the stream is dropped right away.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(
        &self,
        addrs: &[IpAddr],
        port: u16,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        if addrs.is_empty() {
            return false;
        }
        let targets: Vec<SocketAddr> = addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect();
        // Addresses are tried in order; the timeout covers the whole attempt.
        let connect = time::timeout(timeout, TcpStream::connect(&targets[..]));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            res = connect => matches!(res, Ok(Ok(_))),
        }
    }
}

/// Resolve `host` once for a whole scan. Duplicates are dropped, order kept.
pub async fn resolve_host(host: &str) -> std::io::Result<Vec<IpAddr>> {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    let mut ips: Vec<IpAddr> = Vec::new();
    for addr in net::lookup_host((host, 0)).await? {
        if !ips.contains(&addr.ip()) {
            ips.push(addr.ip());
        }
    }
    Ok(ips)
}

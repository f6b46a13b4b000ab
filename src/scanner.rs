use crate::enrich::{self, Platform, Resolver};
use crate::error::ScanError;
use crate::probe::{self, Prober, TcpProber};
use crate::progress::ProgressReporter;
use crate::types::{PortDetail, ScanConfig, ScanReport};
use ::time::{format_description::well_known, OffsetDateTime};
use log::{debug, info, warn};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Upper bound on concurrently running workers, whatever the configuration asks for.
pub const MAX_WORKERS: usize = 5_000;

/// Scan `start_port..=end_port` on `host` with `workers` concurrent workers
/// and return the details of every open port (sorted by port).
pub async fn scan(
    host: &str,
    start_port: u16,
    end_port: u16,
    workers: usize,
) -> Result<Vec<PortDetail>, ScanError> {
    let report = Scanner::new(ScanConfig::new(host, start_port, end_port, workers))
        .run()
        .await?;
    Ok(report.entries)
}

/// Mutable state shared by all workers of one scan, behind a single lock.
///
/// The lock is only held to append a detail and bump the counter, never
/// across a probe or a lookup.
#[derive(Debug, Default)]
pub struct ScanState {
    inner: Mutex<Tally>,
}

#[derive(Debug, Default)]
struct Tally {
    scanned: u64,
    open: Vec<PortDetail>,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished port. Returns `(scanned, open)` after the update.
    pub async fn complete(&self, detail: Option<PortDetail>) -> (u64, u64) {
        let mut guard = self.inner.lock().await;
        if let Some(d) = detail {
            guard.open.push(d);
        }
        guard.scanned += 1;
        (guard.scanned, guard.open.len() as u64)
    }

    /// Take the collected details, leaving the state empty.
    async fn drain(&self) -> (u64, Vec<PortDetail>) {
        let mut guard = self.inner.lock().await;
        (guard.scanned, std::mem::take(&mut guard.open))
    }
}

/// Coordinates one scan: dispatcher, worker pool, aggregation and progress.
pub struct Scanner {
    config: ScanConfig,
    prober: Arc<dyn Prober>,
    resolver: Arc<dyn Resolver>,
    progress: Option<Arc<ProgressReporter>>,
    cancel: CancellationToken,
}

impl Scanner {
    /// TCP connect probing and the resolver for the current platform.
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            prober: Arc::new(TcpProber),
            resolver: enrich::for_platform(Platform::current()),
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_progress(mut self, progress: Arc<ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Cancelling `cancel` aborts the scan; `run` then returns what it has.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that aborts this scan when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the scan to completion (or cancellation).
    ///
    /// Configuration errors are returned before any port is probed. Per-port
    /// failures never surface here.
    pub async fn run(&self) -> Result<ScanReport, ScanError> {
        let range = self.config.validate()?;
        let total = range.count();
        // Workers beyond the number of ports would only idle.
        let workers = self
            .config
            .workers
            .min(MAX_WORKERS)
            .min(usize::try_from(total).unwrap_or(usize::MAX));
        let started_at = now_rfc3339();
        let started = Instant::now();

        info!(
            "scanning {} ports {range} with {workers} workers ({:?} platform enrichment)",
            self.config.host,
            self.resolver.platform()
        );

        // Child token: the deadline may cancel this scan without touching the caller's token.
        let cancel = self.cancel.child_token();
        let deadline = self.config.deadline.map(|limit| spawn_deadline(limit, cancel.clone()));

        let progress = self
            .progress
            .clone()
            .unwrap_or_else(|| Arc::new(ProgressReporter::hidden(total)));
        let state = Arc::new(ScanState::new());

        // Resolved once; an unresolvable host leaves every port closed.
        let host = &self.config.host;
        let addrs = tokio::select! {
            biased;
            _ = cancel.cancelled() => Vec::new(),
            res = probe::resolve_host(host) => res.unwrap_or_else(|e| {
                warn!("cannot resolve {host}: {e}");
                Vec::new()
            }),
        };
        debug!("{host} resolved to {addrs:?}");

        let (tx, rx) = mpsc::channel::<u16>(workers);
        let dispatch_cancel = cancel.clone();
        let dispatcher = tokio::spawn(async move {
            for port in range.ports() {
                tokio::select! {
                    biased;
                    _ = dispatch_cancel.cancelled() => break,
                    sent = tx.send(port) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            // Dropping `tx` closes the channel; that is the workers' stop signal.
        });

        let ctx = Arc::new(WorkerContext {
            host: self.config.host.clone(),
            addrs,
            connect_timeout: self.config.connect_timeout,
            enrich_timeout: self.config.enrich_timeout,
            enrich: self.config.enrich,
            ports: Mutex::new(rx),
            prober: self.prober.clone(),
            resolver: self.resolver.clone(),
            state: state.clone(),
            progress: progress.clone(),
            cancel: cancel.clone(),
        });

        let mut set = JoinSet::new();
        for id in 0..workers {
            set.spawn(run_worker(id, ctx.clone()));
        }
        drop(ctx);

        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!("scan worker failed: {e}");
            }
        }
        if let Err(e) = dispatcher.await {
            warn!("port dispatcher failed: {e}");
        }
        if let Some(handle) = deadline {
            handle.abort();
        }

        let cancelled = cancel.is_cancelled();
        let (scanned_done, mut entries) = state.drain().await;
        entries.sort_by_key(|d| d.port);
        let open_count = entries.len() as u64;
        progress.finish(scanned_done, open_count, cancelled);

        if cancelled {
            warn!("scan cancelled after {scanned_done}/{total} ports");
        }
        info!(
            "scan finished in {:.2}s: {open_count} open of {scanned_done} scanned",
            started.elapsed().as_secs_f64()
        );

        Ok(ScanReport {
            host: self.config.host.clone(),
            start_port: range.start(),
            end_port: range.end(),
            scanned_total: total,
            scanned_done,
            open_count,
            cancelled,
            started_at,
            finished_at: now_rfc3339(),
            entries,
        })
    }
}

/// Everything a worker needs, shared by the whole pool.
struct WorkerContext {
    host: String,
    addrs: Vec<IpAddr>,
    connect_timeout: Duration,
    enrich_timeout: Duration,
    enrich: bool,
    ports: Mutex<mpsc::Receiver<u16>>,
    prober: Arc<dyn Prober>,
    resolver: Arc<dyn Resolver>,
    state: Arc<ScanState>,
    progress: Arc<ProgressReporter>,
    cancel: CancellationToken,
}

impl WorkerContext {
    /// Next port to scan, or `None` once the channel is drained or the scan is cancelled.
    async fn next_port(&self) -> Option<u16> {
        let mut rx = self.ports.lock().await;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            port = rx.recv() => port,
        }
    }
}

async fn run_worker(id: usize, ctx: Arc<WorkerContext>) {
    while let Some(port) = ctx.next_port().await {
        let open = ctx
            .prober
            .probe(&ctx.addrs, port, ctx.connect_timeout, &ctx.cancel)
            .await;
        if ctx.cancel.is_cancelled() {
            // The probe may have been cut short; its outcome is unknown.
            break;
        }

        let detail = if open {
            debug!("worker {id}: port {port} open");
            let detail = if ctx.enrich {
                enrich::resolve(
                    ctx.resolver.as_ref(),
                    &ctx.host,
                    port,
                    ctx.enrich_timeout,
                    &ctx.cancel,
                )
                .await
            } else {
                ctx.resolver.fallback(&ctx.host, port)
            };
            Some(detail)
        } else {
            None
        };

        let (scanned, open_count) = ctx.state.complete(detail).await;
        ctx.progress.record(scanned, open_count);
    }
    debug!("worker {id}: done");
}

fn spawn_deadline(limit: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = time::sleep(limit) => {
                warn!("scan deadline of {limit:?} reached, cancelling");
                cancel.cancel();
            }
        }
    })
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};

/// Completed scans between two visible progress updates.
pub const UPDATE_EVERY: u64 = 20;

/// Whether the `scanned`-th completion should refresh the visible progress.
pub fn should_report(scanned: u64, total: u64, every: u64) -> bool {
    scanned == total || (every > 0 && scanned % every == 0)
}

/// Throttled progress sink fed by the scan workers.
///
/// Only touches the terminal every [`UPDATE_EVERY`] completions and on the
/// last one. It never feeds back into the scan.
pub struct ProgressReporter {
    total: u64,
    every: u64,
    bar: ProgressBar,
    updates: AtomicU64,
    position: AtomicU64,
}

impl ProgressReporter {
    /// Progress bar on stderr. Nothing is drawn when stderr is not a terminal.
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {msg}",
        )
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_message("Scanning ports");
        Self::with_bar(total, bar)
    }

    /// Reporter that counts updates but never draws.
    pub fn hidden(total: u64) -> Self {
        Self::with_bar(total, ProgressBar::hidden())
    }

    fn with_bar(total: u64, bar: ProgressBar) -> Self {
        Self {
            total,
            every: UPDATE_EVERY,
            bar,
            updates: AtomicU64::new(0),
            position: AtomicU64::new(0),
        }
    }

    pub fn with_interval(mut self, every: u64) -> Self {
        self.every = every.max(1);
        self
    }

    /// Called once per completed port with the counts after that completion.
    pub fn record(&self, scanned: u64, open: u64) {
        if !should_report(scanned, self.total, self.every) {
            return;
        }
        self.updates.fetch_add(1, Ordering::Relaxed);
        // Workers report outside the lock, so counts can arrive out of order.
        let pos = self.position.fetch_max(scanned, Ordering::Relaxed).max(scanned);
        self.bar.set_position(pos);
        self.bar.set_message(format!(
            "{pos}/{} ports scanned ({open} open ports so far)",
            self.total
        ));
    }

    pub fn finish(&self, scanned: u64, open: u64, cancelled: bool) {
        let msg = format!("{scanned}/{} ports scanned, {open} open", self.total);
        if cancelled {
            self.bar.abandon_with_message(format!("{msg} (cancelled)"));
        } else {
            self.bar.finish_with_message(msg);
        }
    }

    /// Number of visible updates emitted so far.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ghost_portscan::ports::PortRange;
use ghost_portscan::progress::ProgressReporter;
use ghost_portscan::types::{ScanConfig, ScanReport, DEFAULT_HOST};
use ghost_portscan::Scanner;

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;

/// ghost-portscan — scan a range of TCP ports and show which process owns each open one.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ghost-portscan",
    version,
    about = "Scan a range of TCP ports and show which process owns each open one.",
    long_about = None
)]
struct Cli {
    /// Host to scan.
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,

    /// Starting port to scan.
    #[arg(short = 's', long = "start-port", default_value_t = 1)]
    start_port: u16,

    /// Ending port to scan.
    #[arg(short = 'e', long = "end-port", default_value_t = 1024)]
    end_port: u16,

    /// Port or inclusive range (e.g. 8000-8100); overrides --start-port/--end-port.
    #[arg(long)]
    ports: Option<String>,

    /// Number of concurrent workers. Defaults to the number of logical CPUs.
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Socket connect timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 1000)]
    timeout_ms: u64,

    /// Upper bound for one process lookup in milliseconds.
    #[arg(long = "enrich-timeout-ms", default_value_t = 5000)]
    enrich_timeout_ms: u64,

    /// Abort the whole scan after this many seconds.
    #[arg(long = "deadline-secs")]
    deadline_secs: Option<u64>,

    /// Skip process lookups for open ports.
    #[arg(long = "no-enrich", default_value_t = false)]
    no_enrich: bool,

    /// Do not draw the progress bar.
    #[arg(short, long, default_value_t = false)]
    quiet: bool,

    /// Write the scan report as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// More log output (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn scan_config(&self) -> Result<ScanConfig> {
        let (start, end) = match self.ports.as_deref() {
            Some(spec) => {
                let range = PortRange::parse(spec)
                    .with_context(|| format!("invalid --ports value: {spec}"))?;
                (range.start(), range.end())
            }
            None => (self.start_port, self.end_port),
        };
        let workers = self.workers.unwrap_or_else(num_cpus::get);

        let mut config = ScanConfig::new(self.host.clone(), start, end, workers);
        config.connect_timeout = Duration::from_millis(self.timeout_ms);
        config.enrich_timeout = Duration::from_millis(self.enrich_timeout_ms);
        config.deadline = self.deadline_secs.map(Duration::from_secs);
        config.enrich = !self.no_enrich;
        Ok(config)
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = cli.scan_config()?;
    let range = config.validate().context("invalid scan configuration")?;

    let progress = if cli.quiet {
        ProgressReporter::hidden(range.count())
    } else {
        ProgressReporter::new(range.count())
    };
    let scanner = Scanner::new(config).with_progress(Arc::new(progress));

    // Ctrl-C cancels the scan; whatever was found so far is still printed.
    let cancel = scanner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let report = scanner.run().await?;
    print_report(&report);

    if let Some(path) = cli.output.as_deref() {
        match write_report_json(path, &report) {
            Ok(()) => println!("Wrote JSON report to {}", path.display()),
            Err(e) => eprintln!("Failed to write JSON to {}: {e:#}", path.display()),
        }
    }

    Ok(())
}

fn print_report(report: &ScanReport) {
    const HEADERS: [&str; 8] = [
        "Port",
        "Protocol",
        "Local Address",
        "Foreign Address",
        "State",
        "Process",
        "PID",
        "Owner",
    ];

    let rows: Vec<[String; 8]> = if report.entries.is_empty() {
        vec![std::array::from_fn(|_| "-".to_string())]
    } else {
        report
            .entries
            .iter()
            .map(|d| {
                [
                    d.port.to_string(),
                    d.protocol.clone(),
                    d.local_address.clone(),
                    d.foreign_address.clone(),
                    d.state.clone(),
                    d.process_name.clone(),
                    d.pid.clone(),
                    d.owner.clone(),
                ]
            })
            .collect()
    };

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    println!("\n--- Port Scan Summary ---");
    println!(
        "Host: {}  ports {}-{}  scanned: {}/{}  open: {}{}",
        report.host,
        report.start_port,
        report.end_port,
        report.scanned_done,
        report.scanned_total,
        report.open_count,
        if report.cancelled { "  (cancelled)" } else { "" }
    );
    println!();
    print_row(&HEADERS.map(String::from), &widths);
    print_row(&widths.map(|w| "-".repeat(w)), &widths);
    for row in &rows {
        print_row(row, &widths);
    }
    println!();
}

fn print_row(cells: &[String; 8], widths: &[usize; 8]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(i, (cell, &w))| {
            if i == 0 {
                format!("{cell:>w$}")
            } else {
                format!("{cell:<w$}")
            }
        })
        .collect();
    println!("{}", line.join("  ").trim_end());
}

fn write_report_json(path: &std::path::Path, report: &ScanReport) -> anyhow::Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)?;
    Ok(())
}

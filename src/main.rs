//! ferry - A prioritized, resumable background transfer queue.
//!
//! Usage:
//!   ferry copy SOURCE TARGET         Copy a file or directory into TARGET
//!   ferry move SOURCE TARGET         Move a file or directory into TARGET
//!   ferry delete PATH                Delete a file or directory
//!   ferry archive SOURCE ARCHIVE     Pack SOURCE into a zip/tar/tar.gz
//!   ferry extract ARCHIVE TARGET     Unpack an archive
//!   ferry sync SOURCE TARGET         Reconcile two directories
//!   ferry batch FILE                 Run every request listed in a TOML file
//!   ferry --help                     Show help

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{bail, eyre, Context, Result};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use ferry_core::{ConflictResolution, OperationOptions, SyncDirection};
use ferry_queue::{
    Operation, OperationKind, OperationStatus, Priority, QueueConfig, QueueEvent,
    QueueStatistics, Scheduler, TransferRequest,
};

#[derive(Parser)]
#[command(
    name = "ferry",
    version,
    about = "A prioritized, resumable background transfer queue",
    long_about = "ferry queues file transfers and runs them in the background with a \
                  bounded number of workers, priorities, retries and speed limits.\n\n\
                  Set FERRY_LOG=info (or debug) to see what the scheduler is doing."
)]
struct Cli {
    /// Queue configuration file (defaults to <config dir>/ferry/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Operations allowed to run at the same time
    #[arg(short = 'j', long, global = true)]
    concurrency: Option<usize>,

    /// Speed limit shared by all operations (e.g., "512KB", "1MiB")
    #[arg(long, global = true)]
    limit: Option<String>,

    /// Output format of the final report
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy a file or directory into a target directory
    Copy {
        source: String,
        target: String,
        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Move a file or directory into a target directory
    Move {
        source: String,
        target: String,
        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Delete a file or directory
    Delete {
        path: String,

        /// Send to the recycle bin instead of deleting permanently
        #[arg(long)]
        trash: bool,

        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Create an archive; the format follows the archive's extension
    Archive {
        source: String,
        archive: String,

        /// Compression level
        #[arg(long)]
        level: Option<u32>,

        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Extract an archive into a directory
    Extract {
        archive: String,
        target: String,
        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Reconcile two directories
    Sync {
        source: String,
        target: String,

        /// toTarget, toSource or bidirectional
        #[arg(long, default_value = "totarget")]
        direction: SyncDirection,

        /// Delete entries that only exist on the side being updated
        #[arg(long)]
        delete_orphans: bool,

        #[command(flatten)]
        transfer: TransferArgs,
    },

    /// Run the requests listed in a TOML file
    Batch { file: PathBuf },
}

/// Flags shared by every transfer subcommand.
#[derive(Args)]
struct TransferArgs {
    /// low, normal, high or critical
    #[arg(short, long, default_value = "normal")]
    priority: Priority,

    /// Automatic retries after a transient failure
    #[arg(short, long)]
    retries: Option<u32>,

    /// Speed limit for this operation (e.g., "1MiB")
    #[arg(long)]
    op_limit: Option<String>,

    /// skip, overwrite, autoRename or abort
    #[arg(long)]
    on_conflict: Option<ConflictResolution>,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Contents of a `ferry batch` file.
#[derive(Debug, Deserialize)]
struct BatchFile {
    #[serde(default, rename = "request")]
    requests: Vec<TransferRequest>,
}

/// JSON report printed with `--format json`.
#[derive(Serialize)]
struct Report<'a> {
    statistics: &'a QueueStatistics,
    operations: &'a [Operation],
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let requests = build_requests(cli.command, &config.default_options)?;
    if requests.is_empty() {
        bail!("Nothing to do");
    }

    run(config, requests, cli.format).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FERRY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Default config file location.
fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ferry").join("config.toml"))
}

/// Read the config file (if any) and apply command-line overrides.
fn load_config(cli: &Cli) -> Result<QueueConfig> {
    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => match config_path().filter(|p| p.is_file()) {
            Some(path) => read_config(&path)?,
            None => QueueConfig::default(),
        },
    };

    if let Some(concurrency) = cli.concurrency {
        if concurrency == 0 {
            bail!("--concurrency must be at least 1");
        }
        config.max_concurrent_transfers = concurrency;
    }
    if let Some(limit) = &cli.limit {
        config.global_speed_limit = Some(parse_size(limit)?);
    }
    Ok(config.sanitized())
}

fn read_config(path: &Path) -> Result<QueueConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

fn build_requests(command: Command, defaults: &OperationOptions) -> Result<Vec<TransferRequest>> {
    let single = |kind, source: String, target: Option<String>, args: TransferArgs| {
        let options = args.options(defaults)?;
        Ok::<_, color_eyre::Report>(
            TransferRequest::new(kind, source, target)
                .with_priority(args.priority)
                .with_options(options),
        )
    };

    let request = match command {
        Command::Copy {
            source,
            target,
            transfer,
        } => single(OperationKind::Copy, source, Some(target), transfer)?,
        Command::Move {
            source,
            target,
            transfer,
        } => single(OperationKind::Move, source, Some(target), transfer)?,
        Command::Delete {
            path,
            trash,
            transfer,
        } => {
            let mut request = single(OperationKind::Delete, path, None, transfer)?;
            if let Some(options) = request.options.as_mut() {
                options.use_recycle_bin = trash;
            }
            request
        }
        Command::Archive {
            source,
            archive,
            level,
            transfer,
        } => {
            let mut request = single(OperationKind::Archive, source, Some(archive), transfer)?;
            if let Some(options) = request.options.as_mut() {
                options.compression_level = level;
            }
            request
        }
        Command::Extract {
            archive,
            target,
            transfer,
        } => single(OperationKind::Extract, archive, Some(target), transfer)?,
        Command::Sync {
            source,
            target,
            direction,
            delete_orphans,
            transfer,
        } => {
            let mut request = single(OperationKind::Sync, source, Some(target), transfer)?;
            if let Some(options) = request.options.as_mut() {
                options.sync_direction = direction;
                options.sync_delete_orphans = delete_orphans;
            }
            request
        }
        Command::Batch { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let batch: BatchFile = toml::from_str(&content)
                .with_context(|| format!("Invalid batch file {}", file.display()))?;
            return Ok(batch.requests);
        }
    };

    Ok(vec![request])
}

impl TransferArgs {
    fn options(&self, defaults: &OperationOptions) -> Result<OperationOptions> {
        let mut options = defaults.clone();
        if let Some(retries) = self.retries {
            options.max_retries = retries;
        }
        if let Some(limit) = &self.op_limit {
            options.speed_limit = Some(parse_size(limit)?);
        }
        if let Some(resolution) = self.on_conflict {
            options.conflict_resolution = resolution;
        }
        Ok(options)
    }
}

/// Whether any operation still has to run, including ones scheduled for later.
fn has_outstanding_work(scheduler: &Scheduler) -> bool {
    !scheduler
        .get_by_status(&[
            OperationStatus::Pending,
            OperationStatus::Queued,
            OperationStatus::Running,
        ])
        .is_empty()
}

/// Submit everything, run the queue until it drains, then report.
async fn run(config: QueueConfig, requests: Vec<TransferRequest>, format: OutputFormat) -> Result<()> {
    let scheduler = Scheduler::new(config);
    let mut events = BroadcastStream::new(scheduler.subscribe());

    for request in requests {
        let source = request.source.clone();
        let op = scheduler
            .submit(request)
            .await
            .with_context(|| format!("Rejected {source}"))?;
        eprintln!(
            "Queued {} {} {} ({}, {} files)",
            op.id,
            op.kind,
            op.source_path,
            format_size(op.total_bytes),
            op.total_files
        );
    }

    scheduler.start()?;
    let started = Instant::now();
    let mut last_progress: Option<Instant> = None;

    while let Some(event) = events.next().await {
        // Lagged receivers only miss progress ticks worth skipping.
        let Ok(event) = event else {
            continue;
        };
        match event {
            QueueEvent::Started { operation } => {
                eprintln!("Started {} {}", operation.id, operation.source_path);
            }
            QueueEvent::ProgressChanged { operation, .. } => {
                if last_progress.is_none_or(|at| at.elapsed() >= Duration::from_millis(500)) {
                    last_progress = Some(Instant::now());
                    print_progress(&operation);
                }
            }
            QueueEvent::Completed { operation } => {
                eprintln!(
                    "Completed {} ({} in {} files)",
                    operation.id,
                    format_size(operation.processed_bytes),
                    operation.processed_files
                );
            }
            QueueEvent::Failed {
                operation,
                will_retry,
                ..
            } => {
                eprintln!(
                    "Failed {}: {}{}",
                    operation.id,
                    operation.error_message.as_deref().unwrap_or("unknown error"),
                    if will_retry { " (will retry)" } else { "" }
                );
            }
            QueueEvent::Retrying { operation, delay } => {
                eprintln!(
                    "Retrying {} in {:.1}s (attempt {} of {})",
                    operation.id,
                    delay.as_secs_f64(),
                    operation.retry_count + 2,
                    operation.options.max_retries + 1
                );
            }
            QueueEvent::QueueEmpty if !has_outstanding_work(&scheduler) => break,
            QueueEvent::QueueEmpty => eprintln!("Waiting for scheduled operations"),
            _ => {}
        }
    }

    scheduler.stop().await?;

    let statistics = scheduler.get_statistics();
    let operations = scheduler.get_all();
    match format {
        OutputFormat::Text => print_report(&statistics, &operations, started.elapsed()),
        OutputFormat::Json => {
            let report = Report {
                statistics: &statistics,
                operations: &operations,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    if statistics.failed_operations > 0 {
        return Err(eyre!("{} operation(s) failed", statistics.failed_operations));
    }
    Ok(())
}

fn print_progress(op: &Operation) {
    let file = op
        .current_file
        .as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let eta = op
        .estimated_time_remaining
        .map(|eta| format!(", {}s left", eta.as_secs()))
        .unwrap_or_default();
    eprintln!(
        "  {} {:>5.1}% {}/s{} {}",
        op.id,
        op.percentage(),
        format_size(op.speed_bytes_per_second as u64),
        eta,
        truncate(&file, 40)
    );
}

fn print_report(stats: &QueueStatistics, operations: &[Operation], elapsed: Duration) {
    println!();
    println!("{}", "─".repeat(70));
    println!(
        " {} operations, {} of {} transferred in {:.2}s",
        stats.total_operations,
        format_size(stats.processed_bytes),
        format_size(stats.total_bytes),
        elapsed.as_secs_f64()
    );
    println!(
        " {} completed, {} failed, {} cancelled, {} paused",
        stats.completed_operations,
        stats.failed_operations,
        stats.cancelled_operations,
        stats.paused_operations
    );
    println!("{}", "─".repeat(70));

    for op in operations {
        let marker = match op.status {
            OperationStatus::Completed => "✓",
            OperationStatus::Failed => "✗",
            _ => "·",
        };
        println!(
            " {} {:<6} {:<8} {:<40} {:>10}",
            marker,
            op.id.to_string(),
            op.kind.to_string(),
            truncate(&op.source_path, 40),
            format_size(op.processed_bytes)
        );
        if let Some(message) = &op.error_message {
            println!("          {message}");
        }
    }
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 1).collect();
        format!("{kept}…")
    }
}

/// Parse a size string (e.g., "1KB", "10MB", "1MiB", "1G").
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let num: f64 = num
        .parse()
        .with_context(|| format!("Invalid size '{s}'"))?;

    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        other => bail!("Unknown size unit '{other}'"),
    };

    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("1MiB").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("1.5m").unwrap(), 1536 * 1024);
        assert_eq!(parse_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert!(parse_size("fast").is_err());
        assert!(parse_size("10XB").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-name", 6), "a-ver…");
    }

    #[test]
    fn test_batch_file() {
        let batch: BatchFile = toml::from_str(
            r#"
            [[request]]
            kind = "Copy"
            source = "/data/photos"
            target = "/backup"
            priority = "High"

            [[request]]
            kind = "Delete"
            source = "/tmp/scratch"
            "#,
        )
        .unwrap();

        assert_eq!(batch.requests.len(), 2);
        assert_eq!(batch.requests[0].kind, OperationKind::Copy);
        assert_eq!(batch.requests[0].priority, Priority::High);
        assert_eq!(batch.requests[1].target, None);
    }

    #[tokio::test]
    async fn test_scheduled_requests_count_as_outstanding() {
        let scheduler = Scheduler::new(QueueConfig::default());
        assert!(!has_outstanding_work(&scheduler));

        let dir = std::env::temp_dir();
        let op = scheduler
            .submit(
                TransferRequest::delete(dir.join("ferry-not-there").display().to_string())
                    .scheduled_for(chrono::Utc::now() + chrono::Duration::hours(1)),
            )
            .await
            .unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert!(has_outstanding_work(&scheduler));

        scheduler.cancel(op.id).unwrap();
        assert!(!has_outstanding_work(&scheduler));
    }

    #[test]
    fn test_cli_builds_request() {
        let cli = Cli::parse_from([
            "ferry", "-j", "2", "copy", "/a", "/b", "--priority", "high", "--retries", "1",
        ]);
        assert_eq!(cli.concurrency, Some(2));

        let requests = build_requests(cli.command, &OperationOptions::default()).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind, OperationKind::Copy);
        assert_eq!(requests[0].priority, Priority::High);
        assert_eq!(requests[0].options.as_ref().unwrap().max_retries, 1);
    }
}

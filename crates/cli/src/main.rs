use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use storage_sorter_core::{
    collect_doctor_info, load_config_or_default, resolve_roots, run_sweep, SorterConfig,
    SweepOptions, WatchCoordinator,
};
use storage_sorter_service::{ServiceStatus, SorterService};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "storage-sorter",
    version,
    about = "Keep download folders tidy: sort new files into category folders, drop duplicates and archive stale files."
)]
struct Cli {
    /// Configuration file. Defaults to the per-user config file when it exists.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr.
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Watch the target directories and organize files until interrupted.
    Run,
    /// Organize the files already present in the target directories once, then exit.
    Organize,
    /// Run one archival sweep now.
    Archive(ArchiveArgs),
    /// Show the resolved configuration and the state of every target directory.
    Doctor(DoctorArgs),
}

#[derive(Debug, Args)]
struct ArchiveArgs {
    /// Override the retention period in days.
    #[arg(long)]
    days: Option<u64>,
}

#[derive(Debug, Args)]
struct DoctorArgs {
    /// Print JSON instead of text.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;
    let config = load_config_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => run_agent_command(config),
        Commands::Organize => run_organize_command(config),
        Commands::Archive(args) => run_archive_command(config, args),
        Commands::Doctor(args) => run_doctor_command(&config, args),
    }
}

fn run_agent_command(config: SorterConfig) -> Result<()> {
    let service = SorterService::start(config)?;

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("failed to install Ctrl+C handler")?;
    info!("Press Ctrl+C to stop.");

    loop {
        match stop_rx.recv_timeout(Duration::from_millis(500)) {
            Ok(()) => {
                info!("Received Ctrl+C, stopping...");
                break;
            }
            Err(RecvTimeoutError::Timeout) if service.is_finished() => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let snapshot = service.shutdown()?;
    if snapshot.status == ServiceStatus::Failed {
        return Err(anyhow!(snapshot
            .error
            .unwrap_or_else(|| "organizer failed".to_string())));
    }
    if let Some(live) = snapshot.live {
        println!(
            "Stopped. Organized {} file(s) live, removed {} duplicate(s), {} failure(s).",
            live.moved, live.duplicates, live.failed
        );
    }
    Ok(())
}

fn run_organize_command(config: SorterConfig) -> Result<()> {
    let coordinator = WatchCoordinator::new(Arc::new(config))?;
    let summary = coordinator.scan_existing();
    println!(
        "Organized {} root(s): {} moved, {} duplicate(s) removed, {} ignored, {} failed.",
        coordinator.roots().len(),
        summary.moved,
        summary.duplicates,
        summary.ignored,
        summary.failed
    );
    if summary.failed > 0 {
        bail!("{} file(s) could not be organized", summary.failed);
    }
    Ok(())
}

fn run_archive_command(config: SorterConfig, args: ArchiveArgs) -> Result<()> {
    let mut settings = config.archive;
    if let Some(days) = args.days {
        settings.days = days;
    }
    let roots = resolve_roots(&config.target_directories)?;
    let summary = run_sweep(
        &roots,
        &config.categories,
        &SweepOptions::from_settings(&settings),
    );

    println!(
        "Archived {} file(s) in {} of {} director(ies), deleted {} original(s).",
        summary.files_archived,
        summary.directories_archived,
        summary.directories_visited,
        summary.files_deleted
    );
    for failure in &summary.failures {
        println!("- {failure}");
    }
    if !summary.failures.is_empty() {
        bail!("archival finished with {} failure(s)", summary.failures.len());
    }
    Ok(())
}

fn run_doctor_command(config: &SorterConfig, args: DoctorArgs) -> Result<()> {
    let info = collect_doctor_info(config);
    if args.json {
        let payload =
            serde_json::to_string_pretty(&info).context("failed to serialize doctor output")?;
        println!("{payload}");
        return Ok(());
    }

    println!("OS: {} ({})", info.os, info.arch);
    println!(
        "Config: {}",
        info.config_source.as_deref().unwrap_or("built-in defaults")
    );
    println!(
        "Categories: {} (fallback {})",
        info.categories.join(", "),
        info.default_category
    );
    println!(
        "Archive: enabled={} days={} every={}h",
        info.archive.enabled, info.archive.days, info.archive.interval_hours
    );
    println!(
        "Settle: delay={}ms stability_check={} rounds={}",
        info.settle.delay_ms, info.settle.stability_check, info.settle.max_rounds
    );
    println!("Target directories: {}", info.roots.len());
    for root in info.roots {
        println!(
            "- {} -> {} watched={} mount={} free={}",
            root.configured,
            root.resolved.as_deref().unwrap_or("(missing)"),
            root.watched,
            root.disk_mount.as_deref().unwrap_or("?"),
            root.free_space_bytes
                .map(human_bytes)
                .unwrap_or_else(|| "?".to_string())
        );
    }
    for note in info.notes {
        println!("Note: {}", note);
    }
    Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let Some(path) = log_file else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        return Ok(None);
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("--log-file must name a file: {}", path.display()))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&directory)
        .with_context(|| format!("failed to create log directory {}", directory.display()))?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Ok(Some(guard))
}

fn human_bytes(value: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if value == 0 {
        return "0 B".to_string();
    }
    let mut size = value as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.1} {}", UNITS[unit])
}

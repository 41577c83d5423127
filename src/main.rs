//! DocHandler - background conversion, renaming and filing of office documents
//!
//! Main entry point for the command-line application.
//!
//! # Overview
//!
//! Each file named on the command line becomes one organization task: it is renamed
//! (optionally tagged with a scope of work and a detected company name), converted to
//! PDF when it is an Office document, and filed into the destination folder.
//!
//! # Execution Flow
//!
//! 1. Load `DocHandler Config.yaml` from `DocHandler Data/`
//! 2. Initialize logging → logs/dochandler.<date> (debug and JSON from flags or config)
//! 3. Check `--scope` against the filename portion list and load the company list
//! 4. Create the tokio runtime that hosts the worker pool and the resource sweep
//! 5. Build the ledger, automation manager, conversion service and processor
//! 6. Enqueue one task per file and wait for every accepted task to resolve
//! 7. Stop the processor (drains, releases every resource) and log metrics
//! 8. Shutdown tokio runtime with 5s timeout

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use dochandler::automation::{AutomationManager, OfficeConnector, RetryPolicy};
use dochandler::logging::{self, LogOptions};
use dochandler::models::PRIORITY_INTERACTIVE;
use dochandler::processor::ProcessorEvent;
use dochandler::{
    APP_NAME, BackgroundProcessor, ConfigManager, ConversionService, EnqueueOutcome, Metrics,
    ResourceLedger, Task, TaskKind, TaskOutput, VERSION,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

/// Convert, rename and file office documents
#[derive(Parser, Debug)]
#[command(name = "dochandler", version, about)]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = dochandler::config::DEFAULT_CONFIG_DIR)]
    config_dir: Utf8PathBuf,

    /// Destination folder (defaults to "Default Save Dir" from the config)
    #[arg(long)]
    dest: Option<Utf8PathBuf>,

    /// Scope-of-work filename portion, e.g. "02-4100 - Demolition"
    #[arg(long)]
    scope: Option<String>,

    /// Convert Word and Excel documents to PDF
    #[arg(long)]
    convert: bool,

    /// Debug-level logging (also "Debug Mode" in the config)
    #[arg(long)]
    debug: bool,

    /// Write logs as JSON lines (also "Json Logs" in the config)
    #[arg(long)]
    json_logs: bool,

    /// Files to process
    #[arg(required = true)]
    files: Vec<Utf8PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging options come partly from the config, so it is read first
    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let settings = config_manager.load_user_config()?.settings;

    let _log_guard = logging::init(
        LogOptions {
            debug_mode: cli.debug,
            json: cli.json_logs,
            ..LogOptions::new(Utf8Path::new("logs"), "dochandler")
        }
        .with_console(true)
        .with_settings(&settings),
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    tracing::info!("Using configuration from {}", config_manager.config_dir());

    let dest = match cli.dest.clone() {
        Some(dest) => dest,
        None if !settings.default_save_dir.is_empty() => Utf8PathBuf::from(&settings.default_save_dir),
        None => bail!("No destination folder: pass --dest or set \"Default Save Dir\""),
    };
    if let Some(scope) = &cli.scope {
        check_scope(&config_manager, scope)?;
    }
    let companies = Arc::new(config_manager.load_company_names()?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("dochandler-worker")
        .build()?;

    let metrics = Arc::new(Metrics::new());
    let ledger = Arc::new(ResourceLedger::with_metrics(
        settings.resource_max_age(),
        Arc::clone(&metrics),
    ));
    let automation = AutomationManager::new(
        Arc::new(OfficeConnector::from_settings(&settings)),
        Arc::clone(&ledger),
    )
    .with_policy(RetryPolicy::new(settings.engine_retries, settings.engine_retry_delay()))
    .with_metrics(Arc::clone(&metrics));
    let service = Arc::new(
        ConversionService::new(Arc::new(automation)).with_engine_visible(settings.engine_visible),
    );

    let processor = BackgroundProcessor::builder(runtime.handle().clone())
        .settings(&settings)
        .ledger(ledger)
        .metrics(Arc::clone(&metrics))
        .build();
    let mut events = processor.subscribe();
    processor.start().context("Failed to start background processor")?;

    let mut accepted = 0;
    for file in &cli.files {
        let task = organize_task(
            Arc::clone(&service),
            file.clone(),
            dest.clone(),
            cli.scope.clone(),
            Arc::clone(&companies),
            config_manager.clone(),
            cli.convert,
        );
        match processor.enqueue(task) {
            EnqueueOutcome::Accepted => accepted += 1,
            EnqueueOutcome::Duplicate => tracing::info!("Skipping duplicate: {}", file),
            EnqueueOutcome::Closed => tracing::warn!("Processor closed, not queued: {}", file),
        }
    }
    tracing::info!("Queued {} of {} file(s)", accepted, cli.files.len());

    let mut resolved = 0;
    let mut failed = 0;
    while resolved < accepted {
        match events.blocking_recv() {
            Ok(ProcessorEvent::Completed { kind, output }) => {
                resolved += 1;
                println!("ok     {}: {}", kind, output);
            }
            Ok(ProcessorEvent::Failed { kind, message }) => {
                resolved += 1;
                failed += 1;
                eprintln!("failed {}: {}", kind, message);
            }
            // Progress travels on its own channel
            Ok(ProcessorEvent::Progress { .. }) => {}
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!("Missed {} processor event(s)", missed);
                resolved = metrics.tasks_resolved();
                failed = metrics.tasks_failed.load(std::sync::atomic::Ordering::Relaxed);
            }
            Err(RecvError::Closed) => break,
        }
    }

    let dropped = processor.stop();
    if dropped > 0 {
        tracing::warn!("{} task(s) were never processed", dropped);
    }
    metrics.log_summary();

    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Application shutdown complete");

    if failed > 0 {
        bail!("{} of {} file(s) failed", failed, accepted);
    }
    Ok(())
}

/// Build the organization task for one dropped file
fn organize_task(
    service: Arc<ConversionService>,
    file: Utf8PathBuf,
    dest: Utf8PathBuf,
    scope: Option<String>,
    companies: Arc<Vec<String>>,
    config: ConfigManager,
    convert: bool,
) -> Task {
    let target = file.clone();
    Task::new(TaskKind::Organization, move || {
        let filed = service.organize(&file, &dest, scope.as_deref(), &companies, convert)?;
        if let Some(name) = &filed.new_company {
            if let Err(e) = config.add_company_name(name) {
                tracing::warn!("Could not save company name {}: {:#}", name, e);
            }
        }
        Ok(TaskOutput::Path(filed.path))
    })
    .with_priority(PRIORITY_INTERACTIVE)
    .with_target_path(target)
    .on_complete(|output| tracing::info!("Filed as {}", output))
}

/// Warn about a scope missing from the filename portion list, and remember it
fn check_scope(config_manager: &ConfigManager, scope: &str) -> Result<()> {
    let portions = config_manager.load_file_name_portions()?;
    if portions.iter().any(|portion| portion.eq_ignore_ascii_case(scope.trim())) {
        return Ok(());
    }

    tracing::warn!("Scope {:?} is not in the filename portion list", scope);
    config_manager.add_file_name_portion(scope)?;
    Ok(())
}

use crate::models::DocHandlerSettings;
use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Where and how log output is written
#[derive(Debug, Clone)]
pub struct LogOptions<'a> {
    /// Directory for the daily log files (e.g., "logs")
    pub log_dir: &'a Utf8Path,
    /// Prefix for log file names (e.g., "dochandler")
    pub log_prefix: &'a str,
    /// Use debug level instead of info
    pub debug_mode: bool,
    /// Also log to the console
    pub console_output: bool,
    /// Write log lines as JSON objects
    pub json: bool,
}

impl<'a> LogOptions<'a> {
    /// Info-level file logging only
    pub fn new(log_dir: &'a Utf8Path, log_prefix: &'a str) -> Self {
        Self {
            log_dir,
            log_prefix,
            debug_mode: false,
            console_output: false,
            json: false,
        }
    }

    pub fn with_console(mut self, console_output: bool) -> Self {
        self.console_output = console_output;
        self
    }

    /// Turn on debug level and JSON output when the settings ask for them.
    ///
    /// Options already switched on (e.g. from command-line flags) stay on.
    pub fn with_settings(mut self, settings: &DocHandlerSettings) -> Self {
        self.debug_mode |= settings.debug_mode;
        self.json |= settings.json_logs;
        self
    }
}

/// Setup logging with rotating file appender.
///
/// Logs are written to the specified directory with daily rotation.
///
/// # Arguments
/// * `log_dir` - Directory for log files (e.g., "logs")
/// * `log_prefix` - Prefix for log files (e.g., "dochandler")
/// * `debug_mode` - If true, use debug level; otherwise use info level
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging active
pub fn setup_logging(log_dir: &Utf8Path, log_prefix: &str, debug_mode: bool) -> Result<WorkerGuard> {
    init(LogOptions {
        debug_mode,
        ..LogOptions::new(log_dir, log_prefix)
    })
}

/// Install the global subscriber described by `options`
pub fn init(options: LogOptions<'_>) -> Result<WorkerGuard> {
    ensure_log_dir(options.log_dir)?;

    let file_appender = rolling::daily(options.log_dir, options.log_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = options.console_output.then(|| console_layer(options.json));

    tracing_subscriber::registry()
        .with(file_layer(non_blocking, options.json))
        .with(console_layer)
        .with(env_filter(options.debug_mode))
        .try_init()
        .context("Failed to install global log subscriber")?;

    tracing::info!(
        "Logging initialized: dir={}, prefix={}, debug={}, console={}, json={}",
        options.log_dir,
        options.log_prefix,
        options.debug_mode,
        options.console_output,
        options.json
    );

    Ok(guard)
}

/// Plain or JSON layer for a log file writer
fn file_layer<S, W>(writer: W, json: bool) -> BoxedLayer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false) // No ANSI codes in log files
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    if json { layer.json().boxed() } else { layer.boxed() }
}

fn console_layer<S>(json: bool) -> BoxedLayer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let layer = tracing_subscriber::fmt::layer().with_target(false);
    if json {
        layer.json().boxed()
    } else {
        layer.with_ansi(true).boxed()
    }
}

/// `RUST_LOG` when set, otherwise debug or info
pub fn env_filter(debug_mode: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_mode {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    })
}

fn ensure_log_dir(log_dir: &Utf8Path) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }
    Ok(())
}

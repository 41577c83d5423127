use super::{AutomationEngine, AutomationError, EngineConnector, EngineKind, ExportFormat};
use crate::models::DocHandlerSettings;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::process::Command;
use tokio::time::timeout;

/// Executable names searched on PATH when no office executable is configured
const PROGRAM_CANDIDATES: &[&str] = &["soffice", "libreoffice", "soffice.exe"];

/// Connector for a headless, LibreOffice-compatible office suite.
///
/// Each connection is a separate engine instance with its own private user profile, so
/// concurrent conversions never contend for the suite's profile lock.
#[derive(Debug, Clone)]
pub struct OfficeConnector {
    /// Explicitly configured executable; PATH is searched when `None`
    program: Option<Utf8PathBuf>,
    timeout: Duration,
}

impl OfficeConnector {
    pub fn new(program: Option<Utf8PathBuf>, timeout: Duration) -> Self {
        Self { program, timeout }
    }

    pub fn from_settings(settings: &DocHandlerSettings) -> Self {
        let program = if settings.office_executable.is_empty() {
            None
        } else {
            Some(Utf8PathBuf::from(&settings.office_executable))
        };
        Self::new(program, settings.conversion_timeout())
    }

    /// Locate the office executable
    pub fn resolve_program(&self) -> Option<Utf8PathBuf> {
        if let Some(program) = &self.program {
            return program.is_file().then(|| program.clone());
        }

        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .filter_map(|dir| Utf8PathBuf::from_path_buf(dir).ok())
            .flat_map(|dir| PROGRAM_CANDIDATES.iter().map(move |name| dir.join(name)))
            .find(|candidate| candidate.is_file())
    }
}

impl EngineConnector for OfficeConnector {
    // Subprocess engines need no per-thread automation environment
    fn initialize_environment(&self) -> Result<(), AutomationError> {
        Ok(())
    }

    fn uninitialize_environment(&self) {}

    fn connect(&self, kind: EngineKind) -> Result<Box<dyn AutomationEngine>, AutomationError> {
        if kind == EngineKind::MailClient {
            return Err(AutomationError::Unsupported(kind));
        }

        let program = self.resolve_program().ok_or_else(|| AutomationError::Unavailable {
            kind,
            reason: match &self.program {
                Some(program) => format!("office executable not found at {}", program),
                None => "no office executable found on PATH".to_string(),
            },
        })?;

        let engine = OfficeEngine::new(kind, program, self.timeout)?;
        tracing::debug!("Started {} engine with profile {}", kind, engine.profile_dir().unwrap_or(Utf8Path::new("?")));
        Ok(Box::new(engine))
    }
}

/// One headless office instance
pub struct OfficeEngine {
    kind: EngineKind,
    program: Utf8PathBuf,
    profile: Option<TempDir>,
    timeout: Duration,
    visible: bool,
}

impl OfficeEngine {
    pub fn new(kind: EngineKind, program: Utf8PathBuf, timeout: Duration) -> Result<Self, AutomationError> {
        let profile = tempfile::Builder::new()
            .prefix("dochandler_profile_")
            .tempdir()?;

        Ok(Self {
            kind,
            program,
            profile: Some(profile),
            timeout,
            visible: false,
        })
    }

    /// Private user profile directory; `None` once the engine has quit
    pub fn profile_dir(&self) -> Option<&Utf8Path> {
        self.profile
            .as_ref()
            .and_then(|profile| Utf8Path::from_path(profile.path()))
    }

    /// Build the argument list for converting `source` into `outdir`
    ///
    /// The suite names its output `<outdir>/<source stem>.<extension>`.
    pub fn build_export_args(&self, source: &Utf8Path, outdir: &Utf8Path, format: ExportFormat) -> Vec<String> {
        let mut args = Vec::new();

        if !self.visible {
            args.push("--headless".to_string());
        }
        args.extend(
            ["--norestore", "--nolockcheck", "--nologo", "--nodefault"]
                .iter()
                .map(|s| s.to_string()),
        );

        if let Some(profile) = self.profile_dir() {
            args.push(format!("-env:UserInstallation={}", file_url(profile)));
        }

        let filter = match format {
            ExportFormat::Pdf => "pdf",
            ExportFormat::PlainText => "txt:Text",
        };
        args.push("--convert-to".to_string());
        args.push(filter.to_string());
        args.push("--outdir".to_string());
        args.push(outdir.to_string());
        args.push(source.to_string());

        args
    }

    /// Run the suite with `args`, bounded by the engine timeout
    fn run(&self, args: &[String]) -> Result<(), AutomationError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            AutomationError::Operation("no async runtime available for engine subprocess".into())
        })?;

        tracing::info!("Executing: {} {}", self.program, args.join(" "));
        let start = Instant::now();

        let mut cmd = Command::new(self.program.as_std_path());
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = handle
            .block_on(async { timeout(self.timeout, cmd.output()).await })
            .map_err(|_| {
                tracing::warn!("{} engine timed out after {:?}", self.kind, self.timeout);
                AutomationError::Timeout(self.timeout)
            })??;

        tracing::info!(
            "{} engine finished in {:.2}s with {}",
            self.kind,
            start.elapsed().as_secs_f32(),
            output.status
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AutomationError::Operation(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

impl AutomationEngine for OfficeEngine {
    fn configure(&mut self, visible: bool) -> Result<(), AutomationError> {
        self.visible = visible;
        Ok(())
    }

    fn export(&mut self, source: &Utf8Path, target: &Utf8Path, format: ExportFormat) -> Result<(), AutomationError> {
        if self.profile.is_none() {
            return Err(AutomationError::Reclaimed);
        }
        if self.kind == EngineKind::Spreadsheet && format == ExportFormat::PlainText {
            return Err(AutomationError::Operation(
                "spreadsheets cannot be exported as plain text".into(),
            ));
        }

        let outdir = target.parent().unwrap_or(Utf8Path::new("."));
        let stem = source
            .file_stem()
            .ok_or_else(|| AutomationError::Operation(format!("{} has no file name", source)))?;
        let produced = outdir.join(format!("{}.{}", stem, format.extension()));

        let args = self.build_export_args(source, outdir, format);
        self.run(&args)?;

        if !produced.exists() {
            return Err(AutomationError::Operation(format!(
                "engine reported success but wrote no {}",
                produced
            )));
        }
        if produced != target {
            fs::rename(&produced, target)?;
        }

        Ok(())
    }

    fn quit(&mut self) -> Result<(), AutomationError> {
        if let Some(profile) = self.profile.take() {
            profile.close()?;
        }
        Ok(())
    }
}

fn file_url(path: &Utf8Path) -> String {
    let normalized = path.as_str().replace('\\', "/");
    if normalized.starts_with('/') {
        format!("file://{}", normalized)
    } else {
        format!("file:///{}", normalized)
    }
}

//! Automation engines - scoped access to external document engines.
//!
//! Word-processor, spreadsheet and mail-client engines are single-instance external
//! programs that fail in ways ordinary library calls do not: they can refuse a connection
//! while still starting, hang on shutdown, or disappear mid-operation. This module wraps
//! them in two seams:
//!
//! - [`EngineConnector`]: creates one engine instance of a given [`EngineKind`] and owns
//!   the per-thread automation environment around it
//! - [`AutomationEngine`]: the live instance; configured, used for exports, then told to quit
//!
//! [`AutomationManager`] acquires engines through a connector with exponential backoff and
//! hands out an [`AutomationSession`] guard. The guard registers the engine with the
//! [`ResourceLedger`](crate::resources::ResourceLedger) and always quits it on drop.
//!
//! [`OfficeConnector`] is the bundled connector, driving a headless office suite.

pub mod office;
pub mod session;

use camino::Utf8Path;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

pub use office::OfficeConnector;
pub use session::{AutomationManager, AutomationSession, RetryPolicy};

/// Kind of external engine a session talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    WordProcessor,
    Spreadsheet,
    MailClient,
}

impl EngineKind {
    /// Automation program identifier for the engine
    pub fn program_id(&self) -> &'static str {
        match self {
            EngineKind::WordProcessor => "Word.Application",
            EngineKind::Spreadsheet => "Excel.Application",
            EngineKind::MailClient => "Outlook.Application",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program_id())
    }
}

/// Output format requested from an engine export
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Pdf,
    PlainText,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::PlainText => "txt",
        }
    }
}

/// Errors that can occur while acquiring or driving an engine
#[derive(Error, Debug)]
pub enum AutomationError {
    /// Connection refused or engine not (yet) reachable; retried by the manager
    #[error("{kind} is unavailable: {reason}")]
    Unavailable { kind: EngineKind, reason: String },

    #[error("{0} is not supported by this connector")]
    Unsupported(EngineKind),

    #[error("Engine handle was reclaimed before the operation finished")]
    Reclaimed,

    #[error("Engine operation failed: {0}")]
    Operation(String),

    #[error("Engine did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AutomationError {
    /// Whether another connection attempt might succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AutomationError::Unavailable { .. } | AutomationError::Timeout(_) | AutomationError::Io(_)
        )
    }
}

/// One live external engine instance
#[cfg_attr(test, automock)]
pub trait AutomationEngine: Send {
    /// Set visibility and turn interactive alerts off
    fn configure(&mut self, visible: bool) -> Result<(), AutomationError>;

    /// Open `source` and write it to `target` in `format`
    fn export(
        &mut self,
        source: &Utf8Path,
        target: &Utf8Path,
        format: ExportFormat,
    ) -> Result<(), AutomationError>;

    /// Ask the engine to shut down
    fn quit(&mut self) -> Result<(), AutomationError>;
}

/// Creates engine instances and manages the automation environment they need
#[cfg_attr(test, automock)]
pub trait EngineConnector: Send + Sync {
    /// Prepare the calling thread for automation calls
    fn initialize_environment(&self) -> Result<(), AutomationError>;

    /// Undo [`initialize_environment`](Self::initialize_environment) on the calling thread
    fn uninitialize_environment(&self);

    /// Start (or connect to) a fresh engine instance
    fn connect(&self, kind: EngineKind) -> Result<Box<dyn AutomationEngine>, AutomationError>;
}

/// Engine slot shared between a session and the ledger.
///
/// Whichever side reclaims first takes the engine out, so quit runs at most once.
pub type SharedEngine = Arc<Mutex<Option<Box<dyn AutomationEngine>>>>;

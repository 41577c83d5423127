// DocHandler - background conversion, renaming and filing of dropped office documents
//
// This is the library crate containing the task processor, the resource ledger, the
// automation sessions and the document services.
// The binary crate (main.rs) provides the command-line entry point.

pub mod automation;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod processor;
pub mod resources;
pub mod services;

// Re-export commonly used types for convenience
pub use automation::{AutomationManager, AutomationSession, OfficeConnector, RetryPolicy};
pub use config::ConfigManager;
pub use metrics::Metrics;
pub use models::{DocHandlerSettings, Task, TaskKind, TaskOutput, UserConfig};
pub use processor::{BackgroundProcessor, EnqueueOutcome, ProcessorEvent};
pub use resources::ResourceLedger;
pub use services::{ConversionService, FilingService};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

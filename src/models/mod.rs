//! Data models for the DocHandler background core.
//!
//! - [`Task`]: a typed unit of background work bound to an optional target file
//! - [`TaskKind`] / [`TaskOutput`]: what a task does and what it produces
//! - [`UserConfig`]: processor, resource and engine settings loaded from `DocHandler Config.yaml`

pub mod config;
pub mod task;

pub use config::{DocHandlerSettings, UserConfig};
pub use task::{
    PRIORITY_BACKGROUND, PRIORITY_INTERACTIVE, Task, TaskBody, TaskCallback, TaskKind, TaskOutput,
};

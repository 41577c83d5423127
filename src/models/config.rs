use serde::{Deserialize, Serialize};
use std::time::Duration;

/// User configuration from DocHandler Config.yaml
///
/// Contains the processor, resource and engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(rename = "DocHandler_Settings")]
    pub settings: DocHandlerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocHandlerSettings {
    /// Worker pool size; 0 means one slot per CPU core
    #[serde(rename = "Max Workers", default)]
    pub max_workers: usize,

    #[serde(rename = "Poll Interval Ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(rename = "Resource Max Age Secs", default = "default_resource_max_age_secs")]
    pub resource_max_age_secs: u64,

    #[serde(rename = "Sweep Interval Secs", default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(rename = "Engine Retries", default = "default_engine_retries")]
    pub engine_retries: u32,

    #[serde(rename = "Engine Retry Delay Ms", default = "default_engine_retry_delay_ms")]
    pub engine_retry_delay_ms: u64,

    #[serde(rename = "Engine Visible", default)]
    pub engine_visible: bool,

    #[serde(rename = "Office Executable", default)]
    pub office_executable: String,

    #[serde(rename = "Conversion Timeout Secs", default = "default_conversion_timeout_secs")]
    pub conversion_timeout_secs: u64,

    #[serde(rename = "Default Save Dir", default)]
    pub default_save_dir: String,

    #[serde(rename = "Debug Mode", default)]
    pub debug_mode: bool,

    /// Write log lines as JSON objects
    #[serde(rename = "Json Logs", default)]
    pub json_logs: bool,
}

impl Default for DocHandlerSettings {
    fn default() -> Self {
        Self {
            max_workers: 0,
            poll_interval_ms: default_poll_interval_ms(),
            resource_max_age_secs: default_resource_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            engine_retries: default_engine_retries(),
            engine_retry_delay_ms: default_engine_retry_delay_ms(),
            engine_visible: false,
            office_executable: String::new(),
            conversion_timeout_secs: default_conversion_timeout_secs(),
            default_save_dir: String::new(),
            debug_mode: false,
            json_logs: false,
        }
    }
}

impl DocHandlerSettings {
    /// Effective worker pool size
    pub fn worker_count(&self) -> usize {
        if self.max_workers > 0 {
            self.max_workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn resource_max_age(&self) -> Duration {
        Duration::from_secs(self.resource_max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn engine_retry_delay(&self) -> Duration {
        Duration::from_millis(self.engine_retry_delay_ms)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_resource_max_age_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_engine_retries() -> u32 {
    3
}

fn default_engine_retry_delay_ms() -> u64 {
    1000
}

fn default_conversion_timeout_secs() -> u64 {
    300
}

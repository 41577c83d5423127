// Performance metrics module
//
// Lightweight counters for the background processor and the resource ledger

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Processor and resource metrics
///
/// Uses atomic operations for thread-safe metric tracking without locks.
/// Shared between the dispatcher, the automation manager and the resource ledger
/// and logged on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Tasks whose body returned a result
    pub tasks_completed: AtomicUsize,

    /// Tasks whose body failed or panicked
    pub tasks_failed: AtomicUsize,

    /// Queued tasks dropped by `stop()`
    pub tasks_dropped: AtomicUsize,

    /// Enqueue attempts rejected because the target file was already tracked
    pub duplicates_rejected: AtomicUsize,

    /// Total task body time in milliseconds
    pub total_task_time_ms: AtomicU64,

    /// Failed engine connection attempts that were retried
    pub engine_retries: AtomicU64,

    /// Resources reclaimed by scoped release, sweep or release_all
    pub resources_reclaimed: AtomicU64,

    /// Reclamation attempts that logged an error
    pub reclaim_failures: AtomicU64,

    /// Creation time
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tasks_completed: AtomicUsize::new(0),
            tasks_failed: AtomicUsize::new(0),
            tasks_dropped: AtomicUsize::new(0),
            duplicates_rejected: AtomicUsize::new(0),
            total_task_time_ms: AtomicU64::new(0),
            engine_retries: AtomicU64::new(0),
            resources_reclaimed: AtomicU64::new(0),
            reclaim_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_task_completed(&self, duration: Duration) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.record_task_time(duration);
    }

    pub fn record_task_failed(&self, duration: Duration) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.record_task_time(duration);
    }

    pub fn record_task_dropped(&self) {
        self.tasks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_rejected(&self) {
        self.duplicates_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_engine_retry(&self) {
        self.engine_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resource_reclaimed(&self) {
        self.resources_reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reclaim_failure(&self) {
        self.reclaim_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_task_time(&self, duration: Duration) {
        self.total_task_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Tasks that reached a terminal event (completed or failed)
    pub fn tasks_resolved(&self) -> usize {
        self.tasks_completed.load(Ordering::Relaxed) + self.tasks_failed.load(Ordering::Relaxed)
    }

    /// Average body time per resolved task in milliseconds
    pub fn avg_task_time_ms(&self) -> f64 {
        let total = self.total_task_time_ms.load(Ordering::Relaxed);
        let count = self.tasks_resolved();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Processing Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Tasks: {} completed, {} failed, {} dropped, {} duplicates rejected",
            self.tasks_completed.load(Ordering::Relaxed),
            self.tasks_failed.load(Ordering::Relaxed),
            self.tasks_dropped.load(Ordering::Relaxed),
            self.duplicates_rejected.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Total task time: {:.2}s (avg: {:.2}ms per task)",
            self.total_task_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_task_time_ms()
        );
        tracing::info!(
            "Resources reclaimed: {}, reclaim failures: {}, engine retries: {}",
            self.resources_reclaimed.load(Ordering::Relaxed),
            self.reclaim_failures.load(Ordering::Relaxed),
            self.engine_retries.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

use super::events::ProcessorEvent;
use super::pool::{WorkerPool, panic_message};
use super::queue::TaskQueue;
use crate::metrics::Metrics;
use crate::models::Task;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

pub(crate) const DISPATCHER_THREAD_NAME: &str = "dochandler-dispatcher";

/// Control loop that moves tasks from the queue into the worker pool, one at a time
pub(crate) struct Dispatcher {
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) events: broadcast::Sender<ProcessorEvent>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) poll_interval: Duration,
}

impl Dispatcher {
    /// Run the loop on its own named thread
    pub(crate) fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(DISPATCHER_THREAD_NAME.to_string())
            .spawn(move || self.run())
    }

    fn run(self) {
        tracing::info!("Dispatcher started");

        while self.running.load(Ordering::SeqCst) {
            // Timeout is only a liveness check on the running flag
            if let Some(task) = self.queue.dequeue_blocking(self.poll_interval) {
                self.dispatch(task);
            }
        }

        tracing::info!("Dispatcher stopped");
    }

    fn dispatch(&self, task: Task) {
        let kind = task.kind;
        let target = task.target_path.clone();
        let (body, callback) = task.into_parts();

        match &target {
            Some(path) => tracing::debug!("Dispatching {} task for {}", kind, path),
            None => tracing::debug!("Dispatching {} task", kind),
        }

        let start = Instant::now();
        let result = self.pool.execute(body);
        let elapsed = start.elapsed();

        // Resolved either way; the file may be queued again
        if let Some(path) = &target {
            self.queue.release(path);
        }

        let event = match result {
            Ok(output) => {
                self.metrics.record_task_completed(elapsed);
                tracing::info!(
                    "{} task completed in {:.2}s: {}",
                    kind,
                    elapsed.as_secs_f32(),
                    output
                );

                if let Some(callback) = callback {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&output))) {
                        tracing::error!(
                            "Completion callback for {} task panicked: {}",
                            kind,
                            panic_message(payload)
                        );
                    }
                }

                ProcessorEvent::Completed { kind, output }
            }
            Err(err) => {
                self.metrics.record_task_failed(elapsed);
                let message = err.message();
                tracing::error!("{} task failed: {}", kind, message);
                ProcessorEvent::Failed { kind, message }
            }
        };

        if self.events.send(event).is_err() {
            tracing::debug!("No event subscribers for {} task outcome", kind);
        }
    }
}

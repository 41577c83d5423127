//! Background processor - prioritized, deduplicated execution of document tasks.
//!
//! Callers hand [`Task`]s to [`BackgroundProcessor::enqueue`] and react to
//! [`ProcessorEvent`]s; they never run conversion work themselves.
//!
//! Internally:
//! - [`TaskQueue`]: priority heap plus target-path dedup set under one mutex
//! - dispatcher: a dedicated thread that dequeues one task at a time and waits for it
//! - [`WorkerPool`]: bounded slots on the tokio blocking pool
//!
//! `stop()` drains whatever is still queued (each dropped task is logged), waits for
//! running work and reclaims every resource left in the ledger.

mod dispatcher;
pub mod events;
pub mod pool;
pub mod queue;

pub use events::{EVENT_CHANNEL_CAPACITY, ProcessorEvent, ProgressReporter};
pub use pool::{TaskError, WorkerPool};
pub use queue::{EnqueueOutcome, TaskQueue};

use crate::metrics::Metrics;
use crate::models::{DocHandlerSettings, Task, TaskBody, TaskOutput};
use crate::resources::ResourceLedger;
use dispatcher::Dispatcher;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};

/// Default wait between running-flag checks in the dispatcher
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default period of the background resource sweep
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Lifecycle of a [`BackgroundProcessor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Built, accepting tasks, nothing dispatched yet
    Idle,
    Running,
    /// Stopped for good
    Stopped,
}

struct Lifecycle {
    state: ProcessorState,
    dispatcher: Option<thread::JoinHandle<()>>,
    sweeper_shutdown: Option<watch::Sender<bool>>,
    sweeper: Option<tokio::task::JoinHandle<()>>,
}

/// Builder for [`BackgroundProcessor`]
pub struct ProcessorBuilder {
    handle: Handle,
    workers: usize,
    poll_interval: Duration,
    sweep_interval: Duration,
    ledger: Option<Arc<ResourceLedger>>,
    metrics: Option<Arc<Metrics>>,
}

impl ProcessorBuilder {
    /// Number of worker slots (default: available CPU cores)
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Period of the resource sweep (never zero)
    pub fn sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval.max(Duration::from_millis(1));
        self
    }

    pub fn ledger(mut self, ledger: Arc<ResourceLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Apply worker count and intervals from user settings
    pub fn settings(self, settings: &DocHandlerSettings) -> Self {
        self.workers(settings.worker_count())
            .poll_interval(settings.poll_interval())
            .sweep_interval(settings.sweep_interval())
    }

    pub fn build(self) -> BackgroundProcessor {
        let metrics = self.metrics.unwrap_or_default();
        let ledger = self.ledger.unwrap_or_else(|| {
            Arc::new(ResourceLedger::with_metrics(
                crate::resources::DEFAULT_MAX_RESOURCE_AGE,
                Arc::clone(&metrics),
            ))
        });
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (progress, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        BackgroundProcessor {
            queue: Arc::new(TaskQueue::new()),
            pool: Arc::new(WorkerPool::new(self.handle.clone(), self.workers)),
            ledger,
            metrics,
            events,
            progress,
            running: Arc::new(AtomicBool::new(false)),
            lifecycle: Mutex::new(Lifecycle {
                state: ProcessorState::Idle,
                dispatcher: None,
                sweeper_shutdown: None,
                sweeper: None,
            }),
            handle: self.handle,
            poll_interval: self.poll_interval,
            sweep_interval: self.sweep_interval,
        }
    }
}

/// Owner of the queue, dispatcher, worker pool and periodic resource sweep.
///
/// `start()` and `stop()` block on the runtime behind the given [`Handle`], so they
/// must be called from a plain thread (for example `main`), not from async code.
///
/// # Example
/// ```ignore
/// let runtime = tokio::runtime::Runtime::new()?;
/// let processor = BackgroundProcessor::builder(runtime.handle().clone()).workers(4).build();
/// let mut events = processor.subscribe();
/// processor.start()?;
/// processor.enqueue(Task::new(TaskKind::Conversion, move || convert(&path)).with_target_path(path));
/// // ... react to events ...
/// processor.stop();
/// ```
pub struct BackgroundProcessor {
    queue: Arc<TaskQueue>,
    pool: Arc<WorkerPool>,
    ledger: Arc<ResourceLedger>,
    metrics: Arc<Metrics>,
    events: broadcast::Sender<ProcessorEvent>,
    progress: broadcast::Sender<ProcessorEvent>,
    running: Arc<AtomicBool>,
    lifecycle: Mutex<Lifecycle>,
    handle: Handle,
    poll_interval: Duration,
    sweep_interval: Duration,
}

impl BackgroundProcessor {
    pub fn builder(handle: Handle) -> ProcessorBuilder {
        ProcessorBuilder {
            handle,
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            ledger: None,
            metrics: None,
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ProcessorState {
        self.lifecycle().state
    }

    /// Start the dispatcher thread and the periodic resource sweep.
    ///
    /// Calling it again while running, or after `stop()`, logs a warning and does nothing.
    pub fn start(&self) -> io::Result<()> {
        let mut lifecycle = self.lifecycle();

        match lifecycle.state {
            ProcessorState::Running => {
                tracing::warn!("Background processor is already running");
                return Ok(());
            }
            ProcessorState::Stopped => {
                tracing::warn!("Background processor was stopped and cannot be restarted");
                return Ok(());
            }
            ProcessorState::Idle => {}
        }

        self.running.store(true, Ordering::SeqCst);
        let dispatcher = Dispatcher {
            queue: Arc::clone(&self.queue),
            pool: Arc::clone(&self.pool),
            events: self.events.clone(),
            metrics: Arc::clone(&self.metrics),
            running: Arc::clone(&self.running),
            poll_interval: self.poll_interval,
        };
        let dispatcher = match dispatcher.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = self.handle.spawn(
            Arc::clone(&self.ledger).run_sweeper(self.sweep_interval, shutdown_rx),
        );

        lifecycle.dispatcher = Some(dispatcher);
        lifecycle.sweeper_shutdown = Some(shutdown_tx);
        lifecycle.sweeper = Some(sweeper);
        lifecycle.state = ProcessorState::Running;

        tracing::info!(
            "Background processor started with {} worker(s)",
            self.pool.size()
        );
        Ok(())
    }

    /// Stop processing and release everything the processor owns.
    ///
    /// Queued tasks that were never dispatched are dropped and each one is logged at
    /// warning level. Running work is waited for. Returns the number of dropped tasks.
    pub fn stop(&self) -> usize {
        let mut lifecycle = self.lifecycle();

        if lifecycle.state == ProcessorState::Stopped {
            tracing::debug!("Background processor already stopped");
            return 0;
        }

        tracing::info!("Stopping background processor");
        self.running.store(false, Ordering::SeqCst);
        self.queue.close();

        if let Some(dispatcher) = lifecycle.dispatcher.take() {
            if dispatcher.join().is_err() {
                tracing::error!("Dispatcher thread panicked");
            }
        }

        self.pool.shutdown();

        let dropped = self.drop_unprocessed();
        self.queue.clear_tracking();

        if let Some(shutdown) = lifecycle.sweeper_shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(sweeper) = lifecycle.sweeper.take() {
            if let Err(e) = self.handle.block_on(sweeper) {
                tracing::error!("Resource sweeper ended abnormally: {}", e);
            }
        }

        let report = self.ledger.release_all();
        if report.total() > 0 {
            tracing::info!(
                "Released {} outstanding resource(s) at shutdown ({} failed)",
                report.reclaimed,
                report.failed
            );
        }

        lifecycle.state = ProcessorState::Stopped;
        tracing::info!("Background processor stopped");
        dropped
    }

    /// Drain every queued task without running it, logging each one
    fn drop_unprocessed(&self) -> usize {
        let dropped = self.queue.drain();
        for task in &dropped {
            match &task.target_path {
                Some(path) => tracing::warn!("Unprocessed task dropped: {} ({})", task.kind, path),
                None => tracing::warn!("Unprocessed task dropped: {}", task.kind),
            }
            self.metrics.record_task_dropped();
        }
        dropped.len()
    }

    /// Queue a task for dispatch.
    ///
    /// A task for a file that is already queued or in flight is ignored and reported
    /// as [`EnqueueOutcome::Duplicate`].
    pub fn enqueue(&self, task: Task) -> EnqueueOutcome {
        let outcome = self.queue.enqueue(task);
        if outcome == EnqueueOutcome::Duplicate {
            self.metrics.record_duplicate_rejected();
        }
        outcome
    }

    /// Run `body` on the worker pool independently of the queue
    pub fn spawn_independent(&self, body: TaskBody) -> tokio::task::JoinHandle<Result<TaskOutput, TaskError>> {
        self.pool.spawn(body)
    }

    /// Receive one `Completed` or `Failed` event per dispatched task.
    ///
    /// The channel buffers [`EVENT_CHANNEL_CAPACITY`] outcomes per receiver. A receiver
    /// that falls further behind gets `RecvError::Lagged` and loses the oldest outcomes;
    /// [`Metrics::tasks_resolved`] still counts them.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessorEvent> {
        self.events.subscribe()
    }

    /// Receive advisory `Progress` events reported by task bodies
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProcessorEvent> {
        self.progress.subscribe()
    }

    /// Handle for task bodies to report progress through
    pub fn progress_reporter(&self) -> ProgressReporter {
        ProgressReporter::new(self.progress.clone())
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for BackgroundProcessor {
    fn drop(&mut self) {
        if self.state() == ProcessorState::Running {
            tracing::warn!("Background processor dropped without stop()");
            if Handle::try_current().is_err() {
                self.stop();
                return;
            }
            // Cannot block inside the runtime
            self.running.store(false, Ordering::SeqCst);
            self.queue.close();
        }

        // Idle, or running inside the runtime: queued tasks still get logged
        self.queue.close();
        self.drop_unprocessed();
    }
}

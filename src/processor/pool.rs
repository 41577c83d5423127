use crate::models::{TaskBody, TaskOutput};
use std::any::Any;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Why a task body produced no result
#[derive(Error, Debug)]
pub enum TaskError {
    /// The body returned an error
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task was cancelled before it finished")]
    Cancelled,

    #[error("Worker pool is shut down")]
    PoolClosed,
}

impl TaskError {
    /// Message suitable for a failure event: the error and its context chain, no backtrace
    pub fn message(&self) -> String {
        match self {
            TaskError::Failed(err) => format!("{:#}", err),
            other => other.to_string(),
        }
    }
}

/// Fixed number of execution slots on the tokio blocking pool.
///
/// Each submitted body holds one slot for as long as it runs, so at most `size` bodies
/// run at once no matter how many are submitted.
#[derive(Debug)]
pub struct WorkerPool {
    handle: Handle,
    slots: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool with `size` slots (at least one) on the given runtime
    pub fn new(handle: Handle, size: usize) -> Self {
        let size = size.max(1);
        Self {
            handle,
            slots: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently running a body
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Run `body` in a slot and block the calling thread until it finishes.
    ///
    /// Must be called from a plain thread, not from inside the runtime.
    pub fn execute(&self, body: TaskBody) -> Result<TaskOutput, TaskError> {
        self.handle.block_on(run_in_slot(Arc::clone(&self.slots), body))
    }

    /// Submit `body` without waiting for it
    pub fn spawn(&self, body: TaskBody) -> JoinHandle<Result<TaskOutput, TaskError>> {
        self.handle.spawn(run_in_slot(Arc::clone(&self.slots), body))
    }

    /// Wait for every running body to finish, then refuse new work
    pub fn shutdown(&self) {
        if self.slots.is_closed() {
            return;
        }

        let size = u32::try_from(self.size).unwrap_or(u32::MAX);
        let busy = self.size - self.available();
        if busy > 0 {
            tracing::info!("Waiting for {} running task(s) to finish", busy);
        }

        let slots = Arc::clone(&self.slots);
        self.handle.block_on(async move {
            // Holding every permit means nothing is running
            if let Ok(all) = slots.acquire_many(size).await {
                all.forget();
            }
        });
        self.slots.close();
        tracing::debug!("Worker pool shut down");
    }
}

async fn run_in_slot(slots: Arc<Semaphore>, body: TaskBody) -> Result<TaskOutput, TaskError> {
    let permit = slots.acquire_owned().await.map_err(|_| TaskError::PoolClosed)?;

    let joined = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        body()
    })
    .await;

    match joined {
        Ok(result) => result.map_err(TaskError::Failed),
        Err(err) if err.is_panic() => Err(TaskError::Panicked(panic_message(err.into_panic()))),
        Err(_) => Err(TaskError::Cancelled),
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

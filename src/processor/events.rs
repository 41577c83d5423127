use crate::models::{TaskKind, TaskOutput};
use tokio::sync::broadcast;

/// Buffered events per subscriber before the slowest one starts lagging
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Outcome and progress notifications emitted by the background processor
///
/// Every dispatched task produces exactly one `Completed` or `Failed` event on the
/// outcome channel. `Progress` travels on a separate channel, so a chatty task body
/// cannot push outcomes out of a slow subscriber's buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum ProcessorEvent {
    /// A task body returned a result
    Completed { kind: TaskKind, output: TaskOutput },

    /// A task body failed or panicked
    Failed { kind: TaskKind, message: String },

    /// Advisory progress from inside a running task body
    Progress { percent: u8 },
}

impl ProcessorEvent {
    /// Whether this event resolves a task
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProcessorEvent::Progress { .. })
    }
}

/// Cloneable handle a task body can capture to report progress
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    tx: broadcast::Sender<ProcessorEvent>,
}

impl ProgressReporter {
    pub(crate) fn new(tx: broadcast::Sender<ProcessorEvent>) -> Self {
        Self { tx }
    }

    /// Report progress, clamped to 100
    pub fn report(&self, percent: u8) {
        // No subscribers is fine; progress is advisory
        let _ = self.tx.send(ProcessorEvent::Progress {
            percent: percent.min(100),
        });
    }
}

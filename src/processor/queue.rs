use crate::models::Task;
use camino::{Utf8Path, Utf8PathBuf};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Result of handing a task to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The task was queued
    Accepted,
    /// Another task for the same target file is queued or in flight
    Duplicate,
    /// The queue was closed by `stop()`
    Closed,
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        *self == EnqueueOutcome::Accepted
    }
}

/// Heap entry ordered so the heap's maximum is the most urgent task
struct Entry {
    priority: i32,
    seq: u64,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Reversed: lower priority number first, then lower sequence number
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Entry>,
    /// Target paths of tasks that are queued or in flight
    tracked: HashSet<Utf8PathBuf>,
    next_seq: u64,
    closed: bool,
}

/// Priority queue of pending tasks with target-path deduplication.
///
/// The heap and the dedup set live under one mutex so every enqueue is a single
/// read-modify-write. A condvar wakes the dispatcher when work arrives or the queue
/// is closed.
#[derive(Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a task.
    ///
    /// A task whose target path names an existing file is tracked until
    /// [`release`](Self::release) is called for that path; a second task for the same
    /// file in the meantime is rejected as a duplicate.
    pub fn enqueue(&self, task: Task) -> EnqueueOutcome {
        // Filesystem check happens before taking the lock
        let dedup_key = task
            .target_path
            .as_ref()
            .filter(|path| path.is_file())
            .cloned();

        let mut state = self.lock();

        if state.closed {
            tracing::warn!("Task queue is closed, rejecting {} task", task.kind);
            return EnqueueOutcome::Closed;
        }

        if let Some(path) = dedup_key {
            if state.tracked.contains(&path) {
                tracing::info!("File already queued or in progress, ignoring: {}", path);
                return EnqueueOutcome::Duplicate;
            }
            state.tracked.insert(path);
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        tracing::debug!(
            "Queued {} task (priority {}, #{})",
            task.kind,
            task.priority,
            seq
        );
        state.heap.push(Entry {
            priority: task.priority,
            seq,
            task,
        });
        drop(state);

        self.available.notify_one();
        EnqueueOutcome::Accepted
    }

    /// Wait up to `timeout` for the most urgent task.
    ///
    /// Returns `None` when the timeout elapses with nothing queued, or once the queue
    /// has been closed.
    pub fn dequeue_blocking(&self, timeout: Duration) -> Option<Task> {
        let state = self.lock();
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |s| s.heap.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);

        if state.closed {
            return None;
        }
        state.heap.pop().map(|entry| entry.task)
    }

    /// Pop the most urgent task without waiting
    pub fn try_dequeue(&self) -> Option<Task> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.heap.pop().map(|entry| entry.task)
    }

    /// Stop handing out tasks and wake every waiter
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Remove every queued task in dispatch order
    pub fn drain(&self) -> Vec<Task> {
        let mut state = self.lock();
        let mut drained = Vec::with_capacity(state.heap.len());
        while let Some(entry) = state.heap.pop() {
            drained.push(entry.task);
        }
        drained
    }

    /// Stop tracking `path`, allowing a new task for it to be queued
    pub fn release(&self, path: &Utf8Path) -> bool {
        self.lock().tracked.remove(path)
    }

    pub fn is_tracked(&self, path: &Utf8Path) -> bool {
        self.lock().tracked.contains(path)
    }

    pub fn clear_tracking(&self) {
        self.lock().tracked.clear();
    }

    pub fn tracked_len(&self) -> usize {
        self.lock().tracked.len()
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }
}

//! Integration tests for the BackgroundProcessor
//!
//! These tests verify that the processor:
//! - Runs at most one task per target file at a time
//! - Dispatches by priority, then in enqueue order
//! - Reports every task exactly once as completed or failed
//! - Drops and logs queued work on stop, or on drop, without running it
//! - Keeps progress on its own channel so outcomes are never crowded out
//!
//! The processor blocks on its runtime from its own threads, so these are plain
//! `#[test]`s with a locally built runtime.

use camino::Utf8PathBuf;
use dochandler::models::{PRIORITY_BACKGROUND, PRIORITY_INTERACTIVE};
use dochandler::processor::{ProcessorEvent, ProcessorState};
use dochandler::{BackgroundProcessor, EnqueueOutcome, Task, TaskKind, TaskOutput};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio_test::assert_ok;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn processor(rt: &Runtime, workers: usize) -> BackgroundProcessor {
    BackgroundProcessor::builder(rt.handle().clone())
        .workers(workers)
        .poll_interval(Duration::from_millis(50))
        .sweep_interval(Duration::from_millis(100))
        .build()
}

fn existing_file(dir: &TempDir, name: &str) -> Utf8PathBuf {
    let path = Utf8PathBuf::try_from(dir.path().join(name)).unwrap();
    std::fs::write(&path, b"%PDF-1.7").unwrap();
    path
}

/// Wait for the next completion or failure event, skipping progress
fn next_outcome(rx: &mut broadcast::Receiver<ProcessorEvent>) -> ProcessorEvent {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(event) if event.is_terminal() => return event,
            Ok(_) => continue,
            Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
            Err(e) => panic!("Event channel error: {:?}", e),
        }
    }
    panic!("Timeout waiting for processor event");
}

fn recording_task(label: &'static str, priority: i32, log: &Arc<Mutex<Vec<&'static str>>>) -> Task {
    let log = Arc::clone(log);
    Task::new(TaskKind::Conversion, move || {
        log.lock().unwrap().push(label);
        Ok(TaskOutput::Empty)
    })
    .with_priority(priority)
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_duplicate_target_runs_once() {
    let rt = runtime();
    let processor = processor(&rt, 2);
    let dir = TempDir::new().unwrap();
    let path = existing_file(&dir, "f.pdf");
    let runs = Arc::new(AtomicUsize::new(0));
    let mut rx = processor.subscribe();

    assert_ok!(processor.start());

    let make_task = |runs: Arc<AtomicUsize>| {
        Task::new(TaskKind::Conversion, move || {
            runs.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(200));
            Ok(TaskOutput::Empty)
        })
        .with_target_path(path.clone())
    };

    assert_eq!(processor.enqueue(make_task(Arc::clone(&runs))), EnqueueOutcome::Accepted);
    assert_eq!(processor.enqueue(make_task(Arc::clone(&runs))), EnqueueOutcome::Duplicate);

    assert!(matches!(next_outcome(&mut rx), ProcessorEvent::Completed { .. }));
    thread::sleep(Duration::from_millis(150));

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(processor.metrics().duplicates_rejected.load(Ordering::Relaxed), 1);
    processor.stop();
}

#[test]
fn test_priority_dispatches_first() {
    let rt = runtime();
    let processor = processor(&rt, 1);
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut rx = processor.subscribe();

    processor.enqueue(recording_task("background", PRIORITY_BACKGROUND, &log));
    processor.enqueue(recording_task("interactive", PRIORITY_INTERACTIVE, &log));
    assert_ok!(processor.start());

    next_outcome(&mut rx);
    next_outcome(&mut rx);
    processor.stop();

    assert_eq!(*log.lock().unwrap(), vec!["interactive", "background"]);
}

#[test]
fn test_equal_priority_is_fifo() {
    let rt = runtime();
    let processor = processor(&rt, 4);
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut rx = processor.subscribe();

    for label in ["first", "second", "third", "fourth"] {
        processor.enqueue(recording_task(label, 3, &log));
    }
    assert_ok!(processor.start());

    for _ in 0..4 {
        next_outcome(&mut rx);
    }
    processor.stop();

    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third", "fourth"]);
}

#[test]
fn test_stop_drains_and_logs_queued_tasks() {
    let rt = runtime();
    let processor = processor(&rt, 2);
    let runs = Arc::new(AtomicUsize::new(0));
    let mut rx = processor.subscribe();

    for _ in 0..3 {
        let runs = Arc::clone(&runs);
        processor.enqueue(Task::new(TaskKind::Extraction, move || {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(TaskOutput::Empty)
        }));
    }

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    let dropped = tracing::subscriber::with_default(subscriber, || processor.stop());

    assert_eq!(dropped, 3);
    assert_eq!(logs.text().matches("Unprocessed task dropped").count(), 3);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(processor.metrics().tasks_dropped.load(Ordering::Relaxed), 3);
    assert_eq!(processor.state(), ProcessorState::Stopped);
}

#[test]
fn test_dropping_unstarted_processor_logs_queued_tasks() {
    let rt = runtime();
    let processor = processor(&rt, 2);
    let runs = Arc::new(AtomicUsize::new(0));
    let metrics = Arc::clone(processor.metrics());

    for _ in 0..3 {
        let runs = Arc::clone(&runs);
        processor.enqueue(Task::new(TaskKind::Conversion, move || {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(TaskOutput::Empty)
        }));
    }

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || drop(processor));

    assert_eq!(logs.text().matches("Unprocessed task dropped").count(), 3);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(metrics.tasks_dropped.load(Ordering::Relaxed), 3);
}

#[test]
fn test_dropping_running_processor_logs_queued_tasks() {
    let rt = runtime();
    let processor = processor(&rt, 1);
    let metrics = Arc::clone(processor.metrics());
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
    assert_ok!(processor.start());

    // Occupies the dispatcher so the next two stay queued
    processor.enqueue(Task::new(TaskKind::Conversion, move || {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv_timeout(Duration::from_secs(5));
        Ok(TaskOutput::Empty)
    }));
    started_rx.recv_timeout(EVENT_TIMEOUT).unwrap();
    for _ in 0..2 {
        processor.enqueue(Task::new(TaskKind::Extraction, || Ok(TaskOutput::Empty)));
    }

    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    // Dropping from inside the runtime cannot block on stop()
    tracing::subscriber::with_default(subscriber, || {
        let _entered = rt.enter();
        drop(processor);
    });
    let _ = release_tx.send(());

    assert_eq!(logs.text().matches("Unprocessed task dropped").count(), 2);
    assert_eq!(metrics.tasks_dropped.load(Ordering::Relaxed), 2);
}

#[test]
fn test_failure_releases_target_for_retry() {
    let rt = runtime();
    let processor = processor(&rt, 2);
    let dir = TempDir::new().unwrap();
    let path = existing_file(&dir, "f.pdf");
    let mut rx = processor.subscribe();
    assert_ok!(processor.start());

    processor.enqueue(
        Task::new(TaskKind::Conversion, || anyhow::bail!("engine refused the document"))
            .with_target_path(path.clone()),
    );

    match next_outcome(&mut rx) {
        ProcessorEvent::Failed { kind, message } => {
            assert_eq!(kind, TaskKind::Conversion);
            assert!(message.contains("engine refused"));
        }
        other => panic!("Expected failure, got {:?}", other),
    }
    assert!(!processor.queue().is_tracked(&path));

    let retry = Task::new(TaskKind::Conversion, || Ok(TaskOutput::Text("retried".into())))
        .with_target_path(path.clone());
    assert_eq!(processor.enqueue(retry), EnqueueOutcome::Accepted);

    assert_eq!(
        next_outcome(&mut rx),
        ProcessorEvent::Completed {
            kind: TaskKind::Conversion,
            output: TaskOutput::Text("retried".into()),
        }
    );
    processor.stop();
}

#[test]
fn test_panic_becomes_failure_and_loop_survives() {
    let rt = runtime();
    let processor = processor(&rt, 1);
    let mut rx = processor.subscribe();
    assert_ok!(processor.start());

    processor.enqueue(Task::new(TaskKind::Organization, || -> anyhow::Result<TaskOutput> {
        panic!("corrupt document")
    }));
    processor.enqueue(Task::new(TaskKind::Organization, || Ok(TaskOutput::Empty)));

    match next_outcome(&mut rx) {
        ProcessorEvent::Failed { message, .. } => assert!(message.contains("corrupt document")),
        other => panic!("Expected failure, got {:?}", other),
    }
    assert!(matches!(next_outcome(&mut rx), ProcessorEvent::Completed { .. }));

    processor.stop();
    assert_eq!(processor.metrics().tasks_failed.load(Ordering::Relaxed), 1);
    assert_eq!(processor.metrics().tasks_completed.load(Ordering::Relaxed), 1);
}

#[test]
fn test_failure_message_has_context_chain() {
    use anyhow::Context;

    let rt = runtime();
    let processor = processor(&rt, 1);
    let mut rx = processor.subscribe();
    assert_ok!(processor.start());

    processor.enqueue(Task::new(TaskKind::Conversion, || {
        Err(anyhow::anyhow!("file is locked")).context("Failed to convert Quote.docx")
    }));

    match next_outcome(&mut rx) {
        ProcessorEvent::Failed { message, .. } => {
            assert_eq!(message, "Failed to convert Quote.docx: file is locked");
        }
        other => panic!("Expected failure, got {:?}", other),
    }
    processor.stop();
}

#[test]
fn test_callback_receives_output() {
    let rt = runtime();
    let processor = processor(&rt, 1);
    let mut rx = processor.subscribe();
    let seen = Arc::new(Mutex::new(None));
    assert_ok!(processor.start());

    let sink = Arc::clone(&seen);
    let task = Task::new(TaskKind::Conversion, || Ok(TaskOutput::Path("/out/Quote.pdf".into())))
        .on_complete(move |output| *sink.lock().unwrap() = Some(output.clone()));
    processor.enqueue(task);

    assert!(matches!(next_outcome(&mut rx), ProcessorEvent::Completed { .. }));
    assert_eq!(
        *seen.lock().unwrap(),
        Some(TaskOutput::Path("/out/Quote.pdf".into()))
    );
    processor.stop();
}

#[test]
fn test_callback_not_invoked_on_failure() {
    let rt = runtime();
    let processor = processor(&rt, 1);
    let mut rx = processor.subscribe();
    let called = Arc::new(AtomicUsize::new(0));
    assert_ok!(processor.start());

    let counter = Arc::clone(&called);
    processor.enqueue(
        Task::new(TaskKind::Extraction, || anyhow::bail!("unreadable"))
            .on_complete(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
    );

    assert!(matches!(next_outcome(&mut rx), ProcessorEvent::Failed { .. }));
    processor.stop();
    assert_eq!(called.load(Ordering::SeqCst), 0);
}

#[test]
fn test_progress_events_from_body() {
    let rt = runtime();
    let processor = processor(&rt, 1);
    let mut outcomes = processor.subscribe();
    let mut progress = processor.subscribe_progress();
    let reporter = processor.progress_reporter();
    assert_ok!(processor.start());

    processor.enqueue(Task::new(TaskKind::Conversion, move || {
        reporter.report(50);
        reporter.report(100);
        Ok(TaskOutput::Empty)
    }));

    assert_eq!(
        next_outcome(&mut outcomes),
        ProcessorEvent::Completed {
            kind: TaskKind::Conversion,
            output: TaskOutput::Empty
        }
    );
    processor.stop();

    assert_eq!(progress.try_recv().unwrap(), ProcessorEvent::Progress { percent: 50 });
    assert_eq!(progress.try_recv().unwrap(), ProcessorEvent::Progress { percent: 100 });
    // Outcomes never appear on the progress channel
    assert!(matches!(progress.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn test_progress_flood_does_not_evict_outcome() {
    let rt = runtime();
    let processor = processor(&rt, 1);
    let mut outcomes = processor.subscribe();
    let _progress = processor.subscribe_progress();
    let reporter = processor.progress_reporter();
    assert_ok!(processor.start());

    processor.enqueue(Task::new(TaskKind::Conversion, move || {
        for step in 0..500u32 {
            reporter.report((step % 101) as u8);
        }
        Ok(TaskOutput::Empty)
    }));

    // Nothing was read while the body reported; the outcome must still be there
    assert!(matches!(next_outcome(&mut outcomes), ProcessorEvent::Completed { .. }));
    processor.stop();
}

#[test]
fn test_stop_waits_for_running_task() {
    let rt = runtime();
    let processor = processor(&rt, 1);
    let finished = Arc::new(AtomicUsize::new(0));
    assert_ok!(processor.start());

    let flag = Arc::clone(&finished);
    processor.enqueue(Task::new(TaskKind::Conversion, move || {
        thread::sleep(Duration::from_millis(300));
        flag.fetch_add(1, Ordering::SeqCst);
        Ok(TaskOutput::Empty)
    }));

    // Let the dispatcher pick it up
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while processor.pending() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(processor.stop(), 0);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[test]
fn test_missing_target_file_is_not_deduplicated() {
    let rt = runtime();
    let processor = processor(&rt, 1);
    let path = Utf8PathBuf::from("/no/such/dir/f.pdf");

    let task = || Task::new(TaskKind::Conversion, || Ok(TaskOutput::Empty)).with_target_path(path.clone());
    assert_eq!(processor.enqueue(task()), EnqueueOutcome::Accepted);
    assert_eq!(processor.enqueue(task()), EnqueueOutcome::Accepted);

    assert_eq!(processor.stop(), 2);
}

use crate::automation::{EngineKind, SharedEngine};
use crate::metrics::Metrics;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;

/// Default age after which the sweep force-reclaims a record
pub const DEFAULT_MAX_RESOURCE_AGE: Duration = Duration::from_secs(3600);

/// Handle into the ledger's record arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    TempFile,
    TempDirectory,
    AutomationHandle,
}

/// Errors raised while allocating a tracked resource
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Failed to create temporary resource: {0}")]
    Io(#[from] io::Error),

    #[error("Temporary path is not valid UTF-8: {0:?}")]
    NonUtf8Path(PathBuf),
}

enum ResourceTarget {
    File(Utf8PathBuf),
    Directory(Utf8PathBuf),
    Engine { kind: EngineKind, engine: SharedEngine },
}

struct ResourceRecord {
    target: ResourceTarget,
    created_at: Instant,
}

impl ResourceRecord {
    fn kind(&self) -> ResourceKind {
        match self.target {
            ResourceTarget::File(_) => ResourceKind::TempFile,
            ResourceTarget::Directory(_) => ResourceKind::TempDirectory,
            ResourceTarget::Engine { .. } => ResourceKind::AutomationHandle,
        }
    }

    fn describe(&self) -> String {
        match &self.target {
            ResourceTarget::File(path) => format!("temp file {}", path),
            ResourceTarget::Directory(path) => format!("temp directory {}", path),
            ResourceTarget::Engine { kind, .. } => format!("{} handle", kind),
        }
    }
}

/// Outcome of a sweep or a forced release
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub reclaimed: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.reclaimed + self.failed
    }
}

/// Bookkeeping and reclamation for everything acquired outside normal memory ownership.
///
/// Records live in an arena keyed by a generated [`ResourceId`], kept in acquisition
/// order so sweeps and forced releases reclaim the oldest resources first. A record is
/// removed from the arena before it is reclaimed, so a second release of the same id
/// finds nothing and does nothing.
///
/// Reclamation is best effort: failures are logged and counted, never returned.
pub struct ResourceLedger {
    records: Mutex<IndexMap<ResourceId, ResourceRecord>>,
    next_id: AtomicU64,
    max_age: Duration,
    metrics: Arc<Metrics>,
}

impl ResourceLedger {
    pub fn new(max_age: Duration) -> Self {
        Self::with_metrics(max_age, Arc::new(Metrics::new()))
    }

    pub fn with_metrics(max_age: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            records: Mutex::new(IndexMap::new()),
            next_id: AtomicU64::new(1),
            max_age,
            metrics,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    fn records(&self) -> MutexGuard<'_, IndexMap<ResourceId, ResourceRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, target: ResourceTarget) -> ResourceId {
        let id = ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = ResourceRecord {
            target,
            created_at: Instant::now(),
        };
        tracing::debug!("Tracking {} as {}", record.describe(), id);
        self.records().insert(id, record);
        id
    }

    /// Track an existing file that must be removed when released
    pub fn register_file(&self, path: impl Into<Utf8PathBuf>) -> ResourceId {
        self.insert(ResourceTarget::File(path.into()))
    }

    /// Track an existing directory that must be removed (recursively) when released
    pub fn register_directory(&self, path: impl Into<Utf8PathBuf>) -> ResourceId {
        self.insert(ResourceTarget::Directory(path.into()))
    }

    /// Track a live automation engine; reclaiming it asks the engine to quit
    pub fn register_engine(&self, kind: EngineKind, engine: SharedEngine) -> ResourceId {
        self.insert(ResourceTarget::Engine { kind, engine })
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.records().contains_key(&id)
    }

    pub fn kind_of(&self, id: ResourceId) -> Option<ResourceKind> {
        self.records().get(&id).map(ResourceRecord::kind)
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Reclaim one record now.
    ///
    /// Returns `false` when the id is no longer tracked (already released or swept).
    pub fn release(&self, id: ResourceId) -> bool {
        let record = self.records().shift_remove(&id);
        match record {
            Some(record) => {
                self.reclaim(id, record);
                true
            }
            None => {
                tracing::trace!("Resource {} already released", id);
                false
            }
        }
    }

    /// Force-reclaim every record older than the max age.
    pub fn sweep(&self) -> SweepReport {
        let stale: Vec<(ResourceId, ResourceRecord)> = {
            let mut records = self.records();
            let stale_ids: Vec<ResourceId> = records
                .iter()
                .filter(|(_, record)| record.created_at.elapsed() > self.max_age)
                .map(|(id, _)| *id)
                .collect();
            stale_ids
                .into_iter()
                .filter_map(|id| records.shift_remove(&id).map(|record| (id, record)))
                .collect()
        };

        if stale.is_empty() {
            return SweepReport::default();
        }

        tracing::info!("Sweeping {} stale resources", stale.len());
        self.reclaim_batch(stale)
    }

    /// Reclaim every tracked record regardless of age (shutdown path).
    pub fn release_all(&self) -> SweepReport {
        let all: Vec<(ResourceId, ResourceRecord)> = self.records().drain(..).collect();
        if all.is_empty() {
            return SweepReport::default();
        }

        tracing::info!("Releasing {} outstanding resources", all.len());
        self.reclaim_batch(all)
    }

    fn reclaim_batch(&self, batch: Vec<(ResourceId, ResourceRecord)>) -> SweepReport {
        let mut report = SweepReport::default();
        for (id, record) in batch {
            if self.reclaim(id, record) {
                report.reclaimed += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// Runs outside the arena lock; engine shutdown can be slow.
    fn reclaim(&self, id: ResourceId, record: ResourceRecord) -> bool {
        let description = record.describe();
        let result = match record.target {
            ResourceTarget::File(path) => remove_path(&path, |p| fs::remove_file(p)),
            ResourceTarget::Directory(path) => remove_path(&path, |p| fs::remove_dir_all(p)),
            ResourceTarget::Engine { engine, .. } => {
                let taken = engine.lock().unwrap_or_else(PoisonError::into_inner).take();
                match taken {
                    Some(mut engine) => engine.quit().map_err(|e| e.to_string()),
                    None => Ok(()),
                }
            }
        };

        match result {
            Ok(()) => {
                tracing::debug!("Reclaimed {} ({})", description, id);
                self.metrics.record_resource_reclaimed();
                true
            }
            Err(e) => {
                tracing::warn!("Failed to reclaim {} ({}): {}", description, id, e);
                self.metrics.record_reclaim_failure();
                false
            }
        }
    }

    /// Create a temp file that is removed when the returned guard drops.
    pub fn scoped_temp_file(self: &Arc<Self>, suffix: &str) -> Result<TempFileGuard, ResourceError> {
        let temp = tempfile::Builder::new()
            .prefix("dochandler_")
            .suffix(suffix)
            .tempfile()?;
        let path = temp
            .into_temp_path()
            .keep()
            .map_err(|e| ResourceError::Io(e.error))?;
        let path = utf8_or_remove(path, |p| fs::remove_file(p))?;
        let id = self.register_file(path.clone());

        Ok(TempFileGuard {
            id,
            path,
            ledger: Arc::clone(self),
        })
    }

    /// Create a temp directory that is removed, with its contents, when the guard drops.
    pub fn scoped_temp_directory(self: &Arc<Self>) -> Result<TempDirGuard, ResourceError> {
        let temp = tempfile::Builder::new().prefix("dochandler_").tempdir()?;
        let path = utf8_or_remove(temp.keep(), |p| fs::remove_dir_all(p))?;
        let id = self.register_directory(path.clone());

        Ok(TempDirGuard {
            id,
            path,
            ledger: Arc::clone(self),
        })
    }

    /// Run `f` with a scoped temp file path; the file is gone when this returns.
    pub fn with_temp_file<R>(
        self: &Arc<Self>,
        suffix: &str,
        f: impl FnOnce(&Utf8Path) -> R,
    ) -> Result<R, ResourceError> {
        let guard = self.scoped_temp_file(suffix)?;
        Ok(f(guard.path()))
    }

    /// Run `f` with a scoped temp directory; the directory is gone when this returns.
    pub fn with_temp_directory<R>(
        self: &Arc<Self>,
        f: impl FnOnce(&Utf8Path) -> R,
    ) -> Result<R, ResourceError> {
        let guard = self.scoped_temp_directory()?;
        Ok(f(guard.path()))
    }

    /// Periodically sweep while resources are outstanding, until `shutdown` flips to true.
    pub async fn run_sweeper(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("Resource sweeper started (every {:?})", every);

        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.is_empty() {
                        continue;
                    }
                    let ledger = Arc::clone(&self);
                    match tokio::task::spawn_blocking(move || ledger.sweep()).await {
                        Ok(report) if report.total() > 0 => tracing::debug!(
                            "Periodic sweep: {} reclaimed, {} failed",
                            report.reclaimed,
                            report.failed
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::error!("Sweep task failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::debug!("Resource sweeper stopped");
    }
}

impl Default for ResourceLedger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RESOURCE_AGE)
    }
}

fn remove_path(path: &Utf8Path, remove: fn(&Utf8Path) -> io::Result<()>) -> Result<(), String> {
    match remove(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("{} was already removed", path);
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    }
}

fn utf8_or_remove(
    path: PathBuf,
    remove: fn(&std::path::Path) -> io::Result<()>,
) -> Result<Utf8PathBuf, ResourceError> {
    Utf8PathBuf::from_path_buf(path).map_err(|path| {
        let _ = remove(&path);
        ResourceError::NonUtf8Path(path)
    })
}

/// Scoped temp file; released through the ledger exactly once, on drop
pub struct TempFileGuard {
    id: ResourceId,
    path: Utf8PathBuf,
    ledger: Arc<ResourceLedger>,
}

impl TempFileGuard {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        self.ledger.release(self.id);
    }
}

/// Scoped temp directory; released through the ledger exactly once, on drop
pub struct TempDirGuard {
    id: ResourceId,
    path: Utf8PathBuf,
    ledger: Arc<ResourceLedger>,
}

impl TempDirGuard {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        self.ledger.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::{AutomationEngine, AutomationError, ExportFormat};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    struct CountingEngine {
        quits: Arc<AtomicUsize>,
        fail_quit: bool,
    }

    impl AutomationEngine for CountingEngine {
        fn configure(&mut self, _visible: bool) -> Result<(), AutomationError> {
            Ok(())
        }

        fn export(
            &mut self,
            _source: &Utf8Path,
            _target: &Utf8Path,
            _format: ExportFormat,
        ) -> Result<(), AutomationError> {
            Ok(())
        }

        fn quit(&mut self) -> Result<(), AutomationError> {
            self.quits.fetch_add(1, Ordering::SeqCst);
            if self.fail_quit {
                Err(AutomationError::Operation("engine not responding".into()))
            } else {
                Ok(())
            }
        }
    }

    fn shared_engine(quits: &Arc<AtomicUsize>, fail_quit: bool) -> SharedEngine {
        Arc::new(Mutex::new(Some(Box::new(CountingEngine {
            quits: Arc::clone(quits),
            fail_quit,
        }))))
    }

    #[test]
    fn test_scoped_temp_file_removed_on_drop() {
        let ledger = Arc::new(ResourceLedger::default());
        let guard = ledger.scoped_temp_file(".pdf").unwrap();
        let path = guard.path().to_path_buf();

        assert!(path.exists());
        assert!(path.as_str().ends_with(".pdf"));
        assert_eq!(ledger.kind_of(guard.id()), Some(ResourceKind::TempFile));

        drop(guard);
        assert!(!path.exists());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_scoped_temp_directory_removes_contents() {
        let ledger = Arc::new(ResourceLedger::default());
        let dir = ledger
            .with_temp_directory(|dir| {
                fs::write(dir.join("page1.txt"), "text").unwrap();
                fs::create_dir(dir.join("nested")).unwrap();
                dir.to_path_buf()
            })
            .unwrap();

        assert!(!dir.exists());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_double_release_is_noop() {
        let ledger = ResourceLedger::default();
        let quits = Arc::new(AtomicUsize::new(0));
        let id = ledger.register_engine(EngineKind::WordProcessor, shared_engine(&quits, false));

        assert!(ledger.release(id));
        assert!(!ledger.release(id));
        assert_eq!(quits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_of_missing_file_is_not_a_failure() {
        let metrics = Arc::new(Metrics::new());
        let ledger = ResourceLedger::with_metrics(DEFAULT_MAX_RESOURCE_AGE, Arc::clone(&metrics));
        let id = ledger.register_file("/definitely/not/here/dochandler.tmp");

        assert!(ledger.release(id));
        assert_eq!(metrics.reclaim_failures.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.resources_reclaimed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_sweep_only_reclaims_stale_records() {
        let ledger = Arc::new(ResourceLedger::new(Duration::from_millis(30)));
        let old = ledger.scoped_temp_file(".tmp").unwrap();
        let old_path = old.path().to_path_buf();

        thread::sleep(Duration::from_millis(60));
        let fresh = ledger.scoped_temp_file(".tmp").unwrap();

        let report = ledger.sweep();
        assert_eq!(report, SweepReport { reclaimed: 1, failed: 0 });
        assert!(!old_path.exists());
        assert!(fresh.path().exists());
        assert!(!ledger.contains(old.id()));
        assert!(ledger.contains(fresh.id()));

        // Dropping the swept guard must not touch anything else
        drop(old);
        assert!(fresh.path().exists());
    }

    #[test]
    fn test_sweep_continues_past_failed_quit() {
        let ledger = ResourceLedger::new(Duration::ZERO);
        let quits = Arc::new(AtomicUsize::new(0));
        ledger.register_engine(EngineKind::Spreadsheet, shared_engine(&quits, true));
        ledger.register_engine(EngineKind::WordProcessor, shared_engine(&quits, false));

        thread::sleep(Duration::from_millis(5));
        let report = ledger.sweep();

        assert_eq!(report, SweepReport { reclaimed: 1, failed: 1 });
        assert_eq!(quits.load(Ordering::SeqCst), 2);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_release_all_ignores_age() {
        let ledger = Arc::new(ResourceLedger::default());
        let file = ledger.scoped_temp_file("").unwrap();
        let dir = ledger.scoped_temp_directory().unwrap();
        let (file_path, dir_path) = (file.path().to_path_buf(), dir.path().to_path_buf());

        assert_eq!(ledger.sweep(), SweepReport::default());
        let report = ledger.release_all();

        assert_eq!(report.reclaimed, 2);
        assert!(!file_path.exists());
        assert!(!dir_path.exists());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_records_reclaimed_oldest_first() {
        let ledger = ResourceLedger::new(Duration::ZERO);
        let first = ledger.register_file("/tmp/dochandler-order-a");
        let second = ledger.register_file("/tmp/dochandler-order-b");
        assert!(first < second);

        let ids: Vec<ResourceId> = ledger.records().keys().copied().collect();
        assert_eq!(ids, vec![first, second]);
    }
}

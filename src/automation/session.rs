use super::{AutomationEngine, AutomationError, EngineConnector, EngineKind, ExportFormat, SharedEngine};
use crate::metrics::Metrics;
use crate::resources::{ResourceId, ResourceLedger};
use camino::Utf8Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Connection retry budget with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts, including the first
    pub max_attempts: u32,
    /// Wait after the first failed attempt; doubles after each further failure
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Wait after the failed attempt with zero-based index `attempt`: `base_delay * 2^attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Acquires engine sessions through a connector.
///
/// Every acquisition creates a new engine instance; instances are never shared or pooled,
/// so two tasks converting Word documents at the same time each get their own engine.
pub struct AutomationManager {
    connector: Arc<dyn EngineConnector>,
    ledger: Arc<ResourceLedger>,
    policy: RetryPolicy,
    metrics: Arc<Metrics>,
}

impl AutomationManager {
    pub fn new(connector: Arc<dyn EngineConnector>, ledger: Arc<ResourceLedger>) -> Self {
        Self {
            connector,
            ledger,
            policy: RetryPolicy::default(),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    /// Acquire a session for a new engine instance of `kind`.
    ///
    /// Transient failures are retried up to the policy's attempt budget, sleeping
    /// `base_delay * 2^attempt` between attempts. The last error is returned once the
    /// budget is spent; non-transient errors are returned immediately.
    ///
    /// Blocks the calling thread while backing off; call it from a worker, never from
    /// the UI thread.
    pub fn acquire(&self, kind: EngineKind, visible: bool) -> Result<AutomationSession, AutomationError> {
        let mut attempt = 0;
        loop {
            match self.try_acquire(kind, visible) {
                Ok(session) => {
                    tracing::debug!("Acquired {} after {} attempt(s)", kind, attempt + 1);
                    return Ok(session);
                }
                Err(e) => {
                    tracing::warn!("Attempt {} failed for {}: {}", attempt + 1, kind, e);

                    if !e.is_transient() || attempt + 1 >= self.policy.max_attempts {
                        return Err(e);
                    }

                    self.metrics.record_engine_retry();
                    std::thread::sleep(self.policy.delay_for(attempt));
                    attempt += 1;
                }
            }
        }
    }

    fn try_acquire(&self, kind: EngineKind, visible: bool) -> Result<AutomationSession, AutomationError> {
        self.connector.initialize_environment()?;

        let mut engine = match self.connector.connect(kind) {
            Ok(engine) => engine,
            Err(e) => {
                self.connector.uninitialize_environment();
                return Err(e);
            }
        };

        if let Err(e) = engine.configure(visible) {
            if let Err(quit_error) = engine.quit() {
                tracing::warn!("Failed to quit {} after configure error: {}", kind, quit_error);
            }
            self.connector.uninitialize_environment();
            return Err(e);
        }

        let engine: SharedEngine = Arc::new(Mutex::new(Some(engine)));
        let resource_id = self.ledger.register_engine(kind, Arc::clone(&engine));

        Ok(AutomationSession {
            kind,
            engine,
            resource_id,
            ledger: Arc::clone(&self.ledger),
            connector: Arc::clone(&self.connector),
        })
    }

    /// Acquire a session, run `f` with it, and release it whatever `f` returns.
    pub fn with_session<R>(
        &self,
        kind: EngineKind,
        visible: bool,
        f: impl FnOnce(&AutomationSession) -> Result<R, AutomationError>,
    ) -> Result<R, AutomationError> {
        let session = self.acquire(kind, visible)?;
        f(&session)
    }
}

/// One acquired engine instance, owned by the scope that acquired it.
///
/// Dropping the session asks the engine to quit (errors are logged, never raised),
/// removes the handle from the ledger and tears down the automation environment.
/// If the ledger's sweep already reclaimed the engine, the quit is not repeated.
pub struct AutomationSession {
    kind: EngineKind,
    engine: SharedEngine,
    resource_id: ResourceId,
    ledger: Arc<ResourceLedger>,
    connector: Arc<dyn EngineConnector>,
}

impl AutomationSession {
    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    /// Run `f` against the live engine
    pub fn with_engine<R>(
        &self,
        f: impl FnOnce(&mut dyn AutomationEngine) -> Result<R, AutomationError>,
    ) -> Result<R, AutomationError> {
        let mut slot = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_mut() {
            Some(engine) => f(&mut **engine),
            None => Err(AutomationError::Reclaimed),
        }
    }

    pub fn export(
        &self,
        source: &Utf8Path,
        target: &Utf8Path,
        format: ExportFormat,
    ) -> Result<(), AutomationError> {
        self.with_engine(|engine| engine.export(source, target, format))
    }
}

impl Drop for AutomationSession {
    fn drop(&mut self) {
        tracing::debug!("Releasing {} session {}", self.kind, self.resource_id);
        self.ledger.release(self.resource_id);
        self.connector.uninitialize_environment();
    }
}

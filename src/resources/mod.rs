//! Resource ledger - tracking and reclamation of non-memory resources.
//!
//! Temp files, temp directories and automation engine handles are registered with the
//! [`ResourceLedger`] when they are created. Normal code releases them through scope
//! guards ([`TempFileGuard`], [`TempDirGuard`], [`AutomationSession`](crate::automation::AutomationSession));
//! the periodic [`sweep`](ResourceLedger::sweep) catches whatever a crashed or
//! abandoned operation left behind, and [`release_all`](ResourceLedger::release_all)
//! clears everything at shutdown.

pub mod ledger;

pub use ledger::{
    DEFAULT_MAX_RESOURCE_AGE, ResourceError, ResourceId, ResourceKind, ResourceLedger, SweepReport,
    TempDirGuard, TempFileGuard,
};

pub mod guard;
pub mod in_memory;

pub use guard::LockGuard;
pub use in_memory::InMemoryLockManager;

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;

use crate::models::{ActionId, RunId};

/// Recovery valve for holders that crashed without releasing.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Read-only actions that may overlap freely.
pub const DEFAULT_EXEMPT_ACTIONS: &[&str] = &["health_check", "status", "logs"];

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LockInfo {
    pub action: ActionId,
    pub run_id: RunId,
    #[serde(with = "time::serde::rfc3339")]
    pub acquired_at: OffsetDateTime,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LockAcquisition {
    Acquired {
        run_id: RunId,
        acquired_at: OffsetDateTime,
    },
    /// Carries the holder's run so the caller can join it instead of retrying.
    Rejected {
        run_id: RunId,
        started_at: OffsetDateTime,
    },
}

impl LockAcquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAcquisition::Acquired { .. })
    }

    pub fn run_id(&self) -> &RunId {
        match self {
            LockAcquisition::Acquired { run_id, .. } | LockAcquisition::Rejected { run_id, .. } => {
                run_id
            }
        }
    }
}

pub trait ConcurrencyPolicy: Send + Sync {
    fn is_exempt(&self, action: &ActionId) -> bool;

    fn stale_after(&self) -> Duration;
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExemptActionsPolicy {
    exempt: BTreeSet<ActionId>,
    stale_after: Duration,
}

impl ExemptActionsPolicy {
    pub fn new(exempt: impl IntoIterator<Item = ActionId>, stale_after: Duration) -> Self {
        Self {
            exempt: exempt.into_iter().collect(),
            stale_after,
        }
    }
}

impl Default for ExemptActionsPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_EXEMPT_ACTIONS.iter().copied().map(ActionId::from),
            DEFAULT_STALE_AFTER,
        )
    }
}

impl ConcurrencyPolicy for ExemptActionsPolicy {
    fn is_exempt(&self, action: &ActionId) -> bool {
        self.exempt.contains(action)
    }

    fn stale_after(&self) -> Duration {
        self.stale_after
    }
}

/// Single-flight admission control keyed by action.
///
/// None of these operations can fail: every outcome is encoded in the
/// return value so a table problem never blocks an in-flight result.
pub trait LockManager: Send + Sync {
    fn acquire_at(&self, action: &ActionId, now: OffsetDateTime) -> LockAcquisition;

    fn acquire(&self, action: &ActionId) -> LockAcquisition {
        self.acquire_at(action, OffsetDateTime::now_utc())
    }

    /// Idempotent; releasing an action that is not held is a no-op.
    fn release(&self, action: &ActionId);

    /// Releases only if the entry still belongs to `run_id`.
    fn release_run(&self, action: &ActionId, run_id: &RunId) -> bool;

    fn peek(&self, action: &ActionId) -> Option<LockInfo>;

    fn held(&self) -> Vec<LockInfo>;
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use time::OffsetDateTime;

use crate::locking::{ConcurrencyPolicy, ExemptActionsPolicy, LockAcquisition, LockInfo, LockManager};
use crate::models::{ActionId, RunId};

pub struct InMemoryLockManager {
    policy: Arc<dyn ConcurrencyPolicy>,
    state: Mutex<LockTable>,
}

#[derive(Default)]
struct LockTable {
    entries: HashMap<ActionId, LockInfo>,
}

impl Default for InMemoryLockManager {
    fn default() -> Self {
        Self::new(Arc::new(ExemptActionsPolicy::default()))
    }
}

impl InMemoryLockManager {
    pub fn new(policy: Arc<dyn ConcurrencyPolicy>) -> Self {
        Self {
            policy,
            state: Mutex::new(LockTable::default()),
        }
    }

    // A poisoned table is still structurally valid: every mutation is a
    // single insert or remove.
    fn lock_table(&self) -> MutexGuard<'_, LockTable> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LockManager for InMemoryLockManager {
    fn acquire_at(&self, action: &ActionId, now: OffsetDateTime) -> LockAcquisition {
        let mut table = self.lock_table();

        let Some(existing) = table.entries.get(action).cloned() else {
            return grant(&mut table, action, now);
        };

        if self.policy.is_exempt(action) {
            let run_id = RunId::generate(now);
            tracing::debug!(action = %action, run_id = %run_id, "granted exempt action alongside existing holder");
            return LockAcquisition::Acquired {
                run_id,
                acquired_at: now,
            };
        }

        if is_stale(&existing, now, self.policy.stale_after()) {
            tracing::warn!(
                action = %action,
                stale_run_id = %existing.run_id,
                acquired_at = %existing.acquired_at,
                "evicting stale lock that was never released"
            );
            table.entries.remove(action);
            return grant(&mut table, action, now);
        }

        tracing::debug!(
            action = %action,
            active_run_id = %existing.run_id,
            "lock held; rejecting with joinable run"
        );
        LockAcquisition::Rejected {
            run_id: existing.run_id,
            started_at: existing.acquired_at,
        }
    }

    fn release(&self, action: &ActionId) {
        let mut table = self.lock_table();
        if let Some(entry) = table.entries.remove(action) {
            tracing::debug!(action = %action, run_id = %entry.run_id, "released lock");
        }
    }

    fn release_run(&self, action: &ActionId, run_id: &RunId) -> bool {
        let mut table = self.lock_table();
        let owned = table
            .entries
            .get(action)
            .is_some_and(|entry| &entry.run_id == run_id);
        if owned {
            table.entries.remove(action);
            tracing::debug!(action = %action, run_id = %run_id, "released lock");
        }
        owned
    }

    fn peek(&self, action: &ActionId) -> Option<LockInfo> {
        self.lock_table().entries.get(action).cloned()
    }

    fn held(&self) -> Vec<LockInfo> {
        let mut entries: Vec<LockInfo> = self.lock_table().entries.values().cloned().collect();
        entries.sort_by(|left, right| left.action.cmp(&right.action));
        entries
    }
}

fn grant(table: &mut LockTable, action: &ActionId, now: OffsetDateTime) -> LockAcquisition {
    let run_id = RunId::generate(now);
    table.entries.insert(
        action.clone(),
        LockInfo {
            action: action.clone(),
            run_id: run_id.clone(),
            acquired_at: now,
        },
    );
    tracing::debug!(action = %action, run_id = %run_id, "granted lock");
    LockAcquisition::Acquired {
        run_id,
        acquired_at: now,
    }
}

fn is_stale(entry: &LockInfo, now: OffsetDateTime, stale_after: Duration) -> bool {
    let age_ms = (now - entry.acquired_at).whole_milliseconds();
    let limit_ms = i128::try_from(stale_after.as_millis()).unwrap_or(i128::MAX);
    age_ms > limit_ms
}

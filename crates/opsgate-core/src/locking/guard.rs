use std::sync::Arc;

use time::OffsetDateTime;

use crate::locking::LockManager;
use crate::models::{ActionId, RunId};

/// Releases the granted lock when dropped, on every exit path.
pub struct LockGuard {
    manager: Arc<dyn LockManager>,
    action: ActionId,
    run_id: RunId,
    acquired_at: OffsetDateTime,
}

impl LockGuard {
    pub fn new(
        manager: Arc<dyn LockManager>,
        action: ActionId,
        run_id: RunId,
        acquired_at: OffsetDateTime,
    ) -> Self {
        Self {
            manager,
            action,
            run_id,
            acquired_at,
        }
    }

    pub fn action(&self) -> &ActionId {
        &self.action
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn acquired_at(&self) -> OffsetDateTime {
        self.acquired_at
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.manager.release_run(&self.action, &self.run_id);
    }
}

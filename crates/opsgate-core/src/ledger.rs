//! Durable run ledger with a never-failing contract.
//!
//! Storage errors are logged and folded into the return value so that a
//! ledger outage can never stop an in-flight action from returning its
//! result to the caller.

use std::path::PathBuf;
use std::sync::Arc;

use crate::models::{ProjectId, RunId, RunRecord};
use crate::persistence::{ActionFamily, FileRunStore, RunFilter, RunStore};

#[derive(Clone)]
pub struct RunLedger {
    store: Arc<dyn RunStore>,
}

impl RunLedger {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    pub fn files(root: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileRunStore::new(root)))
    }

    /// Returns the stored run id, or `None` when the write failed.
    pub fn write(&self, record: &RunRecord) -> Option<RunId> {
        match self.store.append(record) {
            Ok(()) => Some(record.run_id.clone()),
            Err(error) => {
                tracing::error!(
                    run_id = %record.run_id,
                    action = %record.action,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to write run record"
                );
                None
            }
        }
    }

    /// Ids that could escape the storage root are reported as not found.
    pub fn read(&self, raw_run_id: &str) -> Option<RunRecord> {
        let Some(run_id) = RunId::parse(raw_run_id) else {
            tracing::debug!(run_id = raw_run_id, "rejected malformed run id");
            return None;
        };

        match self.store.get(&run_id) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(
                    run_id = %run_id,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to read run record"
                );
                None
            }
        }
    }

    pub fn list(&self, limit: usize) -> Vec<RunRecord> {
        self.list_matching(&RunFilter::all(), limit)
    }

    pub fn list_for_project(&self, project: &ProjectId, limit: usize) -> Vec<RunRecord> {
        self.list_matching(&RunFilter::all().project(project.clone()), limit)
    }

    pub fn list_for_action_family(&self, family: &ActionFamily, limit: usize) -> Vec<RunRecord> {
        self.list_matching(&RunFilter::all().family(family.clone()), limit)
    }

    pub fn latest_for_action_family(&self, family: &ActionFamily) -> Option<RunRecord> {
        self.list_for_action_family(family, 1).into_iter().next()
    }

    pub fn list_matching(&self, filter: &RunFilter, limit: usize) -> Vec<RunRecord> {
        match self.store.list_recent(filter, limit) {
            Ok(records) => records,
            Err(error) => {
                tracing::warn!(
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to list run records"
                );
                Vec::new()
            }
        }
    }
}

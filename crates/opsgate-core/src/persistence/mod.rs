pub mod file_store;

pub use file_store::FileRunStore;

use std::collections::BTreeSet;

use crate::models::{ActionId, CoreError, ProjectId, RunId, RunRecord};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

/// Append-only storage for run records. A record is written once and never
/// updated in place; appending an id that already exists is an error.
pub trait RunStore: Send + Sync {
    fn append(&self, record: &RunRecord) -> PersistenceResult<()>;

    fn get(&self, run_id: &RunId) -> PersistenceResult<Option<RunRecord>>;

    /// Newest first, ordered by run id.
    fn list_recent(&self, filter: &RunFilter, limit: usize) -> PersistenceResult<Vec<RunRecord>>;
}

/// Logical grouping of actions, either by name prefix or explicit membership.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ActionFamily {
    Prefix(String),
    Members(BTreeSet<ActionId>),
}

impl ActionFamily {
    pub fn members(actions: impl IntoIterator<Item = impl Into<ActionId>>) -> Self {
        ActionFamily::Members(actions.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, action: &ActionId) -> bool {
        match self {
            ActionFamily::Prefix(prefix) => action.as_str().starts_with(prefix.as_str()),
            ActionFamily::Members(members) => members.contains(action),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunFilter {
    pub project: Option<ProjectId>,
    pub family: Option<ActionFamily>,
}

impl RunFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn project(mut self, project: ProjectId) -> Self {
        self.project = Some(project);
        self
    }

    pub fn family(mut self, family: ActionFamily) -> Self {
        self.family = Some(family);
        self
    }

    pub fn matches(&self, record: &RunRecord) -> bool {
        if let Some(project) = &self.project
            && &record.project_id != project
        {
            return false;
        }
        if let Some(family) = &self.family
            && !family.contains(&record.action)
        {
            return false;
        }
        true
    }
}

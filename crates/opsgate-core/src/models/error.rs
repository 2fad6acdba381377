use thiserror::Error;

use crate::models::{ActionId, RunId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    NotAllowlisted,
    InvalidInput,
    ParseFailure,
    StorageFailure,
    Configuration,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub action: Option<ActionId>,
    pub run_id: Option<RunId>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            action: None,
            run_id: None,
            kind,
            message: message.into(),
        }
    }

    pub fn for_action(mut self, action: &ActionId) -> Self {
        self.action = Some(action.clone());
        self
    }

    pub fn for_run(mut self, run_id: &RunId) -> Self {
        self.run_id = Some(run_id.clone());
        self
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

pub mod coordinator;

pub use coordinator::ActionCoordinator;

use std::path::PathBuf;

use serde::Serialize;
use time::OffsetDateTime;

use crate::gateway::GatewayResponse;
use crate::models::{ActionId, RunId, RunRecord};

/// Answer to a caller that lost the race: the run it should join.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LockRejection {
    pub acquired: bool,
    pub action: ActionId,
    pub active_run_id: RunId,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
}

/// The gateway's policy gate refused to run the action (HTTP 423).
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AdmissionDenied {
    pub error_class: String,
    pub required_condition: Option<String>,
    pub run_id: RunId,
    pub artifact_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InvocationOutcome {
    Completed {
        record: RunRecord,
        response: GatewayResponse,
    },
    Busy(LockRejection),
    Denied(AdmissionDenied),
}

impl InvocationOutcome {
    pub fn run_id(&self) -> &RunId {
        match self {
            InvocationOutcome::Completed { record, .. } => &record.run_id,
            InvocationOutcome::Busy(rejection) => &rejection.active_run_id,
            InvocationOutcome::Denied(denied) => &denied.run_id,
        }
    }
}

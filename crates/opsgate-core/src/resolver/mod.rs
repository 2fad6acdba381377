//! Read-time status reconstruction for action families.
//!
//! Nothing here is cached: every call walks the ledger and the artifact tree
//! as they exist at that moment, and any unreadable piece degrades the result
//! instead of failing it.

pub mod access_url;
pub mod extract;
pub mod layout;
pub mod sessions;
pub mod snapshot;

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::ledger::RunLedger;
use crate::models::{CanonicalStatus, ResolvedStatus, RunRecord};
use crate::persistence::ActionFamily;

pub use extract::{DEFAULT_AUTH_ERROR_CLASSES, ExtractedFields, default_auth_error_classes};
pub use snapshot::BestEffort;

/// A group of actions whose latest run is reported as one status.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolverFamily {
    pub name: String,
    pub trackable_actions: ActionFamily,
    pub proof_root: Option<PathBuf>,
    pub gateway_artifact_root: Option<PathBuf>,
    pub session_registry_root: Option<PathBuf>,
    pub auth_error_classes: BTreeSet<String>,
    pub snapshot_path: Option<PathBuf>,
}

impl ResolverFamily {
    pub fn new(name: impl Into<String>, trackable_actions: ActionFamily) -> Self {
        Self {
            name: name.into(),
            trackable_actions,
            proof_root: None,
            gateway_artifact_root: None,
            session_registry_root: None,
            auth_error_classes: default_auth_error_classes(),
            snapshot_path: None,
        }
    }

    pub fn with_proof_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proof_root = Some(root.into());
        self
    }

    pub fn with_gateway_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.gateway_artifact_root = Some(root.into());
        self
    }

    pub fn with_session_registry_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.session_registry_root = Some(root.into());
        self
    }

    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }
}

#[derive(Clone)]
pub struct StatusResolver {
    ledger: RunLedger,
}

impl StatusResolver {
    pub fn new(ledger: RunLedger) -> Self {
        Self { ledger }
    }

    pub fn resolve(&self, family: &ResolverFamily) -> ResolvedStatus {
        match self.ledger.latest_for_action_family(&family.trackable_actions) {
            Some(record) => resolve_record(&record, family),
            None => {
                tracing::debug!(family = %family.name, "no runs recorded for family");
                ResolvedStatus::unknown()
            }
        }
    }

    pub fn resolve_and_snapshot(&self, family: &ResolverFamily) -> (ResolvedStatus, BestEffort) {
        let status = self.resolve(family);
        let written = snapshot::write_snapshot(family.snapshot_path.as_deref(), &status);
        (status, written)
    }
}

pub fn resolve_record(record: &RunRecord, family: &ResolverFamily) -> ResolvedStatus {
    let mut resolved = ResolvedStatus {
        run_id: Some(record.run_id.clone()),
        started_at: Some(record.started_at),
        finished_at: Some(record.finished_at),
        ..ResolvedStatus::unknown()
    };

    let Some(artifact_dir) = layout::resolve_artifact_dir(
        record,
        family.proof_root.as_deref(),
        family.gateway_artifact_root.as_deref(),
    ) else {
        tracing::debug!(
            family = %family.name,
            run_id = %record.run_id,
            "no artifact directory found for run"
        );
        return resolved;
    };

    let fields = extract::extract_fields(&artifact_dir);
    let status = fields
        .status
        .as_deref()
        .map(CanonicalStatus::normalize)
        .unwrap_or_default();
    resolved.status = extract::reclassify(
        status,
        fields.error_class.as_deref(),
        &family.auth_error_classes,
    );
    resolved.error_class = fields.error_class;
    resolved.instruction_line = fields.instruction_line;

    if let Some(raw) = fields.access_url.filter(|url| !url.trim().is_empty()) {
        let canonical = access_url::canonicalize(&raw);
        if canonical != raw {
            resolved.access_url_raw = Some(raw);
        }
        resolved.access_url = Some(canonical);
    }

    if resolved.status == CanonicalStatus::WaitingForHuman {
        resolved.live_session_url = family
            .session_registry_root
            .as_deref()
            .and_then(sessions::find_live_session)
            .map(|url| access_url::canonicalize(&url));
    }

    resolved.artifact_links = layout::artifact_links(&artifact_dir);
    resolved.artifact_dir = Some(artifact_dir);
    resolved
}

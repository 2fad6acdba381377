use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::models::RunId;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CanonicalStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "WAITING_FOR_HUMAN")]
    WaitingForHuman,
    #[serde(rename = "FAILURE")]
    Failure,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "BLOCKED")]
    Blocked,
    #[default]
    #[serde(rename = "UNKNOWN")]
    Unknown,
    #[serde(rename = "running")]
    Running,
}

impl CanonicalStatus {
    /// Maps the loosely-cased strings written by external processes.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "succeeded" | "ok" => CanonicalStatus::Success,
            "failure" | "failed" | "error" => CanonicalStatus::Failure,
            "timeout" | "timed_out" => CanonicalStatus::Timeout,
            "blocked" => CanonicalStatus::Blocked,
            "waiting_for_human" => CanonicalStatus::WaitingForHuman,
            "running" | "in_progress" | "started" => CanonicalStatus::Running,
            _ => CanonicalStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalStatus::Success => "SUCCESS",
            CanonicalStatus::WaitingForHuman => "WAITING_FOR_HUMAN",
            CanonicalStatus::Failure => "FAILURE",
            CanonicalStatus::Timeout => "TIMEOUT",
            CanonicalStatus::Blocked => "BLOCKED",
            CanonicalStatus::Unknown => "UNKNOWN",
            CanonicalStatus::Running => "running",
        }
    }
}

/// Canonical status of the most relevant run, recomputed on every read.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResolvedStatus {
    pub status: CanonicalStatus,
    pub error_class: Option<String>,
    pub run_id: Option<RunId>,
    pub artifact_dir: Option<PathBuf>,
    pub instruction_line: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    pub access_url: Option<String>,
    /// Only set when canonicalization changed the discovered URL.
    pub access_url_raw: Option<String>,
    pub live_session_url: Option<String>,
    pub artifact_links: BTreeMap<String, PathBuf>,
}

impl ResolvedStatus {
    pub fn unknown() -> Self {
        Self::default()
    }
}

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::models::{ActionId, CoreError, CoreErrorKind, ProjectId};

const MAX_RUN_ID_LEN: usize = 128;

/// Identifier minted at lock-acquire time: `<UTC YYYYMMDDTHHMMSSZ>-<4 hex>`.
///
/// Run ids double as ledger file names and artifact directory discriminators,
/// so only ASCII alphanumerics and `-` are ever accepted.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    pub fn generate(now: OffsetDateTime) -> Self {
        let now = now.to_offset(time::UtcOffset::UTC);
        let suffix: u16 = rand::random();
        Self(format!(
            "{:04}{:02}{:02}T{:02}{:02}{:02}Z-{suffix:04x}",
            now.year(),
            u8::from(now.month()),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
        ))
    }

    /// Returns `None` for anything that could escape a storage root.
    pub fn parse(raw: &str) -> Option<Self> {
        if is_valid_run_id(raw) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `YYYYMMDDTHHMMSSZ` prefix shared with gateway artifact directories.
    pub fn timestamp_component(&self) -> &str {
        self.0
            .split_once('-')
            .map(|(timestamp, _)| timestamp)
            .unwrap_or(&self.0)
    }
}

pub fn is_valid_run_id(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= MAX_RUN_ID_LEN
        && raw.bytes().all(|byte| byte.is_ascii_alphanumeric() || byte == b'-')
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RunId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_valid_run_id(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("run id '{value}' contains characters outside [A-Za-z0-9-]"),
            ))
        }
    }
}

impl From<RunId> for String {
    fn from(value: RunId) -> Self {
        value.0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Failure,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Error => "error",
        }
    }
}

impl FromStr for RunStatus {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            "error" => Ok(RunStatus::Error),
            _ => Err(CoreError::new(
                CoreErrorKind::ParseFailure,
                format!("unknown run status '{raw}'"),
            )),
        }
    }
}

/// One immutable ledger entry per completed or failed run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub project_id: ProjectId,
    pub action: ActionId,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub error_summary: Option<String>,
    #[serde(default)]
    pub artifact_paths: Vec<PathBuf>,
}

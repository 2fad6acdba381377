//! Status extraction over the artifact files of one run.
//!
//! Each candidate file is read into an `Option<ExtractedFields>` and folded
//! into the accumulator in [`EXTRACTION_ORDER`]. A missing, unreadable or
//! malformed candidate is simply `None`.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::models::CanonicalStatus;
use crate::resolver::layout::{
    GATEWAY_RESULT_FILE, OUTPUT_FILE, PROOF_FILE, RESULT_FILE, WAITING_FOR_HUMAN_FILE,
};

pub const DEFAULT_AUTH_ERROR_CLASSES: &[&str] = &[
    "AUTH_REQUIRED",
    "LOGIN_REQUIRED",
    "SESSION_EXPIRED",
    "SESSION_CHECK_TIMEOUT",
    "TWO_FACTOR_REQUIRED",
    "MFA_REQUIRED",
    "CAPTCHA_REQUIRED",
];

const MAX_OUTPUT_TAIL_BYTES: u64 = 64 * 1024;
const WAITING_FOR_HUMAN_STATUS: &str = "waiting_for_human";
const PROOF_DEFAULT_STATUS: &str = "success";

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(from = "RawFields")]
pub struct ExtractedFields {
    pub status: Option<String>,
    pub error_class: Option<String>,
    pub instruction_line: Option<String>,
    pub access_url: Option<String>,
}

/// Artifact writers name the access URL under any of three keys, sometimes
/// several at once.
#[derive(Default, Deserialize)]
#[serde(default)]
struct RawFields {
    status: Option<String>,
    error_class: Option<String>,
    instruction_line: Option<String>,
    access_url: Option<String>,
    url: Option<String>,
    novnc_url: Option<String>,
}

impl From<RawFields> for ExtractedFields {
    fn from(raw: RawFields) -> Self {
        Self {
            status: raw.status,
            error_class: raw.error_class,
            instruction_line: raw.instruction_line,
            access_url: first_url([raw.access_url, raw.url, raw.novnc_url]),
        }
    }
}

pub(crate) fn first_url<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|url| !url.trim().is_empty())
}

impl ExtractedFields {
    /// Fills only the fields that are still empty.
    fn fill_from(&mut self, other: ExtractedFields) {
        self.status = self.status.take().or(other.status);
        self.error_class = self.error_class.take().or(other.error_class);
        self.instruction_line = self.instruction_line.take().or(other.instruction_line);
        self.access_url = self.access_url.take().or(other.access_url);
    }

    /// The waiting marker wins over anything read before it.
    fn override_with(&mut self, marker: ExtractedFields) {
        self.status = marker.status.or(self.status.take());
        self.instruction_line = marker.instruction_line.or(self.instruction_line.take());
        self.access_url = marker.access_url.or(self.access_url.take());
        self.error_class = self.error_class.take().or(marker.error_class);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Candidate {
    StructuredResult,
    WaitingMarker,
    Proof,
    GatewayResult,
    OutputTail,
}

pub const EXTRACTION_ORDER: [Candidate; 5] = [
    Candidate::StructuredResult,
    Candidate::WaitingMarker,
    Candidate::Proof,
    Candidate::GatewayResult,
    Candidate::OutputTail,
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Flow {
    Continue,
    Stop,
}

impl Candidate {
    pub fn file_name(self) -> &'static str {
        match self {
            Candidate::StructuredResult => RESULT_FILE,
            Candidate::WaitingMarker => WAITING_FOR_HUMAN_FILE,
            Candidate::Proof => PROOF_FILE,
            Candidate::GatewayResult => GATEWAY_RESULT_FILE,
            Candidate::OutputTail => OUTPUT_FILE,
        }
    }

    pub fn read(self, dir: &Path) -> Option<ExtractedFields> {
        let path = dir.join(self.file_name());
        match self {
            Candidate::StructuredResult => read_json(&path),
            Candidate::WaitingMarker => {
                read_json::<ExtractedFields>(&path).map(|mut fields| {
                    fields.status = Some(WAITING_FOR_HUMAN_STATUS.to_string());
                    fields
                })
            }
            Candidate::Proof => read_json::<ExtractedFields>(&path).map(|mut fields| {
                if fields.status.is_none() {
                    fields.status = Some(PROOF_DEFAULT_STATUS.to_string());
                }
                fields
            }),
            Candidate::GatewayResult => {
                read_json::<ExtractedFields>(&path).map(|fields| ExtractedFields {
                    error_class: fields.error_class,
                    ..ExtractedFields::default()
                })
            }
            Candidate::OutputTail => last_structured_line(&path),
        }
    }

    fn fold(self, accumulated: &mut ExtractedFields, found: ExtractedFields) -> Flow {
        match self {
            Candidate::WaitingMarker => {
                accumulated.override_with(found);
                Flow::Continue
            }
            Candidate::Proof => {
                accumulated.fill_from(found);
                Flow::Stop
            }
            Candidate::StructuredResult | Candidate::GatewayResult | Candidate::OutputTail => {
                accumulated.fill_from(found);
                Flow::Continue
            }
        }
    }
}

pub fn extract_fields(dir: &Path) -> ExtractedFields {
    let mut accumulated = ExtractedFields::default();
    for candidate in EXTRACTION_ORDER {
        // The raw output stream is a last resort for the status only.
        if candidate == Candidate::OutputTail && accumulated.status.is_some() {
            continue;
        }
        let Some(found) = candidate.read(dir) else {
            continue;
        };
        if candidate.fold(&mut accumulated, found) == Flow::Stop {
            break;
        }
    }
    accumulated
}

/// A failure caused by a needed login or session check is waiting on a
/// person, not failed.
pub fn reclassify(
    status: CanonicalStatus,
    error_class: Option<&str>,
    auth_error_classes: &BTreeSet<String>,
) -> CanonicalStatus {
    let needs_human = error_class
        .map(|class| class.trim().to_ascii_uppercase())
        .is_some_and(|class| auth_error_classes.contains(&class));

    match status {
        CanonicalStatus::Failure | CanonicalStatus::Timeout if needs_human => {
            CanonicalStatus::WaitingForHuman
        }
        other => other,
    }
}

pub fn default_auth_error_classes() -> BTreeSet<String> {
    DEFAULT_AUTH_ERROR_CLASSES
        .iter()
        .map(|class| class.to_string())
        .collect()
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = std::fs::read(path).ok()?;
    match serde_json::from_slice(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::debug!(path = %path.display(), message = %error, "ignoring unparsable artifact");
            None
        }
    }
}

fn last_structured_line(path: &Path) -> Option<ExtractedFields> {
    let mut file = File::open(path).ok()?;
    let length = file.metadata().ok()?.len();
    let start = length.saturating_sub(MAX_OUTPUT_TAIL_BYTES);
    file.seek(SeekFrom::Start(start)).ok()?;

    let mut tail = Vec::new();
    file.read_to_end(&mut tail).ok()?;
    let tail = String::from_utf8_lossy(&tail);

    tail.lines().rev().find_map(|line| {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str::<ExtractedFields>(line).ok()
    })
}

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::models::{RunId, RunRecord};

pub const RESULT_FILE: &str = "result.json";
pub const WAITING_FOR_HUMAN_FILE: &str = "waiting_for_human.json";
pub const PROOF_FILE: &str = "proof.json";
pub const GATEWAY_RESULT_FILE: &str = "gateway_result.json";
pub const OUTPUT_FILE: &str = "output.log";
pub const SCREENSHOT_FILE: &str = "screenshot.png";
pub const TRACE_FILE: &str = "trace.zip";

/// A proof directory counts as complete once its proof file exists.
pub const COMPLETION_MARKER: &str = PROOF_FILE;

pub const WELL_KNOWN_ARTIFACTS: [(&str, &str); 7] = [
    ("result", RESULT_FILE),
    ("waiting_for_human", WAITING_FOR_HUMAN_FILE),
    ("proof", PROOF_FILE),
    ("gateway_result", GATEWAY_RESULT_FILE),
    ("output", OUTPUT_FILE),
    ("screenshot", SCREENSHOT_FILE),
    ("trace", TRACE_FILE),
];

pub fn resolve_artifact_dir(
    record: &RunRecord,
    proof_root: Option<&Path>,
    gateway_artifact_root: Option<&Path>,
) -> Option<PathBuf> {
    recorded_artifact_dir(record)
        .or_else(|| proof_root.and_then(newest_completed_proof_dir))
        .or_else(|| gateway_artifact_root.and_then(|root| timestamp_matched_dir(root, &record.run_id)))
}

pub fn recorded_artifact_dir(record: &RunRecord) -> Option<PathBuf> {
    record.artifact_paths.iter().find_map(|path| {
        if path.is_dir() {
            Some(path.clone())
        } else if path.is_file() {
            path.parent().map(Path::to_path_buf)
        } else {
            None
        }
    })
}

pub fn newest_completed_proof_dir(root: &Path) -> Option<PathBuf> {
    subdirectories(root)
        .into_iter()
        .filter(|entry| entry.path.join(COMPLETION_MARKER).is_file())
        .max_by(|left, right| {
            left.modified
                .cmp(&right.modified)
                .then_with(|| left.path.cmp(&right.path))
        })
        .map(|entry| entry.path)
}

/// Gateway artifact directories are named `<run timestamp>[-suffix]`.
pub fn timestamp_matched_dir(root: &Path, run_id: &RunId) -> Option<PathBuf> {
    let prefix = run_id.timestamp_component();
    subdirectories(root)
        .into_iter()
        .filter(|entry| {
            entry
                .path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(prefix))
        })
        .map(|entry| entry.path)
        .max()
}

pub fn artifact_links(dir: &Path) -> BTreeMap<String, PathBuf> {
    WELL_KNOWN_ARTIFACTS
        .iter()
        .filter_map(|(name, file_name)| {
            let path = dir.join(file_name);
            path.is_file().then(|| (name.to_string(), path))
        })
        .collect()
}

pub(crate) struct DirEntryInfo {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// Unreadable roots and entries are skipped.
pub(crate) fn subdirectories(root: &Path) -> Vec<DirEntryInfo> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };

    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if !metadata.is_dir() {
                return None;
            }
            Some(DirEntryInfo {
                path: entry.path(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            })
        })
        .collect()
}

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::models::{CoreError, CoreErrorKind, RunId, RunRecord};
use crate::persistence::{PersistenceResult, RunFilter, RunStore};

const RECORD_EXTENSION: &str = "json";

/// One `<run_id>.json` file per run.
///
/// Records are staged in a hidden temp file and hard-linked into place, so a
/// reader never sees a partial record and an existing record is never
/// replaced.
pub struct FileRunStore {
    root: PathBuf,
}

impl FileRunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, run_id: &RunId) -> PathBuf {
        self.root.join(format!("{run_id}.{RECORD_EXTENSION}"))
    }

    fn staging_path(&self, run_id: &RunId) -> PathBuf {
        let nonce: u32 = rand::random();
        self.root.join(format!(".{run_id}.{nonce:08x}.tmp"))
    }

    fn listed_run_ids(&self) -> PersistenceResult<Vec<RunId>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(storage_error("list_recent", error)),
        };

        let mut run_ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|error| storage_error("list_recent", error))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(stem) = file_name.strip_suffix(".json") else {
                continue;
            };
            if let Some(run_id) = RunId::parse(stem) {
                run_ids.push(run_id);
            }
        }

        run_ids.sort_unstable_by(|left, right| right.cmp(left));
        Ok(run_ids)
    }
}

impl RunStore for FileRunStore {
    fn append(&self, record: &RunRecord) -> PersistenceResult<()> {
        fs::create_dir_all(&self.root).map_err(|error| storage_error("append", error))?;

        let payload = serde_json::to_vec_pretty(record).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("failed to encode run record: {error}"),
            )
            .for_run(&record.run_id)
        })?;

        let staging = self.staging_path(&record.run_id);
        let destination = self.record_path(&record.run_id);
        let outcome = stage_and_link(&staging, &destination, &payload);
        let _ = fs::remove_file(&staging);

        outcome.map_err(|error| {
            let error = if error.kind() == io::ErrorKind::AlreadyExists {
                CoreError::new(
                    CoreErrorKind::StorageFailure,
                    format!("run record '{}' already exists", record.run_id),
                )
            } else {
                storage_error("append", error)
            };
            error.for_run(&record.run_id)
        })
    }

    fn get(&self, run_id: &RunId) -> PersistenceResult<Option<RunRecord>> {
        let raw = match fs::read(self.record_path(run_id)) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(storage_error("get", error).for_run(run_id)),
        };

        let record: RunRecord = serde_json::from_slice(&raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ParseFailure,
                format!("run record '{run_id}' is not valid: {error}"),
            )
            .for_run(run_id)
        })?;

        if &record.run_id != run_id {
            return Err(CoreError::new(
                CoreErrorKind::ParseFailure,
                format!(
                    "run record file '{run_id}' contains run id '{}'",
                    record.run_id
                ),
            )
            .for_run(run_id));
        }

        Ok(Some(record))
    }

    fn list_recent(&self, filter: &RunFilter, limit: usize) -> PersistenceResult<Vec<RunRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for run_id in self.listed_run_ids()? {
            match self.get(&run_id) {
                Ok(Some(record)) if filter.matches(&record) => {
                    records.push(record);
                    if records.len() >= limit {
                        break;
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(
                        run_id = %run_id,
                        kind = ?error.kind,
                        message = %error.message,
                        "skipping unreadable run record"
                    );
                }
            }
        }

        Ok(records)
    }
}

fn stage_and_link(staging: &Path, destination: &Path, payload: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(staging)?;
    file.write_all(payload)?;
    file.sync_all()?;
    drop(file);
    fs::hard_link(staging, destination)
}

fn storage_error(operation: &str, error: io::Error) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("file run store '{operation}' failed: {error}"),
    )
}

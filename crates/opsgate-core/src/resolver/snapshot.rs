use std::fs;
use std::io::Write;
use std::path::Path;

use crate::models::{CoreError, CoreErrorKind, ResolvedStatus};

/// Outcome of a write nobody depends on.
#[derive(Debug)]
#[must_use = "best-effort outcomes may be ignored explicitly with `let _ =`"]
pub enum BestEffort {
    Written,
    Skipped,
    Failed(CoreError),
}

impl BestEffort {
    pub fn is_written(&self) -> bool {
        matches!(self, BestEffort::Written)
    }
}

/// Writes the display snapshot through a sibling temp file and a rename.
/// The snapshot is never read back.
pub fn write_snapshot(path: Option<&Path>, status: &ResolvedStatus) -> BestEffort {
    let Some(path) = path else {
        return BestEffort::Skipped;
    };

    match write_atomically(path, status) {
        Ok(()) => BestEffort::Written,
        Err(error) => {
            tracing::warn!(path = %path.display(), message = %error.message, "status snapshot not written");
            BestEffort::Failed(error)
        }
    }
}

fn write_atomically(path: &Path, status: &ResolvedStatus) -> Result<(), CoreError> {
    let encoded = serde_json::to_vec_pretty(status).map_err(|error| {
        CoreError::new(
            CoreErrorKind::Internal,
            format!("failed to encode status snapshot: {error}"),
        )
    })?;

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(storage_error)?;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("status");
    let staging = path.with_file_name(format!(".{file_name}.{:08x}.tmp", rand::random::<u32>()));

    let staged = fs::File::create(&staging)
        .and_then(|mut file| {
            file.write_all(&encoded)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&staging, path));
    if let Err(error) = staged {
        let _ = fs::remove_file(&staging);
        return Err(storage_error(error));
    }
    Ok(())
}

fn storage_error(error: std::io::Error) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("failed to write status snapshot: {error}"),
    )
}

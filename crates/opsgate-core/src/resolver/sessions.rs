use std::cmp::Reverse;
use std::path::Path;

use serde::Deserialize;

use crate::resolver::extract::first_url;
use crate::resolver::layout::subdirectories;

pub const SESSION_STATE_FILE: &str = "state.json";
pub const MAX_SESSIONS_SCANNED: usize = 5;

const LIVE_STATE: &str = "live";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SessionState {
    state: Option<String>,
    access_url: Option<String>,
    url: Option<String>,
    novnc_url: Option<String>,
}

/// Access URL of the newest live session, if one of the most recent
/// session directories reports itself live.
pub fn find_live_session(registry_root: &Path) -> Option<String> {
    let mut sessions = subdirectories(registry_root);
    sessions.sort_by_key(|entry| Reverse((entry.modified, entry.path.clone())));

    sessions
        .into_iter()
        .take(MAX_SESSIONS_SCANNED)
        .find_map(|entry| {
            let raw = std::fs::read(entry.path.join(SESSION_STATE_FILE)).ok()?;
            let state: SessionState = serde_json::from_slice(&raw).ok()?;
            let live = state
                .state
                .as_deref()
                .is_some_and(|value| value.trim().eq_ignore_ascii_case(LIVE_STATE));
            if !live {
                return None;
            }
            first_url([state.access_url, state.url, state.novnc_url])
        })
}

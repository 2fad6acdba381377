pub mod http;

pub use http::HttpGatewayClient;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{ActionId, RunId};

pub const DEFAULT_NORMAL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LONG_RUNNING_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_LONG_RUNNING_ACTIONS: &[&str] = &[
    "session_login",
    "session_login_interactive",
    "deploy",
    "backtest",
];

pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HEALTH_RETRIES: u32 = 3;
pub const DEFAULT_HEALTH_BACKOFF: Duration = Duration::from_millis(500);

pub const HTTP_STATUS_LOCKED: u16 = 423;

pub const ERROR_CLASS_TIMEOUT: &str = "GATEWAY_TIMEOUT";
pub const ERROR_CLASS_UNREACHABLE: &str = "GATEWAY_UNREACHABLE";
pub const ERROR_CLASS_BAD_RESPONSE: &str = "GATEWAY_BAD_RESPONSE";
pub const ERROR_CLASS_ADMISSION_DENIED: &str = "ADMISSION_DENIED";
pub const ERROR_CLASS_PANICKED: &str = "GATEWAY_PANICKED";

const MAX_STREAM_BYTES: usize = 128 * 1024;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GatewayRequest {
    pub action: ActionId,
    pub target: String,
    pub run_id: RunId,
}

/// Standard shape for every execution outcome, including transport failures.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayResponse {
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub artifact_dir: Option<PathBuf>,
    pub error: Option<String>,
    pub http_status: Option<u16>,
    pub error_class: Option<String>,
    pub required_condition: Option<String>,
}

impl GatewayResponse {
    pub fn failure(error_class: &str, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            ok: false,
            duration_ms,
            error: Some(error.into()),
            error_class: Some(error_class.to_string()),
            ..Self::default()
        }
    }

    /// A higher-level policy gate refused the run (HTTP 423).
    pub fn is_admission_denied(&self) -> bool {
        self.http_status == Some(HTTP_STATUS_LOCKED)
    }

    /// No verdict from the remote side: transport failure, timeout or panic.
    pub fn is_transport_failure(&self) -> bool {
        !self.ok && self.http_status.is_none()
    }

    pub(crate) fn truncate_streams(mut self) -> Self {
        self.stdout = tail_window(self.stdout);
        self.stderr = tail_window(self.stderr);
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub ok: bool,
    pub duration_ms: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionClass {
    Normal,
    LongRunning,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimeoutPolicy {
    pub normal: Duration,
    /// `None` leaves long-running actions unbounded.
    pub long_running: Option<Duration>,
    pub long_running_actions: BTreeSet<ActionId>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            normal: DEFAULT_NORMAL_TIMEOUT,
            long_running: Some(DEFAULT_LONG_RUNNING_TIMEOUT),
            long_running_actions: DEFAULT_LONG_RUNNING_ACTIONS
                .iter()
                .copied()
                .map(ActionId::from)
                .collect(),
        }
    }
}

impl TimeoutPolicy {
    pub fn classify(&self, action: &ActionId) -> ActionClass {
        if self.long_running_actions.contains(action) {
            ActionClass::LongRunning
        } else {
            ActionClass::Normal
        }
    }

    pub fn timeout_for(&self, action: &ActionId) -> Option<Duration> {
        match self.classify(action) {
            ActionClass::Normal => Some(self.normal),
            ActionClass::LongRunning => self.long_running,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HealthPolicy {
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HEALTH_TIMEOUT,
            retries: DEFAULT_HEALTH_RETRIES,
            backoff: DEFAULT_HEALTH_BACKOFF,
        }
    }
}

impl HealthPolicy {
    /// Linear backoff before retry number `attempt` (1-based).
    pub fn backoff_before(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// Remote execution surface invoked between lock acquire and release.
///
/// Implementations block; async callers go through `spawn_blocking`.
/// Neither method may fail: errors are converted into the response shape.
pub trait ActionGateway: Send + Sync {
    fn execute(&self, request: &GatewayRequest) -> GatewayResponse;

    fn health_check(&self) -> HealthReport;
}

fn tail_window(text: String) -> String {
    if text.len() <= MAX_STREAM_BYTES {
        return text;
    }
    let mut start = text.len() - MAX_STREAM_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

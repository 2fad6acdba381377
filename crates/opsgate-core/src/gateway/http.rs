use std::error::Error as _;
use std::io;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::gateway::{
    ActionGateway, ERROR_CLASS_ADMISSION_DENIED, ERROR_CLASS_BAD_RESPONSE, ERROR_CLASS_TIMEOUT,
    ERROR_CLASS_UNREACHABLE, GatewayRequest, GatewayResponse, HTTP_STATUS_LOCKED, HealthPolicy,
    HealthReport, TimeoutPolicy,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RUN_ID_HEADER: &str = "X-Opsgate-Run-Id";

/// Blocking HTTP client for the remote execution gateway.
///
/// The agent carries no read/write timeouts of its own; each request gets an
/// explicit bound from the action-aware [`TimeoutPolicy`].
pub struct HttpGatewayClient {
    base_url: String,
    token: Option<String>,
    timeouts: TimeoutPolicy,
    health: HealthPolicy,
    agent: ureq::Agent,
}

#[derive(Serialize)]
struct ExecuteBody<'a> {
    action: &'a str,
    run_id: &'a str,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct LockedBody {
    error_class: Option<String>,
    required_condition: Option<String>,
    error: Option<String>,
    artifact_dir: Option<std::path::PathBuf>,
}

impl HttpGatewayClient {
    pub fn new(base_url: impl Into<String>, timeouts: TimeoutPolicy, health: HealthPolicy) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            timeouts,
            health,
            agent,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|token| !token.trim().is_empty());
        self
    }

    pub fn timeouts(&self) -> &TimeoutPolicy {
        &self.timeouts
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }
}

impl ActionGateway for HttpGatewayClient {
    fn execute(&self, request: &GatewayRequest) -> GatewayResponse {
        let url = format!("{}/v1/actions/{}", self.base_url, request.target);
        let bound = self.timeouts.timeout_for(&request.action);

        let mut http = self
            .authorize(self.agent.post(&url))
            .set(RUN_ID_HEADER, request.run_id.as_str());
        if let Some(bound) = bound {
            http = http.timeout(bound);
        }

        let started = Instant::now();
        let outcome = http.send_json(ExecuteBody {
            action: request.action.as_str(),
            run_id: request.run_id.as_str(),
        });
        let elapsed_ms = elapsed_ms(started);

        let response = match outcome {
            Ok(response) => decode_success(response, elapsed_ms),
            Err(ureq::Error::Status(code, response)) => decode_status(code, response, elapsed_ms),
            Err(ureq::Error::Transport(transport)) => {
                let response = transport_failure(&transport, bound, elapsed_ms);
                tracing::warn!(
                    action = %request.action,
                    run_id = %request.run_id,
                    error_class = response.error_class.as_deref().unwrap_or_default(),
                    message = %transport,
                    "gateway request failed"
                );
                response
            }
        };

        response.truncate_streams()
    }

    fn health_check(&self) -> HealthReport {
        let url = format!("{}/health", self.base_url);
        let started = Instant::now();
        let attempts = self.health.retries.max(1);

        for attempt in 1..=attempts {
            let probe = self
                .authorize(self.agent.get(&url))
                .timeout(self.health.timeout)
                .call();
            match probe {
                Ok(_) => {
                    return HealthReport {
                        ok: true,
                        duration_ms: elapsed_ms(started),
                    };
                }
                Err(error) => {
                    tracing::debug!(attempt, attempts, message = %error, "gateway health probe failed");
                }
            }
            if attempt < attempts {
                std::thread::sleep(self.health.backoff_before(attempt));
            }
        }

        HealthReport {
            ok: false,
            duration_ms: elapsed_ms(started),
        }
    }
}

fn decode_success(response: ureq::Response, elapsed_ms: u64) -> GatewayResponse {
    let status = response.status();
    match response.into_json::<GatewayResponse>() {
        Ok(mut body) => {
            body.http_status = Some(status);
            if body.duration_ms == 0 {
                body.duration_ms = elapsed_ms;
            }
            body
        }
        Err(error) => {
            let mut failure = GatewayResponse::failure(
                ERROR_CLASS_BAD_RESPONSE,
                format!("gateway returned an unreadable body: {error}"),
                elapsed_ms,
            );
            failure.http_status = Some(status);
            failure
        }
    }
}

fn decode_status(code: u16, response: ureq::Response, elapsed_ms: u64) -> GatewayResponse {
    if code == HTTP_STATUS_LOCKED {
        let body: LockedBody = response.into_json().unwrap_or_default();
        let error_class = body
            .error_class
            .unwrap_or_else(|| ERROR_CLASS_ADMISSION_DENIED.to_string());
        return GatewayResponse {
            ok: false,
            duration_ms: elapsed_ms,
            artifact_dir: body.artifact_dir,
            error: Some(
                body.error
                    .unwrap_or_else(|| format!("execution refused by policy gate ({error_class})")),
            ),
            http_status: Some(code),
            error_class: Some(error_class),
            required_condition: body.required_condition,
            ..GatewayResponse::default()
        };
    }

    let mut body = response
        .into_json::<GatewayResponse>()
        .unwrap_or_default();
    body.ok = false;
    body.http_status = Some(code);
    if body.duration_ms == 0 {
        body.duration_ms = elapsed_ms;
    }
    if body.error_class.is_none() {
        body.error_class = Some(format!("GATEWAY_HTTP_{code}"));
    }
    if body.error.is_none() {
        body.error = Some(format!("gateway responded with HTTP {code}"));
    }
    body
}

fn transport_failure(
    transport: &ureq::Transport,
    bound: Option<Duration>,
    elapsed_ms: u64,
) -> GatewayResponse {
    if is_timeout(transport) {
        let bound_ms = bound.map(|bound| bound.as_millis()).unwrap_or_default();
        GatewayResponse::failure(
            ERROR_CLASS_TIMEOUT,
            format!("gateway did not respond within {bound_ms}ms"),
            elapsed_ms,
        )
    } else {
        GatewayResponse::failure(
            ERROR_CLASS_UNREACHABLE,
            format!("gateway unreachable: {transport}"),
            elapsed_ms,
        )
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = transport.source();
    while let Some(error) = source {
        if let Some(io_error) = error.downcast_ref::<io::Error>()
            && matches!(
                io_error.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            )
        {
            return true;
        }
        source = error.source();
    }
    transport.to_string().contains("timed out")
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

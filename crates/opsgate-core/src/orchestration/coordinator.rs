use std::sync::Arc;

use time::OffsetDateTime;

use crate::catalog::ActionCatalog;
use crate::config::OpsgateConfig;
use crate::gateway::{
    ActionGateway, ERROR_CLASS_ADMISSION_DENIED, ERROR_CLASS_PANICKED, GatewayRequest,
    GatewayResponse, HealthReport,
};
use crate::ledger::RunLedger;
use crate::locking::{InMemoryLockManager, LockAcquisition, LockGuard, LockManager};
use crate::models::{
    ActionId, CoreError, CoreErrorKind, CoreResult, ProjectId, ResolvedStatus, RunId, RunRecord,
    RunStatus,
};
use crate::orchestration::{AdmissionDenied, InvocationOutcome, LockRejection};
use crate::persistence::RunFilter;
use crate::resolver::{ResolverFamily, StatusResolver};

/// Runs one action invocation end to end: catalog check, lock, gateway,
/// ledger, release.
#[derive(Clone)]
pub struct ActionCoordinator {
    catalog: Arc<ActionCatalog>,
    locks: Arc<dyn LockManager>,
    gateway: Arc<dyn ActionGateway>,
    ledger: RunLedger,
    resolver: StatusResolver,
}

impl ActionCoordinator {
    pub fn new(
        catalog: ActionCatalog,
        locks: Arc<dyn LockManager>,
        gateway: Arc<dyn ActionGateway>,
        ledger: RunLedger,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            locks,
            gateway,
            resolver: StatusResolver::new(ledger.clone()),
            ledger,
        }
    }

    pub fn from_config(config: &OpsgateConfig) -> CoreResult<Self> {
        let locks = InMemoryLockManager::new(Arc::new(config.lock_policy()));
        Ok(Self::new(
            config.catalog(),
            Arc::new(locks),
            Arc::new(config.gateway_client()),
            RunLedger::new(config.run_store()?),
        ))
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    pub fn locks(&self) -> &Arc<dyn LockManager> {
        &self.locks
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    /// Only admission errors surface as `Err`; every execution outcome,
    /// including a gateway panic, is ledgered and returned as a value.
    ///
    /// Once the lock is granted the run completes and is ledgered even if
    /// the returned future is dropped.
    pub async fn invoke(
        &self,
        project: &ProjectId,
        action: &ActionId,
    ) -> CoreResult<InvocationOutcome> {
        let descriptor = self.catalog.resolve(project, action)?.clone();

        let guard = match self.locks.acquire(action) {
            LockAcquisition::Acquired {
                run_id,
                acquired_at,
            } => LockGuard::new(self.locks.clone(), action.clone(), run_id, acquired_at),
            LockAcquisition::Rejected { run_id, started_at } => {
                tracing::info!(
                    action = %action,
                    active_run_id = %run_id,
                    "action already in flight; caller should join"
                );
                return Ok(InvocationOutcome::Busy(LockRejection {
                    acquired: false,
                    action: action.clone(),
                    active_run_id: run_id,
                    started_at,
                }));
            }
        };

        // The locked execution is its own task: dropping the caller's future
        // must not release the lock while the gateway call is still running.
        let execution = tokio::spawn(self.clone().execute_locked(
            project.clone(),
            descriptor.target,
            guard,
        ));
        execution.await.map_err(|join_error| {
            tracing::error!(action = %action, message = %join_error, "action execution task failed");
            CoreError::new(
                CoreErrorKind::Internal,
                format!("action execution task failed: {join_error}"),
            )
            .for_action(action)
        })
    }

    async fn execute_locked(
        self,
        project: ProjectId,
        target: String,
        guard: LockGuard,
    ) -> InvocationOutcome {
        let action = guard.action().clone();
        let request = GatewayRequest {
            action: action.clone(),
            target,
            run_id: guard.run_id().clone(),
        };
        tracing::info!(
            project = %project,
            action = %action,
            run_id = %request.run_id,
            target = %request.target,
            "invoking action"
        );

        let response = execute_blocking(self.gateway.clone(), request).await;
        let record = run_record(&project, &guard, &response, OffsetDateTime::now_utc());
        self.write_record(record.clone()).await;

        tracing::info!(
            action = %action,
            run_id = %record.run_id,
            status = record.status.as_str(),
            duration_ms = record.duration_ms,
            "action finished"
        );
        drop(guard);

        if response.is_admission_denied() {
            return InvocationOutcome::Denied(AdmissionDenied {
                error_class: response
                    .error_class
                    .clone()
                    .unwrap_or_else(|| ERROR_CLASS_ADMISSION_DENIED.to_string()),
                required_condition: response.required_condition.clone(),
                run_id: record.run_id,
                artifact_dir: response.artifact_dir,
            });
        }

        InvocationOutcome::Completed { record, response }
    }

    pub async fn status(&self, family: &ResolverFamily) -> ResolvedStatus {
        let resolver = self.resolver.clone();
        let family = family.clone();
        let name = family.name.clone();
        match tokio::task::spawn_blocking(move || resolver.resolve_and_snapshot(&family)).await {
            Ok((status, _snapshot)) => status,
            Err(join_error) => {
                tracing::error!(family = %name, message = %join_error, "status resolution panicked");
                ResolvedStatus::unknown()
            }
        }
    }

    pub async fn run(&self, run_id: &str) -> Option<RunRecord> {
        let ledger = self.ledger.clone();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || ledger.read(&run_id))
            .await
            .unwrap_or_else(|join_error| {
                tracing::error!(message = %join_error, "ledger read panicked");
                None
            })
    }

    pub async fn recent_runs(&self, filter: RunFilter, limit: usize) -> Vec<RunRecord> {
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || ledger.list_matching(&filter, limit))
            .await
            .unwrap_or_else(|join_error| {
                tracing::error!(message = %join_error, "ledger listing panicked");
                Vec::new()
            })
    }

    pub async fn health(&self) -> HealthReport {
        let gateway = self.gateway.clone();
        tokio::task::spawn_blocking(move || gateway.health_check())
            .await
            .unwrap_or_else(|join_error| {
                tracing::error!(message = %join_error, "gateway health check panicked");
                HealthReport {
                    ok: false,
                    duration_ms: 0,
                }
            })
    }

    async fn write_record(&self, record: RunRecord) -> Option<RunId> {
        let ledger = self.ledger.clone();
        let run_id = record.run_id.clone();
        tokio::task::spawn_blocking(move || ledger.write(&record))
            .await
            .unwrap_or_else(|join_error| {
                tracing::error!(run_id = %run_id, message = %join_error, "ledger write panicked");
                None
            })
    }
}

async fn execute_blocking(
    gateway: Arc<dyn ActionGateway>,
    request: GatewayRequest,
) -> GatewayResponse {
    let started = std::time::Instant::now();
    let action = request.action.clone();
    let run_id = request.run_id.clone();

    tokio::task::spawn_blocking(move || gateway.execute(&request))
        .await
        .unwrap_or_else(|join_error| {
            tracing::error!(
                action = %action,
                run_id = %run_id,
                message = %join_error,
                "gateway call panicked"
            );
            GatewayResponse::failure(
                ERROR_CLASS_PANICKED,
                format!("gateway call panicked: {join_error}"),
                u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            )
        })
}

fn run_record(
    project: &ProjectId,
    guard: &LockGuard,
    response: &GatewayResponse,
    finished_at: OffsetDateTime,
) -> RunRecord {
    RunRecord {
        run_id: guard.run_id().clone(),
        project_id: project.clone(),
        action: guard.action().clone(),
        started_at: guard.acquired_at(),
        finished_at,
        status: run_status(response),
        exit_code: response.exit_code,
        duration_ms: response.duration_ms,
        error_summary: error_summary(response),
        artifact_paths: response.artifact_dir.iter().cloned().collect(),
    }
}

fn run_status(response: &GatewayResponse) -> RunStatus {
    if response.is_transport_failure() {
        RunStatus::Error
    } else if response.ok && response.exit_code.unwrap_or(0) == 0 {
        RunStatus::Success
    } else {
        RunStatus::Failure
    }
}

fn error_summary(response: &GatewayResponse) -> Option<String> {
    if run_status(response) == RunStatus::Success {
        return None;
    }
    let detail = response
        .error
        .clone()
        .or_else(|| response.exit_code.map(|code| format!("exit code {code}")))
        .or_else(|| last_line(&response.stderr));
    match (&response.error_class, detail) {
        (Some(class), Some(detail)) => Some(format!("{class}: {detail}")),
        (Some(class), None) => Some(class.clone()),
        (None, detail) => detail,
    }
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

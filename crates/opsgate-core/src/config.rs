//! JSON configuration with every section defaulted.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::ActionCatalog;
use crate::gateway::{
    DEFAULT_HEALTH_BACKOFF, DEFAULT_HEALTH_RETRIES, DEFAULT_HEALTH_TIMEOUT,
    DEFAULT_LONG_RUNNING_ACTIONS, DEFAULT_LONG_RUNNING_TIMEOUT, DEFAULT_NORMAL_TIMEOUT,
    HealthPolicy, HttpGatewayClient, TimeoutPolicy,
};
use crate::locking::{DEFAULT_EXEMPT_ACTIONS, DEFAULT_STALE_AFTER, ExemptActionsPolicy};
use crate::models::{ActionId, CoreError, CoreErrorKind, CoreResult};
use crate::persistence::{ActionFamily, FileRunStore, RunStore};
use crate::resolver::{ResolverFamily, default_auth_error_classes};
use crate::sqlite::SqliteRunStore;

pub const CONFIG_PATH_ENV: &str = "OPSGATE_CONFIG";
pub const GATEWAY_URL_ENV: &str = "OPSGATE_GATEWAY_URL";
pub const GATEWAY_TOKEN_ENV: &str = "OPSGATE_GATEWAY_TOKEN";
pub const LEDGER_PATH_ENV: &str = "OPSGATE_LEDGER_PATH";

const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:8787";
const DEFAULT_LEDGER_DIR: &str = "runs";

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsgateConfig {
    pub ledger: LedgerConfig,
    pub locks: LockConfig,
    pub gateway: GatewayConfig,
    pub catalog: CatalogConfig,
    pub resolver: ResolverConfig,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    #[default]
    Files,
    Sqlite,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// Directory for `files`, database file for `sqlite`.
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Files,
            path: PathBuf::from(DEFAULT_LEDGER_DIR),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub stale_after_secs: u64,
    pub exempt_actions: Vec<String>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER.as_secs(),
            exempt_actions: to_strings(DEFAULT_EXEMPT_ACTIONS),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub normal_timeout_secs: u64,
    /// `0` leaves long-running actions unbounded.
    pub long_running_timeout_secs: u64,
    pub long_running_actions: Vec<String>,
    pub health_timeout_secs: u64,
    pub health_retries: u32,
    pub health_backoff_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GATEWAY_URL.to_string(),
            token: None,
            normal_timeout_secs: DEFAULT_NORMAL_TIMEOUT.as_secs(),
            long_running_timeout_secs: DEFAULT_LONG_RUNNING_TIMEOUT.as_secs(),
            long_running_actions: to_strings(DEFAULT_LONG_RUNNING_ACTIONS),
            health_timeout_secs: DEFAULT_HEALTH_TIMEOUT.as_secs(),
            health_retries: DEFAULT_HEALTH_RETRIES,
            health_backoff_ms: u64::try_from(DEFAULT_HEALTH_BACKOFF.as_millis())
                .unwrap_or(u64::MAX),
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Public action name to gateway target; an empty target reuses the name.
    pub actions: BTreeMap<String, String>,
    /// Project id to the actions it may invoke.
    pub projects: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub families: Vec<FamilyConfig>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilyConfig {
    pub name: String,
    /// Explicit members; when empty, `action_prefix` selects the family.
    pub actions: Vec<String>,
    pub action_prefix: Option<String>,
    pub proof_root: Option<PathBuf>,
    pub gateway_artifact_root: Option<PathBuf>,
    pub session_registry_root: Option<PathBuf>,
    pub auth_error_classes: Option<Vec<String>>,
    pub snapshot_path: Option<PathBuf>,
}

impl FamilyConfig {
    fn trackable_actions(&self) -> ActionFamily {
        if self.actions.is_empty() {
            let prefix = self
                .action_prefix
                .clone()
                .unwrap_or_else(|| self.name.clone());
            ActionFamily::Prefix(prefix)
        } else {
            ActionFamily::members(self.actions.iter().map(String::as_str))
        }
    }

    pub fn to_family(&self) -> ResolverFamily {
        let auth_error_classes = match &self.auth_error_classes {
            Some(classes) => classes
                .iter()
                .map(|class| class.trim().to_ascii_uppercase())
                .collect(),
            None => default_auth_error_classes(),
        };
        ResolverFamily {
            name: self.name.clone(),
            trackable_actions: self.trackable_actions(),
            proof_root: self.proof_root.clone(),
            gateway_artifact_root: self.gateway_artifact_root.clone(),
            session_registry_root: self.session_registry_root.clone(),
            auth_error_classes,
            snapshot_path: self.snapshot_path.clone(),
        }
    }
}

impl OpsgateConfig {
    /// Reads the file named by `path`, else by `OPSGATE_CONFIG`, else uses
    /// defaults; then applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let from_env = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Configuration,
                format!("failed to read config '{}': {error}", path.display()),
            )
        })?;
        Self::from_json(&raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Configuration,
                format!("{} ({})", error.message, path.display()),
            )
        })
    }

    pub fn from_json(raw: &str) -> CoreResult<Self> {
        serde_json::from_str(raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::Configuration,
                format!("invalid config: {error}"),
            )
        })
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = lookup(GATEWAY_URL_ENV) {
            self.gateway.base_url = url;
        }
        if let Some(token) = lookup(GATEWAY_TOKEN_ENV) {
            self.gateway.token = Some(token);
        }
        if let Some(path) = lookup(LEDGER_PATH_ENV) {
            self.ledger.path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.gateway.base_url.trim().is_empty() {
            return Err(configuration_error("gateway.base_url must not be empty"));
        }
        if self.gateway.normal_timeout_secs == 0 {
            return Err(configuration_error(
                "gateway.normal_timeout_secs must be greater than zero",
            ));
        }
        if self.locks.stale_after_secs == 0 {
            return Err(configuration_error(
                "locks.stale_after_secs must be greater than zero",
            ));
        }
        if let Some((project, action)) = self.catalog().unknown_allowlisted().into_iter().next() {
            return Err(configuration_error(format!(
                "catalog.projects.{project} names unknown action '{action}'"
            )));
        }
        let mut names = BTreeSet::new();
        for family in &self.resolver.families {
            if family.name.trim().is_empty() {
                return Err(configuration_error("resolver family names must not be empty"));
            }
            if !names.insert(family.name.as_str()) {
                return Err(configuration_error(format!(
                    "resolver family '{}' is defined twice",
                    family.name
                )));
            }
        }
        Ok(())
    }

    pub fn lock_policy(&self) -> ExemptActionsPolicy {
        ExemptActionsPolicy::new(
            self.locks
                .exempt_actions
                .iter()
                .map(|action| ActionId::from(action.as_str())),
            Duration::from_secs(self.locks.stale_after_secs),
        )
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        let long_running = match self.gateway.long_running_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        TimeoutPolicy {
            normal: Duration::from_secs(self.gateway.normal_timeout_secs),
            long_running,
            long_running_actions: self
                .gateway
                .long_running_actions
                .iter()
                .map(|action| ActionId::from(action.as_str()))
                .collect(),
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            timeout: Duration::from_secs(self.gateway.health_timeout_secs),
            retries: self.gateway.health_retries,
            backoff: Duration::from_millis(self.gateway.health_backoff_ms),
        }
    }

    pub fn gateway_client(&self) -> HttpGatewayClient {
        HttpGatewayClient::new(
            self.gateway.base_url.clone(),
            self.timeout_policy(),
            self.health_policy(),
        )
        .with_token(self.gateway.token.clone())
    }

    pub fn catalog(&self) -> ActionCatalog {
        let catalog = self
            .catalog
            .actions
            .iter()
            .fold(ActionCatalog::new(), |catalog, (action, target)| {
                catalog.with_action(action.as_str(), target.as_str())
            });
        self.catalog
            .projects
            .iter()
            .fold(catalog, |catalog, (project, actions)| {
                catalog.with_project(project.as_str(), actions.iter().map(String::as_str))
            })
    }

    pub fn run_store(&self) -> CoreResult<Arc<dyn RunStore>> {
        match self.ledger.backend {
            LedgerBackend::Files => Ok(Arc::new(FileRunStore::new(self.ledger.path.clone()))),
            LedgerBackend::Sqlite => {
                let store = SqliteRunStore::new(self.ledger.path.clone());
                store.migrate_to_latest()?;
                Ok(Arc::new(store))
            }
        }
    }

    pub fn families(&self) -> Vec<ResolverFamily> {
        self.resolver
            .families
            .iter()
            .map(FamilyConfig::to_family)
            .collect()
    }

    pub fn family(&self, name: &str) -> Option<ResolverFamily> {
        self.resolver
            .families
            .iter()
            .find(|family| family.name == name)
            .map(FamilyConfig::to_family)
    }
}

fn configuration_error(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::Configuration, message)
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

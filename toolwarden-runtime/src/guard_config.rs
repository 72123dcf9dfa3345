//! Guard configuration loader.
//!
//! Every section has defaults, so a file only needs the keys it changes:
//!
//! ```yaml
//! policy: balanced
//! approval:
//!   timeout_secs: 30
//!   once_per_session: false
//! rate_limits:
//!   windows: ["60 per minute", "1000 per hour"]
//! audit:
//!   file: /var/log/toolwarden/audit.log
//! ```

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use toolwarden::infra::audit_logger::FileAuditBackend;
use toolwarden::infra::audit_pipeline::{AuditPipeline, CompositeBackend, DEFAULT_BUFFER_CAPACITY};
use toolwarden::infra::audit_sqlite::SqliteAuditBackend;
use toolwarden::infra::audit_tracing::TracingAuditBackend;
use toolwarden::infra::contracts::AuditError;
use toolwarden::infra::distributed::RateLimitStore;
use toolwarden::infra::lock_manager::{LockManager, DEFAULT_IDLE_RETENTION};
use toolwarden::infra::rate_limiter::{RateLimitError, RateLimiter, DEFAULT_FAIL_CLOSED_RETRY};
use toolwarden_tools::approval::DEFAULT_APPROVAL_TIMEOUT;
use toolwarden_tools::guard::PatternError;
use toolwarden_tools::{
    ApprovalCoordinator, ApprovalMode, ClassifierConfig, CustomPolicy, DispatchSettings,
    PermissionPolicy, PolicyMode, RiskClassifier, ToolRegistry,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Config file is empty")]
    Empty,

    #[error("Invalid YAML: {0}")]
    InvalidYaml(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] PatternError),

    #[error("Invalid rate limit: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Audit backend: {0}")]
    Audit(#[from] AuditError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Either a named mode or an explicit decision table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicyConfig {
    Mode(PolicyMode),
    Custom(CustomPolicy),
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig::Mode(PolicyMode::Balanced)
    }
}

impl From<PolicyConfig> for PermissionPolicy {
    fn from(config: PolicyConfig) -> Self {
        match config {
            PolicyConfig::Mode(mode) => mode.into(),
            PolicyConfig::Custom(table) => PermissionPolicy::Custom(table),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    pub timeout_secs: u64,
    pub once_per_session: bool,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_APPROVAL_TIMEOUT.as_secs(),
            once_per_session: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternsSection {
    pub blocklist: Vec<String>,
    pub whitelist: Vec<String>,
    /// Appended to `blocklist`, so a site can extend the built-in list
    /// without restating it.
    pub extra_blocklist: Vec<String>,
    pub command_keys: Vec<String>,
    pub max_input_len: usize,
}

impl Default for PatternsSection {
    fn default() -> Self {
        let defaults = ClassifierConfig::default();
        Self {
            blocklist: defaults.blocklist,
            whitelist: defaults.whitelist,
            extra_blocklist: Vec::new(),
            command_keys: defaults.command_keys,
            max_input_len: defaults.max_input_len,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub timeout_ms: u64,
    pub max_result_bytes: usize,
    pub max_argument_bytes: usize,
}

impl Default for DispatchSection {
    fn default() -> Self {
        let defaults = DispatchSettings::default();
        Self {
            timeout_ms: defaults.timeout_ms,
            max_result_bytes: defaults.max_result_bytes,
            max_argument_bytes: defaults.max_argument_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    /// Window strings such as `"60 per minute"`; all must admit a request.
    pub windows: Vec<String>,
    pub fail_closed_retry_ms: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            windows: Vec::new(),
            fail_closed_retry_ms: DEFAULT_FAIL_CLOSED_RETRY.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLockSection {
    pub acquire_timeout_secs: u64,
    pub idle_retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionLockSection {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: 30,
            idle_retention_secs: DEFAULT_IDLE_RETENTION.as_secs(),
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    pub file: Option<PathBuf>,
    pub sqlite: Option<PathBuf>,
    pub tracing: bool,
    pub buffer_capacity: usize,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            file: None,
            sqlite: None,
            tracing: true,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub policy: PolicyConfig,
    pub approval: ApprovalSection,
    pub patterns: PatternsSection,
    pub dispatch: DispatchSection,
    pub rate_limits: RateLimitSection,
    pub session_locks: SessionLockSection,
    pub audit: AuditSection,
    pub logging: LoggingConfig,
}

impl GuardConfig {
    pub fn policy(&self) -> PermissionPolicy {
        self.policy.into()
    }

    pub fn classifier(&self) -> Result<RiskClassifier, ConfigError> {
        let mut blocklist = self.patterns.blocklist.clone();
        blocklist.extend(self.patterns.extra_blocklist.iter().cloned());

        Ok(RiskClassifier::new(ClassifierConfig {
            blocklist,
            whitelist: self.patterns.whitelist.clone(),
            command_keys: self.patterns.command_keys.clone(),
            max_input_len: self.patterns.max_input_len,
        })?)
    }

    pub fn coordinator(&self) -> ApprovalCoordinator {
        let mode = if self.approval.once_per_session {
            ApprovalMode::OncePerSession
        } else {
            ApprovalMode::EveryCall
        };
        ApprovalCoordinator::new(Duration::from_secs(self.approval.timeout_secs), mode)
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            timeout_ms: self.dispatch.timeout_ms,
            max_result_bytes: self.dispatch.max_result_bytes,
            max_argument_bytes: self.dispatch.max_argument_bytes,
        }
    }

    /// An empty registry wired with this configuration.
    pub fn registry(&self) -> Result<ToolRegistry, ConfigError> {
        Ok(ToolRegistry::new(
            self.classifier()?,
            self.policy(),
            self.coordinator(),
            self.dispatch_settings(),
        ))
    }

    pub fn rate_limiter(&self, store: Arc<dyn RateLimitStore>) -> Result<RateLimiter, ConfigError> {
        Ok(RateLimiter::parse(store, self.rate_limits.windows.as_slice())?
            .with_fail_closed_retry(Duration::from_millis(self.rate_limits.fail_closed_retry_ms)))
    }

    pub fn lock_manager(&self) -> LockManager {
        LockManager::new(Duration::from_secs(self.session_locks.acquire_timeout_secs))
            .with_idle_retention(Duration::from_secs(self.session_locks.idle_retention_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_locks.sweep_interval_secs.max(1))
    }

    /// Open every configured audit backend.
    pub fn audit_backends(&self) -> Result<CompositeBackend, ConfigError> {
        let mut composite = CompositeBackend::new();
        if let Some(path) = &self.audit.file {
            composite.push(Arc::new(FileAuditBackend::new(path)?));
        }
        if let Some(path) = &self.audit.sqlite {
            composite.push(Arc::new(SqliteAuditBackend::new(path)?));
        }
        if self.audit.tracing {
            composite.push(Arc::new(TracingAuditBackend::new()));
        }
        Ok(composite)
    }

    pub fn audit_pipeline(&self) -> Result<AuditPipeline, ConfigError> {
        Ok(AuditPipeline::new(
            Arc::new(self.audit_backends()?),
            self.audit.buffer_capacity,
        )?)
    }
}

/// Load guard configuration from a YAML file.
///
/// # Errors
/// Returns distinct errors for a missing file, an empty file and invalid YAML.
pub fn load_guard_config<P: AsRef<Path>>(config_path: P) -> Result<GuardConfig, ConfigError> {
    let config_file = config_path.as_ref();

    if !config_file.exists() {
        return Err(ConfigError::NotFound(config_file.display().to_string()));
    }

    let content = std::fs::read_to_string(config_file)?;

    if content.trim().is_empty() {
        return Err(ConfigError::Empty);
    }

    let config: GuardConfig =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::InvalidYaml(e.to_string()))?;

    // Surface bad patterns and windows at load time rather than first use.
    config.classifier()?;
    for window in &config.rate_limits.windows {
        window
            .parse::<toolwarden::infra::distributed::RateWindow>()
            .map_err(ConfigError::RateLimit)?;
    }

    Ok(config)
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Monitor Configuration Types
//
// Defines the configuration schema for a SHIM node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Remediation policy (retries, backoff, approval, dry-run)
// - Audit log backend
// - Custom remediation actions and diagnosis playbooks
// - Network and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::action::{ActionName, RemediationAction};
use crate::domain::policy::{BackoffPolicy, RemediationPolicy, StepTimeouts};
use crate::domain::repository::{PostgresConfig, StorageBackend};

pub const API_VERSION: &str = "shim.dev/v1";
pub const KIND: &str = "MonitorConfig";

/// Top-level Kubernetes-style monitor configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfigManifest {
    /// API version (must be "shim.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "MonitorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: MonitorConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Content under `spec:`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfigSpec {
    #[serde(default)]
    pub remediation: RemediationConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    /// Custom actions registered next to the built-in catalog
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<RemediationAction>,

    /// Symptom-class playbooks used when an incident arrives without a diagnosis
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub playbooks: Vec<PlaybookConfig>,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationConfig {
    /// Execute nothing; the executor reports every action as a successful dry run
    #[serde(default)]
    pub dry_run: bool,

    /// Route `safe` actions through the approval gate as well
    #[serde(default)]
    pub require_approval_for_safe: bool,

    /// Maximum attempts per action, the first attempt included
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_true")]
    pub rollback_on_failure: bool,

    /// Actions a diagnosis may select. Empty allows every registered action.
    #[serde(default = "default_allowed_actions")]
    pub allowed_actions: Vec<ActionName>,

    /// Diagnoses below this confidence are rejected
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Health reports below this score count as unhealthy
    #[serde(default)]
    pub min_health_score: f64,

    #[serde(with = "humantime_serde", default = "default_approval_timeout")]
    pub approval_timeout: Duration,

    /// How often the approval gate is swept for expired requests
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub approval_sweep_interval: Duration,

    #[serde(default)]
    pub backoff: BackoffPolicy,

    #[serde(default)]
    pub timeouts: StepTimeouts,

    /// Reject submissions once this many workflows are non-terminal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_active_workflows: Option<usize>,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            require_approval_for_safe: false,
            max_retries: default_max_retries(),
            rollback_on_failure: true,
            allowed_actions: default_allowed_actions(),
            min_confidence: default_min_confidence(),
            min_health_score: 0.0,
            approval_timeout: default_approval_timeout(),
            approval_sweep_interval: default_sweep_interval(),
            backoff: BackoffPolicy::default(),
            timeouts: StepTimeouts::default(),
            max_active_workflows: None,
        }
    }
}

impl RemediationConfig {
    pub fn to_policy(&self) -> RemediationPolicy {
        RemediationPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff.clone(),
            rollback_on_failure: self.rollback_on_failure,
            approval_timeout: self.approval_timeout,
            require_approval_for_safe: self.require_approval_for_safe,
            allowed_actions: self.allowed_actions.clone(),
            min_confidence: self.min_confidence,
            min_health_score: self.min_health_score,
            timeouts: self.timeouts.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Terminal workflows and resolved approvals are archived after this many days
    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: u32,

    #[serde(with = "humantime_serde", default = "default_janitor_interval")]
    pub janitor_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            history_retention_days: default_history_retention_days(),
            janitor_interval: default_janitor_interval(),
        }
    }
}

impl RetentionConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.history_retention_days))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackendKind {
    Memory,
    File,
    Postgres,
}

impl std::str::FromStr for AuditBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown audit backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_backend")]
    pub backend: AuditBackendKind,

    /// Directory for the `file` backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Connection string for the `postgres` backend
    /// (supports "env:VAR_NAME")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            backend: default_audit_backend(),
            path: None,
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl AuditConfig {
    pub fn storage_backend(&self) -> anyhow::Result<StorageBackend> {
        match self.backend {
            AuditBackendKind::Memory => Ok(StorageBackend::InMemory),
            AuditBackendKind::File => {
                let path = self
                    .path
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("spec.audit.path is required for the file backend"))?;
                Ok(StorageBackend::File(PathBuf::from(path)))
            }
            AuditBackendKind::Postgres => {
                let url = self.database_url.as_deref().ok_or_else(|| {
                    anyhow::anyhow!("spec.audit.database_url is required for the postgres backend")
                })?;
                Ok(StorageBackend::PostgreSQL(PostgresConfig {
                    connection_string: resolve_env_reference(url)?,
                    max_connections: self.max_connections,
                }))
            }
        }
    }
}

/// Resolve "env:VAR_NAME" references
fn resolve_env_reference(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix("env:") {
        Some(var) => std::env::var(var)
            .map_err(|_| anyhow::anyhow!("Environment variable '{}' is not set", var)),
        None => Ok(value.to_string()),
    }
}

/// Canned diagnosis for a symptom class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookConfig {
    pub symptom_class: String,
    pub root_cause: String,

    #[serde(default = "default_playbook_confidence")]
    pub confidence: f64,

    pub actions: Vec<ActionName>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Working directory for action commands
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Environment added to every action command
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// URL template rendered per incident (`{{target}}`, `{{symptom_class}}`)
    #[serde(default = "default_health_endpoint")]
    pub endpoint: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            endpoint: default_health_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network bind address (e.g. "0.0.0.0" or "127.0.0.1")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP API port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus scrape port
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_allowed_actions() -> Vec<ActionName> {
    ["restart_service", "scale_up", "scale_down", "clear_cache", "restart_pod"]
        .into_iter()
        .map(ActionName::from_static)
        .collect()
}

fn default_min_confidence() -> f64 {
    0.5
}

fn default_approval_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_history_retention_days() -> u32 {
    7
}

fn default_janitor_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_audit_backend() -> AuditBackendKind {
    AuditBackendKind::Memory
}

fn default_max_connections() -> u32 {
    5
}

fn default_playbook_confidence() -> f64 {
    0.8
}

fn default_health_endpoint() -> String {
    "http://{{target}}/health".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MonitorConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "shim-node".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: MonitorConfigSpec::default(),
        }
    }
}

impl MonitorConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. SHIM_CONFIG_PATH environment variable
    /// 2. ./shim-config.yaml (working directory)
    /// 3. ~/.shim/config.yaml (user home)
    /// 4. /etc/shim/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SHIM_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./shim-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".shim").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/shim/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        let remediation = &mut self.spec.remediation;

        if let Some(value) = env_bool("SHIM_DRY_RUN") {
            remediation.dry_run = value;
        }

        if let Some(value) = env_bool("SHIM_ROLLBACK_ON_FAILURE") {
            remediation.rollback_on_failure = value;
        }

        if let Ok(val) = std::env::var("SHIM_MAX_RETRIES") {
            match val.parse::<u32>() {
                Ok(n) => {
                    tracing::info!("Environment override: SHIM_MAX_RETRIES={}", n);
                    remediation.max_retries = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for SHIM_MAX_RETRIES: '{}'. Expected a number. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("SHIM_AUDIT_BACKEND") {
            match val.parse::<AuditBackendKind>() {
                Ok(kind) => {
                    tracing::info!("Environment override: SHIM_AUDIT_BACKEND={}", val);
                    self.spec.audit.backend = kind;
                }
                Err(e) => tracing::warn!("Invalid value for SHIM_AUDIT_BACKEND: {}. Ignoring.", e),
            }
        }

        if let Ok(val) = std::env::var("SHIM_AUDIT_PATH") {
            tracing::info!("Environment override: SHIM_AUDIT_PATH={}", val);
            self.spec.audit.path = Some(val);
        }

        if let Ok(val) = std::env::var("SHIM_DATABASE_URL") {
            tracing::info!("Environment override: SHIM_DATABASE_URL=<redacted>");
            self.spec.audit.database_url = Some(val);
        }
    }

    pub fn network(&self) -> NetworkConfig {
        self.spec.network.clone().unwrap_or_default()
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let remediation = &self.spec.remediation;
        if remediation.max_retries == 0 {
            anyhow::bail!("spec.remediation.max_retries must be at least 1");
        }
        if !(0.0..=1.0).contains(&remediation.min_confidence) {
            anyhow::bail!("spec.remediation.min_confidence must be within 0.0..=1.0");
        }
        if !(0.0..=1.0).contains(&remediation.min_health_score) {
            anyhow::bail!("spec.remediation.min_health_score must be within 0.0..=1.0");
        }
        if remediation.approval_timeout.is_zero() {
            anyhow::bail!("spec.remediation.approval_timeout must be greater than zero");
        }
        if remediation.backoff.multiplier < 1.0 {
            anyhow::bail!("spec.remediation.backoff.multiplier must be at least 1.0");
        }
        if remediation.max_active_workflows == Some(0) {
            anyhow::bail!("spec.remediation.max_active_workflows must be at least 1 when set");
        }

        match self.spec.audit.backend {
            AuditBackendKind::File if self.spec.audit.path.is_none() => {
                anyhow::bail!("spec.audit.path is required for the file backend");
            }
            AuditBackendKind::Postgres if self.spec.audit.database_url.is_none() => {
                anyhow::bail!("spec.audit.database_url is required for the postgres backend");
            }
            _ => {}
        }

        for action in &self.spec.actions {
            action
                .validate()
                .map_err(|e| anyhow::anyhow!("Invalid action in spec.actions: {}", e))?;
        }

        for playbook in &self.spec.playbooks {
            if playbook.symptom_class.trim().is_empty() {
                anyhow::bail!("Playbook symptom_class cannot be empty");
            }
            if playbook.actions.is_empty() {
                anyhow::bail!(
                    "Playbook for '{}' must suggest at least one action",
                    playbook.symptom_class
                );
            }
            if !(0.0..=1.0).contains(&playbook.confidence) {
                anyhow::bail!(
                    "Playbook confidence for '{}' must be within 0.0..=1.0",
                    playbook.symptom_class
                );
            }
        }

        if self.spec.health_check.endpoint.trim().is_empty() {
            anyhow::bail!("spec.health_check.endpoint cannot be empty");
        }

        Ok(())
    }
}

fn env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => {
            tracing::info!("Environment override: {}=true", name);
            Some(true)
        }
        "false" | "0" | "no" | "off" => {
            tracing::info!("Environment override: {}=false", name);
            Some(false)
        }
        _ => {
            tracing::warn!(
                "Invalid value for {}: '{}'. Expected true/false. Ignoring.",
                name,
                val
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = MonitorConfigManifest::default();
        assert_eq!(manifest.api_version, "shim.dev/v1");
        assert_eq!(manifest.kind, "MonitorConfig");
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.remediation.max_retries, 3);
        assert!(manifest.spec.remediation.rollback_on_failure);
        assert_eq!(manifest.spec.remediation.allowed_actions.len(), 5);
        assert_eq!(manifest.spec.retention.history_retention_days, 7);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_yaml_parsing_with_durations() {
        let yaml = r#"
apiVersion: shim.dev/v1
kind: MonitorConfig
metadata:
  name: edge-01
spec:
  remediation:
    max_retries: 5
    approval_timeout: 2m
    allowed_actions: []
    backoff:
      initial: 500ms
      multiplier: 3.0
      max: 10s
  audit:
    backend: file
    path: /var/lib/shim/audit
  playbooks:
    - symptom_class: high_memory
      root_cause: Cache growth
      actions: [clear_cache]
"#;
        let manifest = MonitorConfigManifest::from_yaml_str(yaml).unwrap();
        assert!(manifest.validate().is_ok());

        let policy = manifest.spec.remediation.to_policy();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.approval_timeout, Duration::from_secs(120));
        assert_eq!(policy.backoff.initial, Duration::from_millis(500));
        assert!(policy.allowed_actions.is_empty());
        assert_eq!(manifest.spec.playbooks[0].confidence, 0.8);

        match manifest.spec.audit.storage_backend().unwrap() {
            StorageBackend::File(path) => assert_eq!(path, PathBuf::from("/var/lib/shim/audit")),
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_validation() {
        let mut manifest = MonitorConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.remediation.max_retries = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.remediation.max_retries = 3;

        manifest.spec.audit.backend = AuditBackendKind::Postgres;
        assert!(manifest.validate().is_err());
        manifest.spec.audit.database_url = Some("postgres://localhost/shim".into());
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_invalid_action_name_rejected_at_parse() {
        let yaml = r#"
apiVersion: shim.dev/v1
kind: MonitorConfig
metadata:
  name: edge-01
spec:
  remediation:
    allowed_actions: ["Restart Service"]
"#;
        assert!(MonitorConfigManifest::from_yaml_str(yaml).is_err());
    }
}

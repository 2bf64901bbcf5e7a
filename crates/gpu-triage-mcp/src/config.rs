// crates/gpu-triage-mcp/src/config.rs
// ============================================================================
// Module: Configuration
// Description: Typed configuration with strict, fail-closed validation.
// Purpose: Single source of truth for transport, routing, and mode
//          settings.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! Configuration is an explicit value with typed fields, loaded from a
//! TOML file (path from `GPU_TRIAGE_CONFIG` or the compiled-in default)
//! and finished with the enumerated environment overrides: `EXEC_TIMEOUT`
//! for the exec deadline, `GPU_TRIAGE_SERVICE_NAME` for DNS endpoint
//! construction, and `GPU_TRIAGE_NAMESPACE` for the agent namespace. A
//! missing file yields defaults; an invalid file fails closed. Tool
//! arguments stay free-form maps; everything here is enumerated.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use gpu_triage_cluster::EXEC_TIMEOUT_ENV;
use gpu_triage_cluster::SERVICE_NAME_ENV;
use gpu_triage_cluster::resolve_exec_timeout;
use gpu_triage_cluster::resolve_service_name;
use gpu_triage_core::DEFAULT_AGENT_PORT;
use gpu_triage_gateway::RoutingMode;
use gpu_triage_kmsg::source::DEFAULT_KMSG_PATH;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable overriding the config file path.
pub const CONFIG_ENV_VAR: &str = "GPU_TRIAGE_CONFIG";
/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "gpu-triage.toml";
/// Environment variable overriding the agent namespace.
pub const NAMESPACE_ENV: &str = "GPU_TRIAGE_NAMESPACE";
/// Compiled-in agent namespace.
pub const DEFAULT_NAMESPACE: &str = "gpu-triage";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;
/// Maximum accepted oneshot request count.
const MAX_ONESHOT_REQUESTS: u32 = 64;

// ============================================================================
// SECTION: Enumerations
// ============================================================================

/// Serving transport for the local process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Line-delimited JSON-RPC on stdin/stdout.
    #[default]
    Stdio,
    /// Stateless HTTP listener.
    Http,
}

impl TransportKind {
    /// Returns a stable label for the transport.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
        }
    }
}

/// Gate on mutating tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationMode {
    /// Only read-only tools are served.
    #[default]
    ReadOnly,
    /// Mutating tools are also served.
    Operator,
}

impl OperationMode {
    /// Returns a stable label for the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::Operator => "operator",
        }
    }
}

/// Gateway routing transport, as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingKind {
    /// POST to agent HTTP listeners (default).
    #[default]
    Http,
    /// Stream into oneshot agents via pod exec.
    Exec,
}

impl From<RoutingKind> for RoutingMode {
    fn from(kind: RoutingKind) -> Self {
        match kind {
            RoutingKind::Http => Self::Http,
            RoutingKind::Exec => Self::Exec,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config read failed: {path}: {detail}")]
    Read {
        /// Path that failed.
        path: PathBuf,
        /// Underlying failure description.
        detail: String,
    },
    /// The config file exceeds the size limit.
    #[error("config file too large: {path}")]
    TooLarge {
        /// Path that failed.
        path: PathBuf,
    },
    /// The config file is not valid TOML for this model.
    #[error("config parse failed: {0}")]
    Parse(String),
    /// A cross-field rule was violated.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Configuration Model
// ============================================================================

/// gpu-triage process configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriageConfig {
    /// Serving transport.
    #[serde(default)]
    pub transport: TransportKind,
    /// Listen address, required for the HTTP transport.
    #[serde(default)]
    pub bind: Option<String>,
    /// True when this process is the cluster gateway.
    #[serde(default)]
    pub gateway: bool,
    /// Gateway routing transport.
    #[serde(default)]
    pub routing: RoutingKind,
    /// Oneshot request count; 0 disables oneshot termination.
    #[serde(default)]
    pub oneshot: u32,
    /// Mutating-tool gate.
    #[serde(default)]
    pub mode: OperationMode,
    /// Namespace the agent pods live in.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Port agents listen on for HTTP legs.
    #[serde(default = "default_agent_port")]
    pub agent_port: u16,
    /// Attach per-node Kubernetes metadata to cluster summaries.
    #[serde(default)]
    pub include_k8s_metadata: bool,
    /// Kernel log device path.
    #[serde(default = "default_kmsg_path")]
    pub kmsg_path: String,
    /// Fallback command producing kmsg-format records; empty disables.
    #[serde(default)]
    pub kmsg_command: Vec<String>,
    /// Exec deadline; resolved from `EXEC_TIMEOUT`, clamped `[1s, 300s]`.
    #[serde(skip, default = "default_exec_timeout")]
    pub exec_timeout: Duration,
    /// Headless service name; resolved from `GPU_TRIAGE_SERVICE_NAME`.
    #[serde(skip, default = "default_service_name")]
    pub service_name: String,
}

/// Default namespace for serde.
fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Default agent port for serde.
const fn default_agent_port() -> u16 {
    DEFAULT_AGENT_PORT
}

/// Default kmsg device path for serde.
fn default_kmsg_path() -> String {
    DEFAULT_KMSG_PATH.to_string()
}

/// Default exec deadline for serde.
fn default_exec_timeout() -> Duration {
    resolve_exec_timeout(None)
}

/// Default service name for serde.
fn default_service_name() -> String {
    resolve_service_name(None)
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            bind: None,
            gateway: false,
            routing: RoutingKind::default(),
            oneshot: 0,
            mode: OperationMode::default(),
            namespace: default_namespace(),
            agent_port: default_agent_port(),
            include_k8s_metadata: false,
            kmsg_path: default_kmsg_path(),
            kmsg_command: Vec::new(),
            exec_timeout: default_exec_timeout(),
            service_name: default_service_name(),
        }
    }
}

impl TriageConfig {
    /// Loads configuration from disk and the process environment.
    ///
    /// A missing file yields defaults; everything else fails closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on unreadable, oversized, unparseable, or
    /// invalid configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = path.map_or_else(
            || PathBuf::from(std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_NAME.to_string())),
            Path::to_path_buf,
        );
        let mut config = if resolved.exists() {
            Self::from_file(&resolved)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(
            std::env::var(EXEC_TIMEOUT_ENV).ok().as_deref(),
            std::env::var(SERVICE_NAME_ENV).ok(),
            std::env::var(NAMESPACE_ENV).ok(),
        );
        config.validate()?;
        Ok(config)
    }

    /// Parses one TOML file with a hard size limit.
    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let size = std::fs::metadata(path)
            .map_err(|err| ConfigError::Read {
                path: path.to_path_buf(),
                detail: err.to_string(),
            })?
            .len();
        if size > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.to_path_buf(),
            detail: err.to_string(),
        })?;
        toml::from_str(&text).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies the enumerated environment overrides.
    pub fn apply_env_overrides(
        &mut self,
        exec_timeout: Option<&str>,
        service_name: Option<String>,
        namespace: Option<String>,
    ) {
        self.exec_timeout = resolve_exec_timeout(exec_timeout);
        self.service_name = resolve_service_name(service_name);
        if let Some(namespace) = namespace
            && !namespace.trim().is_empty()
        {
            self.namespace = namespace.trim().to_string();
        }
    }

    /// Validates cross-field rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport == TransportKind::Http {
            let bind = self
                .bind
                .as_deref()
                .ok_or_else(|| ConfigError::Invalid("http transport requires bind".to_string()))?;
            bind.parse::<std::net::SocketAddr>()
                .map_err(|_| ConfigError::Invalid(format!("invalid bind address: {bind}")))?;
        }
        if self.oneshot > MAX_ONESHOT_REQUESTS {
            return Err(ConfigError::Invalid(format!(
                "oneshot count exceeds {MAX_ONESHOT_REQUESTS}"
            )));
        }
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("namespace must not be empty".to_string()));
        }
        if self.oneshot != 0 && self.transport == TransportKind::Http {
            return Err(ConfigError::Invalid(
                "oneshot counts apply only to the stdio transport".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

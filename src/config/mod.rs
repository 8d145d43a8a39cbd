//! Fleet configuration: server launch entries and process-wide settings.
//!
//! The configuration document maps server ids to launch settings plus a global
//! `settings` block. JSON is the default format; files ending in `.yaml`/`.yml`
//! are read as YAML.

pub mod placeholders;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mcp_client::errors::McpError;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "MCP_FLEET_CONFIG";

// ─── Public Types ────────────────────────────────────────────────────────────

/// How to launch and supervise one MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment; values may contain `${VAR}` / `${VAR:-default}`.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the process.
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true", alias = "autoStart")]
    pub auto_start: bool,
    #[serde(default, alias = "healthCheck")]
    pub health_check: Option<HealthCheckConfig>,
    /// Overrides `Settings::request_timeout_ms` for this server.
    #[serde(default, alias = "requestTimeoutMs")]
    pub request_timeout_ms: Option<u64>,
}

impl ServerConfig {
    /// A config that runs `command` with `args` and default flags.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
            cwd: None,
            enabled: true,
            auto_start: true,
            health_check: None,
            request_timeout_ms: None,
        }
    }

    /// Whether `initialize()` / reload should start this server.
    pub fn starts_automatically(&self) -> bool {
        self.enabled && self.auto_start
    }

    /// Health-check interval when checks are enabled.
    pub fn health_check_interval(&self) -> Option<Duration> {
        self.health_check
            .as_ref()
            .filter(|hc| hc.enabled)
            .map(|hc| Duration::from_millis(hc.interval_ms.max(MIN_HEALTH_CHECK_INTERVAL_MS)))
    }
}

/// Periodic liveness probe policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_health_check_interval_ms", alias = "intervalMs")]
    pub interval_ms: u64,
}

/// Process-wide defaults shared read-only by every client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Upper bound for spawn + handshake + initial discovery.
    #[serde(default = "default_timeout_ms", alias = "connectionTimeoutMs")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_timeout_ms", alias = "requestTimeoutMs")]
    pub request_timeout_ms: u64,
    /// Extra connect attempts on start, and crash restarts before giving up.
    #[serde(default = "default_retry_attempts", alias = "retryAttempts")]
    pub retry_attempts: u32,
    /// Delay between connect attempts and before a crash restart.
    #[serde(default = "default_retry_delay_ms", alias = "retryDelayMs")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_log_level", alias = "logLevel")]
    pub log_level: String,
    /// Log to this file instead of stderr.
    #[serde(default, alias = "logFile")]
    pub log_file: Option<String>,
    /// Stop running servers that a reload no longer lists.
    #[serde(default, alias = "pruneOnReload")]
    pub prune_on_reload: bool,
}

impl Settings {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection_timeout_ms: default_timeout_ms(),
            request_timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            log_level: default_log_level(),
            log_file: None,
            prune_on_reload: false,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default, alias = "mcpServers")]
    pub servers: BTreeMap<String, ServerConfig>,
    #[serde(default)]
    pub settings: Settings,
}

const MIN_HEALTH_CHECK_INTERVAL_MS: u64 = 10;

fn default_true() -> bool {
    true
}
fn default_health_check_interval_ms() -> u64 {
    30_000
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    5_000
}
fn default_log_level() -> String {
    "info".to_string()
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Where the manager reads its configuration from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Ordered candidate files; the first one that exists wins.
    Files(Vec<PathBuf>),
    /// A fixed in-memory configuration (reloads return it unchanged).
    Inline(FleetConfig),
}

impl ConfigSource {
    /// The standard candidate list.
    ///
    /// 1. `$MCP_FLEET_CONFIG`
    /// 2. `./mcp-servers.json`
    /// 3. `./mcp-servers.yaml`
    /// 4. `<config dir>/mcp-fleet/servers.json`
    pub fn default_candidates() -> Self {
        let mut candidates = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            candidates.push(PathBuf::from(placeholders::expand_tilde(&path)));
        }
        candidates.push(PathBuf::from("mcp-servers.json"));
        candidates.push(PathBuf::from("mcp-servers.yaml"));
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("mcp-fleet").join("servers.json"));
        }
        ConfigSource::Files(candidates)
    }

    /// Load the configuration.
    ///
    /// Falls back to an empty default when no candidate file exists. A
    /// candidate that exists but cannot be read or parsed is an error.
    pub fn load(&self) -> Result<FleetConfig, McpError> {
        match self {
            ConfigSource::Inline(config) => Ok(config.clone()),
            ConfigSource::Files(candidates) => {
                let Some(path) = candidates.iter().find(|p| p.is_file()) else {
                    tracing::info!(
                        candidates = ?candidates,
                        "no configuration file found, using empty default"
                    );
                    return Ok(FleetConfig::default());
                };
                let config = load_config_file(path)?;
                tracing::info!(
                    path = %path.display(),
                    server_count = config.servers.len(),
                    "loaded fleet configuration"
                );
                Ok(config)
            }
        }
    }
}

/// Read and parse one configuration file.
pub fn load_config_file(path: &Path) -> Result<FleetConfig, McpError> {
    let raw = std::fs::read_to_string(path).map_err(|e| McpError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    );

    if is_yaml {
        serde_yaml::from_str(&raw).map_err(|e| McpError::ConfigError {
            reason: format!("failed to parse {}: {e}", path.display()),
        })
    } else {
        serde_json::from_str(&raw).map_err(|e| McpError::ConfigError {
            reason: format!("failed to parse {}: {e}", path.display()),
        })
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

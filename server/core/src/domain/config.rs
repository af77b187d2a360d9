// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Server configuration: defaults, file values, environment overrides.
//!
//! Resolution order is defaults → YAML file → `MCP_*` environment variables,
//! most specific wins. The resolved [`ServerConfig`] is validated and clamped
//! once, then published through a [`ConfigHandle`] as an immutable snapshot.
//! Reload (SIGHUP) replaces the snapshot atomically; requests already in
//! flight keep the snapshot they started with.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Stdio,
    Http,
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stdio" => Ok(Transport::Stdio),
            "http" => Ok(Transport::Http),
            other => Err(format!("unknown transport: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    /// Grace period between SIGTERM and SIGKILL for live scans at shutdown.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
    /// Upper bound on HTTP request bodies.
    pub max_body_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            transport: Transport::Http,
            host: "127.0.0.1".to_string(),
            port: 8080,
            shutdown_grace: Duration::from_secs(30),
            max_body_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_args_len: usize,
    pub max_stdout_bytes: usize,
    pub max_stderr_bytes: usize,
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
    pub default_concurrency: u32,
    pub max_memory_mb: u64,
    pub max_file_descriptors: u64,
    /// Default cap on CIDR network sizes; large scanners may tighten it.
    pub max_network_size: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_args_len: 2048,
            max_stdout_bytes: 1024 * 1024,
            max_stderr_bytes: 256 * 1024,
            default_timeout: Duration::from_secs(600),
            default_concurrency: 2,
            max_memory_mb: 512,
            max_file_descriptors: 256,
            max_network_size: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    #[serde(with = "humantime_serde")]
    pub recovery_timeout: Duration,
    pub half_open_success_threshold: u32,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_success_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub disk_threshold: f64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            cpu_threshold: 80.0,
            memory_threshold: 80.0,
            disk_threshold: 80.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub enabled: bool,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// Tool names to enable; empty means all registered tools.
    pub include: Vec<String>,
    /// Tool names to disable; wins over `include`.
    pub exclude: Vec<String>,
    /// Admit intrusive scanner scripts (exact names only, never wildcards).
    pub allow_intrusive: bool,
    /// Directory prefixes wordlist paths must live under.
    pub wordlist_prefixes: Vec<String>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            allow_intrusive: false,
            wordlist_prefixes: ToolsSection::wordlist_defaults(),
        }
    }
}

impl ToolsSection {
    fn wordlist_defaults() -> Vec<String> {
        vec![
            "/usr/share/wordlists".to_string(),
            "/usr/share/seclists".to_string(),
            "/opt/wordlists".to_string(),
        ]
    }
}

/// Fully resolved, validated server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub limits: LimitsSection,
    pub circuit_breaker: BreakerSection,
    pub health: HealthSection,
    pub metrics: MetricsSection,
    pub tools: ToolsSection,
}

impl ServerConfig {
    /// Resolve configuration from defaults, an optional YAML file, and the
    /// recognized `MCP_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config file {}", p.display()))?;
                serde_yaml::from_str::<ServerConfig>(&raw)
                    .with_context(|| format!("failed to parse config file {}", p.display()))?
            }
            None => ServerConfig::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply the recognized environment variables over the current values.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<Transport>("MCP_SERVER_TRANSPORT") {
            self.server.transport = v;
        }
        if let Ok(v) = std::env::var("MCP_SERVER_HOST") {
            if !v.is_empty() {
                self.server.host = v;
            }
        }
        if let Some(v) = env_parse::<u16>("MCP_SERVER_PORT") {
            self.server.port = v;
        }
        if let Some(v) = env_parse::<usize>("MCP_MAX_ARGS_LEN") {
            self.limits.max_args_len = v;
        }
        if let Some(v) = env_parse::<usize>("MCP_MAX_STDOUT_BYTES") {
            self.limits.max_stdout_bytes = v;
        }
        if let Some(v) = env_parse::<usize>("MCP_MAX_STDERR_BYTES") {
            self.limits.max_stderr_bytes = v;
        }
        if let Some(v) = env_parse::<u64>("MCP_DEFAULT_TIMEOUT_SEC") {
            self.limits.default_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u32>("MCP_DEFAULT_CONCURRENCY") {
            self.limits.default_concurrency = v;
        }
        if let Some(v) = env_parse::<u64>("MCP_MAX_MEMORY_MB") {
            self.limits.max_memory_mb = v;
        }
        if let Some(v) = env_parse::<u64>("MCP_MAX_FILE_DESCRIPTORS") {
            self.limits.max_file_descriptors = v;
        }
        if let Some(v) = env_parse::<u32>("MCP_CIRCUIT_BREAKER_FAILURE_THRESHOLD") {
            self.circuit_breaker.failure_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("MCP_CIRCUIT_BREAKER_RECOVERY_TIMEOUT") {
            self.circuit_breaker.recovery_timeout = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("MCP_HEALTH_CHECK_INTERVAL") {
            self.health.check_interval = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<f64>("MCP_HEALTH_CPU_THRESHOLD") {
            self.health.cpu_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("MCP_HEALTH_MEMORY_THRESHOLD") {
            self.health.memory_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("MCP_HEALTH_DISK_THRESHOLD") {
            self.health.disk_threshold = v;
        }
        if let Some(v) = env_parse::<bool>("MCP_METRICS_ENABLED") {
            self.metrics.enabled = v;
        }
        if let Ok(v) = std::env::var("TOOL_INCLUDE") {
            self.tools.include = split_name_list(&v);
        }
        if let Ok(v) = std::env::var("TOOL_EXCLUDE") {
            self.tools.exclude = split_name_list(&v);
        }
    }

    /// Validate and clamp every field to its safe range.
    ///
    /// Clamping is silent for soft bounds; hard errors are reserved for
    /// values that cannot be repaired (port 0).
    pub fn validate(&mut self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be non-zero");
        }
        if self.server.host.is_empty() {
            anyhow::bail!("server.host must not be empty");
        }

        self.server.shutdown_grace = clamp_duration(self.server.shutdown_grace, 1, 300);
        self.server.max_body_bytes = self.server.max_body_bytes.clamp(1024, 4 * 1024 * 1024);

        self.limits.max_args_len = self.limits.max_args_len.clamp(64, 16 * 1024);
        self.limits.max_stdout_bytes = self.limits.max_stdout_bytes.clamp(1024, 16 * 1024 * 1024);
        self.limits.max_stderr_bytes = self.limits.max_stderr_bytes.clamp(1024, 16 * 1024 * 1024);
        self.limits.default_timeout = clamp_duration(self.limits.default_timeout, 1, 86_400);
        self.limits.default_concurrency = self.limits.default_concurrency.clamp(1, 32);
        self.limits.max_memory_mb = self.limits.max_memory_mb.clamp(64, 8192);
        self.limits.max_file_descriptors = self.limits.max_file_descriptors.clamp(32, 4096);
        self.limits.max_network_size = self.limits.max_network_size.clamp(1, 65_536);

        self.circuit_breaker.failure_threshold =
            self.circuit_breaker.failure_threshold.clamp(1, 100);
        self.circuit_breaker.recovery_timeout =
            clamp_duration(self.circuit_breaker.recovery_timeout, 1, 3600);
        self.circuit_breaker.half_open_success_threshold =
            self.circuit_breaker.half_open_success_threshold.clamp(1, 10);

        self.health.check_interval = clamp_duration(self.health.check_interval, 1, 3600);
        self.health.cpu_threshold = self.health.cpu_threshold.clamp(1.0, 100.0);
        self.health.memory_threshold = self.health.memory_threshold.clamp(1.0, 100.0);
        self.health.disk_threshold = self.health.disk_threshold.clamp(1.0, 100.0);

        if self.tools.wordlist_prefixes.is_empty() {
            self.tools.wordlist_prefixes = ToolsSection::wordlist_defaults();
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => match raw.parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "ignoring unparseable environment override");
                None
            }
        },
        _ => None,
    }
}

fn split_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn clamp_duration(d: Duration, min_secs: u64, max_secs: u64) -> Duration {
    Duration::from_secs(d.as_secs().clamp(min_secs, max_secs))
}

/// Shared handle to the current configuration snapshot.
///
/// Readers clone an `Arc` and keep it for the duration of one request so a
/// mid-request reload cannot tear. Only `replace` mutates, under the write
/// lock.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<ServerConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current snapshot; cheap to call per request.
    pub fn current(&self) -> Arc<ServerConfig> {
        self.inner.read().clone()
    }

    /// Swap in a freshly resolved configuration (SIGHUP reload).
    pub fn replace(&self, config: ServerConfig) {
        *self.inner.write() = Arc::new(config);
        tracing::info!("configuration snapshot replaced");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let mut cfg = ServerConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.limits.max_stdout_bytes, 1024 * 1024);
        assert_eq!(cfg.circuit_breaker.failure_threshold, 5);
    }

    #[test]
    fn test_file_values_override_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "server:\n  port: 9000\nlimits:\n  max_args_len: 1000\n  default_timeout: 120s\n"
        )
        .unwrap();
        let cfg = ServerConfig::load(Some(f.path())).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.limits.max_args_len, 1000);
        assert_eq!(cfg.limits.default_timeout, Duration::from_secs(120));
        // Untouched sections keep defaults.
        assert_eq!(cfg.limits.max_memory_mb, 512);
    }

    #[test]
    fn test_validate_clamps_soft_bounds() {
        let mut cfg = ServerConfig::default();
        cfg.circuit_breaker.failure_threshold = 0;
        cfg.circuit_breaker.recovery_timeout = Duration::from_secs(10_000);
        cfg.limits.default_concurrency = 1000;
        cfg.validate().unwrap();
        assert_eq!(cfg.circuit_breaker.failure_threshold, 1);
        assert_eq!(cfg.circuit_breaker.recovery_timeout, Duration::from_secs(3600));
        assert_eq!(cfg.limits.default_concurrency, 32);
    }

    #[test]
    fn test_validate_rejects_port_zero() {
        let mut cfg = ServerConfig::default();
        cfg.server.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_name_list_splitting() {
        assert_eq!(
            split_name_list(" Nmap, gobuster ,,HYDRA"),
            vec!["nmap", "gobuster", "hydra"]
        );
    }

    #[test]
    fn test_handle_snapshot_isolation() {
        let handle = ConfigHandle::new(ServerConfig::default());
        let before = handle.current();
        let mut updated = ServerConfig::default();
        updated.server.port = 9999;
        handle.replace(updated);
        // The old snapshot is untouched; new readers see the replacement.
        assert_eq!(before.server.port, 8080);
        assert_eq!(handle.current().server.port, 9999);
    }
}

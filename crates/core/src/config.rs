//! Engine configuration, read from `SKYJET_*` environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_ASYNC_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Deadline for background create/update/delete tasks, measured from start.
    pub async_timeout: Duration,
    /// Upper bound for the provider calls of a synchronous observe.
    pub observe_timeout: Option<Duration>,
    /// Root directory for per-resource CLI workspaces.
    pub workspace_dir: PathBuf,
    /// Provider CLI executable.
    pub cli_binary: String,
    /// Exported to the CLI as `TF_PLUGIN_CACHE_DIR` when set.
    pub plugin_cache_dir: Option<PathBuf>,
    pub cli_parallelism: Option<u32>,
    /// `tracing_subscriber::EnvFilter` directives.
    pub log_filter: String,
    /// Prometheus exporter listen address; no exporter when unset.
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            async_timeout: Duration::from_secs(DEFAULT_ASYNC_TIMEOUT_SECS),
            observe_timeout: None,
            workspace_dir: std::env::temp_dir().join("skyjet"),
            cli_binary: "terraform".to_string(),
            plugin_cache_dir: None,
            cli_parallelism: None,
            log_filter: "info".to_string(),
            metrics_addr: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary variable lookup; unparsable values fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let secs = |k: &str| get(k).and_then(|s| s.trim().parse::<u64>().ok()).map(Duration::from_secs);
        Self {
            async_timeout: secs("SKYJET_ASYNC_TIMEOUT_SECS").unwrap_or(d.async_timeout),
            observe_timeout: secs("SKYJET_OBSERVE_TIMEOUT_SECS"),
            workspace_dir: get("SKYJET_WORKSPACE_DIR").filter(|s| !s.is_empty()).map(PathBuf::from).unwrap_or(d.workspace_dir),
            cli_binary: get("SKYJET_CLI_BINARY").filter(|s| !s.is_empty()).unwrap_or(d.cli_binary),
            plugin_cache_dir: get("SKYJET_PLUGIN_CACHE_DIR").filter(|s| !s.is_empty()).map(PathBuf::from),
            cli_parallelism: get("SKYJET_CLI_PARALLELISM").and_then(|s| s.parse().ok()),
            log_filter: get("SKYJET_LOG").filter(|s| !s.trim().is_empty()).unwrap_or(d.log_filter),
            metrics_addr: get("SKYJET_METRICS_ADDR").and_then(|s| s.trim().parse().ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("SKYJET_ASYNC_TIMEOUT_SECS", "90"),
            ("SKYJET_CLI_BINARY", "tofu"),
            ("SKYJET_CLI_PARALLELISM", "oops"),
            ("SKYJET_LOG", "skyjet_external=debug"),
            ("SKYJET_METRICS_ADDR", "127.0.0.1:9184"),
        ]
        .into_iter()
        .collect();
        let cfg = EngineConfig::from_lookup(|k| vars.get(k).map(|s| s.to_string()));
        assert_eq!(cfg.async_timeout, Duration::from_secs(90));
        assert_eq!(cfg.cli_binary, "tofu");
        assert_eq!(cfg.cli_parallelism, None);
        assert_eq!(cfg.observe_timeout, None);
        assert_eq!(cfg.log_filter, "skyjet_external=debug");
        assert_eq!(cfg.metrics_addr, Some("127.0.0.1:9184".parse().unwrap()));
    }

    #[test]
    fn defaults_use_one_hour_deadline() {
        let cfg = EngineConfig::from_lookup(|_| None);
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.async_timeout.as_secs(), 3600);
        assert_eq!(cfg.log_filter, "info");
        let bad_addr = EngineConfig::from_lookup(|k| (k == "SKYJET_METRICS_ADDR").then(|| "localhost".to_string()));
        assert_eq!(bad_addr.metrics_addr, None);
    }
}

//! Environment-driven configuration for the bridge core.
//!
//! Every knob here has a sensible default so the bridge runs out of the box;
//! operators override via the `MCP_BRIDGE_*` variables documented in the
//! project README.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub image: String,
    pub preferred_runtime: Option<String>,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub memory_limit: String,
    pub pid_limit: u32,
    pub cpu_quota: Option<String>,
    pub container_user: String,
    pub runtime_idle_timeout: Duration,
    pub state_dir: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            image: "mcp-bridge-sandbox:latest".to_string(),
            preferred_runtime: None,
            default_timeout_secs: 30,
            max_timeout_secs: 120,
            memory_limit: "512m".to_string(),
            pid_limit: 64,
            cpu_quota: None,
            container_user: "65534:65534".to_string(),
            runtime_idle_timeout: Duration::from_secs(300),
            state_dir: PathBuf::from("./.mcp-bridge"),
        }
    }
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            image: env_string_or("MCP_BRIDGE_IMAGE", &defaults.image),
            preferred_runtime: env::var("MCP_BRIDGE_RUNTIME").ok(),
            default_timeout_secs: env_or("MCP_BRIDGE_TIMEOUT", defaults.default_timeout_secs),
            max_timeout_secs: env_or("MCP_BRIDGE_MAX_TIMEOUT", defaults.max_timeout_secs),
            memory_limit: env_string_or("MCP_BRIDGE_MEMORY", &defaults.memory_limit),
            pid_limit: env_or("MCP_BRIDGE_PIDS", defaults.pid_limit),
            cpu_quota: env::var("MCP_BRIDGE_CPUS").ok(),
            container_user: env_string_or("MCP_BRIDGE_CONTAINER_USER", &defaults.container_user),
            runtime_idle_timeout: Duration::from_secs(env_or(
                "MCP_BRIDGE_RUNTIME_IDLE_TIMEOUT",
                defaults.runtime_idle_timeout.as_secs(),
            )),
            state_dir: env::var("MCP_BRIDGE_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
        }
    }

    /// Clamp a caller-supplied timeout (seconds) into `[1, max_timeout_secs]`.
    pub fn clamp_timeout(&self, requested: Option<u64>) -> u64 {
        let value = requested.unwrap_or(self.default_timeout_secs);
        value.clamp(1, self.max_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_timeout_below_one_becomes_one() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.clamp_timeout(Some(0)), 1);
    }

    #[test]
    fn clamp_timeout_above_max_is_capped() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.clamp_timeout(Some(999_999)), cfg.max_timeout_secs);
    }

    #[test]
    fn clamp_timeout_missing_uses_default() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.clamp_timeout(None), cfg.default_timeout_secs);
    }
}

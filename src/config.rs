//! Configuration loading.
//!
//! Defaults are overridden first by an optional TOML file (path from
//! `STATAMCP_CONFIG`, default `./statamcp.toml`), then by `STATAMCP_*`
//! environment variables, a small-env-toggle convention scaled up for this
//! core's larger configuration surface.

use serde::Deserialize;
use std::path::PathBuf;

/// Orchestration core configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hard cap on active sessions (CREATING/READY/BUSY).
    pub max_sessions: usize,
    /// Idle reclaim threshold, in seconds.
    pub session_timeout: u64,
    /// Deadline for a worker's `_init` reply, in seconds.
    pub worker_start_timeout: u64,
    /// Default per-command deadline, in seconds.
    pub command_timeout: u64,
    /// When false, `SessionManager::start` is a no-op and no workers spawn.
    pub enabled: bool,
    /// Engine install root, passed through to worker environment.
    pub engine_install_path: Option<String>,
    /// Engine edition/variant (e.g. "mp", "se", "be").
    pub engine_edition: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            session_timeout: 3600,
            worker_start_timeout: 60,
            command_timeout: 600,
            enabled: true,
            engine_install_path: None,
            engine_edition: "mp".to_string(),
        }
    }
}

/// Mirrors `Config` but with every field optional, for partial TOML files.
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    max_sessions: Option<usize>,
    session_timeout: Option<u64>,
    worker_start_timeout: Option<u64>,
    command_timeout: Option<u64>,
    enabled: Option<bool>,
    engine_install_path: Option<String>,
    engine_edition: Option<String>,
}

impl Config {
    /// Load configuration: defaults, then an optional TOML file, then
    /// `STATAMCP_*` environment overrides.
    pub fn load() -> Self {
        let mut config = Self::default();

        let config_path = std::env::var("STATAMCP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("statamcp.toml"));

        if let Ok(text) = std::fs::read_to_string(&config_path) {
            match toml::from_str::<PartialConfig>(&text) {
                Ok(partial) => config.apply_partial(partial),
                Err(e) => {
                    tracing::warn!(path = %config_path.display(), error = %e, "failed to parse config file, using defaults");
                }
            }
        }

        config.apply_env_overrides();
        config
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(v) = partial.max_sessions {
            self.max_sessions = v;
        }
        if let Some(v) = partial.session_timeout {
            self.session_timeout = v;
        }
        if let Some(v) = partial.worker_start_timeout {
            self.worker_start_timeout = v;
        }
        if let Some(v) = partial.command_timeout {
            self.command_timeout = v;
        }
        if let Some(v) = partial.enabled {
            self.enabled = v;
        }
        if let Some(v) = partial.engine_install_path {
            self.engine_install_path = Some(v);
        }
        if let Some(v) = partial.engine_edition {
            self.engine_edition = v;
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("STATAMCP_MAX_SESSIONS") {
            if let Ok(v) = v.parse() {
                self.max_sessions = v;
            }
        }
        if let Ok(v) = std::env::var("STATAMCP_SESSION_TIMEOUT") {
            if let Ok(v) = v.parse() {
                self.session_timeout = v;
            }
        }
        if let Ok(v) = std::env::var("STATAMCP_WORKER_START_TIMEOUT") {
            if let Ok(v) = v.parse() {
                self.worker_start_timeout = v;
            }
        }
        if let Ok(v) = std::env::var("STATAMCP_COMMAND_TIMEOUT") {
            if let Ok(v) = v.parse() {
                self.command_timeout = v;
            }
        }
        if let Ok(v) = std::env::var("STATAMCP_ENABLED") {
            if let Ok(v) = v.parse() {
                self.enabled = v;
            }
        }
        if let Ok(v) = std::env::var("STATAMCP_ENGINE_INSTALL_PATH") {
            self.engine_install_path = Some(v);
        }
        if let Ok(v) = std::env::var("STATAMCP_ENGINE_EDITION") {
            self.engine_edition = v;
        }
    }

    /// Treat a non-positive `command_timeout` override as "use the default"
    /// (boundary behavior).
    pub fn resolve_command_timeout(&self, requested: Option<i64>) -> u64 {
        match requested {
            Some(t) if t > 0 => t as u64,
            _ => self.command_timeout,
        }
    }

    /// `f64` counterpart of `resolve_command_timeout`, for callers (the
    /// session manager) that pass fractional-second deadlines down to the
    /// worker IPC layer.
    pub fn resolve_command_timeout_secs(&self, requested: Option<f64>) -> f64 {
        match requested {
            Some(t) if t > 0.0 => t,
            _ => self.command_timeout as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.max_sessions, 100);
        assert_eq!(config.session_timeout, 3600);
        assert_eq!(config.worker_start_timeout, 60);
        assert_eq!(config.command_timeout, 600);
        assert!(config.enabled);
    }

    #[test]
    fn non_positive_timeout_falls_back_to_default() {
        let config = Config::default();
        assert_eq!(config.resolve_command_timeout(Some(0)), 600);
        assert_eq!(config.resolve_command_timeout(Some(-5)), 600);
        assert_eq!(config.resolve_command_timeout(Some(30)), 30);
        assert_eq!(config.resolve_command_timeout(None), 600);
    }
}

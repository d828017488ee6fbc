use crate::config::types::{CapsicumError, CleanupPolicy, Result};
/// Harness configuration loading from capcheck.json
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the current directory by [`HarnessConfig::load_default`].
pub const DEFAULT_CONFIG_FILE: &str = "capcheck.json";

pub const ENV_TIMEOUT_MS: &str = "CAPCHECK_TIMEOUT_MS";
pub const ENV_TEMP_ROOT: &str = "CAPCHECK_TEMP_ROOT";

/// Settings for spawning, judging and cleaning up verification runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Wall-clock limit for one child, in milliseconds.
    pub timeout_ms: u64,
    /// Time between SIGTERM and SIGKILL for a timed-out child.
    pub grace_ms: u64,
    /// Parent directory of per-scenario temp directories.
    pub temp_root: PathBuf,
    pub cleanup: CleanupPolicy,
    /// Let the child inherit stdout/stderr instead of discarding them.
    pub forward_output: bool,
    /// Children run concurrently by `verify_many`.
    pub jobs: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            grace_ms: 200,
            temp_root: std::env::temp_dir(),
            cleanup: CleanupPolicy::Strict,
            forward_output: true,
            jobs: 1,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CapsicumError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: HarnessConfig = serde_json::from_str(&content)
            .map_err(|e| CapsicumError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.with_env_overrides()?.validated()
    }

    /// Load ./capcheck.json when present, otherwise defaults; environment
    /// overrides apply either way.
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| CapsicumError::Config(format!("Failed to get current directory: {}", e)))?
            .join(DEFAULT_CONFIG_FILE);

        if config_path.exists() {
            log::debug!("Loading harness config from {}", config_path.display());
            return Self::load_from_file(config_path);
        }

        Self::default().with_env_overrides()?.validated()
    }

    fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var(ENV_TIMEOUT_MS) {
            self.timeout_ms = raw.trim().parse().map_err(|_| {
                CapsicumError::Config(format!("{} must be an integer, got {:?}", ENV_TIMEOUT_MS, raw))
            })?;
        }
        if let Some(root) = std::env::var_os(ENV_TEMP_ROOT) {
            self.temp_root = PathBuf::from(root);
        }
        Ok(self)
    }

    /// Reject settings the harness cannot run with.
    pub fn validated(self) -> Result<Self> {
        if self.timeout_ms == 0 {
            return Err(CapsicumError::Config("timeout_ms must be greater than 0".into()));
        }
        if self.jobs == 0 {
            return Err(CapsicumError::Config("jobs must be at least 1".into()));
        }
        if self.temp_root.to_str().is_none() {
            return Err(CapsicumError::Config(format!(
                "temp_root {} is not valid UTF-8",
                self.temp_root.display()
            )));
        }
        if !self.temp_root.is_dir() {
            return Err(CapsicumError::Config(format!(
                "temp_root {} is not a directory",
                self.temp_root.display()
            )));
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

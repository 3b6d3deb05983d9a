#![forbid(unsafe_code)]

//! Runner configuration.
//!
//! ```toml
//! # sponge.toml
//! kill_timeout_ms = 2000
//! shared_memory = true
//! package_index = ["random", "math"]
//! ```
//!
//! Every field defaults, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// How long `kill` waits for the runtime to acknowledge an interrupt
    /// before hard-restarting the session.
    pub kill_timeout_ms: u64,

    /// Whether sessions get shared interrupt/key-down buffers. Without
    /// them only a hard restart can stop a running program.
    pub shared_memory: bool,

    /// Install packages from the bundled index instead of the network one.
    pub standalone: bool,

    /// Whether session files are written before, and collected after, a run.
    pub session_files_allowed: bool,

    /// Packages `install-deps` can install.
    pub package_index: Vec<String>,

    /// Worker threads are named `{prefix}-{session id}`.
    pub worker_name_prefix: String,

    /// Stack size of worker threads, in MiB. Deep recursion in learner
    /// programs runs on this stack.
    pub worker_stack_mib: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            kill_timeout_ms: 2000,
            shared_memory: true,
            standalone: false,
            session_files_allowed: true,
            package_index: sponge_lang::PACKAGES.iter().map(|p| (*p).to_string()).collect(),
            worker_name_prefix: "sponge-worker".to_string(),
            worker_stack_mib: 256,
        }
    }
}

impl RunnerConfig {
    /// Load from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Load from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::TomlSer)
    }

    /// Returns a list of problems. An empty list means the config is valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.kill_timeout_ms == 0 {
            errors.push("kill_timeout_ms must be > 0".to_string());
        }
        if self.worker_name_prefix.trim().is_empty() {
            errors.push("worker_name_prefix must not be empty".to_string());
        }
        if self.worker_stack_mib == 0 {
            errors.push("worker_stack_mib must be > 0".to_string());
        }
        for pkg in &self.package_index {
            if !sponge_lang::PACKAGES.contains(&pkg.as_str()) {
                errors.push(format!("package_index: unknown package '{pkg}'"));
            }
        }
        errors
    }

    #[must_use]
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }
}

/// Errors that can occur when loading a runner configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[source] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlSer(#[source] toml::ser::Error),

    #[error("JSON parse error: {0}")]
    Json(#[source] serde_json::Error),
}

use thiserror::Error;

use crate::config::ConfigError;
use crate::state::ExecutionState;

pub type Result<T> = std::result::Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// A newer request of the same kind replaced this one.
    #[error("{what} cancelled")]
    Cancelled { what: &'static str },

    #[error("runner is not ready (state: {state})")]
    NotReady { state: ExecutionState },

    #[error("failed to spawn worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("worker disconnected")]
    Disconnected,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    #[must_use]
    pub fn cancelled(what: &'static str) -> Self {
        Self::Cancelled { what }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

use std::path::PathBuf;

use sponge_runner::{ConfigError, RunnerError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

/// Exit status for a clean run.
pub const EXIT_OK: i32 = 0;
/// The program failed or a test case did not pass.
pub const EXIT_FAILED: i32 = 1;
/// Bad arguments or configuration.
pub const EXIT_USAGE: i32 = 2;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("invalid configuration: {}", problems.join("; "))]
    InvalidConfig { problems: Vec<String> },

    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("cannot read program {path}: {source}")]
    Program {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("{message}")]
    Exit { code: i32, message: String },
}

impl CliError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exit { code, .. } => *code,
            Self::Config(_) | Self::InvalidConfig { .. } | Self::InvalidArgument { .. } => {
                EXIT_USAGE
            }
            Self::Program { .. } => EXIT_USAGE,
            _ => EXIT_FAILED,
        }
    }

    #[must_use]
    pub fn exit(code: i32, message: impl Into<String>) -> Self {
        Self::Exit {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_constructor_preserves_code_and_message() {
        let error = CliError::exit(EXIT_FAILED, "2 of 3 tests failed");
        assert_eq!(error.exit_code(), 1);
        assert_eq!(error.to_string(), "2 of 3 tests failed");
    }

    #[test]
    fn usage_errors_exit_with_two() {
        assert_eq!(CliError::invalid("no cases").exit_code(), EXIT_USAGE);
        let config = CliError::InvalidConfig {
            problems: vec!["kill_timeout_ms must be positive".into()],
        };
        assert_eq!(config.exit_code(), EXIT_USAGE);
        assert_eq!(
            config.to_string(),
            "invalid configuration: kill_timeout_ms must be positive"
        );
    }

    #[test]
    fn runner_faults_exit_with_one() {
        let error = CliError::from(RunnerError::Disconnected);
        assert_eq!(error.exit_code(), EXIT_FAILED);
    }
}

#![forbid(unsafe_code)]

//! The `sponge` command.
//!
//! Runs, debugs and tests learner programs through the same
//! [`sponge_runner::Coordinator`] a browser front end would use, with the
//! terminal standing in for the console, the input box and the debugger
//! panel.

pub mod cli;
pub mod driver;
pub mod error;
pub mod settings;

pub use cli::{Cli, Commands, run, run_with};
pub use error::{CliError, Result};

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `sponge=debug`.
pub const LOG_ENV: &str = "SPONGE_LOG";

/// Install the stderr log subscriber. Later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run_from_env() -> Result<()> {
    init_tracing();
    cli::run_from_env()
}

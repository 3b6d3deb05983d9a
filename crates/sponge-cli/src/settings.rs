//! Locating and loading the runner configuration.

use std::path::{Path, PathBuf};

use sponge_runner::RunnerConfig;

use crate::error::{CliError, Result};

/// Picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "sponge.toml";

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Defaults,
    File(PathBuf),
}

/// Load the configuration named by `explicit`, else `sponge.toml` in
/// `cwd`, else the defaults. Files ending in `.json` are read as JSON.
pub fn load_config(explicit: Option<&Path>, cwd: &Path) -> Result<(RunnerConfig, ConfigSource)> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let implicit = cwd.join(DEFAULT_CONFIG_FILE);
            if !implicit.is_file() {
                return Ok((RunnerConfig::default(), ConfigSource::Defaults));
            }
            implicit
        }
    };

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let config = if is_json {
        RunnerConfig::from_json_file(&path)?
    } else {
        RunnerConfig::from_toml_file(&path)?
    };

    let problems = config.validate();
    if !problems.is_empty() {
        return Err(CliError::InvalidConfig { problems });
    }
    tracing::debug!(target: "sponge.cli", path = %path.display(), "configuration loaded");
    Ok((config, ConfigSource::File(path)))
}

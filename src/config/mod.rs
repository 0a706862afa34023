//! Configuration management for pinstall
//!
//! Looks for `pinstall.toml` in the project directory, then
//! `~/.pinstall/config.toml`. Missing files mean defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Project-local config file name
pub const PROJECT_CONFIG: &str = "pinstall.toml";

/// Default manifest file name
pub const DEFAULT_MANIFEST: &str = "requirements.txt";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Manifest path, relative to the working directory
    pub manifest: PathBuf,
    /// Record the installed version for specs given without one
    pub pin: bool,
    /// Command that installs packages; specs are appended as arguments
    pub install_command: Vec<String>,
    /// Command that prints package metadata; the name is appended
    pub show_command: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from(DEFAULT_MANIFEST),
            pin: false,
            install_command: pip_command("install"),
            show_command: pip_command("show"),
        }
    }
}

fn pip_command(subcommand: &str) -> Vec<String> {
    ["python3", "-m", "pip", subcommand]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Returns the path to the pinstall home directory (~/.pinstall)
pub fn pinstall_home() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pinstall"))
}

/// Config files to try, most specific first
pub fn config_candidates(project_dir: &Path) -> Vec<PathBuf> {
    let mut candidates = vec![project_dir.join(PROJECT_CONFIG)];
    if let Some(home) = pinstall_home() {
        candidates.push(home.join("config.toml"));
    }
    candidates
}

/// Load configuration
///
/// An explicit path must exist. Otherwise the first existing candidate wins,
/// and defaults apply when there is none.
pub fn load_config(explicit: Option<&Path>, project_dir: &Path) -> Result<Config> {
    if let Some(path) = explicit {
        return load_from(path);
    }
    for candidate in config_candidates(project_dir) {
        if candidate.is_file() {
            return load_from(&candidate);
        }
    }
    debug!("no config file found, using defaults");
    Ok(Config::default())
}

/// Load and validate a single config file
pub fn load_from(path: &Path) -> Result<Config> {
    let config_err = |message: String| Error::Config {
        path: path.to_path_buf(),
        message,
    };

    let content = fs::read_to_string(path).map_err(|e| config_err(e.to_string()))?;
    let config: Config = toml::from_str(&content).map_err(|e| config_err(e.to_string()))?;

    if config.install_command.is_empty() {
        return Err(config_err("install_command must not be empty".to_string()));
    }
    if config.show_command.is_empty() {
        return Err(config_err("show_command must not be empty".to_string()));
    }

    debug!("loaded config from {:?}", path);
    Ok(config)
}

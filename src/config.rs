// ABOUTME: Connection defaults and runner options, YAML-loadable.
// ABOUTME: Resolution order: explicit argument > host shorthand > Config > built-in default.

use crate::error::Result;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Defaults consulted when a connection parameter is not supplied
/// explicitly or via host-string shorthand.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub sudo: SudoConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    /// Per-command timeout. Commands run without a deadline when unset.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Echo commands to stdout before running them.
    #[serde(default)]
    pub echo: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SudoConfig {
    /// Password fed to `sudo -S` over the command's stdin. No prompt
    /// interaction happens when unset.
    #[serde(default)]
    pub password: Option<String>,
}

fn default_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "root".to_string())
}

fn default_port() -> u16 {
    22
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: default_user(),
            port: default_port(),
            run: RunConfig::default(),
            sudo: SudoConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}

//! objshare configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::coordinator::CoordinatorConfig;

/// Main objshare configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Coordinator tuning
    pub coordinator: CoordinatorConfig,
}

/// Project-local config file, looked up in the working directory
const LOCAL_CONFIG: &str = ".objshare.yml";

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist and parse. Otherwise the first readable
    /// file among [`Config::search_paths`] wins; unreadable candidates are
    /// logged and skipped, and defaults apply when none is found.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::search_paths() {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!(path = %candidate.display(), error = %e, "Skipping unusable config file"),
            }
        }

        tracing::info!("No objshare config found, using coordinator defaults");
        Ok(Self::default())
    }

    /// Implicit config locations, highest priority first
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("objshare").join("objshare.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        tracing::info!(path = %path.as_ref().display(), "Loaded objshare config");
        Ok(config)
    }

    /// Reject settings the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        let coordinator = &self.coordinator;
        if coordinator.queue_capacity == 0 {
            eyre::bail!("queue-capacity must be at least 1");
        }
        if coordinator.poll_interval_us == 0 {
            eyre::bail!("poll-interval-us must be at least 1");
        }
        Ok(())
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }
}

//! runclock configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub use crate::backoff::BackoffConfig;
pub use crate::deadline::TimeoutsConfig;

/// Main runclock configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deadline defaults
    pub timeouts: TimeoutsConfig,

    /// Quota-retry backoff
    pub backoff: BackoffConfig,
}

/// Project-local config file, relative to the working directory
const LOCAL_CONFIG: &str = ".runclock.yml";

impl Config {
    /// Load configuration from `config_path`, or the first readable default location
    ///
    /// An explicit path must load. The default locations are tried in order
    /// (`./.runclock.yml`, then `<config dir>/runclock/runclock.yml`); a broken
    /// file there is logged and skipped, and defaults apply when none loads.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let loaded = Self::default_locations()
            .into_iter()
            .filter(|path| path.exists())
            .find_map(|path| Self::try_load(&path));

        Ok(loaded.unwrap_or_else(|| {
            info!("No config file found, using defaults");
            Self::default()
        }))
    }

    fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from(LOCAL_CONFIG)];
        locations.extend(dirs::config_dir().map(|dir| dir.join("runclock").join("runclock.yml")));
        locations
    }

    fn try_load(path: &Path) -> Option<Self> {
        Self::load_from_file(path)
            .inspect_err(|e| warn!(path = %path.display(), error = %e, "Skipping unreadable config"))
            .ok()
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }
}

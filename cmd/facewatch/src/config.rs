//! Configuration loading.
//!
//! Configuration is read from YAML, by default `~/.giztoy/facewatch/config.yaml`.
//! Every key is optional; command-line flags override file values.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default base configuration directory name.
pub const DEFAULT_BASE_DIR: &str = ".giztoy";
/// Application directory under the base directory.
pub const APP_NAME: &str = "facewatch";
/// Default configuration filename.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity store (label -> embedding).
    pub store_path: PathBuf,

    /// Directory of `<label>.jpg` face crops.
    pub faces_dir: PathBuf,

    /// Append-only presence log.
    pub presence_log: PathBuf,

    /// Last-seen index shown in the admin listing.
    pub sightings_path: PathBuf,

    /// Cosine distance below which a face matches a known identity.
    pub threshold: f32,

    /// Seconds a face may go unseen before its presence ends.
    pub presence_timeout_secs: f64,

    /// Admin HTTP listen address (e.g. ":5000" or "127.0.0.1:5000").
    pub listen: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("embeddings.json"),
            faces_dir: PathBuf::from("data/faces"),
            presence_log: PathBuf::from("passages.txt"),
            sightings_path: PathBuf::from("data/identities.json"),
            threshold: giztoy_faceid::DEFAULT_THRESHOLD,
            presence_timeout_secs: 3.0,
            listen: ":5000".to_string(),
        }
    }
}

impl Config {
    /// Gets the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| {
            home.join(DEFAULT_BASE_DIR)
                .join(APP_NAME)
                .join(DEFAULT_CONFIG_FILE)
        })
    }

    /// Loads configuration.
    ///
    /// With an explicit path the file must exist. Otherwise the default
    /// location is used if present, else built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load_file(path),
            None => match Self::default_config_path() {
                Some(path) if path.is_file() => Self::load_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_yaml(&data).with_context(|| format!("parse config {}", path.display()))
    }

    /// Parses YAML; an empty document yields the defaults.
    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }

    /// Presence timeout as a time delta; invalid values fall back to 3s.
    pub fn presence_timeout(&self) -> chrono::TimeDelta {
        let secs = self.presence_timeout_secs;
        if secs.is_finite() && secs >= 0.0 {
            chrono::TimeDelta::milliseconds((secs * 1000.0).round() as i64)
        } else {
            chrono::TimeDelta::seconds(3)
        }
    }
}

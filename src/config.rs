// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Application configuration.
//!
//! Reads the same `config.json` the homelab web console uses. Keys are
//! camelCase; keys this crate does not know (service directory settings and
//! the like) are ignored.
//!
//! ```json
//! {
//!   "downloadsConfigPath": "/srv/homelab/downloads.json",
//!   "downloaderLogsDir": "/var/log/homelab/downloader",
//!   "nginxLogsDir": "/var/log/nginx",
//!   "dataRoot": "../../data/"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logs::LogSource;
use crate::paths::{DataRoot, DEFAULT_DATA_ROOT};

/// Config file name inside the config directory.
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Location of the downloads document
    #[serde(default = "default_downloads_config_path")]
    pub downloads_config_path: PathBuf,
    /// Directory holding the downloader's logs
    #[serde(default = "default_downloader_logs_dir")]
    pub downloader_logs_dir: PathBuf,
    /// Directory holding nginx access/error logs
    #[serde(default = "default_nginx_logs_dir")]
    pub nginx_logs_dir: PathBuf,
    /// Prefix stored in front of every download destination
    #[serde(default = "default_data_root")]
    pub data_root: String,
    /// How long a writer waits for the downloads document lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_downloads_config_path() -> PathBuf {
    PathBuf::from("downloads.json")
}

fn default_downloader_logs_dir() -> PathBuf {
    PathBuf::from("logs/downloader")
}

fn default_nginx_logs_dir() -> PathBuf {
    PathBuf::from("logs/nginx")
}

fn default_data_root() -> String {
    DEFAULT_DATA_ROOT.to_string()
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            downloads_config_path: default_downloads_config_path(),
            downloader_logs_dir: default_downloader_logs_dir(),
            nginx_logs_dir: default_nginx_logs_dir(),
            data_root: default_data_root(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl Config {
    /// `~/.homelab/config.json`, if a home directory can be found.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".homelab").join(CONFIG_FILE))
    }

    /// Load the config.
    ///
    /// An explicit path must exist. Without one, the default location is used
    /// when present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::read(path),
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::read(&path),
                _ => {
                    tracing::debug!("no config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Read and parse a config file.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn data_root(&self) -> DataRoot {
        DataRoot::new(self.data_root.as_str())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn logs_dir(&self, source: LogSource) -> &Path {
        match source {
            LogSource::Downloader => &self.downloader_logs_dir,
            LogSource::Nginx => &self.nginx_logs_dir,
        }
    }
}

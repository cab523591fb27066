// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Read-only browsing of the downloader and nginx log directories.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Which set of logs to browse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Downloader,
    Nginx,
}

impl LogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Downloader => "downloader",
            LogSource::Nginx => "nginx",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            LogSource::Downloader => "Downloader Logs",
            LogSource::Nginx => "Nginx Logs",
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "downloader" => Ok(LogSource::Downloader),
            "nginx" => Ok(LogSource::Nginx),
            other => Err(format!("unknown log source `{}`", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("could not read log directory {}", dir.display())]
    ReadDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("`{0}` is not a log file name")]
    InvalidName(String),

    #[error("could not read log {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A log file in a log directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogFile {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Current logs (`access.log`) and rotated ones (`access.log.1`, `access.log-20240101`).
pub fn is_log_file_name(name: &str) -> bool {
    name.contains(".log")
}

/// Log files in `dir`, newest rotation first (name descending).
pub fn list_logs(dir: &Path) -> Result<Vec<LogFile>, LogError> {
    let read_dir = fs::read_dir(dir).map_err(|source| LogError::ReadDir {
        dir: dir.to_path_buf(),
        source,
    })?;

    let mut logs = Vec::new();
    for dir_entry in read_dir.flatten() {
        let Ok(name) = dir_entry.file_name().into_string() else {
            continue;
        };
        if !is_log_file_name(&name) {
            continue;
        }
        let Ok(metadata) = dir_entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        logs.push(LogFile {
            name,
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    logs.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(logs)
}

/// Contents of the log `name` in `dir`. Invalid UTF-8 is replaced.
///
/// `name` must be a bare log file name; anything that could leave `dir` is
/// rejected.
pub fn read_log(dir: &Path, name: &str) -> Result<String, LogError> {
    if name.is_empty()
        || name.contains(['/', '\\'])
        || name.contains("..")
        || !is_log_file_name(name)
    {
        return Err(LogError::InvalidName(name.to_string()));
    }

    let path = dir.join(name);
    let bytes = fs::read(&path).map_err(|source| LogError::Read { path, source })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log_dir() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        for (name, content) in [
            ("download-2024-01-01.log", "first\n"),
            ("download-2024-01-02.log", "second\n"),
            ("access.log.1", "rotated\n"),
            ("notes.txt", "ignored\n"),
        ] {
            fs::write(temp_dir.path().join(name), content).unwrap();
        }
        fs::create_dir(temp_dir.path().join("old.log.d")).unwrap();
        temp_dir
    }

    #[test]
    fn test_list_logs_filters_and_sorts() {
        let dir = log_dir();
        let names: Vec<String> = list_logs(dir.path())
            .unwrap()
            .into_iter()
            .map(|log| log.name)
            .collect();
        assert_eq!(
            names,
            ["download-2024-01-02.log", "download-2024-01-01.log", "access.log.1"]
        );
    }

    #[test]
    fn test_list_logs_reports_size() {
        let dir = log_dir();
        let logs = list_logs(dir.path()).unwrap();
        let rotated = logs.iter().find(|log| log.name == "access.log.1").unwrap();
        assert_eq!(rotated.size, 8);
        assert!(rotated.modified.is_some());
    }

    #[test]
    fn test_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            list_logs(&dir.path().join("missing")),
            Err(LogError::ReadDir { .. })
        ));
    }

    #[test]
    fn test_read_log() {
        let dir = log_dir();
        assert_eq!(read_log(dir.path(), "download-2024-01-02.log").unwrap(), "second\n");
        assert!(matches!(
            read_log(dir.path(), "gone.log"),
            Err(LogError::Read { .. })
        ));
    }

    #[test]
    fn test_read_log_rejects_escapes() {
        let dir = log_dir();
        for name in ["", "../secret.log", "sub/x.log", "..\\x.log", "notes.txt", "...log"] {
            assert!(
                matches!(read_log(dir.path(), name), Err(LogError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_source_parsing() {
        assert_eq!("nginx".parse::<LogSource>(), Ok(LogSource::Nginx));
        assert!("apache".parse::<LogSource>().is_err());
        assert_eq!(LogSource::Downloader.title(), "Downloader Logs");
    }
}

// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Errors returned by the download store.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::types::{EntryId, Field};
use crate::paths::PathError;

/// The backing document could not be read.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("could not read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The cross-process lock on the document could not be taken.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {0:?} waiting for the lock; another writer may be active")]
    Timeout(Duration),

    #[error("could not open lock file {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not lock {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure of a store operation.
///
/// Validation errors are raised before anything is written. After a
/// [`StoreError::PersistFailure`] the document's state is unknown and must be
/// re-read before retrying.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("downloads configuration is unavailable")]
    ConfigUnavailable(#[source] DocumentError),

    #[error("invalid destination path: {0}")]
    InvalidPath(PathError),

    #[error("invalid pattern `{pattern}`")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error(
        "invalid image name `{0}`: only letters, numbers, hyphens, underscores, \
         and forward slashes are allowed"
    )]
    InvalidImageName(String),

    #[error("{0} is required")]
    MissingField(Field),

    #[error("index {index} is out of range ({len} downloads)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("no download with id {0}")]
    UnknownEntry(EntryId),

    #[error("downloads configuration was changed by another writer; re-read and retry")]
    ConcurrentModification,

    #[error("downloads configuration is locked")]
    Locked(#[from] LockError),

    #[error("failed to save downloads configuration")]
    PersistFailure(#[source] io::Error),
}

impl StoreError {
    /// The form field this error should be shown next to, if any.
    pub fn field(&self) -> Option<Field> {
        match self {
            StoreError::InvalidPath(_) => Some(Field::Dest),
            StoreError::InvalidPattern { .. } => Some(Field::Pattern),
            StoreError::InvalidImageName(_) => Some(Field::Image),
            StoreError::MissingField(field) => Some(*field),
            _ => None,
        }
    }

    /// True for errors caused by the submitted entry rather than the document.
    pub fn is_validation(&self) -> bool {
        self.field().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_mapping() {
        assert_eq!(StoreError::InvalidPath(PathError::Empty).field(), Some(Field::Dest));
        assert_eq!(
            StoreError::InvalidImageName("a:b".into()).field(),
            Some(Field::Image)
        );
        assert_eq!(StoreError::MissingField(Field::Url).field(), Some(Field::Url));
        assert_eq!(
            StoreError::IndexOutOfRange { index: 3, len: 1 }.field(),
            None
        );
        assert!(!StoreError::ConcurrentModification.is_validation());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            StoreError::InvalidPath(PathError::Absolute).to_string(),
            "invalid destination path: Path cannot be absolute (cannot start with / or \\)"
        );
        assert_eq!(StoreError::MissingField(Field::Pattern).to_string(), "pattern is required");
        assert_eq!(
            StoreError::IndexOutOfRange { index: 5, len: 2 }.to_string(),
            "index 5 is out of range (2 downloads)"
        );
    }
}

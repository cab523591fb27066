// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The downloads document on disk.
//!
//! Reads are plain reads: writes go through a temp file and an atomic rename,
//! so a reader always sees a whole document. Writers coordinate through an
//! exclusive lock on a sidecar `.lock` file and check a revision stamp right
//! before the rename to catch writers that ignore the lock.
//!
//! This module never creates the document itself.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use sha2::{Digest, Sha256};

use super::error::{DocumentError, LockError, StoreError};
use super::types::DownloadsDocument;

/// Default timeout for acquiring the document lock (5 seconds)
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval when waiting for lock acquisition
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// SHA-256 of the document bytes as they were read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Revision(String);

impl Revision {
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document together with the revision it was read at.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub document: DownloadsDocument,
    pub revision: Revision,
}

/// Handle to the JSON document backing the store.
#[derive(Debug, Clone)]
pub struct DocumentFile {
    path: PathBuf,
    lock_timeout: Duration,
}

impl DocumentFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar lock file, e.g. `downloads.json.lock` for `downloads.json`.
    pub fn lock_path(&self) -> PathBuf {
        sidecar(&self.path, ".lock")
    }

    fn temp_path(&self) -> PathBuf {
        sidecar(&self.path, ".tmp")
    }

    /// Fail with [`DocumentError::Read`] unless the document exists.
    pub fn require_exists(&self) -> Result<(), DocumentError> {
        fs::metadata(&self.path)
            .map(|_| ())
            .map_err(|source| DocumentError::Read {
                path: self.path.clone(),
                source,
            })
    }

    /// Read and parse the document.
    pub fn load(&self) -> Result<Loaded, DocumentError> {
        let bytes = fs::read(&self.path).map_err(|source| DocumentError::Read {
            path: self.path.clone(),
            source,
        })?;
        let revision = Revision::of(&bytes);

        let document = serde_json::from_slice(&bytes).map_err(|source| DocumentError::Parse {
            path: self.path.clone(),
            source,
        })?;

        Ok(Loaded { document, revision })
    }

    /// Take the exclusive writer lock, waiting up to the configured timeout.
    ///
    /// The lock is released when the returned file is dropped.
    pub fn lock_exclusive(&self) -> Result<File, LockError> {
        acquire_exclusive_lock_with_timeout(&self.lock_path(), self.lock_timeout)
    }

    /// Replace the document with `document`.
    ///
    /// The caller must hold the writer lock. Fails with
    /// [`StoreError::ConcurrentModification`] if the file no longer matches
    /// `expected`, in which case the document is left untouched.
    pub fn save(&self, document: &DownloadsDocument, expected: &Revision) -> Result<Revision, StoreError> {
        let content = document
            .to_json_pretty()
            .map_err(|e| StoreError::PersistFailure(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        let temp_path = self.temp_path();

        if let Err(e) = self.write_temp(&temp_path, content.as_bytes()) {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::PersistFailure(e));
        }

        // Another writer may have replaced the file without taking the lock.
        let current = fs::read(&self.path).map(|bytes| Revision::of(&bytes));
        if current.as_ref().ok() != Some(expected) {
            let _ = fs::remove_file(&temp_path);
            tracing::warn!(
                path = %self.path.display(),
                expected = %expected,
                "downloads document changed during update, not overwriting"
            );
            return Err(StoreError::ConcurrentModification);
        }

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            tracing::error!(path = %self.path.display(), error = %e, "failed to replace downloads document");
            return Err(StoreError::PersistFailure(e));
        }

        Ok(Revision::of(content.as_bytes()))
    }

    fn write_temp(&self, temp_path: &Path, content: &[u8]) -> io::Result<()> {
        let mut temp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)?;

        temp_file.write_all(content)?;

        // Ensure all data is flushed to disk before rename
        temp_file.sync_all()?;

        // Keep the document's permissions across the rename.
        if let Ok(metadata) = fs::metadata(&self.path) {
            fs::set_permissions(temp_path, metadata.permissions())?;
        }

        Ok(())
    }
}

/// `path` with `suffix` appended to its full file name, so the sidecar never
/// equals the document whatever its extension.
fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Acquire an exclusive lock with timeout.
///
/// Returns the locked file handle on success, or an error if the timeout expires.
fn acquire_exclusive_lock_with_timeout(path: &Path, timeout: Duration) -> Result<File, LockError> {
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| LockError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let start = Instant::now();

    loop {
        match lock_file.try_lock_exclusive() {
            Ok(()) => return Ok(lock_file),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                if start.elapsed() >= timeout {
                    return Err(LockError::Timeout(timeout));
                }
                thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(source) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
}

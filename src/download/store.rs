// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The download store: the only writer of the downloads document.
//!
//! Every operation re-reads the document; nothing is cached between calls.
//! Mutations run read-validate-write under a process-local mutex and the
//! document's cross-process lock, and either apply exactly once or leave the
//! file untouched.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use regex::Regex;

use super::error::StoreError;
use super::state::{DocumentFile, Revision};
use super::types::{
    is_valid_image_name, DownloadEntry, DownloadKind, DownloadType, DownloadsDocument, EntryId,
    Field, DEFAULT_NAMESPACE,
};
use crate::config::Config;
use crate::locks::resilient_lock;
use crate::paths::{self, DataRoot};

/// Entries together with the revision they were read at.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub entries: Vec<DownloadEntry>,
    pub revision: Revision,
}

/// Store for the scheduled downloads list.
#[derive(Debug)]
pub struct DownloadStore {
    file: DocumentFile,
    root: DataRoot,
    write_lock: Mutex<()>,
}

impl DownloadStore {
    /// A store over the document at `path`. The document must already exist
    /// before the first mutation.
    pub fn new(path: impl Into<PathBuf>, root: DataRoot) -> Self {
        Self {
            file: DocumentFile::new(path),
            root,
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.downloads_config_path.clone(), config.data_root())
            .with_lock_timeout(config.lock_timeout())
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.file = self.file.with_lock_timeout(timeout);
        self
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn data_root(&self) -> &DataRoot {
        &self.root
    }

    /// All entries in stored order, paths in storage form.
    ///
    /// An unreadable document reads as empty.
    pub fn list(&self) -> Vec<DownloadEntry> {
        match self.file.load() {
            Ok(loaded) => {
                tracing::debug!(
                    path = %self.path().display(),
                    count = loaded.document.len(),
                    "read downloads document"
                );
                loaded.document.downloads
            }
            Err(e) => {
                tracing::warn!(error = %e, "downloads document unreadable, listing nothing");
                Vec::new()
            }
        }
    }

    /// Entries of one type, in stored order.
    pub fn list_type(&self, download_type: DownloadType) -> Vec<DownloadEntry> {
        self.list()
            .into_iter()
            .filter(|entry| entry.download_type() == download_type)
            .collect()
    }

    /// Entries plus the document revision. Unlike [`Self::list`] this fails
    /// when the document cannot be read.
    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let loaded = self.file.load().map_err(StoreError::ConfigUnavailable)?;
        Ok(Snapshot {
            entries: loaded.document.downloads,
            revision: loaded.revision,
        })
    }

    /// Validate `entry` and append it. Returns the entry as stored.
    pub fn add(&self, entry: DownloadEntry) -> Result<DownloadEntry, StoreError> {
        let stored = self.mutate(|document| {
            let entry = self.prepare(entry)?;
            Ok(document.push(entry).clone())
        })?;
        tracing::info!(op = "add", id = %stored.id, kind = %stored.download_type(), "download added");
        Ok(stored)
    }

    /// Validate `entry` and put it in place of the entry at `index`.
    pub fn update(&self, index: usize, entry: DownloadEntry) -> Result<DownloadEntry, StoreError> {
        let stored = self.mutate(|document| {
            if index >= document.len() {
                return Err(StoreError::IndexOutOfRange {
                    index,
                    len: document.len(),
                });
            }
            let entry = self.prepare(entry)?;
            Ok(document.replace(index, entry)?.clone())
        })?;
        tracing::info!(op = "update", index, id = %stored.id, "download updated");
        Ok(stored)
    }

    /// Give the entry at `index` a new kind, keeping its id and unknown
    /// fields as they are at write time.
    pub fn update_kind(&self, index: usize, kind: DownloadKind) -> Result<DownloadEntry, StoreError> {
        let stored = self.mutate(|document| {
            let current = document.downloads.get(index).ok_or(StoreError::IndexOutOfRange {
                index,
                len: document.len(),
            })?;
            let entry = self.prepare(current.with_kind(kind))?;
            Ok(document.replace(index, entry)?.clone())
        })?;
        tracing::info!(op = "update", index, id = %stored.id, "download updated");
        Ok(stored)
    }

    /// [`Self::update_kind`] addressed by id.
    pub fn update_kind_by_id(&self, id: &EntryId, kind: DownloadKind) -> Result<DownloadEntry, StoreError> {
        let stored = self.mutate(|document| {
            let index = document.require_id(id)?;
            let entry = self.prepare(document.downloads[index].with_kind(kind))?;
            Ok(document.replace(index, entry)?.clone())
        })?;
        tracing::info!(op = "update", id = %stored.id, "download updated");
        Ok(stored)
    }

    /// Remove the entry at `index`. Returns the removed entry.
    pub fn delete(&self, index: usize) -> Result<DownloadEntry, StoreError> {
        let removed = self.mutate(|document| document.remove(index))?;
        tracing::info!(op = "delete", index, id = %removed.id, "download deleted");
        Ok(removed)
    }

    /// Move the entry at `from` to `to` (splice-remove, then splice-insert).
    pub fn move_entry(&self, from: usize, to: usize) -> Result<(), StoreError> {
        self.mutate(|document| document.move_entry(from, to))?;
        tracing::info!(op = "move", from, to, "download moved");
        Ok(())
    }

    /// [`Self::update`] addressed by id.
    pub fn update_by_id(&self, id: &EntryId, entry: DownloadEntry) -> Result<DownloadEntry, StoreError> {
        let stored = self.mutate(|document| {
            let index = document.require_id(id)?;
            let entry = self.prepare(entry)?;
            Ok(document.replace(index, entry)?.clone())
        })?;
        tracing::info!(op = "update", id = %stored.id, "download updated");
        Ok(stored)
    }

    /// [`Self::delete`] addressed by id.
    pub fn delete_by_id(&self, id: &EntryId) -> Result<DownloadEntry, StoreError> {
        let removed = self.mutate(|document| {
            let index = document.require_id(id)?;
            document.remove(index)
        })?;
        tracing::info!(op = "delete", id = %removed.id, "download deleted");
        Ok(removed)
    }

    /// [`Self::move_entry`] addressed by id. Returns the position it came from.
    pub fn move_by_id(&self, id: &EntryId, to: usize) -> Result<usize, StoreError> {
        let from = self.mutate(|document| {
            let from = document.require_id(id)?;
            document.move_entry(from, to)?;
            Ok(from)
        })?;
        tracing::info!(op = "move", %id, from, to, "download moved");
        Ok(from)
    }

    /// Run one read-modify-write cycle.
    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut DownloadsDocument) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = resilient_lock(&self.write_lock);
        // Checked before locking so a missing document leaves no sidecar behind.
        self.file.require_exists().map_err(StoreError::ConfigUnavailable)?;
        let _file_lock = self.file.lock_exclusive()?;

        let loaded = self.file.load().map_err(StoreError::ConfigUnavailable)?;
        let mut document = loaded.document;
        let value = apply(&mut document)?;
        let revision = self.file.save(&document, &loaded.revision)?;

        tracing::debug!(
            path = %self.path().display(),
            from = %loaded.revision,
            to = %revision,
            "downloads document written"
        );
        Ok(value)
    }

    /// Check an entry at the persistence boundary and bring its destination
    /// into storage form.
    fn prepare(&self, mut entry: DownloadEntry) -> Result<DownloadEntry, StoreError> {
        match &mut entry.kind {
            DownloadKind::Direct { url, dest } => {
                require(url, Field::Url)?;
                *dest = self.prepare_dest(dest)?;
            }
            DownloadKind::Pattern {
                url, dest, pattern, ..
            } => {
                require(url, Field::Url)?;
                *dest = self.prepare_dest(dest)?;
                require(pattern, Field::Pattern)?;
                Regex::new(pattern).map_err(|source| StoreError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
            }
            DownloadKind::Docker { image, namespace } => {
                if !is_valid_image_name(image) {
                    return Err(StoreError::InvalidImageName(image.clone()));
                }
                if namespace.trim().is_empty() {
                    *namespace = DEFAULT_NAMESPACE.to_string();
                }
            }
        }
        Ok(entry)
    }

    /// Validate a destination given in display or storage form.
    fn prepare_dest(&self, dest: &str) -> Result<String, StoreError> {
        let display = self.root.normalize(dest);
        if let Some(reason) = paths::validation_error(&display) {
            return Err(StoreError::InvalidPath(reason));
        }
        Ok(self.root.denormalize(&display))
    }
}

fn require(value: &str, field: Field) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        Err(StoreError::MissingField(field))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::PathError;
    use std::fs;
    use tempfile::TempDir;

    fn store_with(dir: &TempDir, content: &str) -> DownloadStore {
        let path = dir.path().join("downloads.json");
        fs::write(&path, content).expect("write document");
        DownloadStore::new(path, DataRoot::default())
    }

    #[test]
    fn test_prepare_denormalizes_display_paths() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = store_with(&temp_dir, r#"{"downloads":[]}"#);

        let stored = store
            .add(DownloadEntry::new(DownloadKind::direct("https://x/a.iso", "files/os")))
            .unwrap();
        assert_eq!(stored.kind.dest(), Some("../../data/files/os"));

        // storage form is accepted as-is
        let stored = store
            .add(DownloadEntry::new(DownloadKind::direct("https://x/b.iso", "../../data/files/os/")))
            .unwrap();
        assert_eq!(stored.kind.dest(), Some("../../data/files/os/"));
    }

    #[test]
    fn test_prepare_rejects_escape_behind_prefix() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = store_with(&temp_dir, r#"{"downloads":[]}"#);

        let err = store
            .add(DownloadEntry::new(DownloadKind::direct("u", "../../data/../etc")))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(PathError::Traversal)));
        assert_eq!(err.field(), Some(Field::Dest));
    }

    #[test]
    fn test_prepare_required_fields() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = store_with(&temp_dir, r#"{"downloads":[]}"#);

        let err = store
            .add(DownloadEntry::new(DownloadKind::direct("  ", "files")))
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingField(Field::Url)));

        let err = store
            .add(DownloadEntry::new(DownloadKind::direct("u", "")))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(PathError::Empty)));

        let err = store
            .add(DownloadEntry::new(DownloadKind::pattern("u", "wiki", "", true)))
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingField(Field::Pattern)));
    }

    #[test]
    fn test_prepare_pattern_and_image() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = store_with(&temp_dir, r#"{"downloads":[]}"#);

        let err = store
            .add(DownloadEntry::new(DownloadKind::pattern("u", "wiki", "(unclosed", false)))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPattern { .. }));
        assert_eq!(err.field(), Some(Field::Pattern));

        let err = store
            .add(DownloadEntry::new(DownloadKind::docker("nginx:latest")))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidImageName(_)));

        let stored = store
            .add(DownloadEntry::new(DownloadKind::Docker {
                image: "bitnami/redis".into(),
                namespace: " ".into(),
            }))
            .unwrap();
        assert_eq!(stored.kind, DownloadKind::docker("bitnami/redis"));
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_custom_data_root() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("downloads.json");
        fs::write(&path, r#"{"downloads":[]}"#).unwrap();
        let store = DownloadStore::new(&path, DataRoot::new("/srv/data"));

        let stored = store
            .add(DownloadEntry::new(DownloadKind::direct("u", "isos/")))
            .unwrap();
        assert_eq!(stored.kind.dest(), Some("/srv/data/isos/"));
        assert_eq!(store.data_root().normalize("/srv/data/isos/"), "isos/");
    }

    #[test]
    fn test_snapshot_revision_changes_on_write() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = store_with(&temp_dir, r#"{"downloads":[]}"#);

        let before = store.snapshot().unwrap();
        store.add(DownloadEntry::new(DownloadKind::docker("nginx"))).unwrap();
        let after = store.snapshot().unwrap();

        assert_ne!(before.revision, after.revision);
        assert_eq!(after.entries.len(), 1);
    }

    #[test]
    fn test_lock_timeout_surfaces_as_locked() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = store_with(&temp_dir, r#"{"downloads":[]}"#)
            .with_lock_timeout(Duration::from_millis(50));

        let held = store.file.lock_exclusive().expect("lock");
        let err = store
            .add(DownloadEntry::new(DownloadKind::docker("nginx")))
            .unwrap_err();
        assert!(matches!(err, StoreError::Locked(_)));
        drop(held);
        assert!(store.list().is_empty());
    }
}

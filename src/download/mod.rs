// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scheduled downloads configuration.
//!
//! The downloader process reads a JSON document listing what to fetch:
//! direct files, pattern-matched files, and docker images. This module owns
//! every write to that document.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │ DownloadStore   │────▶│ paths           │
//! │ (validate, op)  │     │ (sanitize dest) │
//! └────────┬────────┘     └─────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ DocumentFile    │  lock, read, temp file + rename
//! │ (persistent)    │
//! └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use homelab_console::download::{DownloadEntry, DownloadKind, DownloadStore};
//! use homelab_console::paths::DataRoot;
//!
//! # fn example() -> Result<(), homelab_console::download::StoreError> {
//! let store = DownloadStore::new("downloads.json", DataRoot::default());
//!
//! let entry = store.add(DownloadEntry::new(DownloadKind::docker("nginx")))?;
//! store.move_by_id(&entry.id, 0)?;
//!
//! for download in store.list() {
//!     println!("{} {}", download.id, download.download_type());
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod state;
pub mod store;
pub mod types;

// Re-export commonly used items
pub use error::{DocumentError, LockError, StoreError};
pub use state::{DocumentFile, Revision, LOCK_TIMEOUT};
pub use store::{DownloadStore, Snapshot};
pub use types::{
    is_valid_image_name, DownloadEntry, DownloadKind, DownloadType, DownloadsDocument, EntryId,
    Field, DEFAULT_NAMESPACE,
};

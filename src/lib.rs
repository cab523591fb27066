// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! homelab-console - Admin console core for a self-hosted homelab
//!
//! Manages the list of scheduled downloads that the homelab downloader
//! consumes, and lets an admin browse the downloader and nginx logs.
//!
//! # Core Modules
//!
//! - [`download`] - Downloads document: entry types, validation, and the store
//! - [`paths`] - Destination path validation, cleaning, and data root mapping
//! - [`config`] - `config.json` loading
//! - [`logs`] - Log directory listing and reading
//! - [`locks`] - Poison-tolerant mutex helpers
//! - [`error`] - Consistent error formatting utilities

pub mod config;
pub mod download;
pub mod error;
pub mod locks;
pub mod logs;
pub mod paths;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use download::{
    DownloadEntry, DownloadKind, DownloadStore, DownloadType, DownloadsDocument, EntryId, Field,
    StoreError,
};
pub use error::{format_error, store_error_report, ErrorBuilder};
pub use logs::{list_logs, read_log, LogError, LogFile, LogSource};
pub use paths::{clean_path, is_valid_path, validation_error, DataRoot, PathError};

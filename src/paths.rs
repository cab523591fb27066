// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Destination path sanitizing for download entries.
//!
//! Two rule sets live here:
//!
//! - [`clean_path`] is permissive. It strips whatever it can and never fails,
//!   so it suits live input feedback.
//! - [`is_valid_path`] / [`validation_error`] are strict. The download store
//!   applies them right before persisting, whatever cleaning already happened.
//!
//! Stored paths carry the data-root prefix (see [`DataRoot`]), display paths
//! do not.
//!
//! # Example
//!
//! ```
//! use homelab_console::paths::{clean_path, is_valid_path, DataRoot};
//!
//! assert_eq!(clean_path("../files//os/"), "files/os/");
//! assert!(is_valid_path("files/os/"));
//!
//! let root = DataRoot::default();
//! assert_eq!(root.denormalize("files/os"), "../../data/files/os");
//! assert_eq!(root.normalize("../../data/files/os"), "files/os");
//! ```

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Prefix the downloader expects in front of every stored destination.
pub const DEFAULT_DATA_ROOT: &str = "../../data/";

/// Sequences that reference a parent or current directory.
const TRAVERSAL_PATTERNS: [&str; 4] = ["../", "./", "..\\", ".\\"];

static DISALLOWED_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9/_-]").expect("disallowed chars regex"));

static SLASH_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/{2,}").expect("slash runs regex"));

/// Why a destination path was rejected.
///
/// Variants are listed in the order they are checked; the first match wins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Path is required")]
    Empty,

    #[error("Path cannot contain directory traversal patterns (../ or ./)")]
    Traversal,

    #[error("Path cannot be absolute (cannot start with / or \\)")]
    Absolute,

    #[error("Path cannot contain consecutive slashes")]
    ConsecutiveSlashes,

    #[error(
        "Path contains invalid character '{0}'. Only letters, numbers, hyphens, \
         underscores, and forward slashes are allowed"
    )]
    InvalidCharacter(char),

    #[error("Path cannot contain backslashes")]
    Backslash,
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-')
}

/// Check a display path and return the first rule it breaks.
///
/// A single trailing `/` is allowed and marks a directory.
pub fn validation_error(path: &str) -> Option<PathError> {
    if path.is_empty() {
        return Some(PathError::Empty);
    }

    if TRAVERSAL_PATTERNS.iter().any(|pattern| path.contains(pattern)) {
        return Some(PathError::Traversal);
    }

    if path.starts_with(['/', '\\']) {
        return Some(PathError::Absolute);
    }

    if path.contains("//") {
        return Some(PathError::ConsecutiveSlashes);
    }

    // Backslashes get their own message below.
    if let Some(c) = path.chars().find(|&c| c != '\\' && !is_allowed_char(c)) {
        return Some(PathError::InvalidCharacter(c));
    }

    if path.contains('\\') {
        return Some(PathError::Backslash);
    }

    None
}

/// Returns true if `path` passes every rule of [`validation_error`].
pub fn is_valid_path(path: &str) -> bool {
    validation_error(path).is_none()
}

/// Best-effort cleanup of interactive input.
///
/// Strips traversal sequences, every character outside `[A-Za-z0-9/_-]` and
/// leading separators, and collapses runs of `/`. A trailing separator
/// survives as exactly one `/`. The result may be empty, and it is not a
/// substitute for [`validation_error`].
pub fn clean_path(path: &str) -> String {
    let mut cleaned = path.to_owned();

    // Removing one sequence can expose another ("..././" -> "../").
    loop {
        let before = cleaned.len();
        for pattern in TRAVERSAL_PATTERNS {
            cleaned = cleaned.replace(pattern, "");
        }
        if cleaned.len() == before {
            break;
        }
    }

    let cleaned = DISALLOWED_CHARS.replace_all(&cleaned, "");
    let cleaned = SLASH_RUNS.replace_all(&cleaned, "/");
    cleaned.trim_start_matches('/').to_owned()
}

/// The prefix that separates stored destinations from display destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRoot {
    prefix: String,
}

impl DataRoot {
    /// Create a data root; the prefix is stored with exactly one trailing `/`.
    /// An empty prefix makes normalize/denormalize the identity.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let trimmed = prefix.trim_end_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{}/", trimmed)
        };
        Self { prefix }
    }

    /// The prefix, including its trailing `/`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Strip the prefix for presentation. Paths without it come back as-is.
    pub fn normalize(&self, stored: &str) -> String {
        stored
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(stored)
            .to_owned()
    }

    /// Prepend the prefix unless it is already there. Empty input stays empty.
    pub fn denormalize(&self, display: &str) -> String {
        if display.is_empty() || display.starts_with(self.prefix.as_str()) {
            display.to_owned()
        } else {
            format!("{}{}", self.prefix, display)
        }
    }
}

impl Default for DataRoot {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_ROOT)
    }
}

// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Consistent error formatting for the console.
//!
//! Turns store failures into reports with possible causes and suggested
//! fixes, for printing by the CLI.

use std::fmt;

use crate::download::{LockError, StoreError};

/// Formats an error message with title, causes, and fixes.
///
/// # Example
///
/// ```
/// use homelab_console::error::format_error;
///
/// let error = format_error(
///     "Downloads configuration is unavailable",
///     &["The file does not exist yet"],
///     &["Create it: echo '{\"downloads\":[]}' > downloads.json"],
/// );
/// assert!(error.contains("Possible causes:"));
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = format!("[✗] {}\n", title);

    if !causes.is_empty() {
        output.push_str("\nPossible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
    }

    if !fixes.is_empty() {
        output.push_str("\nTry these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
    }

    output
}

/// Builder for constructing formatted error messages.
#[derive(Debug, Clone)]
pub struct ErrorBuilder {
    title: String,
    causes: Vec<String>,
    fixes: Vec<String>,
}

impl ErrorBuilder {
    /// Create a new error builder with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            causes: Vec::new(),
            fixes: Vec::new(),
        }
    }

    /// Add a possible cause.
    pub fn cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    /// Add a suggested fix.
    pub fn fix(mut self, fix: impl Into<String>) -> Self {
        self.fixes.push(fix.into());
        self
    }

    /// Build the formatted error message.
    pub fn build(self) -> String {
        let causes: Vec<&str> = self.causes.iter().map(|s| s.as_str()).collect();
        let fixes: Vec<&str> = self.fixes.iter().map(|s| s.as_str()).collect();
        format_error(&self.title, &causes, &fixes)
    }
}

impl fmt::Display for ErrorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clone().build())
    }
}

/// Report for a failed store operation.
pub fn store_error_report(error: &StoreError) -> String {
    let builder = ErrorBuilder::new(capitalize(&error.to_string()));
    let builder = match error {
        StoreError::ConfigUnavailable(source) => builder
            .cause(source.to_string())
            .cause("The file is missing, unreadable, or not valid JSON")
            .fix("Check `downloadsConfigPath` in config.json")
            .fix("Create an empty document: {\"downloads\": []}"),
        StoreError::InvalidPath(_) => builder
            .fix("Use letters, numbers, '-', '_' and single '/' separators")
            .fix("Give the path relative to the data root, e.g. files/os/"),
        StoreError::InvalidPattern { source, .. } => builder.cause(source.to_string()),
        StoreError::InvalidImageName(_) => builder
            .fix("Leave the tag off the image name, e.g. nginx instead of nginx:latest"),
        StoreError::MissingField(field) => {
            builder.fix(format!("Provide a value for `{}`", field))
        }
        StoreError::IndexOutOfRange { .. } | StoreError::UnknownEntry(_) => builder
            .cause("The list changed since it was displayed")
            .fix("List downloads again and retry with the current position or id"),
        StoreError::ConcurrentModification => builder
            .cause("Another admin or the downloader rewrote the file at the same time")
            .fix("Retry; the store re-reads the document on every operation"),
        StoreError::Locked(LockError::Timeout(_)) => builder
            .cause("Another writer is holding the lock")
            .fix("Wait and retry, or raise `lockTimeoutMs` in config.json"),
        StoreError::Locked(source) => builder
            .cause(source.to_string())
            .fix("Make sure the directory of the downloads document is writable"),
        StoreError::PersistFailure(source) => builder
            .cause(source.to_string())
            .cause("Disk full or permission denied")
            .fix("List downloads to see the current state before retrying"),
    };
    builder.build()
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::Field;

    #[test]
    fn test_format_error() {
        let error = format_error("Test Error", &["Cause 1", "Cause 2"], &["Fix 1", "Fix 2"]);

        assert!(error.contains("[✗] Test Error"));
        assert!(error.contains("Possible causes:"));
        assert!(error.contains("  - Cause 1"));
        assert!(error.contains("  - Cause 2"));
        assert!(error.contains("Try these fixes:"));
        assert!(error.contains("  1. Fix 1"));
        assert!(error.contains("  2. Fix 2"));
    }

    #[test]
    fn test_empty_causes_and_fixes() {
        let error = format_error("Empty test", &[], &[]);
        assert_eq!(error, "[✗] Empty test\n");
    }

    #[test]
    fn test_error_builder_display() {
        let builder = ErrorBuilder::new("Display test").cause("Cause").fix("Fix");
        let error = format!("{}", builder);
        assert!(error.contains("[✗] Display test"));
        assert!(error.contains("  1. Fix"));
    }

    #[test]
    fn test_store_error_report() {
        let report = store_error_report(&StoreError::MissingField(Field::Url));
        assert!(report.starts_with("[✗] Url is required"));
        assert!(report.contains("Provide a value for `url`"));

        let report = store_error_report(&StoreError::IndexOutOfRange { index: 9, len: 1 });
        assert!(report.contains("List downloads again"));
    }
}

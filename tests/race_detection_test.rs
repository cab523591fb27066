// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Race Detection Tests for the download store
//!
//! These tests verify that concurrent writers never lose an update and never
//! leave a partially written document behind. They are designed to detect
//! data races when run with ThreadSanitizer (TSAN).
//!
//! # Running with ThreadSanitizer
//!
//! ```bash
//! # On Linux with nightly Rust:
//! RUSTFLAGS="-Z sanitizer=thread" cargo +nightly test --target x86_64-unknown-linux-gnu --test race_detection_test
//! ```
//!
//! # Test Categories
//!
//! - Concurrent adds through one shared store
//! - Concurrent adds through independent stores on the same file
//! - Readers racing writers

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use homelab_console::download::{DownloadEntry, DownloadKind, DownloadStore, DownloadsDocument};
use homelab_console::paths::DataRoot;
use tempfile::TempDir;

// Test configuration
const CONCURRENCY_LEVEL: usize = 8;
const ITERATIONS_PER_TASK: usize = 10;
const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

fn document_in(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("downloads.json");
    fs::write(&path, r#"{"downloads":[]}"#).expect("write document");
    path
}

fn open_store(path: &Path) -> DownloadStore {
    DownloadStore::new(path, DataRoot::default()).with_lock_timeout(LOCK_TIMEOUT)
}

fn image_name(task: usize, iteration: usize) -> String {
    format!("image-{}-{}", task, iteration)
}

fn assert_all_present(path: &Path) {
    let content = fs::read_to_string(path).expect("read document");
    let document = DownloadsDocument::from_json(&content).expect("document is valid JSON");
    assert_eq!(document.len(), CONCURRENCY_LEVEL * ITERATIONS_PER_TASK);

    let images: HashSet<String> = document
        .downloads
        .iter()
        .filter_map(|entry| match &entry.kind {
            DownloadKind::Docker { image, .. } => Some(image.clone()),
            _ => None,
        })
        .collect();
    for task in 0..CONCURRENCY_LEVEL {
        for iteration in 0..ITERATIONS_PER_TASK {
            assert!(images.contains(&image_name(task, iteration)), "lost update");
        }
    }

    let ids: HashSet<_> = document.downloads.iter().map(|entry| &entry.id).collect();
    assert_eq!(ids.len(), document.len(), "ids must be unique");
}

// =============================================================================
// SHARED STORE
// =============================================================================

#[test]
fn test_concurrent_adds_shared_store() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = document_in(&dir);
    let store = Arc::new(open_store(&path));

    let handles: Vec<_> = (0..CONCURRENCY_LEVEL)
        .map(|task| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for iteration in 0..ITERATIONS_PER_TASK {
                    store
                        .add(DownloadEntry::new(DownloadKind::docker(image_name(task, iteration))))
                        .expect("add");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer panicked");
    }

    assert_all_present(&path);
}

// =============================================================================
// INDEPENDENT STORES (stand-in for separate processes)
// =============================================================================

#[test]
fn test_concurrent_adds_independent_stores() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = document_in(&dir);

    let handles: Vec<_> = (0..CONCURRENCY_LEVEL)
        .map(|task| {
            let store = open_store(&path);
            thread::spawn(move || {
                for iteration in 0..ITERATIONS_PER_TASK {
                    store
                        .add(DownloadEntry::new(DownloadKind::docker(image_name(task, iteration))))
                        .expect("add");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer panicked");
    }

    assert_all_present(&path);
}

// =============================================================================
// READERS VS WRITERS
// =============================================================================

#[test]
fn test_readers_never_see_partial_document() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = document_in(&dir);
    let writer = open_store(&path);
    let done = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            let done = Arc::clone(&done);
            let reads = Arc::clone(&reads);
            thread::spawn(move || {
                let store = open_store(&path);
                let mut last = 0;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let snapshot = store.snapshot().expect("document stays readable");
                    // Only appends happen, so the count never goes down.
                    assert!(snapshot.entries.len() >= last);
                    last = snapshot.entries.len();
                    reads.fetch_add(1, Ordering::Relaxed);
                    if finished {
                        break;
                    }
                }
            })
        })
        .collect();

    for iteration in 0..CONCURRENCY_LEVEL * ITERATIONS_PER_TASK {
        writer
            .add(DownloadEntry::new(DownloadKind::docker(image_name(0, iteration))))
            .expect("add");
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.join().expect("reader panicked");
    }

    assert!(reads.load(Ordering::Relaxed) > 0);
    assert_eq!(writer.list().len(), CONCURRENCY_LEVEL * ITERATIONS_PER_TASK);
}

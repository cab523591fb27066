// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Poison-tolerant lock helpers.
//!
//! A panic while a writer holds the store mutex poisons it. The guarded data
//! is `()`, and the document on disk is only ever replaced by an atomic
//! rename, so there is nothing in memory to corrupt: we log and carry on.

use std::sync::{Mutex, MutexGuard, TryLockError};

/// Acquire a mutex, recovering from poisoning if necessary.
#[inline]
pub fn resilient_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(
                target: "homelab::locks",
                event = "LOCK_POISONED",
                "mutex was poisoned by a panicking writer, recovering"
            );
            poisoned.into_inner()
        }
    }
}

/// Try to acquire a mutex without blocking.
///
/// Returns `None` if it would block. Recovers from poisoning.
#[inline]
pub fn try_resilient_lock<T>(lock: &Mutex<T>) -> Option<MutexGuard<'_, T>> {
    match lock.try_lock() {
        Ok(guard) => Some(guard),
        Err(TryLockError::Poisoned(poisoned)) => {
            tracing::warn!(
                target: "homelab::locks",
                event = "LOCK_POISONED_TRY",
                "mutex was poisoned by a panicking writer, recovering"
            );
            Some(poisoned.into_inner())
        }
        Err(TryLockError::WouldBlock) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_resilient_lock_normal() {
        let lock = Mutex::new(42);
        {
            let mut guard = resilient_lock(&lock);
            *guard = 100;
        }
        assert_eq!(*resilient_lock(&lock), 100);
    }

    #[test]
    fn test_resilient_lock_poisoned() {
        let lock = Arc::new(Mutex::new(42));
        let lock_clone = Arc::clone(&lock);

        // Poison the lock by panicking while holding it
        let handle = thread::spawn(move || {
            let _guard = lock_clone.lock().unwrap();
            panic!("intentional panic to poison lock");
        });
        let _ = handle.join();

        assert!(lock.is_poisoned());
        let mut guard = resilient_lock(&lock);
        *guard = 7;
        drop(guard);
        assert_eq!(*resilient_lock(&lock), 7);
    }

    #[test]
    fn test_try_resilient_lock() {
        let lock = Mutex::new(());
        let held = try_resilient_lock(&lock);
        assert!(held.is_some());
        assert!(try_resilient_lock(&lock).is_none());
        drop(held);
        assert!(try_resilient_lock(&lock).is_some());
    }
}

// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage backends that fail or stall on demand.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use ferry_core::{KeyValueStore, SyncError};

/// A [`KeyValueStore`] that serves the first `healthy_ops` operations from
/// memory and fails every operation after that.
#[derive(Debug, Default)]
pub struct FailingStore {
    healthy_ops: usize,
    ops: AtomicUsize,
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl FailingStore {
    /// Every operation fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `healthy_ops` operations succeed.
    pub fn failing_after(healthy_ops: usize) -> Self {
        Self {
            healthy_ops,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, SyncError> {
        if self.ops.fetch_add(1, Ordering::SeqCst) >= self.healthy_ops {
            return Err(SyncError::Storage {
                source: "simulated storage failure".into(),
            });
        }
        Ok(self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        Ok(self.check()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), SyncError> {
        self.check()?.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.check()?.remove(key);
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<(), SyncError> {
        let mut entries = self.check()?;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        Ok(self
            .check()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// A [`KeyValueStore`] whose `set` sleeps for `delay` before writing.
///
/// Other operations complete immediately, so a write started before a
/// `remove` can land after it.
#[derive(Debug, Default)]
pub struct SlowStore {
    delay: Duration,
    writes_in_progress: AtomicUsize,
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Number of `set` calls currently sleeping.
    pub fn writes_in_progress(&self) -> usize {
        self.writes_in_progress.load(Ordering::SeqCst)
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueStore for SlowStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), SyncError> {
        self.writes_in_progress.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.entries().insert(key.to_string(), value);
        self.writes_in_progress.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.entries().remove(key);
        Ok(())
    }

    async fn remove_many(&self, keys: &[String]) -> Result<(), SyncError> {
        let mut entries = self.entries();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        Ok(self
            .entries()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Namespaced persistence over a [`KeyValueStore`] backend.
//!
//! Backend failures never reach callers: the first failure is logged, the
//! store switches to memory-only operation for the rest of the session, and
//! the failing call is replayed against memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use ferry_core::{KeyValueStore, SyncError};

use crate::memory::MemoryStore;

/// The durable key/value primitive shared by queue, credentials and cache.
pub struct PersistentStore {
    backend: Arc<dyn KeyValueStore>,
    fallback: MemoryStore,
    degraded: AtomicBool,
}

impl PersistentStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            fallback: MemoryStore::new(),
            degraded: AtomicBool::new(false),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Arc<Self> {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Whether a backend failure has switched this store to memory-only mode.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Key-prefixed view of this store. Components own disjoint namespaces.
    pub fn namespace(self: &Arc<Self>, name: &str) -> Namespace {
        Namespace {
            store: Arc::clone(self),
            prefix: format!("{name}:"),
        }
    }

    fn degrade(&self, op: &str, key: &str, err: &SyncError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(
                op,
                key,
                error = %err,
                "storage backend failed, continuing in memory-only mode for this session"
            );
        }
    }

    fn active(&self) -> &dyn KeyValueStore {
        if self.is_degraded() {
            &self.fallback
        } else {
            self.backend.as_ref()
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.active().get(key).await {
            Ok(value) => value,
            Err(e) => {
                self.degrade("get", key, &e);
                self.fallback.get(key).await.ok().flatten()
            }
        }
    }

    pub async fn set(&self, key: &str, value: Vec<u8>) {
        if self.is_degraded() {
            let _ = self.fallback.set(key, value).await;
            return;
        }
        if let Err(e) = self.backend.set(key, value.clone()).await {
            self.degrade("set", key, &e);
            let _ = self.fallback.set(key, value).await;
        }
    }

    pub async fn remove(&self, key: &str) {
        if let Err(e) = self.active().remove(key).await {
            self.degrade("remove", key, &e);
            let _ = self.fallback.remove(key).await;
        }
    }

    pub async fn remove_many(&self, keys: &[String]) {
        if let Err(e) = self.active().remove_many(keys).await {
            self.degrade("remove_many", &keys.join(","), &e);
            let _ = self.fallback.remove_many(keys).await;
        }
    }

    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        match self.active().keys_with_prefix(prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                self.degrade("keys_with_prefix", prefix, &e);
                self.fallback
                    .keys_with_prefix(prefix)
                    .await
                    .unwrap_or_default()
            }
        }
    }
}

/// A key-prefixed view of a [`PersistentStore`].
#[derive(Clone)]
pub struct Namespace {
    store: Arc<PersistentStore>,
    prefix: String,
}

impl Namespace {
    /// Full backend key for `key` in this namespace.
    pub fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub fn name(&self) -> &str {
        self.prefix.trim_end_matches(':')
    }

    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    pub async fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.store.get(&self.key(key)).await
    }

    pub async fn set_raw(&self, key: &str, value: Vec<u8>) {
        self.store.set(&self.key(key), value).await;
    }

    /// Reads and decodes a JSON value. Undecodable bytes are a storage error.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SyncError> {
        match self.get_raw(key).await {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(SyncError::storage),
            None => Ok(None),
        }
    }

    /// Encodes `value` as JSON and writes it with a single `set`.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), SyncError> {
        let bytes = serde_json::to_vec(value).map_err(SyncError::storage)?;
        debug!(key = %self.key(key), bytes = bytes.len(), "persisting");
        self.set_raw(key, bytes).await;
        Ok(())
    }

    pub async fn remove(&self, key: &str) {
        self.store.remove(&self.key(key)).await;
    }

    /// Keys in this namespace, without the namespace prefix.
    pub async fn keys(&self) -> Vec<String> {
        self.store
            .keys_with_prefix(&self.prefix)
            .await
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect()
    }

    /// Removes every key in this namespace.
    pub async fn clear(&self) {
        let keys = self.store.keys_with_prefix(&self.prefix).await;
        self.store.remove_many(&keys).await;
    }
}

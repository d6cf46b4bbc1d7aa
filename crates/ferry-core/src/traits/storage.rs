// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable key/value storage collaborator.

use async_trait::async_trait;

use crate::error::SyncError;

/// Byte-oriented durable key/value store.
///
/// Each `set` must be atomic with respect to a `get` of the same key.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Returns the stored bytes, or `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), SyncError>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), SyncError>;

    /// Removes every key in `keys`.
    async fn remove_many(&self, keys: &[String]) -> Result<(), SyncError>;

    /// Lists keys beginning with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, SyncError>;
}

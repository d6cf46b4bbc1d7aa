// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the KeyValueStore trait.

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use ferry_core::{KeyValueStore, SyncError};

use crate::database::{map_tr_err, Database};

/// Key/value store backed by the `kv` table.
///
/// Every `set` is a single-row upsert, so it is atomic with respect to reads
/// of the same key.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open the database at `path` and wrap it.
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self, SyncError> {
        Ok(Self::new(Database::open(path).await?))
    }

    pub async fn open_in_memory() -> Result<Self, SyncError> {
        Ok(Self::new(Database::open_in_memory().await?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SyncError> {
        let key = key.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<Option<Vec<u8>>, rusqlite::Error> {
                conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), SyncError> {
        let key = key.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                    params![key, value],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        let key = key.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn remove_many(&self, keys: &[String]) -> Result<(), SyncError> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys = keys.to_vec();
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare("DELETE FROM kv WHERE key = ?1")?;
                    for key in &keys {
                        stmt.execute(params![key])?;
                    }
                }
                tx.commit()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        let prefix = prefix.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<String>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
                )?;
                let rows = stmt.query_map(params![prefix], |row| row.get(0))?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)
    }
}

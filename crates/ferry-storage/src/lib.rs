// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence layer for the Ferry sync layer.
//!
//! Provides the [`KeyValueStore`](ferry_core::KeyValueStore) backends (SQLite
//! via `tokio-rusqlite` with embedded migrations, and in-memory), the
//! namespaced [`PersistentStore`] that degrades to memory on backend failure,
//! and the crash-safe [`PersistentQueue`].

pub mod database;
pub mod memory;
pub mod migrations;
pub mod persistent;
pub mod queue;
pub mod sqlite;

pub use database::Database;
pub use memory::MemoryStore;
pub use persistent::{Namespace, PersistentStore};
pub use queue::{PersistentQueue, QueueLoss};
pub use sqlite::SqliteStore;

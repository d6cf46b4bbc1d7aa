// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local materialized view of server entities.
//!
//! Optimistic writes and server push events land in the same per-entity
//! ordered record list. Correlation ids tie the two together so an echoed
//! write replaces its pending record instead of duplicating it.

pub mod cache;
pub mod record;

pub use cache::{CacheChange, ReconciliationCache, Resolution, UnconfirmedRecord};
pub use record::{CacheRecord, PushEvent, RecordStatus};

// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Explicit service lifecycle.

use async_trait::async_trait;

use crate::error::SyncError;

/// A service object with explicit start-up and teardown.
///
/// After `dispose` returns, the service owns no running task, timer, or
/// listener.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn initialize(&self) -> Result<(), SyncError>;

    async fn dispose(&self);
}

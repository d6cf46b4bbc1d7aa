// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution of queued actions.

use async_trait::async_trait;

use crate::error::SyncError;
use crate::types::{HttpResponse, QueuedAction};

/// Performs one queued mutation against the server.
///
/// Returns the successful response, or a classified error.
#[async_trait]
pub trait ActionExecutor: Send + Sync + 'static {
    async fn execute(&self, action: &QueuedAction) -> Result<HttpResponse, SyncError>;
}

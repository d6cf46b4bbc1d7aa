// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request-function collaborator.

use async_trait::async_trait;

use crate::error::SyncError;
use crate::types::{HttpRequest, HttpResponse};

/// Sends one HTTP request.
///
/// Implementations return `Ok` for every response the server produced,
/// whatever its status; classification is the caller's job. Transport-level
/// failures (connect, DNS, timeout) are returned as transient errors.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SyncError>;
}

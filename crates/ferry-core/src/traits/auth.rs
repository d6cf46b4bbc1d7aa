// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credential refresh endpoint collaborator.

use async_trait::async_trait;

use crate::error::SyncError;
use crate::types::Credential;

/// Exchanges a refresh token for a new credential.
#[async_trait]
pub trait RefreshApi: Send + Sync + 'static {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, SyncError>;
}

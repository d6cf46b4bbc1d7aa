// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authentication for the Ferry sync layer.
//!
//! - [`CredentialRefresher`] owns the credential and coalesces concurrent
//!   refreshes into a single call.
//! - [`AuthorizedClient`] attaches the credential to requests and performs the
//!   one refresh-and-retry cycle on 401.
//! - [`HttpRefreshApi`] is the production refresh endpoint client.

pub mod client;
pub mod refresh_api;
pub mod refresher;

pub use client::AuthorizedClient;
pub use refresh_api::HttpRefreshApi;
pub use refresher::{CredentialRefresher, SessionEvent};

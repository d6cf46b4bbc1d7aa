// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator and service traits.
//!
//! Collaborators (storage, request function, event transport, connectivity
//! observer, refresh endpoint) are consumed by Ferry components through these
//! traits. All async traits use `#[async_trait]` for dynamic dispatch.

pub mod auth;
pub mod connectivity;
pub mod executor;
pub mod http;
pub mod lifecycle;
pub mod storage;
pub mod transport;

pub use auth::RefreshApi;
pub use connectivity::ConnectivitySource;
pub use executor::ActionExecutor;
pub use http::HttpTransport;
pub use lifecycle::Lifecycle;
pub use storage::KeyValueStore;
pub use transport::{ConnectOptions, EventTransport, TransportEvent};

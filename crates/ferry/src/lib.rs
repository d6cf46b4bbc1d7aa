// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ferry keeps a mobile client working through intermittent connectivity.
//!
//! Mutations made offline are queued durably and drained in order once the
//! network returns. Expiring credentials are refreshed once no matter how many
//! requests notice. A local cache merges optimistic writes with server-pushed
//! events so the UI never shows the same record twice.
//!
//! ```no_run
//! # async fn run(connectivity: std::sync::Arc<dyn ferry::ConnectivitySource>) -> Result<(), ferry::SyncError> {
//! use ferry::{Collaborators, FerryConfig, Lifecycle, SyncClient};
//!
//! let config = FerryConfig::default();
//! let collaborators = Collaborators::from_config(&config, connectivity).await?;
//! let client = SyncClient::new(&config, collaborators).await?;
//! client.initialize().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod collaborators;

pub use client::SyncClient;
pub use collaborators::Collaborators;

pub use ferry_auth::SessionEvent;
pub use ferry_cache::{CacheChange, CacheRecord, RecordStatus, Resolution, UnconfirmedRecord};
pub use ferry_channel::ChannelState;
pub use ferry_config::FerryConfig;
pub use ferry_core::{
    ConnectivitySource, CorrelationId, Credential, EnqueueReceipt, EntityId, ErrorInfo, ErrorKind,
    HttpMethod, Lifecycle, NewAction, QueueStatus, SubscriptionHandle, SyncError,
};
pub use ferry_queue::{FailureReason, QueueEvent};

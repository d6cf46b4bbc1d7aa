// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Ferry offline-first sync layer.
//!
//! This crate provides the error taxonomy, the shared data model, the traits
//! through which Ferry consumes its external collaborators, and the listener
//! registry every component uses to publish events.

pub mod backoff;
pub mod error;
pub mod listener;
pub mod traits;
pub mod types;

pub use backoff::backoff_delay;
pub use error::{ErrorInfo, ErrorKind, SyncError};
pub use listener::{Listeners, SubscriptionHandle};
pub use types::{
    ActionId, CorrelationId, Credential, EnqueueReceipt, EntityId, HttpMethod, HttpRequest,
    HttpResponse, NewAction, OptimisticWrite, ProcessorState, QueueStatus, QueuedAction,
};

pub use traits::{
    ActionExecutor, ConnectOptions, ConnectivitySource, EventTransport, HttpTransport,
    KeyValueStore, Lifecycle, RefreshApi, TransportEvent,
};

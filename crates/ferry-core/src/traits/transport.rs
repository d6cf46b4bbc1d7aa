// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bidirectional event transport collaborator.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::SyncError;

/// Something the transport observed on an open connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A named server event, in arrival order.
    Message { event: String, payload: Value },
    /// The connection ended. No further events follow on this receiver.
    Closed { reason: String },
}

/// Options for opening a transport connection.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Bearer token presented during the handshake.
    pub access_token: Option<String>,
    pub headers: Vec<(String, String)>,
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            access_token: None,
            headers: Vec::new(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// A long-lived bidirectional event connection.
///
/// `connect` returns the receiving half of the connection; the receiver ends
/// (or yields [`TransportEvent::Closed`]) when the connection drops.
#[async_trait]
pub trait EventTransport: Send + Sync + 'static {
    async fn connect(
        &self,
        url: &str,
        options: &ConnectOptions,
    ) -> Result<mpsc::Receiver<TransportEvent>, SyncError>;

    /// Sends one event on the current connection.
    async fn emit(&self, event: &str, payload: Value) -> Result<(), SyncError>;

    /// Closes the current connection, if any.
    async fn disconnect(&self);
}

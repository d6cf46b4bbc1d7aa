// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connectivity observer collaborator.

use tokio::sync::mpsc;

/// Platform connectivity observer.
///
/// Readings may repeat or flap; debouncing happens in the network monitor.
pub trait ConnectivitySource: Send + Sync + 'static {
    /// The platform's current reading.
    fn current(&self) -> bool;

    /// Stream of raw readings. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<bool>;
}

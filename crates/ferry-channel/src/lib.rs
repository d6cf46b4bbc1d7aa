// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-lived server event channel.
//!
//! [`EventChannel`] keeps one connection open through an [`EventTransport`],
//! reconnecting with capped exponential backoff up to a fixed number of
//! attempts, re-joining topics after every reconnect, and fanning incoming
//! events out to per-event subscribers. [`WsTransport`] is the WebSocket
//! implementation of the transport.
//!
//! [`EventTransport`]: ferry_core::EventTransport

pub mod channel;
pub mod ws;

pub use channel::{ChannelSettings, ChannelState, EventChannel};
pub use ws::WsTransport;

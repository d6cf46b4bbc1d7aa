// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Offline queue draining for the Ferry sync layer.
//!
//! The [`QueueProcessor`] executes queued mutations one at a time in FIFO
//! order whenever the network monitor reports connectivity, classifying each
//! failure as transient (retried with capped exponential backoff) or
//! permanent (surfaced immediately). Its states and transitions live in
//! [`state`] as a pure function so they can be tested without timers.

pub mod events;
pub mod processor;
pub mod state;

pub use events::{FailureReason, QueueEvent};
pub use processor::{ProcessorSettings, QueueProcessor};
pub use state::{transition, ProcessorInput};

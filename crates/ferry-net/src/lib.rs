// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Network-facing building blocks for the Ferry sync layer.
//!
//! - [`NetworkMonitor`] turns raw, possibly flapping connectivity readings into
//!   debounced online/offline edges.
//! - [`ReqwestTransport`] is the production request function.

pub mod http;
pub mod monitor;

pub use http::ReqwestTransport;
pub use monitor::NetworkMonitor;

// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Ferry unit and integration tests.
//!
//! Provides scripted, in-process implementations of every collaborator trait
//! so tests run fast and deterministically without servers or sockets.
//!
//! # Components
//!
//! - [`MockHttp`] - Request function with scripted replies and request capture
//! - [`MockExecutor`] - Action executor that records execution order
//! - [`MockConnectivity`] - Connectivity observer driven by the test
//! - [`MockEventTransport`] - Event transport with scripted connects and injected events
//! - [`MockRefreshApi`] - Refresh endpoint that counts calls
//! - [`FailingStore`] - Storage backend that fails on demand
//! - [`SlowStore`] - Storage backend whose writes stall

pub mod mock_connectivity;
pub mod mock_http;
pub mod mock_refresh;
pub mod mock_store;
pub mod mock_transport;

pub use mock_connectivity::MockConnectivity;
pub use mock_http::{ExecutionEvent, MockExecutor, MockHttp, MockReply};
pub use mock_refresh::MockRefreshApi;
pub use mock_store::{FailingStore, SlowStore};
pub use mock_transport::MockEventTransport;

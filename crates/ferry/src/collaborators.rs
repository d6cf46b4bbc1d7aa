// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The external collaborators a [`SyncClient`](crate::SyncClient) runs on.

use std::sync::Arc;

use ferry_auth::HttpRefreshApi;
use ferry_channel::WsTransport;
use ferry_config::FerryConfig;
use ferry_core::{
    ConnectivitySource, EventTransport, HttpTransport, KeyValueStore, RefreshApi, SyncError,
};
use ferry_net::ReqwestTransport;
use ferry_storage::{MemoryStore, SqliteStore};
use tracing::debug;

/// Everything the sync layer consumes from the host application.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn KeyValueStore>,
    pub http: Arc<dyn HttpTransport>,
    pub connectivity: Arc<dyn ConnectivitySource>,
    pub events: Arc<dyn EventTransport>,
    pub refresh: Arc<dyn RefreshApi>,
}

impl Collaborators {
    /// Production collaborators: SQLite (or memory) storage, `reqwest` for
    /// requests and refresh, WebSocket for server events.
    ///
    /// Connectivity is platform specific and always comes from the caller.
    pub async fn from_config(
        config: &FerryConfig,
        connectivity: Arc<dyn ConnectivitySource>,
    ) -> Result<Self, SyncError> {
        let store: Arc<dyn KeyValueStore> = if config.storage.in_memory {
            debug!("using in-memory storage");
            Arc::new(MemoryStore::new())
        } else {
            debug!(path = %config.storage.database_path, "opening sqlite storage");
            Arc::new(SqliteStore::open(&config.storage.database_path).await?)
        };

        let http: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::new(&config.client, &config.network)?);
        let refresh = Arc::new(HttpRefreshApi::new(
            Arc::clone(&http),
            config.auth.refresh_url.clone(),
            config.network.request_timeout(),
        ));

        Ok(Self {
            store,
            http,
            connectivity,
            events: Arc::new(WsTransport::new()),
            refresh,
        })
    }
}

// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Debounced connectivity observer.
//!
//! A raw reading becomes an edge only if it differs from the last published
//! state and stays unchanged for the whole debounce window. Exactly one event
//! is published per edge.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ferry_core::{ConnectivitySource, Lifecycle, Listeners, SubscriptionHandle, SyncError};

struct Shared {
    state: watch::Sender<bool>,
    listeners: Listeners<bool>,
}

impl Shared {
    fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    fn publish(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
            self.listeners.emit(&online);
        }
    }
}

struct Observer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Pure observer of connectivity edges. Holds no retry logic.
pub struct NetworkMonitor {
    source: Arc<dyn ConnectivitySource>,
    debounce: Duration,
    shared: Arc<Shared>,
    observer: Mutex<Option<Observer>>,
}

impl NetworkMonitor {
    pub fn new(source: Arc<dyn ConnectivitySource>, debounce: Duration) -> Self {
        let (state, _) = watch::channel(source.current());
        Self {
            source,
            debounce,
            shared: Arc::new(Shared {
                state,
                listeners: Listeners::new(),
            }),
            observer: Mutex::new(None),
        }
    }

    /// Synchronous snapshot of the last published state.
    pub fn is_online(&self) -> bool {
        self.shared.is_online()
    }

    /// Receiver that observes every published edge.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.shared.state.subscribe()
    }

    /// Registers `callback` for online/offline edges.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(callback)
    }

    /// Publishes `online` immediately, bypassing the debounce window.
    ///
    /// Still a no-op when the state does not change.
    pub fn set_online(&self, online: bool) {
        self.shared.publish(online);
    }

    fn observer(&self) -> std::sync::MutexGuard<'_, Option<Observer>> {
        self.observer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn observe(
    shared: Arc<Shared>,
    debounce: Duration,
    mut readings: mpsc::UnboundedReceiver<bool>,
    cancel: CancellationToken,
) {
    let mut pending: Option<(bool, Instant)> = None;
    loop {
        let deadline = pending.map(|(_, at)| at);
        tokio::select! {
            _ = cancel.cancelled() => break,
            reading = readings.recv() => {
                let Some(online) = reading else {
                    debug!("connectivity source closed");
                    break;
                };
                if online == shared.is_online() {
                    pending = None;
                } else if pending.map(|(p, _)| p) != Some(online) {
                    pending = Some((online, Instant::now() + debounce));
                }
            }
            _ = wait_until(deadline) => {
                if let Some((online, _)) = pending.take() {
                    shared.publish(online);
                }
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Lifecycle for NetworkMonitor {
    /// Seeds the state from the source's current reading and starts observing.
    ///
    /// Seeding is silent; only later edges reach listeners.
    async fn initialize(&self) -> Result<(), SyncError> {
        let mut slot = self.observer();
        if slot.is_some() {
            return Ok(());
        }
        let current = self.source.current();
        self.shared.state.send_replace(current);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(observe(
            Arc::clone(&self.shared),
            self.debounce,
            self.source.subscribe(),
            cancel.clone(),
        ));
        *slot = Some(Observer { cancel, handle });
        debug!(online = current, debounce_ms = self.debounce.as_millis() as u64, "network monitor started");
        Ok(())
    }

    async fn dispose(&self) {
        let observer = self.observer().take();
        if let Some(observer) = observer {
            observer.cancel.cancel();
            let _ = observer.handle.await;
        }
        self.shared.listeners.clear();
    }
}

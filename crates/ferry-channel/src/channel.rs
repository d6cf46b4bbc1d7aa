// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconnecting event channel.
//!
//! A supervisor task owns the connection: it connects, dispatches incoming
//! events until the connection closes, then reconnects after
//! `min(base * 2^(attempt-1), max)`. A successful connection resets the
//! attempt counter. After `max_reconnects` failed attempts in a row the
//! channel enters [`ChannelState::Failed`] and stops.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ferry_config::ChannelConfig;
use ferry_core::{
    backoff_delay, ConnectOptions, EventTransport, Lifecycle, Listeners, SubscriptionHandle,
    SyncError, TransportEvent,
};

/// Outbound frame that subscribes the connection to a topic.
pub const JOIN_EVENT: &str = "join";
/// Outbound frame that unsubscribes the connection from a topic.
pub const LEAVE_EVENT: &str = "leave";

/// Connection state of an [`EventChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case", tag = "state")]
#[strum(serialize_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting for or performing reconnect attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// Gave up after `attempts` reconnects. `connect()` starts a fresh cycle.
    Failed { attempts: u32 },
    Disposed,
}

impl ChannelState {
    fn is_active(self) -> bool {
        matches!(
            self,
            ChannelState::Connecting | ChannelState::Connected | ChannelState::Reconnecting { .. }
        )
    }
}

/// Connection and reconnect policy of an [`EventChannel`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    pub url: String,
    pub max_reconnects: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Topics joined on every connection, in addition to runtime joins.
    pub topics: Vec<String>,
    pub connect_timeout: Duration,
}

impl ChannelSettings {
    pub fn new(url: impl Into<String>) -> Self {
        let defaults = ChannelConfig::default();
        Self {
            url: url.into(),
            max_reconnects: defaults.max_reconnects,
            base_delay: defaults.base_delay(),
            max_delay: defaults.max_delay(),
            topics: Vec::new(),
            connect_timeout: ConnectOptions::default().connect_timeout,
        }
    }

    /// Settings for `config`, or `None` when no channel URL is configured.
    pub fn from_config(config: &ChannelConfig) -> Option<Self> {
        let url = config.url.as_ref()?;
        Some(Self {
            max_reconnects: config.max_reconnects,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            topics: config.topics.clone(),
            ..Self::new(url.clone())
        })
    }
}

type Handlers = HashMap<String, Arc<Listeners<Value>>>;

struct Inner {
    transport: Arc<dyn EventTransport>,
    settings: ChannelSettings,
    state: Mutex<ChannelState>,
    topics: Mutex<BTreeSet<String>>,
    access_token: Mutex<Option<String>>,
    handlers: Mutex<Handlers>,
    states: Listeners<ChannelState>,
}

impl Inner {
    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ChannelState) {
        let changed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == next || *state == ChannelState::Disposed {
                false
            } else {
                *state = next;
                true
            }
        };
        if changed {
            debug!(state = %next, "event channel state changed");
            self.states.emit(&next);
        }
    }

    fn topics(&self) -> Vec<String> {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            access_token: self
                .access_token
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            headers: Vec::new(),
            connect_timeout: self.settings.connect_timeout,
        }
    }

    fn handlers(&self) -> std::sync::MutexGuard<'_, Handlers> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prune_handlers(&self, event: &str, listeners: &Arc<Listeners<Value>>) {
        let mut handlers = self.handlers();
        let unused = handlers
            .get(event)
            .is_some_and(|current| Arc::ptr_eq(current, listeners) && current.is_empty());
        if unused {
            handlers.remove(event);
        }
    }

    fn dispatch(&self, event: &str, payload: &Value) {
        let listeners = self.handlers().get(event).cloned();
        match listeners {
            Some(listeners) => listeners.emit(payload),
            None => debug!(event, "no subscribers for event"),
        }
    }

    async fn join_all(&self) {
        for topic in self.topics() {
            if let Err(e) = self.transport.emit(JOIN_EVENT, json!({ "topic": topic })).await {
                warn!(topic = %topic, error = %e, "failed to join topic");
            }
        }
    }

    fn disconnected_error(&self) -> SyncError {
        let attempts = match self.state() {
            ChannelState::Reconnecting { attempt } => attempt,
            ChannelState::Failed { attempts } => attempts,
            _ => 0,
        };
        SyncError::ChannelDisconnected { attempts }
    }
}

/// Reads one connection until it closes. Returns `None` when cancelled.
async fn pump(
    inner: &Inner,
    mut events: mpsc::Receiver<TransportEvent>,
    cancel: &CancellationToken,
) -> Option<String> {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return None,
            next = events.recv() => next,
        };
        match next {
            Some(TransportEvent::Message { event, payload }) => inner.dispatch(&event, &payload),
            Some(TransportEvent::Closed { reason }) => return Some(reason),
            None => return Some("connection closed".to_string()),
        }
    }
}

async fn supervise(inner: Arc<Inner>, cancel: CancellationToken) {
    let settings = &inner.settings;
    let mut attempt: u32 = 0;
    loop {
        let options = inner.connect_options();
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = inner.transport.connect(&settings.url, &options) => result,
        };

        match connected {
            Ok(events) => {
                if attempt > 0 {
                    info!(attempt, "event channel reconnected");
                } else {
                    info!(url = %settings.url, "event channel connected");
                }
                attempt = 0;
                inner.set_state(ChannelState::Connected);
                inner.join_all().await;
                let Some(reason) = pump(&inner, events, &cancel).await else {
                    return;
                };
                warn!(reason = %reason, "event channel connection lost");
            }
            Err(e) => warn!(attempt, error = %e, "event channel connect failed"),
        }

        attempt += 1;
        if attempt > settings.max_reconnects {
            let err = SyncError::ChannelDisconnected {
                attempts: settings.max_reconnects,
            };
            error!(error = %err, "event channel giving up");
            inner.set_state(ChannelState::Failed {
                attempts: settings.max_reconnects,
            });
            return;
        }

        let delay = backoff_delay(settings.base_delay, settings.max_delay, attempt);
        inner.set_state(ChannelState::Reconnecting { attempt });
        debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One long-lived server event connection with subscriber fan-out.
///
/// Outbound events are never buffered; [`emit`](Self::emit) fails fast while
/// disconnected.
pub struct EventChannel {
    inner: Arc<Inner>,
    session: Mutex<Option<Session>>,
}

impl EventChannel {
    pub fn new(transport: Arc<dyn EventTransport>, settings: ChannelSettings) -> Self {
        let topics = settings.topics.iter().cloned().collect();
        Self {
            inner: Arc::new(Inner {
                transport,
                settings,
                state: Mutex::new(ChannelState::Disconnected),
                topics: Mutex::new(topics),
                access_token: Mutex::new(None),
                handlers: Mutex::new(HashMap::new()),
                states: Listeners::new(),
            }),
            session: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.inner.state()
    }

    /// Token presented on the next connection attempt.
    pub fn set_access_token(&self, token: Option<String>) {
        *self
            .inner
            .access_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    /// Starts connecting. A no-op while a connection cycle is active.
    pub fn connect(&self) -> Result<(), SyncError> {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            match *state {
                ChannelState::Disposed => {
                    return Err(SyncError::Internal("event channel is disposed".to_string()));
                }
                s if s.is_active() => return Ok(()),
                _ => *state = ChannelState::Connecting,
            }
        }
        self.inner.states.emit(&ChannelState::Connecting);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(Arc::clone(&self.inner), cancel.clone()));
        let previous = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Session { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        Ok(())
    }

    async fn stop(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            session.cancel.cancel();
            let _ = session.handle.await;
        }
        self.inner.transport.disconnect().await;
    }

    /// Closes the connection without reconnecting. Joined topics and
    /// subscriptions are kept for the next [`connect`](Self::connect).
    pub async fn disconnect(&self) {
        self.stop().await;
        self.inner.set_state(ChannelState::Disconnected);
        info!("event channel disconnected");
    }

    /// Joins `topic` now if connected, and on every later connection.
    pub async fn join(&self, topic: &str) -> Result<(), SyncError> {
        let added = self
            .inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string());
        if added && self.state() == ChannelState::Connected {
            self.inner
                .transport
                .emit(JOIN_EVENT, json!({ "topic": topic }))
                .await?;
        }
        Ok(())
    }

    /// Leaves `topic` and stops re-joining it.
    pub async fn leave(&self, topic: &str) -> Result<(), SyncError> {
        let removed = self
            .inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
        if removed && self.state() == ChannelState::Connected {
            self.inner
                .transport
                .emit(LEAVE_EVENT, json!({ "topic": topic }))
                .await?;
        }
        Ok(())
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner.topics()
    }

    /// Sends one event. Fails with `ChannelDisconnected` unless connected.
    pub async fn emit(&self, event: &str, payload: Value) -> Result<(), SyncError> {
        if self.state() != ChannelState::Connected {
            return Err(self.inner.disconnected_error());
        }
        self.inner.transport.emit(event, payload).await
    }

    /// Registers `callback` for every `event` received, in arrival order.
    ///
    /// Subscriptions outlive reconnects; disposing the handle never touches
    /// the connection. The event's entry is dropped with its last handle.
    pub fn subscribe<F>(&self, event: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let (listeners, registration) = {
            let mut handlers = self.inner.handlers();
            let listeners = Arc::clone(handlers.entry(event.to_string()).or_default());
            let registration = listeners.subscribe(callback);
            (listeners, registration)
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let event = event.to_string();
        SubscriptionHandle::new(move || {
            registration.dispose();
            if let Some(inner) = weak.upgrade() {
                inner.prune_handlers(&event, &listeners);
            }
        })
    }

    /// Registers a listener for connection state changes.
    pub fn subscribe_state<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&ChannelState) + Send + Sync + 'static,
    {
        self.inner.states.subscribe(callback)
    }
}

#[async_trait]
impl Lifecycle for EventChannel {
    async fn initialize(&self) -> Result<(), SyncError> {
        self.connect()
    }

    async fn dispose(&self) {
        self.inner.set_state(ChannelState::Disposed);
        self.stop().await;
        let handlers: Vec<Arc<Listeners<Value>>> = self
            .inner
            .handlers()
            .drain()
            .map(|(_, listeners)| listeners)
            .collect();
        for listeners in handlers {
            listeners.clear();
        }
        self.inner.states.clear();
    }
}

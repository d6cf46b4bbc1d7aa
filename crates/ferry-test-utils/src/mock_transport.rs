// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock bidirectional event transport.
//!
//! Connection attempts follow a script (accept or refuse); server events are
//! injected with [`MockEventTransport::push`] and outbound events are captured.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use ferry_core::{ConnectOptions, EventTransport, SyncError, TransportEvent};

struct State {
    script: VecDeque<bool>,
    accept_by_default: bool,
    connects: Vec<(String, ConnectOptions)>,
    current: Option<mpsc::Sender<TransportEvent>>,
    emitted: Vec<(String, Value)>,
}

/// A scripted [`EventTransport`].
#[derive(Clone)]
pub struct MockEventTransport {
    state: Arc<Mutex<State>>,
}

impl MockEventTransport {
    /// Every connection attempt succeeds unless scripted otherwise.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                script: VecDeque::new(),
                accept_by_default: true,
                connects: Vec::new(),
                current: None,
                emitted: Vec::new(),
            })),
        }
    }

    /// Every connection attempt fails.
    pub fn refusing() -> Self {
        let transport = Self::new();
        transport.state().accept_by_default = false;
        transport
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Outcomes (`true` = accept) for the next connection attempts.
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.state().script.extend(outcomes);
    }

    pub fn set_accept_by_default(&self, accept: bool) {
        self.state().accept_by_default = accept;
    }

    pub fn connect_count(&self) -> usize {
        self.state().connects.len()
    }

    /// Options passed to each connection attempt.
    pub fn connect_options(&self) -> Vec<ConnectOptions> {
        self.state().connects.iter().map(|(_, o)| o.clone()).collect()
    }

    pub fn is_connected(&self) -> bool {
        self.state().current.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Events sent by the client, in order.
    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.state().emitted.clone()
    }

    /// Delivers a server event on the open connection. Returns `false` if
    /// there is none.
    pub async fn push(&self, event: &str, payload: Value) -> bool {
        let tx = self.state().current.clone();
        match tx {
            Some(tx) => tx
                .send(TransportEvent::Message {
                    event: event.to_string(),
                    payload,
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Simulates the server dropping the connection.
    pub async fn drop_connection(&self, reason: &str) {
        let tx = self.state().current.take();
        if let Some(tx) = tx {
            let _ = tx
                .send(TransportEvent::Closed {
                    reason: reason.to_string(),
                })
                .await;
        }
    }
}

impl Default for MockEventTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventTransport for MockEventTransport {
    async fn connect(
        &self,
        url: &str,
        options: &ConnectOptions,
    ) -> Result<mpsc::Receiver<TransportEvent>, SyncError> {
        let mut state = self.state();
        state.connects.push((url.to_string(), options.clone()));
        let accept = match state.script.pop_front() {
            Some(outcome) => outcome,
            None => state.accept_by_default,
        };
        if !accept {
            return Err(SyncError::TransientNetwork {
                status: None,
                message: format!("connection to {url} refused"),
                source: None,
            });
        }
        let (tx, rx) = mpsc::channel(64);
        state.current = Some(tx);
        Ok(rx)
    }

    async fn emit(&self, event: &str, payload: Value) -> Result<(), SyncError> {
        let mut state = self.state();
        if !state.current.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(SyncError::ChannelDisconnected { attempts: 0 });
        }
        state.emitted.push((event.to_string(), payload));
        Ok(())
    }

    async fn disconnect(&self) {
        self.state().current = None;
    }
}

// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock connectivity observer driven by the test.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use ferry_core::ConnectivitySource;

#[derive(Default)]
struct State {
    online: bool,
    subscribers: Vec<mpsc::UnboundedSender<bool>>,
}

/// A [`ConnectivitySource`] whose readings are set with [`MockConnectivity::set`].
#[derive(Clone, Default)]
pub struct MockConnectivity {
    state: Arc<Mutex<State>>,
}

impl MockConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                online,
                subscribers: Vec::new(),
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes a raw reading. Repeated values are delivered as-is.
    pub fn set(&self, online: bool) {
        let mut state = self.state();
        state.online = online;
        state.subscribers.retain(|tx| tx.send(online).is_ok());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}

impl ConnectivitySource for MockConnectivity {
    fn current(&self) -> bool {
        self.state().online
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<bool> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().subscribers.push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readings_reach_subscribers() {
        let source = MockConnectivity::new(false);
        let mut rx = source.subscribe();
        source.set(true);
        source.set(true);
        assert_eq!(rx.recv().await, Some(true));
        assert_eq!(rx.recv().await, Some(true));
        assert!(source.current());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let source = MockConnectivity::new(true);
        let rx = source.subscribe();
        assert_eq!(source.subscriber_count(), 1);
        drop(rx);
        assert_eq!(source.subscriber_count(), 0);
    }
}

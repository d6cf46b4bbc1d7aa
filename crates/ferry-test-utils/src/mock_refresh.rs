// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock credential refresh endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use ferry_core::{Credential, RefreshApi, SyncError};

#[derive(Clone)]
struct Behaviour {
    lifetime: chrono::Duration,
    fail_status: Option<u16>,
    delay: Duration,
}

/// A [`RefreshApi`] that issues numbered credentials and counts calls.
///
/// The n-th successful refresh returns access token `access-n` and refresh
/// token `refresh-n`.
#[derive(Clone)]
pub struct MockRefreshApi {
    calls: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<String>>>,
    behaviour: Arc<Mutex<Behaviour>>,
}

impl MockRefreshApi {
    /// Refreshes succeed with credentials valid for `lifetime`.
    pub fn new(lifetime: chrono::Duration) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
            behaviour: Arc::new(Mutex::new(Behaviour {
                lifetime,
                fail_status: None,
                delay: Duration::ZERO,
            })),
        }
    }

    /// Refreshes fail as if the endpoint answered `status`.
    pub fn failing(status: u16) -> Self {
        let api = Self::new(chrono::Duration::hours(1));
        api.set_failure(Some(status));
        api
    }

    fn behaviour(&self) -> std::sync::MutexGuard<'_, Behaviour> {
        self.behaviour.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_failure(&self, status: Option<u16>) {
        self.behaviour().fail_status = status;
    }

    /// Delay before the refresh settles, so concurrent callers can pile up.
    pub fn set_delay(&self, delay: Duration) {
        self.behaviour().delay = delay;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens presented, in call order.
    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl RefreshApi for MockRefreshApi {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, SyncError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(refresh_token.to_string());
        let behaviour = self.behaviour().clone();
        if !behaviour.delay.is_zero() {
            tokio::time::sleep(behaviour.delay).await;
        }
        match behaviour.fail_status {
            Some(status) => Err(SyncError::RefreshFailed {
                status: Some(status),
                message: format!("refresh rejected with status {status}"),
            }),
            None => Ok(Credential::new(
                format!("access-{n}"),
                Utc::now() + behaviour.lifetime,
                format!("refresh-{n}"),
            )),
        }
    }
}

// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credential lifecycle with single-flight refresh.
//!
//! The check "is a refresh already in flight?" and the act of starting one
//! happen under the same lock, so any number of racing callers share exactly
//! one refresh call. The refresh runs as its own task: a caller that gives up
//! waiting does not cancel it for the others.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use ferry_core::{
    Credential, ErrorInfo, Lifecycle, Listeners, RefreshApi, SubscriptionHandle, SyncError,
};
use ferry_storage::{Namespace, PersistentStore};

const NAMESPACE: &str = "auth";
const CREDENTIAL_KEY: &str = "credential";

/// Session notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Authenticated,
    Refreshed,
    LoggedOut,
    /// The credential could not be refreshed and has been discarded.
    /// Emitted once per failed refresh, never retried automatically.
    ReauthenticationRequired { error: ErrorInfo },
}

/// Why a shared refresh did not produce a credential.
#[derive(Debug, Clone)]
struct RefreshError {
    status: Option<u16>,
    message: String,
}

impl RefreshError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    fn from_sync(err: &SyncError) -> Self {
        match err {
            SyncError::RefreshFailed { status, message } => Self {
                status: *status,
                message: message.clone(),
            },
            other => Self {
                status: other.status(),
                message: other.to_string(),
            },
        }
    }

    fn into_sync(self) -> SyncError {
        SyncError::RefreshFailed {
            status: self.status,
            message: self.message,
        }
    }
}

type RefreshOutcome = Result<Credential, RefreshError>;
type InFlight = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Default)]
struct State {
    credential: Option<Credential>,
    in_flight: Option<InFlight>,
    task: Option<AbortHandle>,
    /// Bumped on login/logout so a refresh started for an older session
    /// cannot install its result.
    generation: u64,
}

struct Inner {
    api: Arc<dyn RefreshApi>,
    ns: Namespace,
    threshold: Duration,
    state: Mutex<State>,
    /// Serializes writes of the persisted credential.
    writes: tokio::sync::Mutex<()>,
    events: Listeners<SessionEvent>,
}

impl Inner {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes the current in-memory credential (or its absence) to storage.
    ///
    /// The credential is read after the write lock is taken, so the last
    /// write to finish always matches the latest login, refresh, or logout.
    async fn persist(&self) {
        let _writes = self.writes.lock().await;
        let credential = self.state().credential.clone();
        match credential {
            Some(credential) => {
                if let Err(e) = self.ns.set_json(CREDENTIAL_KEY, &credential).await {
                    warn!(error = %e, "failed to persist credential");
                }
            }
            None => self.ns.remove(CREDENTIAL_KEY).await,
        }
    }
}

/// Sole owner of the authentication [`Credential`].
pub struct CredentialRefresher {
    inner: Arc<Inner>,
}

impl CredentialRefresher {
    pub fn new(api: Arc<dyn RefreshApi>, store: &Arc<PersistentStore>, threshold: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                ns: store.namespace(NAMESPACE),
                threshold,
                state: Mutex::new(State::default()),
                writes: tokio::sync::Mutex::new(()),
                events: Listeners::new(),
            }),
        }
    }

    /// Installs a credential obtained by authenticating.
    pub async fn login(&self, credential: Credential) {
        {
            let mut st = self.inner.state();
            st.credential = Some(credential.clone());
            abandon_refresh(&mut st);
        }
        self.inner.persist().await;
        info!(expiry = %credential.expiry, "session authenticated");
        self.inner.events.emit(&SessionEvent::Authenticated);
    }

    /// Discards the credential and its persisted copy.
    pub async fn logout(&self) {
        {
            let mut st = self.inner.state();
            st.credential = None;
            abandon_refresh(&mut st);
        }
        self.inner.persist().await;
        info!("session logged out");
        self.inner.events.emit(&SessionEvent::LoggedOut);
    }

    /// Read-only snapshot of the current credential.
    pub fn current(&self) -> Option<Credential> {
        self.inner.state().credential.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state().credential.is_some()
    }

    /// A credential valid for at least the refresh threshold.
    ///
    /// Refreshes proactively when the remaining validity is below the
    /// threshold; joins a refresh already in flight.
    pub async fn valid_credential(&self) -> Result<Credential, SyncError> {
        let in_flight = {
            let mut st = self.inner.state();
            match &st.credential {
                None => return Err(SyncError::NotAuthenticated),
                Some(c) if st.in_flight.is_none() && !c.needs_refresh(Utc::now(), self.inner.threshold) => {
                    return Ok(c.clone());
                }
                Some(_) => {}
            }
            self.start_or_join(&mut st)?
        };
        in_flight.await.map_err(RefreshError::into_sync)
    }

    /// Reactive refresh after the server rejected `stale_access_token`.
    ///
    /// If the credential was replaced since that token was attached, the
    /// current credential is returned without another refresh.
    pub async fn refresh_after_unauthorized(
        &self,
        stale_access_token: &str,
    ) -> Result<Credential, SyncError> {
        let in_flight = {
            let mut st = self.inner.state();
            match &st.credential {
                None => return Err(SyncError::NotAuthenticated),
                Some(c) if st.in_flight.is_none() && c.access_token != stale_access_token => {
                    debug!("credential already replaced, skipping refresh");
                    return Ok(c.clone());
                }
                Some(_) => {}
            }
            self.start_or_join(&mut st)?
        };
        in_flight.await.map_err(RefreshError::into_sync)
    }

    /// Registers `callback` for session events.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    /// Returns the in-flight refresh, starting one if there is none.
    ///
    /// Must be called with the state lock held.
    fn start_or_join(&self, st: &mut State) -> Result<InFlight, SyncError> {
        if let Some(in_flight) = &st.in_flight {
            debug!("joining in-flight credential refresh");
            return Ok(in_flight.clone());
        }
        let refresh_token = match &st.credential {
            Some(c) => c.refresh_token.clone(),
            None => return Err(SyncError::NotAuthenticated),
        };

        let generation = st.generation;
        let handle = tokio::spawn(run_refresh(Arc::clone(&self.inner), refresh_token, generation));
        st.task = Some(handle.abort_handle());
        let in_flight = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(RefreshError::new(format!("credential refresh aborted: {e}"))))
        }
        .boxed()
        .shared();
        st.in_flight = Some(in_flight.clone());
        debug!("credential refresh started");
        Ok(in_flight)
    }
}

fn abandon_refresh(st: &mut State) {
    st.generation += 1;
    st.in_flight = None;
    st.task = None;
}

async fn run_refresh(inner: Arc<Inner>, refresh_token: String, generation: u64) -> RefreshOutcome {
    let result = inner.api.refresh(&refresh_token).await;

    match result {
        Ok(credential) => {
            {
                let mut st = inner.state();
                if st.generation != generation {
                    return Err(RefreshError::new("session changed during credential refresh"));
                }
                st.credential = Some(credential.clone());
                st.in_flight = None;
                st.task = None;
            }
            inner.persist().await;
            info!(expiry = %credential.expiry, "credential refreshed");
            inner.events.emit(&SessionEvent::Refreshed);
            Ok(credential)
        }
        Err(err) => {
            let failure = RefreshError::from_sync(&err);
            let owns_session = {
                let mut st = inner.state();
                if st.generation == generation {
                    st.credential = None;
                    abandon_refresh(&mut st);
                    true
                } else {
                    false
                }
            };
            if owns_session {
                inner.persist().await;
                let error = failure.clone().into_sync().info();
                warn!(error = %error, "credential refresh failed, re-authentication required");
                inner.events.emit(&SessionEvent::ReauthenticationRequired { error });
            }
            Err(failure)
        }
    }
}

#[async_trait]
impl Lifecycle for CredentialRefresher {
    /// Restores a persisted credential, if any.
    async fn initialize(&self) -> Result<(), SyncError> {
        match self.inner.ns.get_json::<Credential>(CREDENTIAL_KEY).await {
            Ok(Some(credential)) => {
                debug!(expiry = %credential.expiry, "restored persisted credential");
                self.inner.state().credential = Some(credential);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "discarding unreadable persisted credential");
                self.inner.ns.remove(CREDENTIAL_KEY).await;
            }
        }
        Ok(())
    }

    async fn dispose(&self) {
        let task = {
            let mut st = self.inner.state();
            st.in_flight = None;
            st.task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        self.inner.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::ErrorKind;
    use ferry_test_utils::{MockRefreshApi, SlowStore};

    const THRESHOLD: Duration = Duration::from_secs(300);

    fn credential(valid_for: chrono::Duration) -> Credential {
        Credential::new("access-0", Utc::now() + valid_for, "refresh-0")
    }

    fn refresher(api: &MockRefreshApi) -> (Arc<PersistentStore>, Arc<CredentialRefresher>) {
        let store = PersistentStore::in_memory();
        let refresher = CredentialRefresher::new(Arc::new(api.clone()), &store, THRESHOLD);
        (store, Arc::new(refresher))
    }

    fn record(refresher: &CredentialRefresher) -> (Arc<Mutex<Vec<SessionEvent>>>, SubscriptionHandle) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let h = refresher.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        (seen, h)
    }

    #[tokio::test]
    async fn fresh_credential_is_returned_without_refresh() {
        let api = MockRefreshApi::new(chrono::Duration::hours(1));
        let (_store, refresher) = refresher(&api);
        refresher.login(credential(chrono::Duration::hours(1))).await;

        let cred = refresher.valid_credential().await.unwrap();
        assert_eq!(cred.access_token, "access-0");
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn no_session_is_not_authenticated() {
        let api = MockRefreshApi::new(chrono::Duration::hours(1));
        let (_store, refresher) = refresher(&api);
        let err = refresher.valid_credential().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAuthenticated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_refresh() {
        let api = MockRefreshApi::new(chrono::Duration::hours(1));
        api.set_delay(Duration::from_millis(50));
        let (_store, refresher) = refresher(&api);
        refresher.login(credential(chrono::Duration::seconds(1))).await;

        let calls: Vec<_> = (0..20)
            .map(|_| {
                let r = Arc::clone(&refresher);
                tokio::spawn(async move { r.valid_credential().await })
            })
            .collect();
        for call in calls {
            let cred = call.await.unwrap().unwrap();
            assert_eq!(cred.access_token, "access-1");
        }
        assert_eq!(api.call_count(), 1);
        assert_eq!(api.refresh_tokens_seen(), vec!["refresh-0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_during_a_slow_credential_write_wins() {
        let api = MockRefreshApi::new(chrono::Duration::hours(1));
        let backend = Arc::new(SlowStore::new(Duration::from_secs(1)));
        let store = PersistentStore::new(backend.clone());
        let refresher = Arc::new(CredentialRefresher::new(Arc::new(api.clone()), &store, THRESHOLD));
        refresher.login(credential(chrono::Duration::seconds(1))).await;

        let r = Arc::clone(&refresher);
        let refreshing = tokio::spawn(async move { r.valid_credential().await });
        while backend.writes_in_progress() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        refresher.logout().await;
        refreshing.await.unwrap().unwrap();

        assert_eq!(store.get("auth:credential").await, None);
        let restarted = CredentialRefresher::new(Arc::new(api), &store, THRESHOLD);
        restarted.initialize().await.unwrap();
        assert!(!restarted.is_authenticated());
    }

    #[tokio::test(start_paused = true)]
    async fn login_during_a_slow_refresh_write_is_what_persists() {
        let api = MockRefreshApi::new(chrono::Duration::hours(1));
        let backend = Arc::new(SlowStore::new(Duration::from_secs(1)));
        let store = PersistentStore::new(backend.clone());
        let refresher = Arc::new(CredentialRefresher::new(Arc::new(api.clone()), &store, THRESHOLD));
        refresher.login(credential(chrono::Duration::seconds(1))).await;

        let r = Arc::clone(&refresher);
        let refreshing = tokio::spawn(async move { r.valid_credential().await });
        while backend.writes_in_progress() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let fresh = Credential::new("access-new", Utc::now() + chrono::Duration::hours(2), "refresh-new");
        refresher.login(fresh).await;
        let _ = refreshing.await.unwrap();

        let restarted = CredentialRefresher::new(Arc::new(api), &store, THRESHOLD);
        restarted.initialize().await.unwrap();
        assert_eq!(restarted.current().unwrap().access_token, "access-new");
    }

    #[tokio::test]
    async fn refresh_failure_fails_everyone_and_signals_once() {
        let api = MockRefreshApi::failing(401);
        api.set_delay(Duration::from_millis(20));
        let (store, refresher) = refresher(&api);
        refresher.login(credential(chrono::Duration::seconds(1))).await;
        let (events, _h) = record(&refresher);

        let calls: Vec<_> = (0..5)
            .map(|_| {
                let r = Arc::clone(&refresher);
                tokio::spawn(async move { r.valid_credential().await })
            })
            .collect();
        for call in calls {
            let err = call.await.unwrap().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::RefreshFailed);
            assert_eq!(err.status(), Some(401));
        }

        assert_eq!(api.call_count(), 1);
        assert!(refresher.current().is_none());
        assert_eq!(store.get("auth:credential").await, None);
        let reauth = events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, SessionEvent::ReauthenticationRequired { .. }))
            .count();
        assert_eq!(reauth, 1);

        // Never retried automatically.
        assert_eq!(
            refresher.valid_credential().await.unwrap_err().kind(),
            ErrorKind::NotAuthenticated
        );
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn unauthorized_with_replaced_token_skips_refresh() {
        let api = MockRefreshApi::new(chrono::Duration::hours(1));
        let (_store, refresher) = refresher(&api);
        refresher.login(credential(chrono::Duration::hours(1))).await;

        let cred = refresher.refresh_after_unauthorized("some-older-token").await.unwrap();
        assert_eq!(cred.access_token, "access-0");
        assert_eq!(api.call_count(), 0);

        let cred = refresher.refresh_after_unauthorized("access-0").await.unwrap();
        assert_eq!(cred.access_token, "access-1");
        assert_eq!(api.call_count(), 1);
    }

    #[tokio::test]
    async fn credential_is_persisted_and_restored() {
        let api = MockRefreshApi::new(chrono::Duration::hours(1));
        let (store, refresher) = refresher(&api);
        let (events, _h) = record(&refresher);
        refresher.login(credential(chrono::Duration::hours(1))).await;

        let restored = CredentialRefresher::new(Arc::new(api.clone()), &store, THRESHOLD);
        restored.initialize().await.unwrap();
        assert_eq!(restored.current(), refresher.current());

        refresher.logout().await;
        assert_eq!(store.get("auth:credential").await, None);
        assert_eq!(
            *events.lock().unwrap(),
            vec![SessionEvent::Authenticated, SessionEvent::LoggedOut]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn logout_during_refresh_discards_result() {
        let api = MockRefreshApi::new(chrono::Duration::hours(1));
        api.set_delay(Duration::from_secs(1));
        let (_store, refresher) = refresher(&api);
        refresher.login(credential(chrono::Duration::seconds(1))).await;

        let r = Arc::clone(&refresher);
        let pending = tokio::spawn(async move { r.valid_credential().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        refresher.logout().await;

        assert!(pending.await.unwrap().is_err());
        assert!(refresher.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_aborts_in_flight_refresh() {
        let api = MockRefreshApi::new(chrono::Duration::hours(1));
        api.set_delay(Duration::from_secs(60));
        let (_store, refresher) = refresher(&api);
        refresher.login(credential(chrono::Duration::seconds(1))).await;

        let r = Arc::clone(&refresher);
        let pending = tokio::spawn(async move { r.valid_credential().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        refresher.dispose().await;

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RefreshFailed);
    }
}

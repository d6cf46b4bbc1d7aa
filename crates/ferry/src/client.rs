// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The application-facing sync client.
//!
//! [`SyncClient`] owns one instance of every component and wires them
//! together: queue outcomes confirm or fail optimistic cache records, pushed
//! server events are merged into the cache, and session changes reach the
//! queue processor and the event channel.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ferry_auth::{AuthorizedClient, CredentialRefresher, SessionEvent};
use ferry_cache::{
    CacheChange, CacheRecord, PushEvent, ReconciliationCache, Resolution, UnconfirmedRecord,
};
use ferry_channel::{ChannelSettings, ChannelState, EventChannel};
use ferry_config::FerryConfig;
use ferry_core::{
    ActionExecutor, CorrelationId, Credential, EnqueueReceipt, EntityId, HttpMethod, HttpResponse,
    Lifecycle, NewAction, QueueStatus, SubscriptionHandle, SyncError,
};
use ferry_net::NetworkMonitor;
use ferry_queue::{ProcessorSettings, QueueEvent, QueueProcessor};
use ferry_storage::{PersistentQueue, PersistentStore};

use crate::collaborators::Collaborators;

/// Cache and channel work triggered from synchronous listeners.
///
/// Applied by a single task so pushes keep their delivery order.
#[derive(Debug)]
enum Reaction {
    Confirm {
        correlation_id: CorrelationId,
        response: Value,
    },
    Fail(CorrelationId),
    Push(PushEvent),
    Disconnect,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Runtime {
    /// Present until the reaction worker starts.
    reactions: Option<mpsc::UnboundedReceiver<Reaction>>,
    worker: Option<Worker>,
    disposed: bool,
}

/// Offline-first sync layer for one signed-in client.
pub struct SyncClient {
    store: Arc<PersistentStore>,
    monitor: Arc<NetworkMonitor>,
    refresher: Arc<CredentialRefresher>,
    client: Arc<AuthorizedClient>,
    processor: Arc<QueueProcessor>,
    cache: Arc<ReconciliationCache>,
    channel: Option<Arc<EventChannel>>,
    runtime: Mutex<Runtime>,
    wiring: Mutex<Vec<SubscriptionHandle>>,
}

impl SyncClient {
    /// Builds every component and restores persisted queue and cache state.
    ///
    /// Nothing runs until [`initialize`](Lifecycle::initialize). The event
    /// channel exists only when `channel.url` is configured.
    pub async fn new(config: &FerryConfig, collaborators: Collaborators) -> Result<Self, SyncError> {
        let Collaborators {
            store,
            http,
            connectivity,
            events,
            refresh,
        } = collaborators;

        let store = PersistentStore::new(store);
        let monitor = Arc::new(NetworkMonitor::new(connectivity, config.network.debounce()));
        let refresher = Arc::new(CredentialRefresher::new(
            refresh,
            &store,
            config.auth.refresh_threshold(),
        ));
        let client = Arc::new(AuthorizedClient::new(
            http,
            Arc::clone(&refresher),
            config.network.request_timeout(),
        ));

        let queue = Arc::new(PersistentQueue::load(&store, config.queue.capacity).await?);
        let executor: Arc<dyn ActionExecutor> = client.clone();
        let processor = Arc::new(QueueProcessor::new(
            queue,
            Arc::clone(&monitor),
            executor,
            ProcessorSettings::from(&config.queue),
        ));
        let cache = Arc::new(ReconciliationCache::load(&store, config.cache.staleness()).await?);
        let channel = ChannelSettings::from_config(&config.channel)
            .map(|settings| Arc::new(EventChannel::new(events, settings)));
        if channel.is_none() {
            debug!("no channel url configured, server push disabled");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let wiring = wire(
            &processor,
            &refresher,
            channel.as_ref(),
            &config.channel.push_events,
            tx,
        );

        Ok(Self {
            store,
            monitor,
            refresher,
            client,
            processor,
            cache,
            channel,
            runtime: Mutex::new(Runtime {
                reactions: Some(rx),
                worker: None,
                disposed: false,
            }),
            wiring: Mutex::new(wiring),
        })
    }

    fn runtime(&self) -> std::sync::MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_started(&self) -> bool {
        self.runtime().worker.is_some()
    }

    fn channel(&self) -> Result<&Arc<EventChannel>, SyncError> {
        self.channel
            .as_ref()
            .ok_or_else(|| SyncError::Config("no event channel configured (channel.url)".to_string()))
    }

    /// Installs a credential and connects the event channel.
    pub async fn login(&self, credential: Credential) -> Result<(), SyncError> {
        self.refresher.login(credential).await;
        if self.is_started() {
            if let Some(channel) = &self.channel {
                channel.connect()?;
            }
        }
        Ok(())
    }

    /// Ends the session: drops the credential, every queued action, and the
    /// whole cache, and closes the event channel.
    pub async fn logout(&self) -> Result<(), SyncError> {
        if let Some(channel) = &self.channel {
            channel.disconnect().await;
            channel.set_access_token(None);
        }
        self.refresher.logout().await;
        self.processor.clear().await?;
        self.cache.clear().await;
        Ok(())
    }

    /// Executes `action` now when possible, otherwise queues it.
    ///
    /// An action carrying an optimistic write gets a correlation id if it has
    /// none, and its pending record is in the cache before execution starts.
    /// If the action is rejected, that record is marked failed.
    pub async fn enqueue_or_execute(&self, action: NewAction) -> Result<EnqueueReceipt, SyncError> {
        if self.runtime().disposed {
            return Err(SyncError::Internal("sync client is disposed".to_string()));
        }
        let mut action = action;
        let Some(write) = action.optimistic.clone() else {
            return self.processor.enqueue_or_execute(action).await;
        };
        let correlation_id = action
            .correlation_id
            .get_or_insert_with(CorrelationId::generate)
            .clone();
        self.cache
            .apply_optimistic(&write.entity_id, &correlation_id, write.data)
            .await?;

        let result = self.processor.enqueue_or_execute(action).await;
        if result.is_err() {
            if let Err(e) = self.cache.mark_failed(&correlation_id).await {
                warn!(%correlation_id, error = %e, "failed to mark rejected optimistic write");
            }
        }
        result
    }

    /// Registers `callback` for a named server event.
    ///
    /// Without a configured channel the returned handle is inert.
    pub fn subscribe<F>(&self, event: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        match &self.channel {
            Some(channel) => channel.subscribe(event, callback),
            None => {
                warn!(event, "subscribing without an event channel");
                SubscriptionHandle::new(|| {})
            }
        }
    }

    /// Sends an event to the server. Never buffered.
    pub async fn emit(&self, event: &str, payload: Value) -> Result<(), SyncError> {
        self.channel()?.emit(event, payload).await
    }

    pub async fn join_topic(&self, topic: &str) -> Result<(), SyncError> {
        self.channel()?.join(topic).await
    }

    pub async fn leave_topic(&self, topic: &str) -> Result<(), SyncError> {
        self.channel()?.leave(topic).await
    }

    /// One request with the session credential attached and a single
    /// refresh-and-retry on 401.
    pub async fn authorized_request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
    ) -> Result<HttpResponse, SyncError> {
        self.client.authorized_request(method, url, body).await
    }

    /// Fetches `url` and replaces the cached records of `entity_id` with the
    /// returned JSON array.
    pub async fn refresh_entity(&self, entity_id: &EntityId, url: &str) -> Result<(), SyncError> {
        let response = self.authorized_request(HttpMethod::Get, url, None).await?;
        let body = response
            .json()
            .map_err(|e| SyncError::Internal(format!("malformed fetch response: {e}")))?;
        let Value::Array(records) = body else {
            return Err(SyncError::Internal(
                "fetch response is not a JSON array".to_string(),
            ));
        };
        self.cache.apply_fetch(entity_id, &records).await
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.processor.status()
    }

    pub async fn cache_snapshot(&self, entity_id: &EntityId) -> Vec<CacheRecord> {
        self.cache.snapshot(entity_id).await
    }

    /// Pending records older than the staleness threshold.
    pub async fn unconfirmed(&self) -> Vec<UnconfirmedRecord> {
        self.cache.unconfirmed().await
    }

    pub async fn resolve_unconfirmed(
        &self,
        entity_id: &EntityId,
        correlation_id: &CorrelationId,
        resolution: Resolution,
    ) -> Result<bool, SyncError> {
        self.cache
            .resolve_unconfirmed(entity_id, correlation_id, resolution)
            .await
    }

    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    pub fn is_authenticated(&self) -> bool {
        self.refresher.is_authenticated()
    }

    /// Whether storage failed and the session continues in memory only.
    pub fn is_storage_degraded(&self) -> bool {
        self.store.is_degraded()
    }

    pub fn channel_state(&self) -> Option<ChannelState> {
        self.channel.as_ref().map(|channel| channel.state())
    }

    pub fn on_queue_event<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.processor.subscribe_events(callback)
    }

    /// Session changes; `ReauthenticationRequired` means the UI must sign in again.
    pub fn on_session_event<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.refresher.subscribe(callback)
    }

    pub fn on_status_change<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&QueueStatus) + Send + Sync + 'static,
    {
        self.processor.subscribe_status(callback)
    }

    pub fn on_cache_change<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&CacheChange) + Send + Sync + 'static,
    {
        self.cache.subscribe(callback)
    }
}

/// Connects component notifications. Every closure holds weak references
/// or a reaction sender, never the components that own its registry.
fn wire(
    processor: &Arc<QueueProcessor>,
    refresher: &Arc<CredentialRefresher>,
    channel: Option<&Arc<EventChannel>>,
    push_events: &[String],
    reactions: mpsc::UnboundedSender<Reaction>,
) -> Vec<SubscriptionHandle> {
    let mut handles = Vec::new();

    let outcomes = reactions.clone();
    handles.push(processor.subscribe_events(move |event| {
        let reaction = match event {
            QueueEvent::Succeeded { action, response } => {
                optimistic_correlation(action).map(|correlation_id| Reaction::Confirm {
                    correlation_id,
                    response: response.json().unwrap_or(Value::Null),
                })
            }
            QueueEvent::PermanentFailure { action, .. } | QueueEvent::Dropped { action } => {
                optimistic_correlation(action).map(Reaction::Fail)
            }
            _ => None,
        };
        if let Some(reaction) = reaction {
            let _ = outcomes.send(reaction);
        }
    }));

    if let Some(channel) = channel {
        for name in push_events {
            let pushes = reactions.clone();
            let event_name = name.clone();
            handles.push(channel.subscribe(name, move |payload| {
                match PushEvent::from_payload(payload) {
                    Ok(event) => {
                        let _ = pushes.send(Reaction::Push(event));
                    }
                    Err(e) => warn!(event = %event_name, error = %e, "ignoring malformed push event"),
                }
            }));
        }
    }

    let session_refresher: Weak<CredentialRefresher> = Arc::downgrade(refresher);
    let session_processor: Weak<QueueProcessor> = Arc::downgrade(processor);
    let session_channel: Option<Weak<EventChannel>> = channel.map(Arc::downgrade);
    handles.push(refresher.subscribe(move |event| match event {
        SessionEvent::Authenticated | SessionEvent::Refreshed => {
            let channel = session_channel.as_ref().and_then(Weak::upgrade);
            if let (Some(channel), Some(refresher)) = (channel, session_refresher.upgrade()) {
                channel.set_access_token(refresher.current().map(|c| c.access_token));
            }
            if let Some(processor) = session_processor.upgrade() {
                processor.resume();
            }
        }
        SessionEvent::ReauthenticationRequired { .. } => {
            let _ = reactions.send(Reaction::Disconnect);
        }
        SessionEvent::LoggedOut => {}
    }));

    handles
}

fn optimistic_correlation(action: &ferry_core::QueuedAction) -> Option<CorrelationId> {
    action.optimistic.as_ref()?;
    action.correlation_id.clone()
}

async fn react(
    cache: Arc<ReconciliationCache>,
    channel: Option<Arc<EventChannel>>,
    mut reactions: mpsc::UnboundedReceiver<Reaction>,
    cancel: CancellationToken,
) {
    loop {
        let reaction = tokio::select! {
            _ = cancel.cancelled() => break,
            next = reactions.recv() => match next {
                Some(reaction) => reaction,
                None => break,
            },
        };
        let result = match reaction {
            Reaction::Confirm {
                correlation_id,
                response,
            } => cache.confirm(&correlation_id, &response).await.map(drop),
            Reaction::Fail(correlation_id) => cache.mark_failed(&correlation_id).await.map(drop),
            Reaction::Push(event) => cache.apply_push(&event).await,
            Reaction::Disconnect => {
                if let Some(channel) = &channel {
                    info!("session lost, closing event channel");
                    channel.disconnect().await;
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to apply cache update");
        }
    }
    debug!("reaction worker stopped");
}

#[async_trait]
impl Lifecycle for SyncClient {
    /// Starts connectivity observation, restores the session, and begins
    /// draining. The channel connects now if a credential was restored,
    /// otherwise on [`login`](SyncClient::login).
    async fn initialize(&self) -> Result<(), SyncError> {
        let reactions = {
            let mut runtime = self.runtime();
            if runtime.disposed {
                return Err(SyncError::Internal("sync client is disposed".to_string()));
            }
            match runtime.reactions.take() {
                Some(reactions) => reactions,
                None => return Ok(()),
            }
        };

        self.monitor.initialize().await?;
        self.refresher.initialize().await?;
        self.cache.initialize().await?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(react(
            Arc::clone(&self.cache),
            self.channel.clone(),
            reactions,
            cancel.clone(),
        ));
        self.runtime().worker = Some(Worker { cancel, handle });

        self.processor.initialize().await?;
        if let Some(channel) = &self.channel {
            if let Some(credential) = self.refresher.current() {
                channel.set_access_token(Some(credential.access_token));
                channel.initialize().await?;
            }
        }

        info!(
            online = self.monitor.is_online(),
            pending = self.processor.queue().len(),
            authenticated = self.refresher.is_authenticated(),
            "sync client started"
        );
        Ok(())
    }

    /// Stops every component. Queued actions and cache contents stay persisted.
    async fn dispose(&self) {
        let worker = {
            let mut runtime = self.runtime();
            runtime.disposed = true;
            runtime.reactions = None;
            runtime.worker.take()
        };

        self.processor.dispose().await;
        if let Some(channel) = &self.channel {
            channel.dispose().await;
        }
        if let Some(worker) = worker {
            worker.cancel.cancel();
            let _ = worker.handle.await;
        }
        self.wiring
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.cache.dispose().await;
        self.refresher.dispose().await;
        self.monitor.dispose().await;
        debug!("sync client disposed");
    }
}

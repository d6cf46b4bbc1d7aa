// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drain loop for the persistent queue.
//!
//! One worker task owns draining. It executes the head of the queue, waits for
//! a terminal outcome, and only then looks at the next action. The execution
//! gate is held for the whole drain (backoff waits included), so an immediate
//! execution from [`QueueProcessor::enqueue_or_execute`] can never overtake a
//! queued action.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ferry_config::{QueueConfig, RetryOrdering};
use ferry_core::{
    backoff_delay, ActionExecutor, EnqueueReceipt, HttpResponse, Lifecycle, Listeners, NewAction,
    ProcessorState, QueueStatus, QueuedAction, SubscriptionHandle, SyncError,
};
use ferry_net::NetworkMonitor;
use ferry_storage::PersistentQueue;

use crate::events::{FailureReason, QueueEvent};
use crate::state::{transition, ProcessorInput};

/// Retry policy of a [`QueueProcessor`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorSettings {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub ordering: RetryOrdering,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for ProcessorSettings {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            base_backoff: config.base_backoff(),
            max_backoff: config.max_backoff(),
            ordering: config.retry_ordering,
        }
    }
}

/// How the drain loop treats a failed execution.
enum Disposition {
    Permanent(FailureReason),
    /// No usable credential; wait for the next login.
    Blocked,
    Transient,
}

fn disposition(err: &SyncError) -> Disposition {
    match err {
        SyncError::PermanentRequest { .. } | SyncError::Config(_) => {
            Disposition::Permanent(FailureReason::Rejected)
        }
        SyncError::AuthExpired { .. } => Disposition::Permanent(FailureReason::Unauthorized),
        SyncError::RefreshFailed { .. } | SyncError::NotAuthenticated => Disposition::Blocked,
        _ => Disposition::Transient,
    }
}

/// Executors report non-2xx responses as errors, but a bare `Ok` with a
/// failure status is classified the same way.
fn into_outcome(result: Result<HttpResponse, SyncError>) -> Result<HttpResponse, SyncError> {
    match result {
        Ok(response) if !response.is_success() => {
            Err(SyncError::from_status(response.status, &response.body))
        }
        other => other,
    }
}

enum Flow {
    Continue,
    Stop,
}

struct Inner {
    queue: Arc<PersistentQueue>,
    monitor: Arc<NetworkMonitor>,
    executor: Arc<dyn ActionExecutor>,
    settings: ProcessorSettings,
    gate: tokio::sync::Mutex<()>,
    state: Mutex<ProcessorState>,
    auth_blocked: AtomicBool,
    wake: Notify,
    cancel: CancellationToken,
    events: Listeners<QueueEvent>,
    status: Listeners<QueueStatus>,
}

impl Inner {
    fn state(&self) -> ProcessorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, input: ProcessorInput) {
        let changed = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let next = transition(*state, input);
            let previous = std::mem::replace(&mut *state, next);
            (previous != next).then_some((previous, next))
        };
        if let Some((from, to)) = changed {
            debug!(%from, %to, ?input, "queue processor transition");
            self.publish_status();
        }
    }

    fn snapshot(&self) -> QueueStatus {
        let state = self.state();
        QueueStatus {
            is_online: self.monitor.is_online(),
            queue_size: self.queue.len(),
            is_processing: state == ProcessorState::Draining,
            state,
        }
    }

    fn publish_status(&self) {
        self.status.emit(&self.snapshot());
    }

    fn emit(&self, event: QueueEvent) {
        self.events.emit(&event);
    }

    fn can_execute(&self) -> bool {
        self.monitor.is_online() && !self.auth_blocked.load(Ordering::SeqCst)
    }

    fn block(&self) {
        if !self.auth_blocked.swap(true, Ordering::SeqCst) {
            warn!("no usable credential, queue processing paused until the next login");
        }
        self.apply(ProcessorInput::Blocked);
    }

    async fn enqueue(&self, action: QueuedAction) -> Result<EnqueueReceipt, SyncError> {
        let receipt = EnqueueReceipt {
            queued: true,
            id: action.id.clone(),
            correlation_id: action.correlation_id.clone(),
            response: None,
        };
        self.queue.enqueue(action.clone()).await?;
        self.emit(QueueEvent::Enqueued { action });
        self.publish_status();
        self.wake.notify_one();
        Ok(receipt)
    }

    /// Drains until the queue is empty, the network drops, the session is
    /// lost, or the processor is disposed.
    async fn drain(&self) {
        let _gate = self.gate.lock().await;
        if self.cancel.is_cancelled() || !self.can_execute() {
            return;
        }
        if self.queue.is_empty() && self.state() == ProcessorState::Idle {
            return;
        }
        self.apply(ProcessorInput::Start);
        self.apply(ProcessorInput::WentOnline);
        info!(pending = self.queue.len(), "draining queue");

        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            if !self.monitor.is_online() {
                self.apply(ProcessorInput::WentOffline);
                return;
            }
            if self.auth_blocked.load(Ordering::SeqCst) {
                self.apply(ProcessorInput::Blocked);
                return;
            }
            let Some(action) = self.queue.begin_head().await else {
                self.apply(ProcessorInput::Drained);
                debug!("queue drained");
                return;
            };

            debug!(action_id = %action.id, kind = %action.kind, retry_count = action.retry_count, "executing queued action");
            let result = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.queue.end_head();
                    return;
                }
                result = self.executor.execute(&action) => result,
            };

            let flow = self.settle(action, into_outcome(result)).await;
            self.queue.end_head();
            if let Flow::Stop = flow {
                return;
            }
        }
    }

    async fn settle(&self, action: QueuedAction, outcome: Result<HttpResponse, SyncError>) -> Flow {
        let err = match outcome {
            Ok(response) => {
                self.resolve(&action).await;
                debug!(action_id = %action.id, status = response.status, "queued action succeeded");
                self.emit(QueueEvent::Succeeded { action, response });
                return Flow::Continue;
            }
            Err(err) => err,
        };

        match disposition(&err) {
            Disposition::Permanent(reason) => {
                self.resolve(&action).await;
                self.fail(action, &err, reason);
                Flow::Continue
            }
            Disposition::Blocked => {
                debug!(action_id = %action.id, error = %err, "execution needs a new session");
                self.block();
                Flow::Stop
            }
            Disposition::Transient if !self.monitor.is_online() => {
                debug!(action_id = %action.id, error = %err, "connectivity lost during execution, pausing");
                self.apply(ProcessorInput::WentOffline);
                Flow::Stop
            }
            Disposition::Transient => self.retry(action, &err).await,
        }
    }

    async fn retry(&self, action: QueuedAction, err: &SyncError) -> Flow {
        let attempts = action.retry_count.saturating_add(1);
        if attempts >= self.settings.max_retries {
            self.resolve(&action).await;
            self.fail(action, err, FailureReason::RetriesExhausted { attempts });
            return Flow::Continue;
        }

        let updated = match self.settings.ordering {
            RetryOrdering::Strict => self.queue.bump_head_retry(&action.id).await,
            RetryOrdering::Rotate => self.queue.requeue_head(&action.id).await,
        };
        if let Err(e) = updated {
            error!(action_id = %action.id, error = %e, "failed to record retry");
        }
        self.publish_status();

        let delay = backoff_delay(self.settings.base_backoff, self.settings.max_backoff, attempts);
        warn!(
            action_id = %action.id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
        self.emit(QueueEvent::Retrying {
            id: action.id,
            attempt: attempts,
            delay,
        });

        tokio::select! {
            _ = self.cancel.cancelled() => Flow::Stop,
            _ = tokio::time::sleep(delay) => Flow::Continue,
        }
    }

    async fn resolve(&self, action: &QueuedAction) {
        if let Err(e) = self.queue.resolve_head(&action.id).await {
            error!(action_id = %action.id, error = %e, "failed to persist queue after resolving head");
        }
        self.publish_status();
    }

    fn fail(&self, action: QueuedAction, err: &SyncError, reason: FailureReason) {
        warn!(action_id = %action.id, kind = %action.kind, ?reason, error = %err, "action failed permanently");
        self.emit(QueueEvent::PermanentFailure {
            action,
            error: err.info(),
            reason,
        });
    }
}

async fn run(inner: Arc<Inner>, mut online: watch::Receiver<bool>) {
    loop {
        inner.drain().await;
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = inner.wake.notified() => {}
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("queue worker stopped");
}

struct Worker {
    handle: JoinHandle<()>,
    _online_edges: SubscriptionHandle,
}

/// Drains a [`PersistentQueue`] whenever the network is up.
pub struct QueueProcessor {
    inner: Arc<Inner>,
    worker: Mutex<Option<Worker>>,
    _losses: SubscriptionHandle,
}

impl QueueProcessor {
    pub fn new(
        queue: Arc<PersistentQueue>,
        monitor: Arc<NetworkMonitor>,
        executor: Arc<dyn ActionExecutor>,
        settings: ProcessorSettings,
    ) -> Self {
        let inner = Arc::new(Inner {
            queue,
            monitor,
            executor,
            settings,
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(ProcessorState::Idle),
            auth_blocked: AtomicBool::new(false),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            events: Listeners::new(),
            status: Listeners::new(),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let losses = inner.queue.subscribe(move |loss| {
            if let Some(inner) = weak.upgrade() {
                inner.emit(QueueEvent::Dropped {
                    action: loss.action.clone(),
                });
                inner.publish_status();
            }
        });

        Self {
            inner,
            worker: Mutex::new(None),
            _losses: losses,
        }
    }

    /// Executes `action` right away when that cannot reorder queued work,
    /// otherwise appends it to the queue.
    ///
    /// Immediate execution requires connectivity, a usable session, an empty
    /// queue, and no drain in progress. A transient failure falls back to
    /// queueing; a permanent failure is returned and nothing is queued.
    pub async fn enqueue_or_execute(&self, action: NewAction) -> Result<EnqueueReceipt, SyncError> {
        let inner = &self.inner;
        if inner.state() == ProcessorState::Disposed {
            return Err(SyncError::Internal("queue processor is disposed".to_string()));
        }
        let action = action.into_queued();

        if inner.can_execute() {
            if let Ok(_gate) = inner.gate.try_lock() {
                if inner.queue.is_empty() {
                    debug!(action_id = %action.id, kind = %action.kind, "executing immediately");
                    match into_outcome(inner.executor.execute(&action).await) {
                        Ok(response) => {
                            inner.emit(QueueEvent::Succeeded {
                                action: action.clone(),
                                response: response.clone(),
                            });
                            return Ok(EnqueueReceipt {
                                queued: false,
                                id: action.id,
                                correlation_id: action.correlation_id,
                                response: Some(response),
                            });
                        }
                        Err(err) => match disposition(&err) {
                            Disposition::Permanent(reason) => {
                                inner.fail(action, &err, reason);
                                return Err(err);
                            }
                            Disposition::Blocked => inner.block(),
                            Disposition::Transient => {
                                debug!(action_id = %action.id, error = %err, "immediate execution failed, queueing");
                            }
                        },
                    }
                }
            }
        }

        inner.enqueue(action).await
    }

    /// Wakes the drain loop.
    pub fn kick(&self) {
        self.inner.wake.notify_one();
    }

    /// Lifts the pause caused by a lost session and resumes draining.
    pub fn resume(&self) {
        if self.inner.auth_blocked.swap(false, Ordering::SeqCst) {
            info!("session restored, resuming queue processing");
        }
        self.kick();
    }

    /// Drops every pending action (logout).
    pub async fn clear(&self) -> Result<(), SyncError> {
        let _gate = self.inner.gate.lock().await;
        self.inner.queue.clear().await?;
        self.inner.publish_status();
        Ok(())
    }

    pub fn status(&self) -> QueueStatus {
        self.inner.snapshot()
    }

    pub fn state(&self) -> ProcessorState {
        self.inner.state()
    }

    pub fn queue(&self) -> &Arc<PersistentQueue> {
        &self.inner.queue
    }

    /// Registers a listener for action outcomes.
    pub fn subscribe_events<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&QueueEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    /// Registers a listener for status changes.
    pub fn subscribe_status<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&QueueStatus) + Send + Sync + 'static,
    {
        self.inner.status.subscribe(callback)
    }

    fn worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Lifecycle for QueueProcessor {
    /// Starts the worker. Queued actions restored from storage are drained
    /// as soon as the network is up.
    async fn initialize(&self) -> Result<(), SyncError> {
        let mut slot = self.worker();
        if slot.is_some() {
            return Ok(());
        }
        if self.inner.state() == ProcessorState::Disposed {
            return Err(SyncError::Internal("queue processor is disposed".to_string()));
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let online_edges = self.inner.monitor.subscribe(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.publish_status();
            }
        });
        let handle = tokio::spawn(run(Arc::clone(&self.inner), self.inner.monitor.watch()));
        *slot = Some(Worker {
            handle,
            _online_edges: online_edges,
        });
        debug!(pending = self.inner.queue.len(), "queue processor started");
        Ok(())
    }

    /// Stops the worker. An in-flight execution or backoff wait is abandoned;
    /// the action stays in the queue with its retry count unchanged.
    async fn dispose(&self) {
        self.inner.apply(ProcessorInput::Dispose);
        self.inner.cancel.cancel();
        let worker = self.worker().take();
        if let Some(worker) = worker {
            let _ = worker.handle.await;
        }
        self.inner.events.clear();
        self.inner.status.clear();
    }
}

// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered, durable, bounded list of pending mutations.
//!
//! Every operation writes the whole queue under `queue:actions` with a single
//! `set` before it returns, so a crash after any call leaves the persisted copy
//! equal to the in-memory one.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use ferry_core::{ActionId, Listeners, QueuedAction, SubscriptionHandle, SyncError};

use crate::persistent::{Namespace, PersistentStore};

const NAMESPACE: &str = "queue";
const ACTIONS_KEY: &str = "actions";
const CORRUPT_KEY: &str = "actions.corrupt";

/// Emitted when capacity overflow evicts the oldest action.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueLoss {
    pub action: QueuedAction,
    pub capacity: usize,
}

/// FIFO queue of [`QueuedAction`]s persisted in the `queue` namespace.
pub struct PersistentQueue {
    ns: Namespace,
    capacity: usize,
    actions: Mutex<VecDeque<QueuedAction>>,
    len: AtomicUsize,
    /// Head handed out by [`PersistentQueue::begin_head`] and not yet ended.
    in_flight: std::sync::Mutex<Option<ActionId>>,
    losses: Listeners<QueueLoss>,
}

impl PersistentQueue {
    /// Restores the queue from `store`.
    ///
    /// A persisted blob that cannot be decoded is moved aside to
    /// `queue:actions.corrupt` and the queue starts empty.
    pub async fn load(store: &Arc<PersistentStore>, capacity: usize) -> Result<Self, SyncError> {
        let ns = store.namespace(NAMESPACE);
        let capacity = capacity.max(1);

        let mut actions: VecDeque<QueuedAction> = match ns.get_json::<Vec<QueuedAction>>(ACTIONS_KEY).await {
            Ok(Some(list)) => list.into(),
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!(error = %e, "persisted queue is unreadable, starting empty");
                if let Some(bytes) = ns.get_raw(ACTIONS_KEY).await {
                    ns.set_raw(CORRUPT_KEY, bytes).await;
                }
                ns.remove(ACTIONS_KEY).await;
                VecDeque::new()
            }
        };

        if actions.len() > capacity {
            let excess = actions.len() - capacity;
            warn!(excess, capacity, "persisted queue exceeds capacity, dropping oldest");
            actions.drain(..excess);
            ns.set_json(ACTIONS_KEY, &actions).await?;
        }

        debug!(restored = actions.len(), "queue loaded");
        Ok(Self {
            ns,
            capacity,
            len: AtomicUsize::new(actions.len()),
            actions: Mutex::new(actions),
            in_flight: std::sync::Mutex::new(None),
            losses: Listeners::new(),
        })
    }

    async fn persist(&self, actions: &VecDeque<QueuedAction>) -> Result<(), SyncError> {
        self.len.store(actions.len(), Ordering::SeqCst);
        self.ns.set_json(ACTIONS_KEY, actions).await
    }

    /// Appends `action` and persists before returning.
    ///
    /// If the queue was full the oldest action is evicted, reported to loss
    /// listeners, and returned. An in-flight head is never evicted: the next
    /// oldest goes instead, and when there is none the queue holds one extra
    /// entry until the head resolves.
    pub async fn enqueue(&self, action: QueuedAction) -> Result<Option<QueuedAction>, SyncError> {
        let mut actions = self.actions.lock().await;
        let dropped = if actions.len() >= self.capacity {
            let head_in_flight = {
                let in_flight = self.in_flight();
                in_flight.is_some() && actions.front().map(|a| &a.id) == in_flight.as_ref()
            };
            actions.remove(usize::from(head_in_flight))
        } else {
            None
        };
        debug!(action_id = %action.id, kind = %action.kind, "enqueued");
        actions.push_back(action);
        self.persist(&actions).await?;
        drop(actions);

        if let Some(lost) = &dropped {
            warn!(action_id = %lost.id, capacity = self.capacity, "queue full, dropped oldest action");
            self.losses.emit(&QueueLoss {
                action: lost.clone(),
                capacity: self.capacity,
            });
        }
        Ok(dropped)
    }

    /// The earliest unresolved action, left in place.
    pub async fn peek_head(&self) -> Option<QueuedAction> {
        self.actions.lock().await.front().cloned()
    }

    /// Like [`peek_head`](Self::peek_head), and marks the head as in flight so
    /// overflow cannot evict it until [`end_head`](Self::end_head).
    pub async fn begin_head(&self) -> Option<QueuedAction> {
        let actions = self.actions.lock().await;
        let head = actions.front().cloned();
        *self.in_flight() = head.as_ref().map(|a| a.id.clone());
        head
    }

    pub fn end_head(&self) {
        self.in_flight().take();
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, Option<ActionId>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes the head if it is still `id`.
    pub async fn resolve_head(&self, id: &ActionId) -> Result<Option<QueuedAction>, SyncError> {
        let mut actions = self.actions.lock().await;
        if actions.front().map(|a| &a.id) != Some(id) {
            return Ok(None);
        }
        let removed = actions.pop_front();
        self.persist(&actions).await?;
        Ok(removed)
    }

    /// Increments the head's retry count and moves it to the tail.
    pub async fn requeue_head(&self, id: &ActionId) -> Result<Option<QueuedAction>, SyncError> {
        let mut actions = self.actions.lock().await;
        if actions.front().map(|a| &a.id) != Some(id) {
            return Ok(None);
        }
        let Some(mut head) = actions.pop_front() else {
            return Ok(None);
        };
        head.retry_count += 1;
        actions.push_back(head.clone());
        self.persist(&actions).await?;
        Ok(Some(head))
    }

    /// Increments the head's retry count without moving it.
    pub async fn bump_head_retry(&self, id: &ActionId) -> Result<Option<QueuedAction>, SyncError> {
        let mut actions = self.actions.lock().await;
        let updated = match actions.front_mut() {
            Some(head) if &head.id == id => {
                head.retry_count += 1;
                head.clone()
            }
            _ => return Ok(None),
        };
        self.persist(&actions).await?;
        Ok(Some(updated))
    }

    pub async fn snapshot(&self) -> Vec<QueuedAction> {
        self.actions.lock().await.iter().cloned().collect()
    }

    /// Drops every pending action (logout).
    pub async fn clear(&self) -> Result<(), SyncError> {
        let mut actions = self.actions.lock().await;
        actions.clear();
        self.persist(&actions).await
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registers a listener for capacity-overflow losses.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&QueueLoss) + Send + Sync + 'static,
    {
        self.losses.subscribe(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{HttpMethod, NewAction};
    use proptest::prelude::*;
    use std::sync::Mutex as StdMutex;

    fn action(kind: &str) -> QueuedAction {
        NewAction::new(kind, HttpMethod::Post, "/things").into_queued()
    }

    async fn reload(store: &Arc<PersistentStore>, capacity: usize) -> Vec<QueuedAction> {
        PersistentQueue::load(store, capacity).await.unwrap().snapshot().await
    }

    #[tokio::test]
    async fn enqueue_is_persisted_before_return() {
        let store = PersistentStore::in_memory();
        let queue = PersistentQueue::load(&store, 10).await.unwrap();
        let a = action("a");
        queue.enqueue(a.clone()).await.unwrap();

        assert_eq!(reload(&store, 10).await, vec![a]);
    }

    #[tokio::test]
    async fn fifo_peek_and_resolve() {
        let store = PersistentStore::in_memory();
        let queue = PersistentQueue::load(&store, 10).await.unwrap();
        let (a, b) = (action("a"), action("b"));
        queue.enqueue(a.clone()).await.unwrap();
        queue.enqueue(b.clone()).await.unwrap();

        assert_eq!(queue.peek_head().await, Some(a.clone()));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.resolve_head(&a.id).await.unwrap(), Some(a));
        assert_eq!(queue.peek_head().await, Some(b.clone()));
        assert_eq!(reload(&store, 10).await, vec![b]);
    }

    #[tokio::test]
    async fn overflow_skips_the_in_flight_head() {
        let store = PersistentStore::in_memory();
        let queue = PersistentQueue::load(&store, 2).await.unwrap();
        let (a, b, c) = (action("a"), action("b"), action("c"));
        queue.enqueue(a.clone()).await.unwrap();
        queue.enqueue(b.clone()).await.unwrap();

        assert_eq!(queue.begin_head().await, Some(a.clone()));
        assert_eq!(queue.enqueue(c.clone()).await.unwrap(), Some(b));
        assert_eq!(queue.snapshot().await, vec![a.clone(), c.clone()]);

        queue.end_head();
        let d = action("d");
        assert_eq!(queue.enqueue(d.clone()).await.unwrap(), Some(a));
        assert_eq!(reload(&store, 2).await, vec![c, d]);
    }

    #[tokio::test]
    async fn single_slot_queue_keeps_in_flight_head_and_newcomer() {
        let store = PersistentStore::in_memory();
        let queue = PersistentQueue::load(&store, 1).await.unwrap();
        let (a, b) = (action("a"), action("b"));
        queue.enqueue(a.clone()).await.unwrap();
        queue.begin_head().await;

        assert_eq!(queue.enqueue(b.clone()).await.unwrap(), None);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.resolve_head(&a.id).await.unwrap(), Some(a));
        queue.end_head();
        assert_eq!(queue.snapshot().await, vec![b]);
    }

    #[tokio::test]
    async fn resolve_with_stale_id_is_a_noop() {
        let store = PersistentStore::in_memory();
        let queue = PersistentQueue::load(&store, 10).await.unwrap();
        let a = action("a");
        queue.enqueue(a.clone()).await.unwrap();
        let other = ActionId::from("not-the-head");

        assert_eq!(queue.resolve_head(&other).await.unwrap(), None);
        assert_eq!(queue.requeue_head(&other).await.unwrap(), None);
        assert_eq!(queue.bump_head_retry(&other).await.unwrap(), None);
        assert_eq!(queue.snapshot().await, vec![a]);
    }

    #[tokio::test]
    async fn requeue_moves_head_to_tail_with_incremented_retry() {
        let store = PersistentStore::in_memory();
        let queue = PersistentQueue::load(&store, 10).await.unwrap();
        let (a, b, c) = (action("a"), action("b"), action("c"));
        for x in [&a, &b, &c] {
            queue.enqueue(x.clone()).await.unwrap();
        }

        let moved = queue.requeue_head(&a.id).await.unwrap().unwrap();
        assert_eq!(moved.retry_count, 1);

        let kinds: Vec<_> = queue.snapshot().await.into_iter().map(|x| x.kind).collect();
        assert_eq!(kinds, vec!["b", "c", "a"]);
        assert_eq!(reload(&store, 10).await[2].retry_count, 1);
    }

    #[tokio::test]
    async fn bump_keeps_head_in_place() {
        let store = PersistentStore::in_memory();
        let queue = PersistentQueue::load(&store, 10).await.unwrap();
        let (a, b) = (action("a"), action("b"));
        queue.enqueue(a.clone()).await.unwrap();
        queue.enqueue(b).await.unwrap();

        queue.bump_head_retry(&a.id).await.unwrap();
        queue.bump_head_retry(&a.id).await.unwrap();
        let head = queue.peek_head().await.unwrap();
        assert_eq!(head.id, a.id);
        assert_eq!(head.retry_count, 2);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_reports_loss() {
        let store = PersistentStore::in_memory();
        let queue = PersistentQueue::load(&store, 2).await.unwrap();
        let losses = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&losses);
        let _h = queue.subscribe(move |loss| sink.lock().unwrap().push(loss.action.kind.clone()));

        let (a, b, c) = (action("a"), action("b"), action("c"));
        assert_eq!(queue.enqueue(a.clone()).await.unwrap(), None);
        assert_eq!(queue.enqueue(b).await.unwrap(), None);
        assert_eq!(queue.enqueue(c).await.unwrap(), Some(a));

        assert_eq!(*losses.lock().unwrap(), vec!["a"]);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn corrupt_blob_is_set_aside() {
        let store = PersistentStore::in_memory();
        store.set("queue:actions", b"[{\"broken\"".to_vec()).await;

        let queue = PersistentQueue::load(&store, 10).await.unwrap();
        assert!(queue.is_empty());
        assert_eq!(
            store.get("queue:actions.corrupt").await,
            Some(b"[{\"broken\"".to_vec())
        );
        assert_eq!(store.get("queue:actions").await, None);
    }

    #[tokio::test]
    async fn clear_empties_persisted_copy() {
        let store = PersistentStore::in_memory();
        let queue = PersistentQueue::load(&store, 10).await.unwrap();
        queue.enqueue(action("a")).await.unwrap();
        queue.clear().await.unwrap();
        assert!(queue.is_empty());
        assert!(reload(&store, 10).await.is_empty());
    }

    #[tokio::test]
    async fn works_on_sqlite_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ferry.db");
        let a = action("a");
        {
            let backend = crate::SqliteStore::open(&path).await.unwrap();
            let store = PersistentStore::new(Arc::new(backend));
            let queue = PersistentQueue::load(&store, 10).await.unwrap();
            queue.enqueue(a.clone()).await.unwrap();
        }
        let backend = crate::SqliteStore::open(&path).await.unwrap();
        let store = PersistentStore::new(Arc::new(backend));
        assert_eq!(reload(&store, 10).await, vec![a]);
    }

    #[tokio::test]
    async fn enqueue_survives_backend_failure() {
        let store = PersistentStore::new(Arc::new(ferry_test_utils::FailingStore::new()));
        let queue = PersistentQueue::load(&store, 10).await.unwrap();
        queue.enqueue(action("a")).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert!(store.is_degraded());
    }

    fn arb_action() -> impl Strategy<Value = QueuedAction> {
        ("[a-z.]{1,12}", 0u32..5, proptest::option::of("[a-z0-9-]{1,8}")).prop_map(
            |(kind, retries, corr)| {
                let mut new = NewAction::new(kind, HttpMethod::Patch, "/jobs/1")
                    .with_payload(serde_json::json!({"n": retries}));
                if let Some(c) = corr {
                    new = new.with_correlation_id(c);
                }
                let mut queued = new.into_queued();
                queued.retry_count = retries;
                queued
            },
        )
    }

    proptest! {
        #[test]
        fn load_after_save_is_identity(actions in proptest::collection::vec(arb_action(), 0..8)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let restored = rt.block_on(async {
                let store = PersistentStore::in_memory();
                let queue = PersistentQueue::load(&store, 16).await.unwrap();
                for a in &actions {
                    queue.enqueue(a.clone()).await.unwrap();
                }
                reload(&store, 16).await
            });
            prop_assert_eq!(restored, actions);
        }
    }
}

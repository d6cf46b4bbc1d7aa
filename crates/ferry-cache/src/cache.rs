// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-entity ordered view fed by optimistic writes and server pushes.
//!
//! Each entity is persisted under `cache:entity:<id>` and the set of entities
//! under `cache:index`. Every mutating call persists the entity it touched
//! before returning. Change listeners run after the state lock is released.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use ferry_core::{CorrelationId, EntityId, Lifecycle, Listeners, SubscriptionHandle, SyncError};
use ferry_storage::{Namespace, PersistentStore};

use crate::record::{server_id, CacheRecord, PushEvent, RecordStatus, CORRELATION_FIELD};

const NAMESPACE: &str = "cache";
const INDEX_KEY: &str = "index";
const ENTITY_PREFIX: &str = "entity:";

fn entity_key(id: &EntityId) -> String {
    format!("{ENTITY_PREFIX}{id}")
}

/// Notification delivered to cache listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheChange {
    Inserted {
        entity_id: EntityId,
        record: CacheRecord,
    },
    Updated {
        entity_id: EntityId,
        record: CacheRecord,
    },
    Removed {
        entity_id: EntityId,
        record_id: String,
    },
    /// The entity's records were replaced by a fetch.
    Replaced {
        entity_id: EntityId,
    },
    Cleared,
}

/// What the caller decided for a stale pending record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Drop the local record.
    Discard,
    /// Keep it pending and stop reporting it as unconfirmed this session.
    Retain,
}

/// A pending record older than the staleness threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct UnconfirmedRecord {
    pub entity_id: EntityId,
    pub record: CacheRecord,
}

#[derive(Default)]
struct State {
    entities: BTreeMap<EntityId, Vec<CacheRecord>>,
    correlations: HashMap<CorrelationId, EntityId>,
    retained: HashSet<CorrelationId>,
}

impl State {
    fn forget_correlation(&mut self, record: &CacheRecord) {
        if let Some(cid) = &record.correlation_id {
            self.correlations.remove(cid);
            self.retained.remove(cid);
        }
    }
}

/// Result of folding a server record into an entity.
enum Merge {
    Inserted(CacheRecord),
    Updated {
        record: CacheRecord,
        /// A second record with the same server id, removed to keep ids unique.
        duplicate: Option<CacheRecord>,
    },
}

/// Applies a server version of a record: correlation match first, then server
/// id match, otherwise append. Without a server id nothing is appended.
fn merge_into(
    records: &mut Vec<CacheRecord>,
    server_id: Option<&str>,
    correlation_id: Option<&CorrelationId>,
    data: &Map<String, Value>,
) -> Option<Merge> {
    let by_correlation = correlation_id
        .and_then(|cid| records.iter().position(|r| r.correlation_id.as_ref() == Some(cid)));
    let by_id = server_id.and_then(|id| records.iter().position(|r| r.id == id));

    let pos = match (by_correlation, by_id) {
        (Some(pos), _) | (None, Some(pos)) => pos,
        (None, None) => {
            let record = CacheRecord::confirmed(
                server_id?.to_string(),
                correlation_id.cloned(),
                data.clone(),
            );
            records.push(record.clone());
            return Some(Merge::Inserted(record));
        }
    };

    records[pos].merge_server(server_id, data);
    if records[pos].correlation_id.is_none() {
        records[pos].correlation_id = correlation_id.cloned();
    }
    let record = records[pos].clone();
    let duplicate = match by_id {
        Some(dup) if dup != pos => Some(records.remove(dup)),
        _ => None,
    };
    Some(Merge::Updated { record, duplicate })
}

/// Materialized local view of server entities.
pub struct ReconciliationCache {
    ns: Namespace,
    staleness: Duration,
    state: Mutex<State>,
    changes: Listeners<CacheChange>,
}

impl ReconciliationCache {
    /// Restores every persisted entity from `store`.
    ///
    /// Unreadable entities are dropped with a warning. Pending records older
    /// than `staleness` are kept and reported through [`unconfirmed`](Self::unconfirmed).
    pub async fn load(store: &Arc<PersistentStore>, staleness: Duration) -> Result<Self, SyncError> {
        let ns = store.namespace(NAMESPACE);

        let index: Vec<EntityId> = match ns.get_json(INDEX_KEY).await {
            Ok(Some(index)) => index,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "cache index is unreadable, rebuilding from entity keys");
                ns.keys()
                    .await
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(ENTITY_PREFIX).map(EntityId::from))
                    .collect()
            }
        };

        let mut state = State::default();
        for entity_id in index {
            let key = entity_key(&entity_id);
            match ns.get_json::<Vec<CacheRecord>>(&key).await {
                Ok(Some(records)) => {
                    for record in &records {
                        if let Some(cid) = &record.correlation_id {
                            state.correlations.insert(cid.clone(), entity_id.clone());
                        }
                    }
                    state.entities.insert(entity_id, records);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "cached entity is unreadable, dropping it");
                    ns.remove(&key).await;
                }
            }
        }

        let cache = Self {
            ns,
            staleness,
            state: Mutex::new(state),
            changes: Listeners::new(),
        };
        {
            let state = cache.state.lock().await;
            cache.persist_index(&state).await?;
        }

        let stale = cache.unconfirmed().await.len();
        if stale > 0 {
            info!(count = stale, "pending records from a previous session are unconfirmed");
        }
        debug!(entities = cache.entity_ids().await.len(), "cache loaded");
        Ok(cache)
    }

    async fn persist_entity(&self, state: &State, entity_id: &EntityId) -> Result<(), SyncError> {
        match state.entities.get(entity_id) {
            Some(records) => self.ns.set_json(&entity_key(entity_id), records).await,
            None => {
                self.ns.remove(&entity_key(entity_id)).await;
                Ok(())
            }
        }
    }

    async fn persist_index(&self, state: &State) -> Result<(), SyncError> {
        let index: Vec<&EntityId> = state.entities.keys().collect();
        self.ns.set_json(INDEX_KEY, &index).await
    }

    fn emit_all(&self, changes: Vec<CacheChange>) {
        for change in &changes {
            self.changes.emit(change);
        }
    }

    /// Appends a pending record for a locally issued mutation.
    ///
    /// Returns `false` without writing when a record with `correlation_id`
    /// already exists, which happens when the server echo arrived first.
    pub async fn apply_optimistic(
        &self,
        entity_id: &EntityId,
        correlation_id: &CorrelationId,
        data: Map<String, Value>,
    ) -> Result<bool, SyncError> {
        let mut state = self.state.lock().await;
        if state.correlations.contains_key(correlation_id) {
            debug!(correlation_id = %correlation_id, "correlation already cached, skipping optimistic write");
            return Ok(false);
        }

        let record = CacheRecord::pending(correlation_id.clone(), data);
        let new_entity = !state.entities.contains_key(entity_id);
        state
            .entities
            .entry(entity_id.clone())
            .or_default()
            .push(record.clone());
        state
            .correlations
            .insert(correlation_id.clone(), entity_id.clone());

        self.persist_entity(&state, entity_id).await?;
        if new_entity {
            self.persist_index(&state).await?;
        }
        drop(state);

        debug!(entity_id = %entity_id, correlation_id = %correlation_id, "optimistic record added");
        self.changes.emit(&CacheChange::Inserted {
            entity_id: entity_id.clone(),
            record,
        });
        Ok(true)
    }

    /// Applies a server push event. Events must be applied in arrival order.
    pub async fn apply_push(&self, event: &PushEvent) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        let entity_id = &event.entity_id;
        let new_entity = !state.entities.contains_key(entity_id);

        let records = state.entities.entry(entity_id.clone()).or_default();
        let merge = merge_into(records, Some(&event.id), event.correlation_id.as_ref(), &event.data);
        let changes = self.record_merge(&mut state, entity_id, event.correlation_id.as_ref(), merge);

        self.persist_entity(&state, entity_id).await?;
        if new_entity {
            self.persist_index(&state).await?;
        }
        drop(state);

        debug!(entity_id = %entity_id, record_id = %event.id, "push applied");
        self.emit_all(changes);
        Ok(())
    }

    /// Marks the record for `correlation_id` confirmed, merging the fields of
    /// the server's success response (a JSON object) into it.
    ///
    /// Returns `false` if no record carries that correlation id.
    pub async fn confirm(&self, correlation_id: &CorrelationId, response: &Value) -> Result<bool, SyncError> {
        let mut state = self.state.lock().await;
        let Some(entity_id) = state.correlations.get(correlation_id).cloned() else {
            return Ok(false);
        };
        let data = response.as_object().cloned().unwrap_or_default();
        let sid = server_id(&data);

        let Some(records) = state.entities.get_mut(&entity_id) else {
            return Ok(false);
        };
        let Some(merge) = merge_into(records, sid.as_deref(), Some(correlation_id), &data) else {
            return Ok(false);
        };
        let changes = self.record_merge(&mut state, &entity_id, Some(correlation_id), Some(merge));
        state.retained.remove(correlation_id);

        self.persist_entity(&state, &entity_id).await?;
        drop(state);

        self.emit_all(changes);
        Ok(true)
    }

    fn record_merge(
        &self,
        state: &mut State,
        entity_id: &EntityId,
        correlation_id: Option<&CorrelationId>,
        merge: Option<Merge>,
    ) -> Vec<CacheChange> {
        if let Some(cid) = correlation_id {
            state.correlations.insert(cid.clone(), entity_id.clone());
        }
        match merge {
            None => Vec::new(),
            Some(Merge::Inserted(record)) => vec![CacheChange::Inserted {
                entity_id: entity_id.clone(),
                record,
            }],
            Some(Merge::Updated { record, duplicate }) => {
                let mut changes = Vec::new();
                if let Some(dup) = duplicate {
                    if dup.correlation_id.as_ref() != record.correlation_id.as_ref() {
                        state.forget_correlation(&dup);
                    }
                    changes.push(CacheChange::Removed {
                        entity_id: entity_id.clone(),
                        record_id: dup.id,
                    });
                }
                changes.push(CacheChange::Updated {
                    entity_id: entity_id.clone(),
                    record,
                });
                changes
            }
        }
    }

    /// Marks the pending record for `correlation_id` failed.
    ///
    /// Confirmed records are left untouched. Returns whether a record changed.
    pub async fn mark_failed(&self, correlation_id: &CorrelationId) -> Result<bool, SyncError> {
        let mut state = self.state.lock().await;
        let Some(entity_id) = state.correlations.get(correlation_id).cloned() else {
            return Ok(false);
        };
        let updated = state.entities.get_mut(&entity_id).and_then(|records| {
            let record = records
                .iter_mut()
                .find(|r| r.correlation_id.as_ref() == Some(correlation_id) && r.is_pending())?;
            record.status = RecordStatus::Failed;
            record.updated_at = Utc::now();
            Some(record.clone())
        });
        let Some(record) = updated else {
            return Ok(false);
        };
        state.retained.remove(correlation_id);
        self.persist_entity(&state, &entity_id).await?;
        drop(state);

        debug!(entity_id = %entity_id, correlation_id = %correlation_id, "optimistic record failed");
        self.changes.emit(&CacheChange::Updated { entity_id, record });
        Ok(true)
    }

    /// Replaces the confirmed records of `entity_id` with a fetched list.
    ///
    /// Local records that are not yet confirmed stay at the tail, unless the
    /// fetched list already contains their correlation id. Fetched objects
    /// without an `id` are skipped.
    pub async fn apply_fetch(&self, entity_id: &EntityId, fetched: &[Value]) -> Result<(), SyncError> {
        let mut records: Vec<CacheRecord> = Vec::with_capacity(fetched.len());
        for data in fetched.iter().filter_map(Value::as_object) {
            let Some(id) = server_id(data) else {
                warn!(entity_id = %entity_id, "fetched record has no id, skipping");
                continue;
            };
            let correlation_id = data
                .get(CORRELATION_FIELD)
                .and_then(Value::as_str)
                .map(CorrelationId::from);
            records.retain(|r| r.id != id);
            records.push(CacheRecord::confirmed(id, correlation_id, data.clone()));
        }

        let mut state = self.state.lock().await;
        let new_entity = !state.entities.contains_key(entity_id);
        let previous = state.entities.remove(entity_id).unwrap_or_default();
        for record in &previous {
            state.forget_correlation(record);
        }

        let echoed: HashSet<&CorrelationId> =
            records.iter().filter_map(|r| r.correlation_id.as_ref()).collect();
        let local: Vec<CacheRecord> = previous
            .into_iter()
            .filter(|r| r.status != RecordStatus::Confirmed)
            .filter(|r| r.correlation_id.as_ref().is_none_or(|cid| !echoed.contains(cid)))
            .collect();
        records.extend(local);

        for record in &records {
            if let Some(cid) = &record.correlation_id {
                state.correlations.insert(cid.clone(), entity_id.clone());
            }
        }
        let count = records.len();
        state.entities.insert(entity_id.clone(), records);

        self.persist_entity(&state, entity_id).await?;
        if new_entity {
            self.persist_index(&state).await?;
        }
        drop(state);

        debug!(entity_id = %entity_id, records = count, "entity replaced from fetch");
        self.changes.emit(&CacheChange::Replaced {
            entity_id: entity_id.clone(),
        });
        Ok(())
    }

    /// Pending records older than the staleness threshold, excluding ones
    /// the caller chose to retain.
    pub async fn unconfirmed(&self) -> Vec<UnconfirmedRecord> {
        let now = Utc::now();
        let state = self.state.lock().await;
        let mut stale = Vec::new();
        for (entity_id, records) in &state.entities {
            for record in records.iter().filter(|r| r.is_pending()) {
                let old_enough = (now - record.created_at)
                    .to_std()
                    .is_ok_and(|age| age >= self.staleness);
                let retained = record
                    .correlation_id
                    .as_ref()
                    .is_some_and(|cid| state.retained.contains(cid));
                if old_enough && !retained {
                    stale.push(UnconfirmedRecord {
                        entity_id: entity_id.clone(),
                        record: record.clone(),
                    });
                }
            }
        }
        stale
    }

    /// Applies the caller's decision for a stale pending record.
    ///
    /// Returns `false` if no pending record matches.
    pub async fn resolve_unconfirmed(
        &self,
        entity_id: &EntityId,
        correlation_id: &CorrelationId,
        resolution: Resolution,
    ) -> Result<bool, SyncError> {
        let mut state = self.state.lock().await;
        let Some(pos) = state.entities.get(entity_id).and_then(|records| {
            records
                .iter()
                .position(|r| r.correlation_id.as_ref() == Some(correlation_id) && r.is_pending())
        }) else {
            return Ok(false);
        };

        match resolution {
            Resolution::Retain => {
                state.retained.insert(correlation_id.clone());
                Ok(true)
            }
            Resolution::Discard => {
                let mut emptied = false;
                let mut removed = None;
                if let Some(records) = state.entities.get_mut(entity_id) {
                    removed = Some(records.remove(pos));
                    emptied = records.is_empty();
                }
                if emptied {
                    state.entities.remove(entity_id);
                }
                let Some(record) = removed else {
                    return Ok(false);
                };
                state.forget_correlation(&record);
                self.persist_entity(&state, entity_id).await?;
                if emptied {
                    self.persist_index(&state).await?;
                }
                drop(state);

                info!(entity_id = %entity_id, correlation_id = %correlation_id, "unconfirmed record discarded");
                self.changes.emit(&CacheChange::Removed {
                    entity_id: entity_id.clone(),
                    record_id: record.id,
                });
                Ok(true)
            }
        }
    }

    /// Ordered records of one entity; empty if the entity is unknown.
    pub async fn snapshot(&self, entity_id: &EntityId) -> Vec<CacheRecord> {
        self.state
            .lock()
            .await
            .entities
            .get(entity_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn entity_ids(&self) -> Vec<EntityId> {
        self.state.lock().await.entities.keys().cloned().collect()
    }

    /// Removes every cached entity (logout).
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        *state = State::default();
        self.ns.clear().await;
        drop(state);
        info!("cache cleared");
        self.changes.emit(&CacheChange::Cleared);
    }

    /// Registers a listener for cache changes.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&CacheChange) + Send + Sync + 'static,
    {
        self.changes.subscribe(callback)
    }

}

#[async_trait]
impl Lifecycle for ReconciliationCache {
    /// State is restored by [`ReconciliationCache::load`]; nothing to start.
    async fn initialize(&self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn dispose(&self) {
        self.changes.clear();
    }
}

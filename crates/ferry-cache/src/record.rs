// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cached records and the push payloads that update them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;

use ferry_core::{CorrelationId, EntityId, SyncError};

/// Payload field naming the parent entity of a pushed record.
pub const ENTITY_FIELD: &str = "entity_id";
/// Payload field carrying the server id of a record.
pub const ID_FIELD: &str = "id";
/// Payload field echoing the client correlation id.
pub const CORRELATION_FIELD: &str = "correlation_id";

/// Confirmation state of a cached record.
///
/// `Pending` moves to `Confirmed` or `Failed` once and never comes back.
/// A `Failed` record may still be confirmed by a late server echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Confirmed,
    Failed,
}

/// One child record of a cached entity (a message, a job update, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Server id once known; the correlation id while still pending.
    pub id: String,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    pub data: Map<String, Value>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheRecord {
    /// A locally originated record awaiting server confirmation.
    pub fn pending(correlation_id: CorrelationId, data: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: correlation_id.as_str().to_string(),
            correlation_id: Some(correlation_id),
            data,
            status: RecordStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// A record as the server reported it.
    pub fn confirmed(id: String, correlation_id: Option<CorrelationId>, data: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id,
            correlation_id,
            data,
            status: RecordStatus::Confirmed,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RecordStatus::Pending
    }

    /// Overwrites fields from the server version and marks the record confirmed.
    ///
    /// Fields the server did not send keep their local value.
    pub(crate) fn merge_server(&mut self, server_id: Option<&str>, data: &Map<String, Value>) {
        for (key, value) in data {
            self.data.insert(key.clone(), value.clone());
        }
        if let Some(id) = server_id {
            self.id = id.to_string();
        }
        self.status = RecordStatus::Confirmed;
        self.updated_at = Utc::now();
    }
}

/// Reads the server id of a record payload. Numeric ids are accepted.
pub fn server_id(data: &Map<String, Value>) -> Option<String> {
    match data.get(ID_FIELD)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A server-originated record update for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub entity_id: EntityId,
    pub id: String,
    pub correlation_id: Option<CorrelationId>,
    pub data: Map<String, Value>,
}

impl PushEvent {
    /// Parses a channel payload of the form
    /// `{"entity_id": ..., "id": ..., "correlation_id"?: ..., ...fields}`.
    ///
    /// The whole object (ids included) becomes the record data.
    pub fn from_payload(payload: &Value) -> Result<Self, SyncError> {
        let Value::Object(data) = payload else {
            return Err(SyncError::Config("push payload is not a JSON object".to_string()));
        };
        let entity_id = match data.get(ENTITY_FIELD) {
            Some(Value::String(s)) if !s.is_empty() => EntityId::from(s.as_str()),
            Some(Value::Number(n)) => EntityId::from(n.to_string()),
            _ => {
                return Err(SyncError::Config(format!(
                    "push payload has no `{ENTITY_FIELD}`"
                )));
            }
        };
        let id = server_id(data)
            .ok_or_else(|| SyncError::Config(format!("push payload has no `{ID_FIELD}`")))?;
        let correlation_id = data
            .get(CORRELATION_FIELD)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(CorrelationId::from);

        Ok(Self {
            entity_id,
            id,
            correlation_id,
            data: data.clone(),
        })
    }
}

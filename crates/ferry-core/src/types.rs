// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common data model shared across Ferry crates.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generates a fresh random (UUID v4) identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Unique identifier of a queued action, generated at enqueue time.
    ActionId
);
string_id!(
    /// Client-generated id linking a mutation to its later server echo.
    CorrelationId
);
string_id!(
    /// Stable id of a cached entity (conversation, job, ...).
    EntityId
);

/// HTTP method of a mutation or authorized request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// A request handed to the [`HttpTransport`](crate::traits::HttpTransport).
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    /// Sets a header, replacing any existing value with the same
    /// (case-insensitive) name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and raw body returned by the request function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parses the body as JSON. An empty body parses as `Value::Null`.
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body)
    }
}

/// Local optimistic write that accompanies a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisticWrite {
    pub entity_id: EntityId,
    pub data: Map<String, Value>,
}

/// A pending mutation as stored in the persistent queue.
///
/// Only `retry_count` changes while the action sits in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub id: ActionId,
    /// Tag identifying the mutation type (e.g. `message.send`).
    pub kind: String,
    /// Path relative to the API base URL, or an absolute URL.
    pub endpoint: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default)]
    pub optimistic: Option<OptimisticWrite>,
}

/// Caller-side description of a mutation, before it is assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub kind: String,
    pub method: HttpMethod,
    pub endpoint: String,
    pub payload: Option<Value>,
    pub correlation_id: Option<CorrelationId>,
    pub optimistic: Option<OptimisticWrite>,
}

impl NewAction {
    pub fn new(kind: impl Into<String>, method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            method,
            endpoint: endpoint.into(),
            payload: None,
            correlation_id: None,
            optimistic: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Attaches a local optimistic write for `entity_id`.
    pub fn with_optimistic(mut self, entity_id: impl Into<EntityId>, data: Map<String, Value>) -> Self {
        self.optimistic = Some(OptimisticWrite {
            entity_id: entity_id.into(),
            data,
        });
        self
    }

    /// Assigns an id and creation time.
    ///
    /// Actions that write to the cache always leave with a correlation id.
    pub fn into_queued(self) -> QueuedAction {
        let correlation_id = match (self.correlation_id, &self.optimistic) {
            (Some(id), _) => Some(id),
            (None, Some(_)) => Some(CorrelationId::generate()),
            (None, None) => None,
        };
        QueuedAction {
            id: ActionId::generate(),
            kind: self.kind,
            endpoint: self.endpoint,
            method: self.method,
            payload: self.payload,
            created_at: Utc::now(),
            retry_count: 0,
            correlation_id,
            optimistic: self.optimistic,
        }
    }
}

/// Authentication credential. Only the credential refresher mutates it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub expiry: DateTime<Utc>,
    pub refresh_token: String,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        expiry: DateTime<Utc>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            expiry,
            refresh_token: refresh_token.into(),
        }
    }

    /// Remaining validity at `now`; zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expiry - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.remaining(now) < threshold
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("expiry", &self.expiry)
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// States of the queue processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessorState {
    /// Nothing to do, or waiting for connectivity.
    Idle,
    /// Executing queued actions one at a time.
    Draining,
    /// Connectivity dropped mid-drain; resumes on reconnect.
    Paused,
    /// Torn down; no further work.
    Disposed,
}

/// Snapshot exposed to observers of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub is_online: bool,
    pub queue_size: usize,
    pub is_processing: bool,
    pub state: ProcessorState,
}

/// Result of `enqueue_or_execute`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub queued: bool,
    pub id: ActionId,
    pub correlation_id: Option<CorrelationId>,
    /// Response of an immediate execution, when one happened.
    pub response: Option<HttpResponse>,
}

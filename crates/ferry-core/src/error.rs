// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy shared by every Ferry component.
//!
//! Every error that leaves a component carries an [`ErrorKind`] and, where one
//! exists, the original HTTP status so callers can render precise messaging.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// The primary error type used across Ferry components and collaborator traits.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network failure, timeout, or 5xx-class response. Retryable.
    #[error("transient network error: {message}")]
    TransientNetwork {
        status: Option<u16>,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// 4xx validation-class response. Never retried.
    #[error("request rejected ({status}): {message}")]
    PermanentRequest { status: u16, message: String },

    /// The server rejected the attached credential.
    #[error("credential rejected by server ({status})")]
    AuthExpired { status: u16 },

    /// The credential could not be refreshed; the session is gone.
    #[error("credential refresh failed: {message}")]
    RefreshFailed { status: Option<u16>, message: String },

    /// An authorized call was attempted without a session.
    #[error("no authenticated session")]
    NotAuthenticated,

    /// Durable storage backend failure.
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The event channel gave up after exhausting its reconnect budget.
    #[error("event channel disconnected after {attempts} reconnect attempts")]
    ChannelDisconnected { attempts: u32 },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Invalid configuration or invalid input to a component.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    TransientNetwork,
    PermanentRequest,
    AuthExpired,
    RefreshFailed,
    NotAuthenticated,
    Storage,
    ChannelDisconnected,
    Config,
    Internal,
}

impl SyncError {
    /// Classify a non-success HTTP status.
    ///
    /// 401 is an auth failure; 408, 429 and 5xx are transient; everything
    /// else is a permanent rejection.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = summarize_body(status, body);
        match status {
            401 => SyncError::AuthExpired { status },
            408 | 429 | 500..=599 => SyncError::TransientNetwork {
                status: Some(status),
                message,
                source: None,
            },
            _ => SyncError::PermanentRequest { status, message },
        }
    }

    /// Wrap a backend error as a storage failure.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SyncError::Storage {
            source: Box::new(err),
        }
    }

    /// Build a transient error from a transport-level failure.
    pub fn network<E>(message: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        SyncError::TransientNetwork {
            status: None,
            message: message.into(),
            source: Some(Box::new(err)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::TransientNetwork { .. } | SyncError::Timeout { .. } => {
                ErrorKind::TransientNetwork
            }
            SyncError::PermanentRequest { .. } => ErrorKind::PermanentRequest,
            SyncError::AuthExpired { .. } => ErrorKind::AuthExpired,
            SyncError::RefreshFailed { .. } => ErrorKind::RefreshFailed,
            SyncError::NotAuthenticated => ErrorKind::NotAuthenticated,
            SyncError::Storage { .. } => ErrorKind::Storage,
            SyncError::ChannelDisconnected { .. } => ErrorKind::ChannelDisconnected,
            SyncError::Config(_) => ErrorKind::Config,
            SyncError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The HTTP status that produced this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::TransientNetwork { status, .. } => *status,
            SyncError::PermanentRequest { status, .. } => Some(*status),
            SyncError::AuthExpired { status } => Some(*status),
            SyncError::RefreshFailed { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientNetwork
    }

    /// Clonable summary of this error for events and listeners.
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            status: self.status(),
            message: self.to_string(),
        }
    }
}

/// Clonable, serializable summary of a [`SyncError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({status}): {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl From<&SyncError> for ErrorInfo {
    fn from(err: &SyncError) -> Self {
        err.info()
    }
}

/// Maximum number of body characters kept in an error message.
const BODY_SUMMARY_LIMIT: usize = 200;

fn summarize_body(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return format!("status {status}");
    }
    let truncated: String = body.chars().take(BODY_SUMMARY_LIMIT).collect();
    if truncated.len() < body.len() {
        format!("{truncated}...")
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn classifies_statuses() {
        assert_eq!(SyncError::from_status(401, "").kind(), ErrorKind::AuthExpired);
        assert_eq!(
            SyncError::from_status(422, "bad field").kind(),
            ErrorKind::PermanentRequest
        );
        assert_eq!(SyncError::from_status(404, "").kind(), ErrorKind::PermanentRequest);
        assert_eq!(SyncError::from_status(503, "").kind(), ErrorKind::TransientNetwork);
        assert_eq!(SyncError::from_status(429, "").kind(), ErrorKind::TransientNetwork);
        assert_eq!(SyncError::from_status(408, "").kind(), ErrorKind::TransientNetwork);
    }

    #[test]
    fn status_is_preserved() {
        let err = SyncError::from_status(422, "invalid");
        assert_eq!(err.status(), Some(422));
        let info = err.info();
        assert_eq!(info.kind, ErrorKind::PermanentRequest);
        assert_eq!(info.status, Some(422));
        assert!(info.message.contains("invalid"));
    }

    #[test]
    fn timeout_counts_as_transient() {
        let err = SyncError::Timeout {
            duration: Duration::from_secs(30),
        };
        assert!(err.is_transient());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let err = SyncError::from_status(400, &body);
        let msg = err.to_string();
        assert!(msg.len() < 300, "got {} chars", msg.len());
        assert!(msg.ends_with("..."));
    }

    #[test]
    fn error_kind_round_trips_through_strings() {
        for kind in [
            ErrorKind::TransientNetwork,
            ErrorKind::PermanentRequest,
            ErrorKind::AuthExpired,
            ErrorKind::RefreshFailed,
            ErrorKind::Storage,
            ErrorKind::ChannelDisconnected,
        ] {
            let parsed = ErrorKind::from_str(&kind.to_string()).expect("should parse back");
            assert_eq!(kind, parsed);
        }
    }

    #[test]
    fn info_display_includes_status() {
        let info = SyncError::from_status(500, "boom").info();
        assert_eq!(info.to_string(), "transient_network (500): transient network error: boom");
    }
}

// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outcome notifications published by the queue processor.

use std::time::Duration;

use ferry_core::{ActionId, ErrorInfo, HttpResponse, QueuedAction};

/// Why an action ended as a permanent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The server rejected the request (4xx validation class).
    Rejected,
    /// The server still rejected the credential after one refresh.
    Unauthorized,
    /// Every attempt failed transiently.
    RetriesExhausted { attempts: u32 },
}

/// Something that happened to a queued action.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Enqueued {
        action: QueuedAction,
    },
    Succeeded {
        action: QueuedAction,
        response: HttpResponse,
    },
    /// Terminal failure. The action is already removed from the queue.
    PermanentFailure {
        action: QueuedAction,
        error: ErrorInfo,
        reason: FailureReason,
    },
    Retrying {
        id: ActionId,
        attempt: u32,
        delay: Duration,
    },
    /// Evicted by capacity overflow before it was executed.
    Dropped {
        action: QueuedAction,
    },
}

impl QueueEvent {
    /// Whether this event ends the action's life.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueEvent::Succeeded { .. }
                | QueueEvent::PermanentFailure { .. }
                | QueueEvent::Dropped { .. }
        )
    }

    pub fn action_id(&self) -> &ActionId {
        match self {
            QueueEvent::Enqueued { action }
            | QueueEvent::Succeeded { action, .. }
            | QueueEvent::PermanentFailure { action, .. }
            | QueueEvent::Dropped { action } => &action.id,
            QueueEvent::Retrying { id, .. } => id,
        }
    }
}

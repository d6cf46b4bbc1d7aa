// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock request function and action executor.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use ferry_core::{ActionExecutor, HttpRequest, HttpResponse, HttpTransport, QueuedAction, SyncError};

/// A scripted server reply.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// The server answered with this status and body.
    Status(u16, String),
    /// The request never reached the server.
    NetworkError(String),
    /// The credential could not be refreshed before sending.
    RefreshFailed,
}

impl MockReply {
    pub fn ok(body: impl Into<String>) -> Self {
        MockReply::Status(200, body.into())
    }

    pub fn status(status: u16) -> Self {
        MockReply::Status(status, String::new())
    }

    /// Transport view: any status is a response.
    pub fn into_response(self) -> Result<HttpResponse, SyncError> {
        match self {
            MockReply::Status(status, body) => Ok(HttpResponse::new(status, body)),
            MockReply::NetworkError(message) => Err(SyncError::TransientNetwork {
                status: None,
                message,
                source: None,
            }),
            MockReply::RefreshFailed => Err(SyncError::RefreshFailed {
                status: Some(401),
                message: "refresh token revoked".to_string(),
            }),
        }
    }

    /// Executor view: non-2xx statuses are classified errors.
    pub fn into_outcome(self) -> Result<HttpResponse, SyncError> {
        let response = self.into_response()?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(SyncError::from_status(response.status, &response.body))
        }
    }
}

type Handler = Arc<dyn Fn(&HttpRequest) -> MockReply + Send + Sync>;

#[derive(Default)]
struct HttpState {
    script: VecDeque<MockReply>,
    requests: Vec<HttpRequest>,
    handler: Option<Handler>,
    delay: Duration,
}

/// A mock [`HttpTransport`].
///
/// Replies come from the script first, then the handler, then a default
/// `200 {}`. Every request is captured.
#[derive(Clone, Default)]
pub struct MockHttp {
    state: Arc<Mutex<HttpState>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HttpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a reply for the next unscripted request.
    pub fn push_reply(&self, reply: MockReply) {
        self.state().script.push_back(reply);
    }

    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> MockReply + Send + Sync + 'static,
    {
        self.state().handler = Some(Arc::new(handler));
        self
    }

    /// Delay every reply by `delay` (tokio time, so paused clocks apply).
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state().requests.len()
    }
}

#[async_trait]
impl HttpTransport for MockHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SyncError> {
        let (delay, scripted, handler) = {
            let mut state = self.state();
            state.requests.push(request.clone());
            (state.delay, state.script.pop_front(), state.handler.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = match (scripted, handler) {
            (Some(reply), _) => reply,
            (None, Some(handler)) => handler(&request),
            (None, None) => MockReply::ok("{}"),
        };
        reply.into_response()
    }
}

/// One entry in a [`MockExecutor`]'s execution log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    Started(String),
    Finished(String),
}

type Hook = Arc<dyn Fn(&QueuedAction) + Send + Sync>;

#[derive(Default)]
struct ExecutorState {
    replies: HashMap<String, VecDeque<MockReply>>,
    log: Vec<ExecutionEvent>,
    delay: Duration,
    hook: Option<Hook>,
}

/// A mock [`ActionExecutor`] scripted per action kind.
///
/// Kinds without a scripted reply succeed with `200 {}`.
#[derive(Clone, Default)]
pub struct MockExecutor {
    state: Arc<Mutex<ExecutorState>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ExecutorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replies for successive executions of `kind`.
    pub fn script(&self, kind: &str, replies: impl IntoIterator<Item = MockReply>) {
        self.state()
            .replies
            .entry(kind.to_string())
            .or_default()
            .extend(replies);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    /// Runs `hook` at the start of every execution.
    pub fn on_execute<F>(&self, hook: F)
    where
        F: Fn(&QueuedAction) + Send + Sync + 'static,
    {
        self.state().hook = Some(Arc::new(hook));
    }

    pub fn log(&self) -> Vec<ExecutionEvent> {
        self.state().log.clone()
    }

    /// Kinds in the order their executions started.
    pub fn started_kinds(&self) -> Vec<String> {
        self.state()
            .log
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::Started(kind) => Some(kind.clone()),
                ExecutionEvent::Finished(_) => None,
            })
            .collect()
    }

    pub fn execution_count(&self) -> usize {
        self.started_kinds().len()
    }
}

#[async_trait]
impl ActionExecutor for MockExecutor {
    async fn execute(&self, action: &QueuedAction) -> Result<HttpResponse, SyncError> {
        let (delay, reply, hook) = {
            let mut state = self.state();
            state.log.push(ExecutionEvent::Started(action.kind.clone()));
            let reply = state
                .replies
                .get_mut(&action.kind)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| MockReply::ok("{}"));
            (state.delay, reply, state.hook.clone())
        };
        if let Some(hook) = hook {
            hook(action);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state()
            .log
            .push(ExecutionEvent::Finished(action.kind.clone()));
        reply.into_outcome()
    }
}

// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios for the assembled sync client.
//!
//! Every test builds an isolated client over in-memory storage and scripted
//! mock collaborators. Timers run on a paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};

use ferry::{
    ChannelState, Collaborators, Credential, EntityId, ErrorKind, FailureReason, FerryConfig,
    HttpMethod, Lifecycle, NewAction, QueueEvent, RecordStatus, SessionEvent, SubscriptionHandle,
    SyncClient,
};
use ferry_core::KeyValueStore;
use ferry_storage::MemoryStore;
use ferry_test_utils::{
    FailingStore, MockConnectivity, MockEventTransport, MockHttp, MockRefreshApi, MockReply,
};

struct Harness {
    client: SyncClient,
    http: MockHttp,
    connectivity: MockConnectivity,
    transport: MockEventTransport,
    refresh: MockRefreshApi,
    events: Arc<Mutex<Vec<QueueEvent>>>,
    _handles: Vec<SubscriptionHandle>,
}

impl Harness {
    fn events(&self) -> Vec<QueueEvent> {
        self.events.lock().unwrap().clone()
    }

    fn terminal_events(&self) -> Vec<QueueEvent> {
        self.events().into_iter().filter(QueueEvent::is_terminal).collect()
    }
}

fn config() -> FerryConfig {
    let mut config = FerryConfig::default();
    config.storage.in_memory = true;
    config.network.debounce_ms = 0;
    config.channel.url = Some("ws://sync.test/socket".to_string());
    config
}

fn credential(valid_for: chrono::Duration) -> Credential {
    Credential::new("access-0", Utc::now() + valid_for, "refresh-0")
}

async fn harness_with(
    config: FerryConfig,
    store: Arc<dyn KeyValueStore>,
    http: MockHttp,
    refresh: MockRefreshApi,
    online: bool,
) -> Harness {
    let connectivity = MockConnectivity::new(online);
    let transport = MockEventTransport::new();
    let collaborators = Collaborators {
        store,
        http: Arc::new(http.clone()),
        connectivity: Arc::new(connectivity.clone()),
        events: Arc::new(transport.clone()),
        refresh: Arc::new(refresh.clone()),
    };
    let client = SyncClient::new(&config, collaborators).await.unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let handle = client.on_queue_event(move |e| sink.lock().unwrap().push(e.clone()));

    Harness {
        client,
        http,
        connectivity,
        transport,
        refresh,
        events,
        _handles: vec![handle],
    }
}

async fn harness(http: MockHttp, online: bool) -> Harness {
    harness_with(
        config(),
        Arc::new(MemoryStore::new()),
        http,
        MockRefreshApi::new(chrono::Duration::hours(1)),
        online,
    )
    .await
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn post(kind: &str, endpoint: &str) -> NewAction {
    NewAction::new(kind, HttpMethod::Post, endpoint).with_payload(json!({ "kind": kind }))
}

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn outcome_labels(events: &[QueueEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::Succeeded { action, .. } => Some(format!("ok:{}", action.kind)),
            QueueEvent::PermanentFailure { action, .. } => Some(format!("failed:{}", action.kind)),
            QueueEvent::Dropped { action } => Some(format!("dropped:{}", action.kind)),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_does_not_block_later_actions() {
    let http = MockHttp::new().with_handler(|req| {
        if req.url.ends_with("/b") {
            MockReply::Status(422, r#"{"error":"invalid"}"#.to_string())
        } else {
            MockReply::ok("{}")
        }
    });
    let h = harness(http, false).await;
    h.client.initialize().await.unwrap();
    h.client.login(credential(chrono::Duration::hours(1))).await.unwrap();

    for kind in ["a", "b", "c"] {
        let receipt = h
            .client
            .enqueue_or_execute(post(kind, &format!("/messages/{kind}")))
            .await
            .unwrap();
        assert!(receipt.queued);
    }
    assert_eq!(h.client.queue_status().queue_size, 3);
    assert_eq!(h.http.request_count(), 0);

    h.connectivity.set(true);
    wait_for(|| h.terminal_events().len() == 3).await;

    assert_eq!(outcome_labels(&h.events()), ["ok:a", "failed:b", "ok:c"]);
    let failure = h
        .events()
        .into_iter()
        .find_map(|e| match e {
            QueueEvent::PermanentFailure { error, reason, .. } => Some((error, reason)),
            _ => None,
        })
        .unwrap();
    assert_eq!(failure.0.kind, ErrorKind::PermanentRequest);
    assert_eq!(failure.0.status, Some(422));
    assert_eq!(failure.1, FailureReason::Rejected);
    assert_eq!(h.client.queue_status().queue_size, 0);

    let requests = h.http.requests();
    assert_eq!(requests.len(), 3, "422 is never retried");
    assert!(requests
        .iter()
        .all(|r| r.header("Authorization") == Some("Bearer access-0")));
    h.client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn push_echo_confirms_the_optimistic_record() {
    let http = MockHttp::new().with_handler(|_| {
        MockReply::ok(r#"{"id":"42","correlation_id":"tmp-1","text":"hello"}"#)
    });
    let h = harness(http, false).await;
    h.client.login(credential(chrono::Duration::hours(1))).await.unwrap();
    h.client.initialize().await.unwrap();
    wait_for(|| h.client.channel_state() == Some(ChannelState::Connected)).await;

    let conv = EntityId::from("conv-1");
    let action = post("message.send", "/messages")
        .with_correlation_id("tmp-1")
        .with_optimistic("conv-1", fields(json!({ "text": "hello" })));
    let receipt = h.client.enqueue_or_execute(action).await.unwrap();
    assert!(receipt.queued);

    let pending = h.client.cache_snapshot(&conv).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, RecordStatus::Pending);
    assert_eq!(pending[0].id, "tmp-1");

    assert!(
        h.transport
            .push(
                "message:new",
                json!({
                    "entity_id": "conv-1",
                    "id": "42",
                    "correlation_id": "tmp-1",
                    "text": "hello"
                }),
            )
            .await
    );

    let mut confirmed = Vec::new();
    for _ in 0..1000 {
        confirmed = h.client.cache_snapshot(&conv).await;
        if confirmed.first().is_some_and(|r| r.status == RecordStatus::Confirmed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(confirmed.len(), 1, "echo must not duplicate the record");
    assert_eq!(confirmed[0].id, "42");

    // The queued send still runs and its response confirms the same record.
    h.connectivity.set(true);
    wait_for(|| h.terminal_events().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let after = h.client.cache_snapshot(&conv).await;
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, "42");
    assert_eq!(after[0].status, RecordStatus::Confirmed);
    h.client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_refresh() {
    let h = harness(MockHttp::new(), true).await;
    h.refresh.set_delay(Duration::from_millis(100));
    h.client.initialize().await.unwrap();
    h.client.login(credential(chrono::Duration::seconds(1))).await.unwrap();

    let call = |n: u32| h.client.authorized_request(HttpMethod::Get, "/jobs", Some(json!({ "n": n })));
    let (r1, r2, r3, r4, r5) = tokio::join!(call(1), call(2), call(3), call(4), call(5));

    for result in [r1, r2, r3, r4, r5] {
        assert_eq!(result.unwrap().status, 200);
    }
    assert_eq!(h.refresh.call_count(), 1);
    assert_eq!(h.refresh.refresh_tokens_seen(), ["refresh-0"]);
    let requests = h.http.requests();
    assert_eq!(requests.len(), 5);
    assert!(requests
        .iter()
        .all(|r| r.header("Authorization") == Some("Bearer access-1")));
    h.client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn every_offline_action_reaches_a_terminal_outcome() {
    let http = MockHttp::new().with_handler(|req| {
        if req.url.contains("flaky") {
            MockReply::status(503)
        } else if req.url.contains("bad") {
            MockReply::status(400)
        } else {
            MockReply::ok("{}")
        }
    });
    let mut config = config();
    config.queue.capacity = 4;
    let h = harness_with(
        config,
        Arc::new(MemoryStore::new()),
        http,
        MockRefreshApi::new(chrono::Duration::hours(1)),
        false,
    )
    .await;
    h.client.initialize().await.unwrap();
    h.client.login(credential(chrono::Duration::hours(1))).await.unwrap();

    let endpoints = ["/first", "/bad", "/flaky", "/ok1", "/ok2", "/ok3", "/bad2"];
    for endpoint in endpoints {
        h.client
            .enqueue_or_execute(post(endpoint.trim_start_matches('/'), endpoint))
            .await
            .unwrap();
    }
    h.connectivity.set(true);
    wait_for(|| h.terminal_events().len() == endpoints.len()).await;

    let labels = outcome_labels(&h.events());
    assert_eq!(labels.len(), endpoints.len());
    assert_eq!(
        labels,
        [
            "dropped:first",
            "dropped:bad",
            "dropped:flaky",
            "ok:ok1",
            "ok:ok2",
            "ok:ok3",
            "failed:bad2",
        ]
    );
    assert_eq!(h.client.queue_status().queue_size, 0);
}

#[tokio::test(start_paused = true)]
async fn retries_exhaust_into_a_permanent_failure() {
    let http = MockHttp::new().with_handler(|_| MockReply::NetworkError("reset".to_string()));
    let h = harness(http, false).await;
    h.client.initialize().await.unwrap();
    h.client.login(credential(chrono::Duration::hours(1))).await.unwrap();

    let action = post("message.send", "/messages")
        .with_optimistic("conv-1", fields(json!({ "text": "lost" })));
    h.client.enqueue_or_execute(action).await.unwrap();
    h.connectivity.set(true);
    wait_for(|| h.terminal_events().len() == 1).await;

    match &h.terminal_events()[0] {
        QueueEvent::PermanentFailure { reason, error, .. } => {
            assert_eq!(*reason, FailureReason::RetriesExhausted { attempts: 3 });
            assert_eq!(error.kind, ErrorKind::TransientNetwork);
        }
        other => panic!("expected permanent failure, got {other:?}"),
    }
    assert_eq!(h.http.request_count(), 3);

    let conv = EntityId::from("conv-1");
    let mut status = None;
    for _ in 0..100 {
        status = h.client.cache_snapshot(&conv).await.first().map(|r| r.status);
        if status == Some(RecordStatus::Failed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, Some(RecordStatus::Failed));
    h.client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn lost_session_pauses_queue_until_next_login() {
    let h = harness_with(
        config(),
        Arc::new(MemoryStore::new()),
        MockHttp::new(),
        MockRefreshApi::failing(401),
        false,
    )
    .await;
    let sessions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&sessions);
    let _session = h
        .client
        .on_session_event(move |e| sink.lock().unwrap().push(e.clone()));

    h.client.initialize().await.unwrap();
    h.client.login(credential(chrono::Duration::seconds(1))).await.unwrap();
    wait_for(|| h.client.channel_state() == Some(ChannelState::Connected)).await;

    h.client.enqueue_or_execute(post("a", "/messages/a")).await.unwrap();
    h.connectivity.set(true);

    wait_for(|| {
        sessions
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, SessionEvent::ReauthenticationRequired { .. }))
    })
    .await;
    wait_for(|| h.client.channel_state() == Some(ChannelState::Disconnected)).await;
    assert!(!h.client.is_authenticated());
    assert_eq!(h.client.queue_status().queue_size, 1, "action survives the lost session");
    assert_eq!(h.http.request_count(), 0);
    assert!(h.terminal_events().is_empty());

    h.client.login(credential(chrono::Duration::hours(1))).await.unwrap();
    wait_for(|| h.terminal_events().len() == 1).await;
    assert_eq!(outcome_labels(&h.events()), ["ok:a"]);
    wait_for(|| h.client.channel_state() == Some(ChannelState::Connected)).await;
    let tokens: Vec<_> = h
        .transport
        .connect_options()
        .into_iter()
        .map(|o| o.access_token)
        .collect();
    assert_eq!(tokens.last().cloned().flatten().as_deref(), Some("access-0"));
    h.client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn immediate_execution_when_online_and_idle() {
    let http = MockHttp::new().with_handler(|_| MockReply::ok(r#"{"id":"7"}"#));
    let h = harness(http, true).await;
    h.client.initialize().await.unwrap();
    h.client.login(credential(chrono::Duration::hours(1))).await.unwrap();

    let action = post("message.send", "/messages")
        .with_optimistic("conv-9", fields(json!({ "text": "now" })));
    let receipt = h.client.enqueue_or_execute(action).await.unwrap();
    assert!(!receipt.queued);
    assert!(receipt.correlation_id.is_some(), "optimistic writes always get a correlation id");
    assert_eq!(receipt.response.unwrap().status, 200);

    let conv = EntityId::from("conv-9");
    wait_for(|| h.terminal_events().len() == 1).await;
    let mut record = None;
    for _ in 0..100 {
        record = h.client.cache_snapshot(&conv).await.into_iter().next();
        if record.as_ref().is_some_and(|r| r.status == RecordStatus::Confirmed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let record = record.unwrap();
    assert_eq!(record.id, "7");
    assert_eq!(record.data["text"], "now");
    h.client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn logout_clears_queue_cache_and_channel() {
    let h = harness(MockHttp::new(), false).await;
    h.client.initialize().await.unwrap();
    h.client.login(credential(chrono::Duration::hours(1))).await.unwrap();
    wait_for(|| h.client.channel_state() == Some(ChannelState::Connected)).await;
    h.client.join_topic("conv:1").await.unwrap();

    let action = post("message.send", "/messages")
        .with_optimistic("conv-1", fields(json!({ "text": "draft" })));
    h.client.enqueue_or_execute(action).await.unwrap();
    assert_eq!(h.client.queue_status().queue_size, 1);

    h.client.logout().await.unwrap();

    assert!(!h.client.is_authenticated());
    assert_eq!(h.client.queue_status().queue_size, 0);
    assert!(h.client.cache_snapshot(&EntityId::from("conv-1")).await.is_empty());
    assert_eq!(h.client.channel_state(), Some(ChannelState::Disconnected));
    assert!(!h.transport.is_connected());
    h.client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn subscribers_receive_server_events() {
    let h = harness(MockHttp::new(), true).await;
    h.client.initialize().await.unwrap();
    h.client.login(credential(chrono::Duration::hours(1))).await.unwrap();
    wait_for(|| h.client.channel_state() == Some(ChannelState::Connected)).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handle = h
        .client
        .subscribe("typing", move |payload| sink.lock().unwrap().push(payload.clone()));

    assert!(h.transport.push("typing", json!({ "user": "u1" })).await);
    wait_for(|| seen.lock().unwrap().len() == 1).await;

    handle.dispose();
    assert!(h.transport.push("typing", json!({ "user": "u2" })).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(h.client.channel_state(), Some(ChannelState::Connected));

    h.client.emit("typing", json!({ "user": "me" })).await.unwrap();
    assert!(h.transport.emitted().iter().any(|(event, _)| event == "typing"));
    h.client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn storage_failure_degrades_to_memory() {
    let h = harness_with(
        config(),
        Arc::new(FailingStore::new()),
        MockHttp::new(),
        MockRefreshApi::new(chrono::Duration::hours(1)),
        false,
    )
    .await;
    h.client.initialize().await.unwrap();
    h.client.login(credential(chrono::Duration::hours(1))).await.unwrap();

    let receipt = h.client.enqueue_or_execute(post("a", "/messages/a")).await.unwrap();
    assert!(receipt.queued);
    assert!(h.client.is_storage_degraded());

    h.connectivity.set(true);
    wait_for(|| h.terminal_events().len() == 1).await;
    assert_eq!(outcome_labels(&h.events()), ["ok:a"]);
    h.client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn disposed_client_rejects_work() {
    let h = harness(MockHttp::new(), true).await;
    h.client.initialize().await.unwrap();
    h.client.dispose().await;

    assert_eq!(h.client.channel_state(), Some(ChannelState::Disposed));
    assert!(h.client.initialize().await.is_err());
    assert!(h.client.enqueue_or_execute(post("a", "/a")).await.is_err());
    assert_eq!(h.http.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn disposed_client_leaves_no_pending_optimistic_record() {
    let h = harness(MockHttp::new(), true).await;
    h.client.initialize().await.unwrap();
    h.client.dispose().await;

    let action = post("message.send", "/messages")
        .with_correlation_id("tmp-9")
        .with_optimistic("conv-9", fields(json!({ "text": "late" })));
    assert!(h.client.enqueue_or_execute(action).await.is_err());

    assert!(h.client.cache_snapshot(&EntityId::from("conv-9")).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_immediate_write_is_marked_failed() {
    let http = MockHttp::new();
    http.push_reply(MockReply::status(422));
    let h = harness(http, true).await;
    h.client.initialize().await.unwrap();
    h.client.login(credential(chrono::Duration::hours(1))).await.unwrap();

    let action = post("message.send", "/messages")
        .with_correlation_id("tmp-7")
        .with_optimistic("conv-7", fields(json!({ "text": "rejected" })));
    let err = h.client.enqueue_or_execute(action).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermanentRequest);

    let records = h.client.cache_snapshot(&EntityId::from("conv-7")).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RecordStatus::Failed);
}

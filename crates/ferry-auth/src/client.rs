// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authorized requests with transparent refresh-and-retry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use ferry_core::{
    ActionExecutor, Credential, HttpMethod, HttpRequest, HttpResponse, HttpTransport,
    QueuedAction, SyncError,
};

use crate::refresher::CredentialRefresher;

/// Wraps the request function with credential attachment.
///
/// A 401 triggers exactly one reactive refresh and one retry of the original
/// request. Non-2xx responses are classified through
/// [`SyncError::from_status`].
pub struct AuthorizedClient {
    http: Arc<dyn HttpTransport>,
    refresher: Arc<CredentialRefresher>,
    timeout: Duration,
}

impl AuthorizedClient {
    pub fn new(
        http: Arc<dyn HttpTransport>,
        refresher: Arc<CredentialRefresher>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            refresher,
            timeout,
        }
    }

    pub async fn authorized_request(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
    ) -> Result<HttpResponse, SyncError> {
        self.send(method, url, body, &[]).await
    }

    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
        extra_headers: &[(&str, String)],
    ) -> Result<HttpResponse, SyncError> {
        let credential = self.refresher.valid_credential().await?;
        let request = self.build(method, url, body, extra_headers);

        let response = self
            .http
            .send(with_bearer(request.clone(), &credential))
            .await?;
        if response.status != 401 {
            return classify(response);
        }

        debug!(url, "request unauthorized, refreshing credential once");
        let fresh = self
            .refresher
            .refresh_after_unauthorized(&credential.access_token)
            .await?;
        let retried = self.http.send(with_bearer(request, &fresh)).await?;
        classify(retried)
    }

    fn build(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Value>,
        extra_headers: &[(&str, String)],
    ) -> HttpRequest {
        let mut request = HttpRequest::new(method, url, self.timeout).with_body(body);
        if request.body.is_some() {
            request.set_header("Content-Type", "application/json");
        }
        for (name, value) in extra_headers {
            request.set_header(name, value.clone());
        }
        request
    }
}

fn with_bearer(mut request: HttpRequest, credential: &Credential) -> HttpRequest {
    request.set_header(
        "Authorization",
        format!("Bearer {}", credential.access_token),
    );
    request
}

fn classify(response: HttpResponse) -> Result<HttpResponse, SyncError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(SyncError::from_status(response.status, &response.body))
    }
}

#[async_trait]
impl ActionExecutor for AuthorizedClient {
    /// Executes a queued mutation. The action id doubles as an idempotency
    /// key so a retried delivery can be recognised by the server.
    async fn execute(&self, action: &QueuedAction) -> Result<HttpResponse, SyncError> {
        let mut headers = vec![("Idempotency-Key", action.id.to_string())];
        if let Some(correlation) = &action.correlation_id {
            headers.push(("X-Correlation-Id", correlation.to_string()));
        }
        self.send(action.method, &action.endpoint, action.payload.clone(), &headers)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ferry_core::{ErrorKind, NewAction};
    use ferry_storage::PersistentStore;
    use ferry_test_utils::{MockHttp, MockRefreshApi, MockReply};

    fn setup(http: MockHttp) -> (MockRefreshApi, Arc<CredentialRefresher>, AuthorizedClient) {
        let api = MockRefreshApi::new(chrono::Duration::hours(1));
        let store = PersistentStore::in_memory();
        let refresher = Arc::new(CredentialRefresher::new(
            Arc::new(api.clone()),
            &store,
            Duration::from_secs(300),
        ));
        let client = AuthorizedClient::new(Arc::new(http), Arc::clone(&refresher), Duration::from_secs(5));
        (api, refresher, client)
    }

    async fn login(refresher: &CredentialRefresher, valid_for: chrono::Duration) {
        refresher
            .login(Credential::new("access-0", Utc::now() + valid_for, "refresh-0"))
            .await;
    }

    #[tokio::test]
    async fn attaches_bearer_token() {
        let http = MockHttp::new();
        let (_api, refresher, client) = setup(http.clone());
        login(&refresher, chrono::Duration::hours(1)).await;

        client
            .authorized_request(HttpMethod::Get, "/me", None)
            .await
            .unwrap();
        assert_eq!(http.requests()[0].header("authorization"), Some("Bearer access-0"));
    }

    #[tokio::test]
    async fn unauthorized_refreshes_once_and_retries_once() {
        let http = MockHttp::new();
        http.push_reply(MockReply::status(401));
        let (api, refresher, client) = setup(http.clone());
        login(&refresher, chrono::Duration::hours(1)).await;

        let resp = client
            .authorized_request(HttpMethod::Get, "/me", None)
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(api.call_count(), 1);

        let requests = http.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].header("authorization"), Some("Bearer access-1"));
    }

    #[tokio::test]
    async fn second_unauthorized_is_surfaced() {
        let http = MockHttp::new().with_handler(|_| MockReply::status(401));
        let (api, refresher, client) = setup(http.clone());
        login(&refresher, chrono::Duration::hours(1)).await;

        let err = client
            .authorized_request(HttpMethod::Get, "/me", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthExpired);
        assert_eq!(err.status(), Some(401));
        assert_eq!(api.call_count(), 1);
        assert_eq!(http.request_count(), 2);
    }

    #[tokio::test]
    async fn statuses_are_classified() {
        let http = MockHttp::new();
        http.push_reply(MockReply::Status(422, "bad".into()));
        http.push_reply(MockReply::status(503));
        http.push_reply(MockReply::NetworkError("reset".into()));
        let (_api, refresher, client) = setup(http);
        login(&refresher, chrono::Duration::hours(1)).await;

        let mut kinds = Vec::new();
        for _ in 0..3 {
            let err = client
                .authorized_request(HttpMethod::Post, "/jobs", None)
                .await
                .unwrap_err();
            kinds.push(err.kind());
        }
        assert_eq!(
            kinds,
            vec![
                ErrorKind::PermanentRequest,
                ErrorKind::TransientNetwork,
                ErrorKind::TransientNetwork
            ]
        );
    }

    #[tokio::test]
    async fn without_session_nothing_is_sent() {
        let http = MockHttp::new();
        let (_api, _refresher, client) = setup(http.clone());
        let err = client
            .authorized_request(HttpMethod::Get, "/me", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAuthenticated);
        assert_eq!(http.request_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_near_expiry_share_one_refresh() {
        let http = MockHttp::new().with_handler(|req| match req.header("authorization") {
            Some("Bearer access-1") => MockReply::ok("{\"ok\":true}"),
            _ => MockReply::status(401),
        });
        let (api, refresher, client) = setup(http.clone());
        api.set_delay(Duration::from_millis(50));
        login(&refresher, chrono::Duration::seconds(1)).await;
        let client = Arc::new(client);

        let calls: Vec<_> = (0..5)
            .map(|_| {
                let c = Arc::clone(&client);
                tokio::spawn(async move { c.authorized_request(HttpMethod::Get, "/jobs", None).await })
            })
            .collect();
        for call in calls {
            assert_eq!(call.await.unwrap().unwrap().status, 200);
        }
        assert_eq!(api.call_count(), 1);
        assert_eq!(http.request_count(), 5);
    }

    #[tokio::test]
    async fn executor_sends_idempotency_and_correlation_headers() {
        let http = MockHttp::new();
        let (_api, refresher, client) = setup(http.clone());
        login(&refresher, chrono::Duration::hours(1)).await;

        let action = NewAction::new("message.send", HttpMethod::Post, "/messages")
            .with_payload(serde_json::json!({"text": "hi"}))
            .with_correlation_id("tmp-1")
            .into_queued();
        client.execute(&action).await.unwrap();

        let req = &http.requests()[0];
        assert_eq!(req.header("idempotency-key"), Some(action.id.as_str()));
        assert_eq!(req.header("x-correlation-id"), Some("tmp-1"));
        assert_eq!(req.body, action.payload);
    }
}

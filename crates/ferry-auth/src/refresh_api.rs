// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the credential refresh endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use ferry_core::{Credential, HttpMethod, HttpRequest, HttpTransport, RefreshApi, SyncError};

/// Refresh endpoint response. Either `expires_in` (seconds) or `expires_at`
/// must be present; a missing `refresh_token` means the old one stays valid.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

/// [`RefreshApi`] that POSTs `{"refresh_token": ...}` to a fixed URL.
pub struct HttpRefreshApi {
    http: Arc<dyn HttpTransport>,
    url: String,
    timeout: Duration,
}

impl HttpRefreshApi {
    pub fn new(http: Arc<dyn HttpTransport>, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            timeout,
        }
    }
}

fn failed(status: Option<u16>, message: impl Into<String>) -> SyncError {
    SyncError::RefreshFailed {
        status,
        message: message.into(),
    }
}

#[async_trait]
impl RefreshApi for HttpRefreshApi {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, SyncError> {
        let request = HttpRequest::new(HttpMethod::Post, self.url.clone(), self.timeout)
            .with_body(Some(json!({ "refresh_token": refresh_token })));

        let response = self
            .http
            .send(request)
            .await
            .map_err(|e| failed(e.status(), e.to_string()))?;
        if !response.is_success() {
            let detail = SyncError::from_status(response.status, &response.body);
            return Err(failed(Some(response.status), detail.to_string()));
        }

        let parsed: RefreshResponse = serde_json::from_str(&response.body)
            .map_err(|e| failed(Some(response.status), format!("malformed refresh response: {e}")))?;

        let expiry = match (parsed.expires_at, parsed.expires_in) {
            (Some(at), _) => at,
            (None, Some(secs)) => Utc::now() + chrono::Duration::seconds(secs),
            (None, None) => {
                return Err(failed(
                    Some(response.status),
                    "refresh response carries no expiry",
                ));
            }
        };

        Ok(Credential::new(
            parsed.access_token,
            expiry,
            parsed
                .refresh_token
                .unwrap_or_else(|| refresh_token.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_config::model::{ClientConfig, NetworkConfig};
    use ferry_core::ErrorKind;
    use ferry_net::ReqwestTransport;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> HttpRefreshApi {
        let network = NetworkConfig {
            api_base_url: server.uri(),
            ..NetworkConfig::default()
        };
        let transport = ReqwestTransport::new(&ClientConfig::default(), &network).unwrap();
        HttpRefreshApi::new(Arc::new(transport), "/auth/refresh", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn exchanges_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(json!({"refresh_token": "r-0"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a-1",
                "refresh_token": "r-1",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cred = api(&server).refresh("r-0").await.unwrap();
        assert_eq!(cred.access_token, "a-1");
        assert_eq!(cred.refresh_token, "r-1");
        assert!(cred.remaining(Utc::now()) > Duration::from_secs(3500));
    }

    #[tokio::test]
    async fn keeps_refresh_token_when_not_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a-1",
                "expires_at": "2099-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let cred = api(&server).refresh("r-0").await.unwrap();
        assert_eq!(cred.refresh_token, "r-0");
        assert_eq!(cred.expiry.to_rfc3339(), "2099-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn rejection_is_refresh_failed_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("revoked"))
            .mount(&server)
            .await;

        let err = api(&server).refresh("r-0").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RefreshFailed);
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn missing_expiry_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "a"})))
            .mount(&server)
            .await;

        let err = api(&server).refresh("r-0").await.unwrap_err();
        assert!(err.to_string().contains("no expiry"));
    }
}

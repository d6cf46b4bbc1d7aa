// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Production request function over `reqwest`.
//!
//! Every response the server produces is returned as-is; only
//! transport-level failures become errors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use ferry_config::model::{ClientConfig, NetworkConfig};
use ferry_core::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, SyncError};

/// [`HttpTransport`] backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(client_config: &ClientConfig, network: &NetworkConfig) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .user_agent(client_config.user_agent.clone())
            .timeout(network.request_timeout())
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: network.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolves an endpoint against the API base URL. Absolute URLs pass through.
    pub fn resolve(&self, url: &str) -> String {
        resolve_url(&self.base_url, url)
    }
}

/// Joins `url` onto `base` unless it is already absolute.
pub fn resolve_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }
}

fn method(m: HttpMethod) -> reqwest::Method {
    match m {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, SyncError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SyncError::Config(format!("invalid header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| SyncError::Config(format!("invalid value for header `{name}`: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout { duration: timeout }
    } else {
        SyncError::network(format!("HTTP request failed: {err}"), err)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SyncError> {
        let url = self.resolve(&request.url);
        let mut builder = self
            .client
            .request(method(request.method), &url)
            .headers(header_map(&request.headers)?)
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(e, request.timeout))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, request.timeout))?;
        debug!(method = %request.method, url = %url, status, "response received");
        Ok(HttpResponse::new(status, body))
    }
}

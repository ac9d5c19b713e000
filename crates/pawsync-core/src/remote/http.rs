//! JSON-over-HTTP remote boundary client.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{PullResponse, PushItem, PushResult, RemoteBoundary, RemoteError, RemoteResult};
use crate::error::{Error, Result};
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    cursor: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    items: &'a [PushItem],
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    results: Vec<PushResult>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

impl HttpRemote {
    /// Build a client for `base_url`; every request is bounded by `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_endpoint(base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> RemoteResult<T>
    where
        B: Serialize + Sync,
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = parse_api_error(status, &body);
            tracing::warn!(%url, status = status.as_u16(), "remote request failed");
            return Err(classify_status(status, message));
        }

        response
            .json::<T>()
            .await
            .map_err(|error| RemoteError::Permanent(format!("invalid response from {url}: {error}")))
    }
}

impl RemoteBoundary for HttpRemote {
    async fn pull(&self, cursor: Option<String>) -> RemoteResult<PullResponse> {
        self.post(
            "/v1/sync/pull",
            &PullRequest {
                cursor: cursor.as_deref(),
            },
        )
        .await
    }

    async fn push(&self, items: Vec<PushItem>) -> RemoteResult<Vec<PushResult>> {
        let response: PushResponse = self
            .post("/v1/sync/push", &PushRequest { items: &items })
            .await?;
        Ok(response.results)
    }
}

fn classify_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_builder() {
        RemoteError::Permanent(error.to_string())
    } else {
        RemoteError::Transient(error.to_string())
    }
}

fn classify_status(status: StatusCode, message: String) -> RemoteError {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        RemoteError::Transient(message)
    } else {
        RemoteError::Permanent(message)
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("remote URL must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "remote URL must include http:// or https://".to_string(),
        ))
    }
}

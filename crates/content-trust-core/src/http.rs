//! Shared HTTP plumbing for the notary and registry clients.
//!
//! Both services are reached through one [`HttpClient`] shape: a reusable
//! `reqwest::Client` with a fixed request timeout, a base URL, and a
//! credential factory consulted on every request. Non-success statuses are
//! classified into [`HttpError`] so callers can tell "not found" apart from
//! every other failure.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use thiserror::Error;

use crate::config::DEFAULT_HTTP_TIMEOUT;
use crate::credentials::{CredentialFactory, Service};

/// Options governing how the HTTP client is constructed.
#[derive(Debug, Clone, Copy)]
pub struct HttpClientOptions {
    /// Whether plaintext (HTTP) endpoints are allowed.
    pub allow_plaintext: bool,
    /// Timeout applied to every request, connect included.
    pub timeout: Duration,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            allow_plaintext: false,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    /// The requested resource does not exist (404).
    #[error("not found: {0}")]
    NotFound(String),
    /// Credentials were missing or rejected (401).
    #[error("unauthorized - missing or rejected credentials")]
    Unauthorized,
    /// Any other non-success status outside the 5xx range.
    #[error("unexpected response status {0}")]
    Status(u16),
    /// The server reported an internal failure (5xx).
    #[error("server error: status {0}")]
    Server(u16),
    /// The provided URL violates the required transport policy.
    #[error("insecure base url requires explicit opt-in: {0}")]
    InsecureUrl(String),
    /// Transport-level issue (DNS, TLS, socket, timeout, etc.).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Response payload was not the expected JSON shape.
    #[error("failed to decode response payload: {0}")]
    Decode(#[from] serde_json::Error),
    /// A header value (usually a credential) contains forbidden characters.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

impl HttpError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// HTTP client bound to one service's base URL and credentials.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    credentials: Arc<CredentialFactory>,
    service: Service,
}

impl HttpClient {
    pub fn new(
        base_url: impl Into<String>,
        service: Service,
        credentials: Arc<CredentialFactory>,
        options: HttpClientOptions,
    ) -> Result<Self, HttpError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !options.allow_plaintext && base_url.starts_with("http://") {
            return Err(HttpError::InsecureUrl(base_url));
        }

        let mut headers = HeaderMap::new();
        let user_agent = format!("content-trust/{}", env!("CARGO_PKG_VERSION"));
        headers.insert(USER_AGENT, HeaderValue::from_str(&user_agent)?);

        let client = Client::builder()
            .use_rustls_tls()
            .default_headers(headers)
            .timeout(options.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            credentials,
            service,
        })
    }

    /// Attaches credentials, sends the request, and classifies the HTTP status.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        mut headers: HeaderMap,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, HttpError> {
        let url = format!("{}{}", self.base_url, path);
        if let Some(authorization) = self.credentials.authorization(self.service).await {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&authorization)?);
        }

        let body_len = body.as_ref().map(Vec::len).unwrap_or(0);
        tracing::debug!(
            service = ?self.service,
            method = %method,
            url = %url,
            headers = ?redact_headers(&headers),
            body_len = body_len,
            "content-trust HTTP request"
        );

        let builder = self.client.request(method.clone(), url.clone()).headers(headers);
        let builder = match body {
            Some(bytes) => builder.body(bytes),
            None => builder,
        };
        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body_bytes = response.bytes().await.unwrap_or_default();
            tracing::debug!(
                service = ?self.service,
                method = %method,
                url = %url,
                status = %status,
                body = %truncate_preview_text(String::from_utf8_lossy(&body_bytes)),
                "content-trust HTTP response"
            );
            return Err(classify_status(status, &url));
        }

        tracing::debug!(
            service = ?self.service,
            method = %method,
            url = %url,
            status = %status,
            content_length = ?response.content_length(),
            "content-trust HTTP response"
        );
        Ok(response)
    }

    /// `GET` returning the raw response body.
    pub async fn get_bytes(&self, path: &str, headers: HeaderMap) -> Result<Vec<u8>, HttpError> {
        let response = self.send(Method::GET, path, headers, None).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Maps a non-success status to the error taxonomy.
pub fn classify_status(status: StatusCode, url: &str) -> HttpError {
    match status {
        StatusCode::NOT_FOUND => HttpError::NotFound(url.to_string()),
        StatusCode::UNAUTHORIZED => HttpError::Unauthorized,
        s if s.is_server_error() => HttpError::Server(s.as_u16()),
        s => HttpError::Status(s.as_u16()),
    }
}

/// Downgrades [`HttpError::NotFound`] to `None`, keeping every other error.
pub fn optional<T>(result: Result<T, HttpError>) -> Result<Option<T>, HttpError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Returns a redacted view of request headers suitable for debug logging.
fn redact_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let lower = name.as_str().to_ascii_lowercase();
            let display = if name == AUTHORIZATION {
                "<redacted>".to_string()
            } else {
                value
                    .to_str()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|_| "<non-utf8>".to_string())
            };
            (lower, display)
        })
        .collect()
}

fn truncate_preview_text(text: Cow<'_, str>) -> String {
    const MAX_CHARS: usize = 1024;
    let mut chars = text.chars();
    let mut preview = String::new();
    for _ in 0..MAX_CHARS {
        match chars.next() {
            Some(ch) => preview.push(ch),
            None => return preview,
        }
    }
    if chars.next().is_some() {
        preview.push('…');
    }
    preview
}

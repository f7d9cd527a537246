//! Outbound request model, auth decoration and the pluggable HTTP transport.
//!
//! The executor never talks to `reqwest` directly: it builds an [`OutboundRequest`] and hands it to
//! an [`HttpTransport`]. [`ReqwestTransport`] is the production implementation; tests plug in
//! counting fakes.

use crate::config::{ApiKeyLocation, AuthConfig};
use crate::safety::sanitize_reqwest_error;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, COOKIE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum HttpToolsError {
    #[error("config error: {0}")]
    Config(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, HttpToolsError>;

/// Network-level failure: the upstream never produced an HTTP status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("response too large: {0}")]
    TooLarge(String),
    #[error("request failed: {0}")]
    Other(String),
}

impl TransportError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let msg = sanitize_reqwest_error(&e);
        if e.is_timeout() {
            TransportError::Timeout(msg)
        } else if e.is_connect() {
            TransportError::Connect(msg)
        } else if e.is_body() || e.is_decode() {
            TransportError::Body(msg)
        } else {
            TransportError::Other(msg)
        }
    }
}

/// A fully assembled request, ready to send.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
}

impl OutboundRequest {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Append a query parameter. Arrays are exploded into repeated keys; `null` is skipped.
    pub fn append_query(&mut self, name: &str, value: &Value) {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                let mut pairs = self.url.query_pairs_mut();
                for item in items {
                    pairs.append_pair(name, &value_to_string(item));
                }
            }
            other => {
                self.url
                    .query_pairs_mut()
                    .append_pair(name, &value_to_string(other));
            }
        }
    }

    /// Set a query parameter, dropping any earlier pairs with the same name.
    pub fn set_query(&mut self, name: &str, value: &str) {
        let kept: Vec<(String, String)> = self
            .url
            .query_pairs()
            .filter(|(k, _)| k != name)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        self.url
            .query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(name, value);
    }

    /// Insert (replace) a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the name or value is not a valid HTTP header token.
    pub fn insert_header(&mut self, name: &str, value: &str) -> Result<()> {
        let (name, value) = header_pair(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Fold cookie parameters into a single `Cookie` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting header value is invalid.
    pub fn set_cookies(&mut self, cookies: &[(String, String)]) -> Result<()> {
        if cookies.is_empty() {
            return Ok(());
        }
        let joined = cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        let value = HeaderValue::from_str(&joined)
            .map_err(|e| HttpToolsError::Runtime(format!("Invalid cookie value: {e}")))?;
        self.headers.insert(COOKIE, value);
        Ok(())
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| HttpToolsError::Runtime(format!("Invalid header name '{name}': {e}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| HttpToolsError::Runtime(format!("Invalid value for header '{name}': {e}")))?;
    Ok((name, value))
}

/// Decorate a request with credentials.
///
/// Runs after caller headers and params are in place, so auth wins on any name collision.
///
/// # Errors
///
/// Returns an error if the credential cannot be encoded as a header value.
pub fn apply_auth(auth: &AuthConfig, request: &mut OutboundRequest) -> Result<()> {
    match auth {
        AuthConfig::None => Ok(()),
        AuthConfig::Bearer { token } => {
            let value = sensitive_value(&format!("Bearer {token}"))?;
            request.headers.insert(AUTHORIZATION, value);
            Ok(())
        }
        AuthConfig::Basic { credentials } => {
            let value = sensitive_value(&format!("Basic {credentials}"))?;
            request.headers.insert(AUTHORIZATION, value);
            Ok(())
        }
        AuthConfig::ApiKey {
            key,
            name,
            location: ApiKeyLocation::Header,
        } => {
            let (name, _) = header_pair(name, key)?;
            request.headers.insert(name, sensitive_value(key)?);
            Ok(())
        }
        AuthConfig::ApiKey {
            key,
            name,
            location: ApiKeyLocation::Query,
        } => {
            request.set_query(name, key);
            Ok(())
        }
    }
}

fn sensitive_value(s: &str) -> Result<HeaderValue> {
    let mut v = HeaderValue::from_str(s)
        .map_err(|_| HttpToolsError::Runtime("Credential is not a valid header value".into()))?;
    v.set_sensitive(true);
    Ok(v)
}

/// Raw upstream response.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// The seam between the executor and the network.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        request: OutboundRequest,
    ) -> std::result::Result<InboundResponse, TransportError>;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
    max_response_bytes: Option<usize>,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            max_response_bytes: None,
        }
    }

    /// Refuse response bodies larger than `max` bytes.
    #[must_use]
    pub fn with_max_response_bytes(mut self, max: usize) -> Self {
        self.max_response_bytes = Some(max);
        self
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: OutboundRequest,
    ) -> std::result::Result<InboundResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(t) = request.timeout {
            builder = builder.timeout(t);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string);
        let body = read_response_body_limited_bytes(response, self.max_response_bytes).await?;

        Ok(InboundResponse {
            status,
            content_type,
            body,
        })
    }
}

async fn read_response_body_limited_bytes(
    mut response: reqwest::Response,
    max_bytes: Option<usize>,
) -> std::result::Result<Vec<u8>, TransportError> {
    let Some(max) = max_bytes else {
        let bytes = response.bytes().await?;
        return Ok(bytes.to_vec());
    };

    if let Some(len) = response.content_length()
        && len > max as u64
    {
        tracing::warn!(
            content_length = len,
            limit = max,
            "Refusing response body over the size limit"
        );
        return Err(TransportError::TooLarge(format!("{len} bytes (limit {max})")));
    }

    let mut out: Vec<u8> = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if out.len().saturating_add(chunk.len()) > max {
            tracing::warn!(
                received = out.len(),
                limit = max,
                "Response body stream exceeded the size limit"
            );
            return Err(TransportError::TooLarge(format!("exceeded {max} bytes")));
        }
        out.extend_from_slice(&chunk);
    }

    Ok(out)
}

#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported method '{}'", other)),
        }
    }
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Absolute path on the server, e.g. `/auth/login`.
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), bearer: None, body: None }
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self { self.bearer = Some(token.into()); self }

    pub fn json(mut self, body: Value) -> Self { self.body = Some(body); self }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Parsed JSON body; non-JSON bodies arrive as a string value.
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    /// Server-provided `msg`, or a generic line naming the status.
    pub fn message(&self) -> String {
        self.body
            .get("msg")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }

    pub fn code(&self) -> Option<&str> { self.body.get("code").and_then(|c| c.as_str()) }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("{0}")]
    Network(String),
}

/// Moves one request to the server. Implemented over HTTP for the CLI and
/// in-process for tests.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, TransportError>;
}

#[async_trait]
impl<T: AuthTransport + ?Sized> AuthTransport for Arc<T> {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, TransportError> { (**self).send(req).await }
}

/// Parse a response body, keeping non-JSON text as a string value.
pub fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() { return Value::Null; }
    serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[derive(Clone, Debug)]
pub struct HttpTransport {
    base: Url,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base: &str) -> Result<Self, TransportError> {
        let base = Url::parse(base).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", base, e)))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self { base, client })
    }

    pub fn base(&self) -> &Url { &self.base }
}

#[async_trait]
impl AuthTransport for HttpTransport {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.base.join(&req.path).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let mut builder = match req.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
            HttpMethod::Delete => self.client.delete(url),
        };
        if let Some(token) = req.bearer.as_deref() {
            let v = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransportError::Network(format!("bad token header: {}", e)))?;
            builder = builder.header(AUTHORIZATION, v);
        }
        if let Some(body) = req.body.as_ref() {
            builder = builder.json(body);
        }
        let resp = builder.send().await.map_err(|e| TransportError::Network(e.to_string()))?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(ApiResponse { status, body: parse_body(&bytes) })
    }
}

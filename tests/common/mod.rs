#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tokio::sync::Notify;
use tower::ServiceExt;

use gymauth::cli::connectivity::parse_body;
use gymauth::cli::{ApiRequest, ApiResponse, AuthTransport, HttpMethod, TransportError};
use gymauth::identity::{Role, TokenCodec};
use gymauth::security::CredentialStore;
use gymauth::server::{build_router, AppState};
use gymauth::storage::RevocationLedger;

pub const SECRET: &[u8] = b"integration-secret-integration-s!";
pub const TTL: i64 = 3600;

/// In-memory server state with one pre-registered admin (`coach` / `whistle`).
pub fn app_state() -> AppState {
    let creds = Arc::new(CredentialStore::in_memory());
    creds.create("coach", "whistle", Role::Admin).expect("seed admin");
    let codec = Arc::new(TokenCodec::new(SECRET, TTL).expect("codec"));
    AppState::new(creds, codec, RevocationLedger::in_memory(TTL))
}

pub fn app() -> (Router, AppState) {
    let state = app_state();
    (build_router(state.clone()), state)
}

fn to_method(m: HttpMethod) -> Method {
    match m {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// One request through the router. Returns the status and the parsed body.
pub async fn call(app: &Router, method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut b = Request::builder().method(method).uri(uri);
    if let Some(t) = bearer {
        b = b.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    let body = match body {
        Some(v) => {
            b = b.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(b.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, parse_body(&bytes))
}

pub async fn register(app: &Router, username: &str, password: &str, role: &str) -> (StatusCode, Value) {
    let body = serde_json::json!({ "username": username, "password": password, "role": role });
    call(app, Method::POST, "/auth/register", None, Some(body)).await
}

pub async fn login(app: &Router, username: &str, password: &str, requested: Option<&str>) -> (StatusCode, Value) {
    let mut body = serde_json::json!({ "username": username, "password": password });
    if let Some(r) = requested {
        body["requestedRole"] = Value::String(r.to_string());
    }
    call(app, Method::POST, "/auth/login", None, Some(body)).await
}

/// Log in and return the token, panicking on failure.
pub async fn token_for(app: &Router, username: &str, password: &str) -> String {
    let (status, body) = login(app, username, password, None).await;
    assert_eq!(status, StatusCode::OK, "login {} failed: {}", username, body);
    body["token"].as_str().expect("token in login response").to_string()
}

/// Drives the router in-process. Counts calls and can be switched offline.
pub struct InProcessTransport {
    router: Router,
    calls: AtomicUsize,
    offline: AtomicBool,
}

impl InProcessTransport {
    pub fn new(router: Router) -> Self {
        Self { router, calls: AtomicUsize::new(0), offline: AtomicBool::new(false) }
    }

    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

    pub fn set_offline(&self, offline: bool) { self.offline.store(offline, Ordering::SeqCst); }
}

#[async_trait]
impl AuthTransport for InProcessTransport {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Network("connection refused".into()));
        }
        let mut b = Request::builder().method(to_method(req.method)).uri(&req.path);
        if let Some(t) = &req.bearer {
            b = b.header(header::AUTHORIZATION, format!("Bearer {}", t));
        }
        let body = match req.body {
            Some(v) => {
                b = b.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let request = b.body(body).map_err(|e| TransportError::Network(e.to_string()))?;
        let resp = self.router.clone().oneshot(request).await.map_err(|e| TransportError::Network(e.to_string()))?;
        let status = resp.status().as_u16();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(ApiResponse { status, body: parse_body(&bytes) })
    }
}

/// Holds every request until released, announcing arrival first.
pub struct GatedTransport<T> {
    inner: T,
    pub entered: Notify,
    pub release: Notify,
}

impl<T> GatedTransport<T> {
    pub fn new(inner: T) -> Self { Self { inner, entered: Notify::new(), release: Notify::new() } }
}

#[async_trait]
impl<T: AuthTransport> AuthTransport for GatedTransport<T> {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.send(req).await
    }
}

/// Never answers.
pub struct StalledTransport;

#[async_trait]
impl AuthTransport for StalledTransport {
    async fn send(&self, _req: ApiRequest) -> Result<ApiResponse, TransportError> {
        std::future::pending::<()>().await;
        Err(TransportError::Network("unreachable".into()))
    }
}

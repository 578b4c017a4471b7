//!
//! gymauth HTTP server
//! -------------------
//! Axum router for the authentication core of the gym management portal.
//!
//! Responsibilities:
//! - Login, registration and logout backed by the credential store and token codec.
//! - Role-gated route groups (admin, member, user) behind the access gate middleware.
//! - Startup: open the on-disk stores, seed the default admin, start the revocation sweeper.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post, MethodRouter};
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{
    bearer_token, AccessGate, AuthProvider, LocalAuthProvider, LoginRequest, RegisterRequest, Role, TokenCodec,
};
use crate::security::{CredentialStore, PRINCIPALS_FILE};
use crate::storage::RevocationLedger;

pub mod middleware;
pub mod payloads;

use self::middleware::{require_roles, Authenticated, RouteGuard};
use self::payloads::{LoginPayload, PromotePayload, RegisterPayload, SearchQuery, ValidJson};

pub const REVOCATIONS_FILE: &str = "revocations.bin";

const ADMIN_ONLY: &[Role] = &[Role::Admin];
const MEMBER_ONLY: &[Role] = &[Role::Member];
const USER_ONLY: &[Role] = &[Role::User];
const ANY_ROLE: &[Role] = &Role::ALL;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn AuthProvider>,
    pub gate: AccessGate,
    pub credentials: Arc<CredentialStore>,
}

impl AppState {
    pub fn new(credentials: Arc<CredentialStore>, codec: Arc<TokenCodec>, ledger: RevocationLedger) -> Self {
        let provider: Arc<dyn AuthProvider> =
            Arc::new(LocalAuthProvider::new(credentials.clone(), codec.clone(), ledger.clone()));
        Self { provider, gate: AccessGate::new(codec, ledger), credentials }
    }

    /// Open the stores under `config.data_dir` and seed the default admin into an empty store.
    pub fn open(config: &ServerConfig, now: i64) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create or access data dir: {}", config.data_dir.display()))?;
        let credentials = CredentialStore::open(config.data_dir.join(PRINCIPALS_FILE))
            .context("While opening credential store")?;
        credentials
            .ensure_default_admin(&config.admin_username, &config.admin_password)
            .context("While ensuring default admin")?;
        let secret = match &config.token_secret {
            Some(s) => s.clone(),
            None => {
                warn!(target: "startup", "no token secret configured; using a random one, tokens will not survive a restart");
                crate::identity::token::generate_secret()?
            }
        };
        let codec = TokenCodec::new(&secret, config.token_ttl_secs)?;
        let ledger = RevocationLedger::open(config.data_dir.join(REVOCATIONS_FILE), config.token_ttl_secs, now)
            .context("While opening revocation ledger")?;
        Ok(Self::new(Arc::new(credentials), Arc::new(codec), ledger))
    }

    pub fn ledger(&self) -> &RevocationLedger { self.gate.ledger() }
}

fn guarded(route: MethodRouter<AppState>, gate: &AccessGate, permitted: &'static [Role]) -> MethodRouter<AppState> {
    // `layer`, not `route_layer`: the gate also answers for methods the route does not serve.
    route.layer(axum::middleware::from_fn_with_state(RouteGuard::new(gate.clone(), permitted), require_roles))
}

pub fn build_router(state: AppState) -> Router {
    let gate = state.gate.clone();
    Router::new()
        .route("/", get(|| async { "gymauth ok" }))
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/logout", post(logout))
        .route("/auth/me", guarded(get(me), &gate, ANY_ROLE))
        .route("/admin/members", guarded(get(list_members), &gate, ADMIN_ONLY))
        .route("/admin/members/promote", guarded(post(promote_member), &gate, ADMIN_ONLY))
        .route("/admin/reports", guarded(get(reports), &gate, ADMIN_ONLY))
        .route("/member/bills", guarded(get(member_bills), &gate, MEMBER_ONLY))
        .route("/member/notifications", guarded(get(member_notifications), &gate, MEMBER_ONLY))
        .route("/user/details", guarded(get(user_details), &gate, USER_ONLY))
        .route("/user/search", guarded(get(user_search), &gate, USER_ONLY))
        .with_state(state)
}

fn log_startup(config: &ServerConfig) {
    let cwd = std::env::current_dir().ok();
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "gymauth starting: cwd={:?}, data_dir={:?}, http_port={}, token_ttl_secs={}, sweep_interval_secs={}, RUST_LOG='{}'",
        cwd, config.data_dir, config.http_port, config.token_ttl_secs, config.sweep_interval_secs, rust_log
    );
}

pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    log_startup(&config);
    let state = AppState::open(&config, crate::clock::now_secs())?;
    info!(
        target: "startup",
        principals = state.credentials.len(),
        revoked = state.ledger().len(),
        "stores ready"
    );

    // Background revocation sweeper
    let _sweeper = state.ledger().spawn_sweeper(Duration::from_secs(config.sweep_interval_secs));

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    info!(target: "startup", "gymauth listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Run password hashing off the async executor.
async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::internal(format!("blocking task failed: {}", e)))?
}

async fn login(State(state): State<AppState>, ValidJson(payload): ValidJson<LoginPayload>) -> AppResult<impl IntoResponse> {
    let req = LoginRequest { username: payload.username, password: payload.password, requested_role: payload.requested_role };
    let provider = state.provider.clone();
    let now = crate::clock::now_secs();
    let resp = blocking(move || provider.login(&req, now)).await?;
    Ok(Json(resp))
}

async fn register(State(state): State<AppState>, ValidJson(payload): ValidJson<RegisterPayload>) -> AppResult<impl IntoResponse> {
    let req = RegisterRequest { username: payload.username, password: payload.password, role: payload.role };
    let provider = state.provider.clone();
    let now = crate::clock::now_secs();
    let resp = blocking(move || provider.register(&req, now)).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<impl IntoResponse> {
    let bearer = bearer_token(&headers).map(str::to_string);
    let provider = state.provider.clone();
    let now = crate::clock::now_secs();
    // Recording the revocation rewrites the ledger snapshot.
    blocking(move || provider.logout(bearer.as_deref(), now)).await?;
    Ok(Json(json!({ "msg": "Logged out successfully" })))
}

async fn me(Authenticated(allow): Authenticated) -> impl IntoResponse {
    Json(json!({
        "id": allow.principal_id,
        "username": allow.username,
        "role": allow.role,
        "expiresAt": allow.expires_at,
    }))
}

async fn list_members(State(state): State<AppState>) -> impl IntoResponse {
    let members: Vec<_> = state.credentials.list().into_iter().filter(|p| p.role != Role::Admin).collect();
    Json(json!({ "members": members }))
}

async fn promote_member(
    State(state): State<AppState>,
    Authenticated(allow): Authenticated,
    ValidJson(payload): ValidJson<PromotePayload>,
) -> AppResult<impl IntoResponse> {
    let user = state.credentials.set_role(&payload.username, payload.role)?;
    info!(target: "auth", by = %allow.username, user = %user.username, role = %user.role, "promotion");
    Ok(Json(json!({ "msg": format!("{} is now {}", user.username, user.role), "user": user })))
}

async fn reports(State(state): State<AppState>) -> impl IntoResponse {
    let all = state.credentials.list();
    let count = |r: Role| all.iter().filter(|p| p.role == r).count();
    Json(json!({
        "principals": all.len(),
        "admins": count(Role::Admin),
        "members": count(Role::Member),
        "users": count(Role::User),
        "revokedTokens": state.ledger().len(),
    }))
}

async fn member_bills(Authenticated(allow): Authenticated) -> impl IntoResponse {
    Json(json!({ "member": allow.principal_id, "bills": [] }))
}

async fn member_notifications(Authenticated(allow): Authenticated) -> impl IntoResponse {
    Json(json!({ "member": allow.principal_id, "notifications": [] }))
}

async fn user_details(State(state): State<AppState>, Authenticated(allow): Authenticated) -> AppResult<impl IntoResponse> {
    let user = state.credentials.find(&allow.username).ok_or_else(|| AppError::NotFound("User".to_string()))?;
    Ok(Json(json!({ "user": user })))
}

async fn user_search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> impl IntoResponse {
    let needle = query.q.trim().to_lowercase();
    let results: Vec<String> = state
        .credentials
        .list()
        .into_iter()
        .filter(|p| p.role != Role::Admin)
        .map(|p| p.username)
        .filter(|name| needle.is_empty() || name.to_lowercase().contains(&needle))
        .collect();
    Json(json!({ "query": query.q, "results": results }))
}

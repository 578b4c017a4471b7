//! Client-side session lifecycle.
//!
//! ```text
//! anonymous ──login──▶ authenticating ──ok──▶ authenticated ──logout / 401 / 403──▶ anonymous
//!     ▲                     │
//!     └──── login ◀── failed ◀──rejected
//! ```
//!
//! One transition runs at a time; a second `login`/`logout`/`restore` while one
//! is in flight fails with [`SessionError::Busy`]. Dropping an in-flight
//! transition future puts the state back to what it was before the transition,
//! unless the server ended the session in the meantime.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::connectivity::{ApiRequest, ApiResponse, AuthTransport, HttpMethod, TransportError};
use super::persist::{Lifecycle, PersistedSession, SessionStorage};
use super::redirect::{landing_view, LandingView};
use crate::identity::{PrincipalSummary, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated { token: String, principal: PrincipalSummary },
    Failed { reason: String },
}

impl SessionState {
    pub fn lifecycle(&self) -> Lifecycle {
        match self {
            SessionState::Anonymous => Lifecycle::Anonymous,
            SessionState::Authenticating => Lifecycle::Authenticating,
            SessionState::Authenticated { .. } => Lifecycle::Authenticated,
            SessionState::Failed { .. } => Lifecycle::Failed,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// The server refused the transition; `message` is its user-facing text.
    #[error("{message}")]
    Rejected { status: u16, code: Option<String>, message: String },
    #[error("another sign-in or sign-out is already in progress")]
    Busy,
    #[error("already signed in as {0}")]
    AlreadyAuthenticated(String),
    #[error("not signed in")]
    NotAuthenticated,
    /// A protected call came back 401/403; the local session has been dropped.
    #[error("signed out: {0}")]
    SessionInvalidated(String),
    #[error("network error: {0}")]
    Transport(#[from] TransportError),
    #[error("session storage error: {0}")]
    Storage(String),
    #[error("unexpected server response: {0}")]
    Protocol(String),
}

impl SessionError {
    fn rejected(resp: &ApiResponse) -> Self {
        SessionError::Rejected { status: resp.status, code: resp.code().map(|c| c.to_string()), message: resp.message() }
    }
}

#[derive(Deserialize)]
struct LoginReply {
    token: String,
    user: PrincipalSummary,
}

/// Holds the in-flight flag for one transition. Unless settled, dropping it
/// restores the state captured at the start. The restore is skipped when the
/// session was invalidated (epoch bumped) while the transition was pending.
struct Transition<'a> {
    in_flight: &'a AtomicBool,
    state: &'a Mutex<SessionState>,
    epoch: &'a AtomicU64,
    started: u64,
    rollback: Option<SessionState>,
}

impl<'a> Transition<'a> {
    fn begin(in_flight: &'a AtomicBool, state: &'a Mutex<SessionState>, epoch: &'a AtomicU64) -> Result<Self, SessionError> {
        if in_flight.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(SessionError::Busy);
        }
        let guard = state.lock();
        let started = epoch.load(Ordering::Acquire);
        let rollback = Some(guard.clone());
        drop(guard);
        Ok(Self { in_flight, state, epoch, started, rollback })
    }

    fn set(&self, next: SessionState) { *self.state.lock() = next; }

    /// Keep whatever state the transition ended in.
    fn settle(mut self, next: SessionState) {
        self.set(next);
        self.rollback = None;
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if let Some(prev) = self.rollback.take() {
            let mut st = self.state.lock();
            if self.epoch.load(Ordering::Acquire) == self.started {
                debug!(target: "session", state = ?prev.lifecycle(), "transition abandoned; restoring state");
                *st = prev;
            } else {
                debug!(target: "session", "transition abandoned after invalidation; keeping anonymous");
            }
        }
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Client session state machine, generic over how requests travel and where the session is kept.
pub struct SessionLifecycle<T, S> {
    transport: T,
    storage: S,
    state: Mutex<SessionState>,
    in_flight: AtomicBool,
    /// Bumped each time the server ends the session under a pending transition.
    epoch: AtomicU64,
}

impl<T: AuthTransport, S: SessionStorage> SessionLifecycle<T, S> {
    pub fn new(transport: T, storage: S) -> Self {
        Self { transport, storage, state: Mutex::new(SessionState::Anonymous), in_flight: AtomicBool::new(false), epoch: AtomicU64::new(0) }
    }

    pub fn state(&self) -> SessionState { self.state.lock().clone() }

    pub fn lifecycle(&self) -> Lifecycle { self.state.lock().lifecycle() }

    pub fn principal(&self) -> Option<PrincipalSummary> {
        match &*self.state.lock() {
            SessionState::Authenticated { principal, .. } => Some(principal.clone()),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<String> {
        match &*self.state.lock() {
            SessionState::Authenticated { token, .. } => Some(token.clone()),
            _ => None,
        }
    }

    pub fn storage(&self) -> &S { &self.storage }

    /// Resume a persisted session without contacting the server.
    pub async fn restore(&self) -> Result<Option<LandingView>, SessionError> {
        let tx = Transition::begin(&self.in_flight, &self.state, &self.epoch)?;
        if let SessionState::Authenticated { principal, .. } = &*self.state.lock() {
            return Ok(Some(landing_view(principal)));
        }
        let stored = self.storage.load().map_err(|e| SessionError::Storage(e.to_string()))?;
        match stored {
            Some(s) if s.status == Lifecycle::Authenticated && !s.token.is_empty() => {
                let view = landing_view(&s.principal);
                info!(target: "session", user = %s.principal.username, "session restored");
                tx.settle(SessionState::Authenticated { token: s.token, principal: s.principal });
                Ok(Some(view))
            }
            Some(_) => {
                // Only authenticated sessions are ever written; anything else is stale.
                let _ = self.storage.clear();
                tx.settle(SessionState::Anonymous);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub async fn login(&self, username: &str, password: &str, requested_role: Option<Role>) -> Result<LandingView, SessionError> {
        let tx = Transition::begin(&self.in_flight, &self.state, &self.epoch)?;
        if let SessionState::Authenticated { principal, .. } = &*self.state.lock() {
            return Err(SessionError::AlreadyAuthenticated(principal.username.clone()));
        }
        tx.set(SessionState::Authenticating);

        let mut body = json!({ "username": username, "password": password });
        if let Some(role) = requested_role {
            body["requestedRole"] = Value::String(role.as_str().to_string());
        }
        let resp = match self.transport.send(ApiRequest::new(HttpMethod::Post, "/auth/login").json(body)).await {
            Ok(r) => r,
            Err(e) => {
                tx.settle(SessionState::Failed { reason: e.to_string() });
                return Err(e.into());
            }
        };
        if !resp.is_success() {
            let err = SessionError::rejected(&resp);
            info!(target: "session", status = resp.status, "login rejected");
            tx.settle(SessionState::Failed { reason: err.to_string() });
            return Err(err);
        }
        let reply: LoginReply = match serde_json::from_value(resp.body) {
            Ok(r) => r,
            Err(e) => {
                tx.settle(SessionState::Failed { reason: "malformed login response".to_string() });
                return Err(SessionError::Protocol(e.to_string()));
            }
        };
        let persisted = PersistedSession { token: reply.token, principal: reply.user, status: Lifecycle::Authenticated };
        if let Err(e) = self.storage.save(&persisted) {
            tx.settle(SessionState::Failed { reason: "could not store session".to_string() });
            return Err(SessionError::Storage(e.to_string()));
        }
        let view = landing_view(&persisted.principal);
        info!(target: "session", user = %persisted.principal.username, role = %persisted.principal.role, "signed in");
        tx.settle(SessionState::Authenticated { token: persisted.token, principal: persisted.principal });
        Ok(view)
    }

    /// Server-confirmed logout. Local state is only cleared once the server has
    /// revoked the token or reports it already invalid.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let tx = Transition::begin(&self.in_flight, &self.state, &self.epoch)?;
        let token = match &*self.state.lock() {
            SessionState::Authenticated { token, .. } => token.clone(),
            _ => return Err(SessionError::NotAuthenticated),
        };
        let resp = self.transport.send(ApiRequest::new(HttpMethod::Post, "/auth/logout").bearer(token)).await?;
        if resp.is_success() || resp.status == 401 {
            let cleared = self.storage.clear();
            tx.settle(SessionState::Anonymous);
            info!(target: "session", status = resp.status, "signed out");
            return cleared.map_err(|e| SessionError::Storage(e.to_string()));
        }
        Err(SessionError::rejected(&resp))
    }

    /// Authenticated call. A 401 or 403 ends the local session without contacting the server again.
    pub async fn request(&self, method: HttpMethod, path: &str, body: Option<Value>) -> Result<ApiResponse, SessionError> {
        let token = self.token().ok_or(SessionError::NotAuthenticated)?;
        let mut req = ApiRequest::new(method, path).bearer(token.clone());
        req.body = body;
        let resp = self.transport.send(req).await?;
        if resp.status == 401 || resp.status == 403 {
            self.drop_session(&token);
            return Err(SessionError::SessionInvalidated(resp.message()));
        }
        Ok(resp)
    }

    fn drop_session(&self, token: &str) {
        let mut st = self.state.lock();
        let current = matches!(&*st, SessionState::Authenticated { token: t, .. } if t == token);
        if !current { return; }
        *st = SessionState::Anonymous;
        self.epoch.fetch_add(1, Ordering::AcqRel);
        drop(st);
        if let Err(e) = self.storage.clear() {
            warn!(target: "session", "failed to remove session entry: {}", e);
        }
        info!(target: "session", "session invalidated by server");
    }
}

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::AppError;
use crate::identity::{bearer_token, AccessGate, Allow, Role};

/// Gate plus the roles one route group admits.
#[derive(Clone, Debug)]
pub struct RouteGuard {
    pub gate: AccessGate,
    pub permitted: &'static [Role],
}

impl RouteGuard {
    pub fn new(gate: AccessGate, permitted: &'static [Role]) -> Self { Self { gate, permitted } }
}

/// Runs the gate before the route body. On success the [`Allow`] is placed in
/// request extensions for the [`Authenticated`] extractor.
pub async fn require_roles(State(guard): State<RouteGuard>, mut req: Request, next: Next) -> Result<Response, AppError> {
    let now = crate::clock::now_secs();
    let allow = guard.gate.check(bearer_token(req.headers()), guard.permitted, now)?;
    req.extensions_mut().insert(allow);
    Ok(next.run(req).await)
}

/// The caller admitted by [`require_roles`].
#[derive(Debug, Clone)]
pub struct Authenticated(pub Allow);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Allow>().cloned().map(Authenticated).ok_or(AppError::Unauthenticated)
    }
}

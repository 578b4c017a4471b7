//! Unified application error model and mapping helpers.
//! Every authentication and authorization failure is a value of [`AppError`];
//! the HTTP boundary turns it into a status code plus a short, user-safe body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::{error, warn};

use crate::identity::Role;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    /// Unknown username or wrong password. The two are never distinguished.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("username '{0}' already exists")]
    DuplicateUsername(String),
    /// Missing, malformed or badly signed token.
    #[error("unauthenticated")]
    Unauthenticated,
    /// Well-formed token past its expiry.
    #[error("token expired")]
    Expired,
    /// Well-formed, unexpired token that was logged out.
    #[error("token revoked")]
    Revoked,
    #[error("forbidden: insufficient rights")]
    Forbidden,
    #[error("role mismatch at login: requested {requested}, actual {actual}")]
    RoleMismatchAtLogin { requested: Role, actual: Role },
    #[error("{code}: {message}")]
    UserInput { code: String, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(msg: S) -> Self { AppError::Internal(msg.into()) }

    pub fn code_str(&self) -> &str {
        match self {
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::DuplicateUsername(_) => "duplicate_username",
            AppError::Unauthenticated => "unauthenticated",
            AppError::Expired => "token_expired",
            AppError::Revoked => "token_revoked",
            AppError::Forbidden => "forbidden",
            AppError::RoleMismatchAtLogin { .. } => "role_mismatch",
            AppError::UserInput { code, .. } => code.as_str(),
            AppError::NotFound(_) => "not_found",
            AppError::Io(_) => "io_error",
            AppError::Internal(_) => "internal",
        }
    }

    /// Message safe to show an end user. Storage and internal details stay in the logs.
    pub fn message(&self) -> String {
        match self {
            AppError::InvalidCredentials => "Invalid credentials".to_string(),
            AppError::DuplicateUsername(_) => "Username already exists".to_string(),
            AppError::Unauthenticated => "No valid token provided".to_string(),
            AppError::Expired => "Session expired".to_string(),
            AppError::Revoked => "Token revoked".to_string(),
            AppError::Forbidden => "Forbidden: insufficient rights".to_string(),
            AppError::RoleMismatchAtLogin { requested, actual } => format!(
                "This account is registered as '{}' and cannot sign in to the '{}' portal",
                actual, requested
            ),
            AppError::UserInput { message, .. } => message.clone(),
            AppError::NotFound(what) => format!("{} not found", what),
            AppError::Io(_) => "Storage unavailable".to_string(),
            AppError::Internal(_) => "Server error".to_string(),
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        match self {
            AppError::InvalidCredentials
            | AppError::DuplicateUsername(_)
            | AppError::RoleMismatchAtLogin { .. }
            | AppError::UserInput { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated | AppError::Expired | AppError::Revoked => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Io(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for the three causes that end a session (all surfaced as 401).
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, AppError::Unauthenticated | AppError::Expired | AppError::Revoked)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self { AppError::Io(err.to_string()) }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self { AppError::Internal(err.to_string()) }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        match &self {
            AppError::Io(_) | AppError::Internal(_) => error!(target: "http", code = self.code_str(), "{}", self),
            _ => warn!(target: "http", code = self.code_str(), status = status.as_u16(), "request rejected"),
        }
        let body = serde_json::json!({ "msg": self.message(), "code": self.code_str() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::InvalidCredentials.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::DuplicateUsername("a".into()).http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthenticated.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Expired.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Revoked.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::RoleMismatchAtLogin { requested: Role::Admin, actual: Role::User }.http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::user("bad_input", "oops").http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::NotFound("user".into()).http_status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Io("disk".into()).http_status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::internal("panic").http_status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn messages_hide_internal_detail() {
        let e = AppError::Io("/var/lib/gymauth/principals.json: permission denied".into());
        assert!(!e.message().contains("principals.json"));
        let e = AppError::internal("jwt encode failed: key");
        assert_eq!(e.message(), "Server error");
        // Unknown user and wrong password must read the same.
        assert_eq!(AppError::InvalidCredentials.message(), "Invalid credentials");
    }

    #[test]
    fn role_mismatch_message_names_both_roles() {
        let e = AppError::RoleMismatchAtLogin { requested: Role::Admin, actual: Role::User };
        let msg = e.message();
        assert!(msg.contains("'user'"), "{}", msg);
        assert!(msg.contains("'admin'"), "{}", msg);
    }

    #[test]
    fn session_invalid_covers_all_401_causes() {
        assert!(AppError::Unauthenticated.is_session_invalid());
        assert!(AppError::Expired.is_session_invalid());
        assert!(AppError::Revoked.is_session_invalid());
        assert!(!AppError::Forbidden.is_session_invalid());
        assert!(!AppError::InvalidCredentials.is_session_invalid());
    }

    #[tokio::test]
    async fn into_response_renders_msg_and_code() {
        let resp = AppError::Revoked.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["code"], "token_revoked");
        assert_eq!(v["msg"], "Token revoked");
    }
}

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::principal::{PrincipalSummary, Role};
use super::token::{fingerprint, TokenCodec, TokenDefect};
use crate::error::{AppError, AppResult};
use crate::security::CredentialStore;
use crate::storage::RevocationLedger;

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    /// Portal the caller is signing in to. `None` skips the portal check.
    pub requested_role: Option<Role>,
}

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: PrincipalSummary,
    pub expires_at: i64,
}

/// Login, registration and logout. Calls are blocking (password hashing);
/// async callers should run them off the executor.
pub trait AuthProvider: Send + Sync {
    fn login(&self, req: &LoginRequest, now: i64) -> AppResult<LoginResponse>;
    fn register(&self, req: &RegisterRequest, now: i64) -> AppResult<LoginResponse>;
    /// Revoke `token`. Returns true when this call revoked it, false if it already was.
    fn logout(&self, token: Option<&str>, now: i64) -> AppResult<bool>;
}

pub struct LocalAuthProvider {
    credentials: Arc<CredentialStore>,
    codec: Arc<TokenCodec>,
    ledger: RevocationLedger,
}

impl LocalAuthProvider {
    pub fn new(credentials: Arc<CredentialStore>, codec: Arc<TokenCodec>, ledger: RevocationLedger) -> Self {
        Self { credentials, codec, ledger }
    }

    fn mint(&self, user: PrincipalSummary, now: i64) -> AppResult<LoginResponse> {
        let issued = self.codec.issue(&user, now)?;
        Ok(LoginResponse { token: issued.token, user, expires_at: issued.claims.exp })
    }
}

impl AuthProvider for LocalAuthProvider {
    fn login(&self, req: &LoginRequest, now: i64) -> AppResult<LoginResponse> {
        let user = self.credentials.verify(&req.username, &req.password)?;
        if let Some(requested) = req.requested_role {
            if requested != user.role {
                info!(target: "auth", user = %user.username, requested = %requested, actual = %user.role, "portal role mismatch");
                return Err(AppError::RoleMismatchAtLogin { requested, actual: user.role });
            }
        }
        let resp = self.mint(user, now)?;
        info!(target: "auth", user = %resp.user.username, role = %resp.user.role, token = %fingerprint(&resp.token), "login");
        Ok(resp)
    }

    fn register(&self, req: &RegisterRequest, now: i64) -> AppResult<LoginResponse> {
        let user = self.credentials.create(&req.username, &req.password, req.role)?;
        self.mint(user, now)
    }

    fn logout(&self, token: Option<&str>, now: i64) -> AppResult<bool> {
        let token = token.ok_or(AppError::Unauthenticated)?;
        let claims = match self.codec.parse(token, now) {
            Ok(c) => c,
            Err(TokenDefect::Expired) => return Err(AppError::Expired),
            Err(_) => return Err(AppError::Unauthenticated),
        };
        let inserted = self.ledger.record_until(token, claims.exp, now)?;
        info!(target: "auth", user = %claims.username, token = %fingerprint(token), inserted, "logout");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: i64 = 1_700_000_000;

    fn provider() -> (LocalAuthProvider, RevocationLedger) {
        let creds = Arc::new(CredentialStore::in_memory());
        creds.create("alice", "pw1", Role::User).unwrap();
        creds.create("admin", "root", Role::Admin).unwrap();
        let codec = Arc::new(TokenCodec::new(b"provider-secret-provider-secret!", 3600).unwrap());
        let ledger = RevocationLedger::in_memory(3600);
        (LocalAuthProvider::new(creds, codec, ledger.clone()), ledger)
    }

    fn login(p: &LocalAuthProvider, user: &str, pw: &str, role: Option<Role>) -> AppResult<LoginResponse> {
        p.login(&LoginRequest { username: user.into(), password: pw.into(), requested_role: role }, T0)
    }

    #[test]
    fn login_returns_token_and_summary() {
        let (p, _) = provider();
        let resp = login(&p, "alice", "pw1", Some(Role::User)).unwrap();
        assert_eq!(resp.user.username, "alice");
        assert_eq!(resp.user.role, Role::User);
        assert_eq!(resp.expires_at, T0 + 3600);
        assert!(!resp.token.is_empty());
    }

    #[test]
    fn requested_role_must_match() {
        let (p, _) = provider();
        let err = login(&p, "alice", "pw1", Some(Role::Admin)).unwrap_err();
        assert_eq!(err, AppError::RoleMismatchAtLogin { requested: Role::Admin, actual: Role::User });
        // Bad password wins over a role mismatch.
        assert_eq!(login(&p, "alice", "bad", Some(Role::Admin)).unwrap_err(), AppError::InvalidCredentials);
        assert!(login(&p, "admin", "root", None).is_ok());
    }

    #[test]
    fn register_defaults_and_rejects_duplicates() {
        let (p, _) = provider();
        let req = RegisterRequest { username: "newbie".into(), password: "pw".into(), role: Role::default() };
        let resp = p.register(&req, T0).unwrap();
        assert_eq!(resp.user.role, Role::User);
        assert!(matches!(p.register(&req, T0), Err(AppError::DuplicateUsername(_))));
    }

    #[test]
    fn logout_records_until_token_expiry_and_is_idempotent() {
        let (p, ledger) = provider();
        let resp = login(&p, "alice", "pw1", None).unwrap();
        assert!(p.logout(Some(&resp.token), T0 + 10).unwrap());
        assert_eq!(ledger.entry(&resp.token).unwrap().expires_at, resp.expires_at);
        assert!(!p.logout(Some(&resp.token), T0 + 20).unwrap());
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn logout_rejects_missing_malformed_and_expired() {
        let (p, ledger) = provider();
        let resp = login(&p, "alice", "pw1", None).unwrap();
        assert_eq!(p.logout(None, T0), Err(AppError::Unauthenticated));
        assert_eq!(p.logout(Some("junk"), T0), Err(AppError::Unauthenticated));
        assert_eq!(p.logout(Some(&resp.token), T0 + 3600), Err(AppError::Expired));
        assert!(ledger.is_empty());
    }
}

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use tracing::{debug, info};
use uuid::Uuid;

use super::principal::Role;
use super::token::{fingerprint, TokenCodec, TokenDefect};
use crate::error::{AppError, AppResult};
use crate::storage::RevocationLedger;

/// Proof that a request passed the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allow {
    pub principal_id: Uuid,
    pub username: String,
    pub role: Role,
    pub expires_at: i64,
}

/// Per-request access decision: token validity, then revocation, then role.
/// Stateless apart from ledger reads; safe to share across handlers.
#[derive(Clone, Debug)]
pub struct AccessGate {
    codec: Arc<TokenCodec>,
    ledger: RevocationLedger,
}

impl AccessGate {
    pub fn new(codec: Arc<TokenCodec>, ledger: RevocationLedger) -> Self { Self { codec, ledger } }

    pub fn codec(&self) -> &TokenCodec { &self.codec }

    pub fn ledger(&self) -> &RevocationLedger { &self.ledger }

    /// Validity and revocation only; any role passes.
    pub fn authenticate(&self, bearer: Option<&str>, now: i64) -> AppResult<Allow> {
        self.check(bearer, &Role::ALL, now)
    }

    /// Short-circuits in order: absent, unparseable, expired, revoked, role not permitted.
    pub fn check(&self, bearer: Option<&str>, permitted: &[Role], now: i64) -> AppResult<Allow> {
        let Some(token) = bearer else {
            debug!(target: "gate", "no bearer token");
            return Err(AppError::Unauthenticated);
        };
        let claims = match self.codec.parse(token, now) {
            Ok(c) => c,
            Err(TokenDefect::Expired) => {
                info!(target: "gate", token = %fingerprint(token), "expired token presented");
                return Err(AppError::Expired);
            }
            Err(defect) => {
                debug!(target: "gate", token = %fingerprint(token), ?defect, "token rejected");
                return Err(AppError::Unauthenticated);
            }
        };
        if self.ledger.is_revoked(token, now) {
            info!(target: "gate", token = %fingerprint(token), user = %claims.username, "revoked token presented");
            return Err(AppError::Revoked);
        }
        if !permitted.contains(&claims.role) {
            info!(target: "gate", user = %claims.username, role = %claims.role, "role not permitted");
            return Err(AppError::Forbidden);
        }
        Ok(Allow { principal_id: claims.sub, username: claims.username, role: claims.role, expires_at: claims.exp })
    }
}

/// Token from `Authorization: Bearer <token>`. Scheme is case-insensitive; any other shape is absent.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, rest) = raw.split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") { return None; }
    let token = rest.trim();
    if token.is_empty() { None } else { Some(token) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PrincipalSummary;
    use axum::http::HeaderValue;

    const SECRET: &[u8] = b"gate-test-secret-gate-test-secret";
    const T0: i64 = 1_700_000_000;

    fn gate() -> AccessGate {
        let codec = Arc::new(TokenCodec::new(SECRET, 3600).unwrap());
        AccessGate::new(codec, RevocationLedger::in_memory(3600))
    }

    fn token_for(g: &AccessGate, role: Role) -> String {
        let p = PrincipalSummary { id: Uuid::new_v4(), username: format!("{}-1", role), role };
        g.codec().issue(&p, T0).unwrap().token
    }

    #[test]
    fn absent_and_garbage_tokens_are_unauthenticated() {
        let g = gate();
        assert_eq!(g.check(None, &Role::ALL, T0), Err(AppError::Unauthenticated));
        assert_eq!(g.check(Some("garbage"), &Role::ALL, T0), Err(AppError::Unauthenticated));
    }

    #[test]
    fn expired_is_distinct_from_unauthenticated() {
        let g = gate();
        let t = token_for(&g, Role::User);
        assert_eq!(g.check(Some(&t), &Role::ALL, T0 + 3600), Err(AppError::Expired));
    }

    #[test]
    fn revoked_token_is_denied_on_every_route() {
        let g = gate();
        let t = token_for(&g, Role::Admin);
        assert!(g.check(Some(&t), &[Role::Admin], T0 + 1).is_ok());
        g.ledger().record_until(&t, T0 + 3600, T0 + 1).unwrap();
        for permitted in [&[Role::Admin][..], &Role::ALL[..], &[Role::User][..]] {
            assert_eq!(g.check(Some(&t), permitted, T0 + 2), Err(AppError::Revoked));
        }
    }

    #[test]
    fn expiry_is_checked_before_revocation() {
        let g = gate();
        let t = token_for(&g, Role::User);
        g.ledger().record(&t, T0).unwrap();
        assert_eq!(g.check(Some(&t), &Role::ALL, T0 + 3600), Err(AppError::Expired));
    }

    #[test]
    fn role_outside_permitted_set_is_forbidden_for_every_pairing() {
        let g = gate();
        for holder in Role::ALL {
            let t = token_for(&g, holder);
            for required in Role::ALL {
                let got = g.check(Some(&t), &[required], T0 + 10);
                if holder == required {
                    let allow = got.unwrap();
                    assert_eq!(allow.role, holder);
                    assert_eq!(allow.expires_at, T0 + 3600);
                } else {
                    assert_eq!(got, Err(AppError::Forbidden), "{} on {} route", holder, required);
                }
            }
        }
    }

    #[test]
    fn authenticate_admits_every_role() {
        let g = gate();
        for role in Role::ALL {
            let t = token_for(&g, role);
            assert_eq!(g.authenticate(Some(&t), T0).unwrap().role, role);
        }
    }

    #[test]
    fn bearer_extraction_accepts_only_bearer_scheme() {
        let mut h = HeaderMap::new();
        assert_eq!(bearer_token(&h), None);
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&h), Some("abc.def.ghi"));
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("  bearer   xyz  "));
        assert_eq!(bearer_token(&h), Some("xyz"));
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&h), None);
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer"));
        assert_eq!(bearer_token(&h), None);
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer    "));
        assert_eq!(bearer_token(&h), None);
    }
}

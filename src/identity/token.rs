//! Session token minting and verification.
//!
//! Tokens are compact HS256 JWTs carrying the principal id, username, a role
//! snapshot, `iat`, `exp` and a random `jti`. Nothing about an issued token is
//! stored server-side: validity is structural (signature + expiry) and, one
//! layer up, negative (the revocation ledger). This module knows nothing about
//! revocation.
//!
//! Expiry is evaluated against the caller's `now` with zero leeway, so a token
//! issued at `T` with lifetime `L` parses for every `now` in `[T, T+L)` and
//! fails from `T+L` on. Replacing the secret (a new codec) invalidates every
//! outstanding token at once.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::principal::{PrincipalSummary, Role};
use crate::error::{AppError, AppResult};

pub const DEFAULT_TOKEN_TTL_SECS: i64 = 60 * 60;
pub const MIN_SECRET_LEN: usize = 32;
const ISSUER: &str = "gymauth";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    /// Principal id.
    pub sub: Uuid,
    pub username: String,
    /// Role at issuance; authoritative for the token's lifetime.
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

/// Why a token failed to parse. Only `Expired` is reported distinctly upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenDefect {
    Malformed,
    BadSignature,
    Expired,
}

pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").field("ttl_secs", &self.ttl_secs).finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8], ttl_secs: i64) -> AppResult<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AppError::internal(format!("token secret must be at least {} bytes", MIN_SECRET_LEN)));
        }
        if ttl_secs <= 0 {
            return Err(AppError::internal("token lifetime must be positive"));
        }
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the caller's clock in `parse`.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl_secs,
        })
    }

    pub fn lifetime_secs(&self) -> i64 { self.ttl_secs }

    pub fn issue(&self, principal: &PrincipalSummary, now: i64) -> AppResult<IssuedToken> {
        let claims = TokenClaims {
            iss: ISSUER.to_string(),
            sub: principal.id,
            username: principal.username.clone(),
            role: principal.role,
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
            jti: Uuid::new_v4().simple().to_string(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::internal(format!("token encode failed: {}", e)))?;
        Ok(IssuedToken { token, claims })
    }

    /// Verify signature and structure, then expiry against `now`. Never returns partially trusted claims.
    pub fn parse(&self, token: &str, now: i64) -> Result<TokenClaims, TokenDefect> {
        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => TokenDefect::BadSignature,
                _ => TokenDefect::Malformed,
            })?;
        let claims = data.claims;
        if claims.exp <= claims.iat { return Err(TokenDefect::Malformed); }
        if now >= claims.exp { return Err(TokenDefect::Expired); }
        Ok(claims)
    }
}

/// Random secret for deployments that did not configure one.
pub fn generate_secret() -> AppResult<Vec<u8>> {
    let mut buf = vec![0u8; MIN_SECRET_LEN];
    getrandom::getrandom(&mut buf).map_err(|e| AppError::internal(e.to_string()))?;
    Ok(buf)
}

/// Short, non-secret label for a token, safe to put in logs.
pub fn fingerprint(token: &str) -> String {
    let tail: String = token.chars().rev().take(8).collect::<Vec<_>>().into_iter().rev().collect();
    format!("…{}", tail)
}

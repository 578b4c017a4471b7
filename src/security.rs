//! Credential store: registered principals and their argon2 password verifiers.
//!
//! Principals live in memory behind a `parking_lot::RwLock` and, when opened on a
//! path, are mirrored to a JSON document rewritten atomically after each mutation.
//! A mutation that cannot be persisted is rolled back so memory never runs ahead
//! of disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::identity::{PrincipalSummary, Role};

pub const PRINCIPALS_FILE: &str = "principals.json";
pub const MAX_PASSWORD_LEN: usize = 1024;
const FILE_VERSION: u32 = 1;

static USERNAME_RE: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[\p{L}\p{N}_.@\-]{1,64}$"));

// Verified against when the username is unknown, so both failure paths cost one argon2 run.
// Parameters match `Argon2::default()`; no password verifies against it.
const DUMMY_HASH: &str =
    "$argon2id$v=19$m=19456,t=2,p=1$8eyNoTIzmLyfG+6K2MCP8Q$B7l0+/r/6hfktvGSlgojcZAx/hjYtyju4Xh7eiYrADY";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PrincipalRecord {
    id: Uuid,
    username: String,
    password_hash: String,
    role: Role,
    created_at_ms: i64,
}

impl PrincipalRecord {
    fn summary(&self) -> PrincipalSummary {
        PrincipalSummary { id: self.id, username: self.username.clone(), role: self.role }
    }
}

#[derive(Serialize, Deserialize)]
struct PrincipalsFile {
    version: u32,
    principals: Vec<PrincipalRecord>,
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| AppError::internal(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AppError::internal(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::internal(e.to_string()))?
        .to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

/// Trimmed, NFC-normalized username. Uniqueness is decided on this form.
pub fn normalize_username(raw: &str) -> String { raw.trim().nfc().collect() }

fn validate_username(username: &str) -> AppResult<()> {
    let re = USERNAME_RE.as_ref().map_err(|e| AppError::internal(e.to_string()))?;
    if !re.is_match(username) {
        return Err(AppError::user(
            "invalid_username",
            "Username must be 1-64 letters, digits or . _ @ - characters",
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.is_empty() {
        return Err(AppError::user("invalid_password", "Password must not be empty"));
    }
    if password.len() > MAX_PASSWORD_LEN {
        return Err(AppError::user("invalid_password", "Password is too long"));
    }
    Ok(())
}

pub struct CredentialStore {
    path: Option<PathBuf>,
    users: RwLock<HashMap<String, PrincipalRecord>>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").field("path", &self.path).field("principals", &self.len()).finish()
    }
}

impl CredentialStore {
    pub fn in_memory() -> Self { Self { path: None, users: RwLock::new(HashMap::new()) } }

    /// Open (or start) the principals document at `path`.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut users = HashMap::new();
        if let Some(bytes) = crate::storage::read_optional(&path)? {
            let doc: PrincipalsFile = serde_json::from_slice(&bytes)
                .map_err(|e| AppError::Io(format!("corrupt principals file {}: {}", path.display(), e)))?;
            for rec in doc.principals {
                users.insert(normalize_username(&rec.username), rec);
            }
            info!(target: "auth", principals = users.len(), path = %path.display(), "loaded credential store");
        }
        Ok(Self { path: Some(path), users: RwLock::new(users) })
    }

    pub fn len(&self) -> usize { self.users.read().len() }

    pub fn is_empty(&self) -> bool { self.users.read().is_empty() }

    pub fn find(&self, username: &str) -> Option<PrincipalSummary> {
        self.users.read().get(&normalize_username(username)).map(|r| r.summary())
    }

    /// All principals ordered by username.
    pub fn list(&self) -> Vec<PrincipalSummary> {
        let mut out: Vec<PrincipalSummary> = self.users.read().values().map(|r| r.summary()).collect();
        out.sort_by(|a, b| a.username.cmp(&b.username));
        out
    }

    pub fn create(&self, username: &str, password: &str, role: Role) -> AppResult<PrincipalSummary> {
        let username = normalize_username(username);
        validate_username(&username)?;
        validate_password(password)?;
        if self.users.read().contains_key(&username) {
            return Err(AppError::DuplicateUsername(username));
        }
        // Hash outside the lock; uniqueness is re-checked below.
        let password_hash = hash_password(password)?;
        let rec = PrincipalRecord {
            id: Uuid::new_v4(),
            username: username.clone(),
            password_hash,
            role,
            created_at_ms: crate::clock::now_millis(),
        };
        let summary = rec.summary();
        let mut w = self.users.write();
        if w.contains_key(&username) {
            return Err(AppError::DuplicateUsername(username));
        }
        w.insert(username.clone(), rec);
        if let Err(e) = self.persist(&w) {
            w.remove(&username);
            return Err(e);
        }
        info!(target: "auth", user = %username, role = %role, "principal created");
        Ok(summary)
    }

    /// Check a username/password pair. Unknown user and wrong password are indistinguishable.
    pub fn verify(&self, username: &str, password: &str) -> AppResult<PrincipalSummary> {
        let username = normalize_username(username);
        let found = self.users.read().get(&username).map(|r| (r.password_hash.clone(), r.summary()));
        match found {
            Some((hash, summary)) => {
                if verify_password(&hash, password) {
                    Ok(summary)
                } else {
                    debug!(target: "auth", user = %username, "password mismatch");
                    Err(AppError::InvalidCredentials)
                }
            }
            None => {
                let _ = verify_password(DUMMY_HASH, password);
                debug!(target: "auth", "unknown username");
                Err(AppError::InvalidCredentials)
            }
        }
    }

    /// Change a principal's role in place. Tokens already issued keep their embedded role.
    pub fn set_role(&self, username: &str, role: Role) -> AppResult<PrincipalSummary> {
        let username = normalize_username(username);
        let mut w = self.users.write();
        let previous = match w.get_mut(&username) {
            Some(rec) => std::mem::replace(&mut rec.role, role),
            None => return Err(AppError::NotFound(format!("User '{}'", username))),
        };
        if let Err(e) = self.persist(&w) {
            if let Some(rec) = w.get_mut(&username) { rec.role = previous; }
            return Err(e);
        }
        info!(target: "auth", user = %username, from = %previous, to = %role, "role changed");
        w.get(&username)
            .map(|r| r.summary())
            .ok_or_else(|| AppError::internal("principal vanished under write lock"))
    }

    /// Seed one admin when no principal exists yet. Returns the created admin, if any.
    pub fn ensure_default_admin(&self, username: &str, password: &str) -> AppResult<Option<PrincipalSummary>> {
        if !self.is_empty() { return Ok(None); }
        match self.create(username, password, Role::Admin) {
            Ok(p) => {
                warn!(target: "startup", user = %p.username, "seeded default admin; change its password");
                Ok(Some(p))
            }
            Err(AppError::DuplicateUsername(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn persist(&self, users: &HashMap<String, PrincipalRecord>) -> AppResult<()> {
        let Some(path) = self.path.as_ref() else { return Ok(()); };
        let mut principals: Vec<PrincipalRecord> = users.values().cloned().collect();
        principals.sort_by(|a, b| a.username.cmp(&b.username));
        let doc = PrincipalsFile { version: FILE_VERSION, principals };
        let bytes = serde_json::to_vec_pretty(&doc).map_err(|e| AppError::internal(e.to_string()))?;
        crate::storage::write_atomic(path, &bytes)?;
        crate::tprintln!("security.persist principals={} bytes={} path={}", users.len(), bytes.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_verify() {
        let store = CredentialStore::in_memory();
        let p = store.create("alice", "pw1", Role::User).unwrap();
        assert_eq!(p.role, Role::User);
        let v = store.verify("alice", "pw1").unwrap();
        assert_eq!(v.id, p.id);
    }

    #[test]
    fn wrong_password_and_unknown_user_look_the_same() {
        let store = CredentialStore::in_memory();
        store.create("alice", "pw1", Role::User).unwrap();
        let a = store.verify("alice", "nope").unwrap_err();
        let b = store.verify("mallory", "pw1").unwrap_err();
        assert_eq!(a, AppError::InvalidCredentials);
        assert_eq!(a, b);
        assert_eq!(a.message(), b.message());
    }

    #[test]
    fn dummy_hash_is_a_real_argon2_verifier() {
        let parsed = PasswordHash::new(DUMMY_HASH).unwrap();
        assert_eq!(parsed.algorithm.as_str(), "argon2id");
        let own = hash_password("x").unwrap();
        let own = PasswordHash::new(&own).unwrap();
        assert_eq!(parsed.params, own.params);
        assert!(!verify_password(DUMMY_HASH, "gymauth-unknown-principal"));
        assert!(!verify_password(DUMMY_HASH, ""));
    }

    #[test]
    fn duplicate_usernames_are_rejected_after_normalization() {
        let store = CredentialStore::in_memory();
        store.create("José", "pw", Role::User).unwrap();
        // Decomposed form of the same name plus surrounding whitespace.
        let err = store.create("  Jose\u{301} ", "pw", Role::Member).unwrap_err();
        assert!(matches!(err, AppError::DuplicateUsername(_)));
        assert_eq!(store.len(), 1);
        assert!(store.verify("Jose\u{301}", "pw").is_ok());
    }

    #[test]
    fn invalid_input_is_rejected_before_hashing() {
        let store = CredentialStore::in_memory();
        assert_eq!(store.create("", "pw", Role::User).unwrap_err().code_str(), "invalid_username");
        assert_eq!(store.create("has space", "pw", Role::User).unwrap_err().code_str(), "invalid_username");
        assert_eq!(store.create("bob", "", Role::User).unwrap_err().code_str(), "invalid_password");
        assert!(store.is_empty());
    }

    #[test]
    fn set_role_promotes_in_place() {
        let store = CredentialStore::in_memory();
        let p = store.create("bob", "pw", Role::User).unwrap();
        let promoted = store.set_role("bob", Role::Member).unwrap();
        assert_eq!(promoted.id, p.id);
        assert_eq!(promoted.role, Role::Member);
        assert_eq!(store.verify("bob", "pw").unwrap().role, Role::Member);
        assert!(matches!(store.set_role("ghost", Role::Member), Err(AppError::NotFound(_))));
    }

    #[test]
    fn default_admin_is_seeded_only_into_an_empty_store() {
        let store = CredentialStore::in_memory();
        let admin = store.ensure_default_admin("admin", "admin-pw").unwrap().unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(store.ensure_default_admin("other", "x").unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn principals_survive_reopen_and_hash_is_not_plaintext() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(PRINCIPALS_FILE);
        {
            let store = CredentialStore::open(&path).unwrap();
            store.create("carol", "s3cret", Role::Member).unwrap();
            store.create("dave", "pw", Role::User).unwrap();
            store.set_role("dave", Role::Member).unwrap();
        }
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("s3cret"));
        assert!(raw.contains("$argon2"));
        let reopened = CredentialStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.verify("carol", "s3cret").unwrap().role, Role::Member);
        assert_eq!(reopened.find("dave").unwrap().role, Role::Member);
        let names: Vec<String> = reopened.list().into_iter().map(|p| p.username).collect();
        assert_eq!(names, vec!["carol".to_string(), "dave".to_string()]);
    }

    #[test]
    fn failed_persist_rolls_back_the_insert() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("sub");
        let store = CredentialStore::open(blocker.join(PRINCIPALS_FILE)).unwrap();
        // Parent of the target becomes a regular file, so the write must fail.
        std::fs::write(&blocker, b"x").unwrap();
        let err = store.create("erin", "pw", Role::User).unwrap_err();
        assert!(matches!(err, AppError::Io(_)), "{:?}", err);
        assert!(store.find("erin").is_none());
    }

    #[test]
    fn concurrent_creates_of_one_name_admit_exactly_one() {
        let store = std::sync::Arc::new(CredentialStore::in_memory());
        let handles: Vec<_> = (0..4).map(|_| {
            let s = store.clone();
            std::thread::spawn(move || s.create("race", "pw", Role::User).is_ok())
        }).collect();
        let ok = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(ok, 1);
        assert_eq!(store.len(), 1);
    }
}

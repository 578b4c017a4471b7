//! Durable client-side session entry. One JSON document, replaced atomically on
//! login and removed on logout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::identity::PrincipalSummary;

pub const SESSION_FILE_ENV: &str = "GYMAUTH_SESSION_FILE";
pub const DEFAULT_SESSION_FILE: &str = ".gymauth_session.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Anonymous,
    Authenticating,
    Authenticated,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    pub token: String,
    pub principal: PrincipalSummary,
    pub status: Lifecycle,
}

pub trait SessionStorage: Send + Sync {
    fn load(&self) -> AppResult<Option<PersistedSession>>;
    fn save(&self, session: &PersistedSession) -> AppResult<()>;
    /// Remove the entry. Removing an absent entry succeeds.
    fn clear(&self) -> AppResult<()>;
}

impl<T: SessionStorage + ?Sized> SessionStorage for Arc<T> {
    fn load(&self) -> AppResult<Option<PersistedSession>> { (**self).load() }
    fn save(&self, session: &PersistedSession) -> AppResult<()> { (**self).save(session) }
    fn clear(&self) -> AppResult<()> { (**self).clear() }
}

#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    path: PathBuf,
}

impl FileSessionStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    /// `GYMAUTH_SESSION_FILE`, else a file in the working directory.
    pub fn from_env() -> Self {
        let p = std::env::var(SESSION_FILE_ENV).unwrap_or_else(|_| DEFAULT_SESSION_FILE.to_string());
        Self::new(p)
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl SessionStorage for FileSessionStorage {
    fn load(&self) -> AppResult<Option<PersistedSession>> {
        let Some(bytes) = crate::storage::read_optional(&self.path)? else { return Ok(None); };
        match serde_json::from_slice::<PersistedSession>(&bytes) {
            Ok(s) => Ok(Some(s)),
            Err(e) => {
                // An unreadable entry is treated as no session at all.
                warn!(target: "session", path = %self.path.display(), "discarding corrupt session file: {}", e);
                crate::storage::remove_if_exists(&self.path)?;
                Ok(None)
            }
        }
    }

    fn save(&self, session: &PersistedSession) -> AppResult<()> {
        let bytes = serde_json::to_vec_pretty(session).map_err(|e| AppError::internal(e.to_string()))?;
        crate::storage::write_atomic(&self.path, &bytes)?;
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        crate::storage::remove_if_exists(&self.path)?;
        Ok(())
    }
}

/// Volatile storage; the entry survives only as long as the value.
#[derive(Debug, Default)]
pub struct MemorySessionStorage {
    slot: Mutex<Option<PersistedSession>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self { Self::default() }

    pub fn with(session: PersistedSession) -> Self { Self { slot: Mutex::new(Some(session)) } }

    pub fn peek(&self) -> Option<PersistedSession> { self.slot.lock().clone() }
}

impl SessionStorage for MemorySessionStorage {
    fn load(&self) -> AppResult<Option<PersistedSession>> { Ok(self.slot.lock().clone()) }

    fn save(&self, session: &PersistedSession) -> AppResult<()> {
        *self.slot.lock() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}

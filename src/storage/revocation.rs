use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::identity::token::fingerprint;

/// One logged-out token. The entry is live while `now < expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub recorded_at: i64,
    pub expires_at: i64,
}

impl RevocationEntry {
    fn is_live(&self, now: i64) -> bool { now < self.expires_at }
}

#[derive(Serialize, Deserialize)]
struct SnapEntry { token: String, recorded_at: i64, expires_at: i64 }

#[derive(Serialize, Deserialize)]
struct Snapshot { version: u32, created_at: i64, entries: Vec<SnapEntry> }

const SNAPSHOT_VERSION: u32 = 1;

/// Time-bounded set of revoked token values.
///
/// Cloning shares the same underlying map. Entries are never deleted on
/// request; they drop out once the token they shadow would have expired anyway,
/// either through [`RevocationLedger::sweep`] or by being ignored at read time.
#[derive(Clone)]
pub struct RevocationLedger {
    max_lifetime_secs: i64,
    snapshot: Option<PathBuf>,
    map: Arc<RwLock<HashMap<String, RevocationEntry>>>,
    /// Serializes snapshot writes so a slower writer cannot clobber a newer file.
    persist_guard: Arc<Mutex<()>>,
}

impl std::fmt::Debug for RevocationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationLedger")
            .field("entries", &self.len())
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

impl RevocationLedger {
    /// Memory-only ledger.
    pub fn in_memory(max_lifetime_secs: i64) -> Self {
        Self {
            max_lifetime_secs,
            snapshot: None,
            map: Arc::new(RwLock::new(HashMap::new())),
            persist_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Ledger persisted to `path`. Existing live entries are loaded; expired ones are dropped.
    pub fn open(path: impl AsRef<Path>, max_lifetime_secs: i64, now: i64) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut ledger = Self::in_memory(max_lifetime_secs);
        ledger.snapshot = Some(path.clone());
        if let Some(bytes) = crate::storage::read_optional(&path)? {
            let snap: Snapshot = bincode::deserialize(&bytes)
                .map_err(|e| AppError::Io(format!("corrupt revocation snapshot {}: {}", path.display(), e)))?;
            let mut w = ledger.map.write();
            let mut dropped = 0usize;
            for e in snap.entries {
                let entry = RevocationEntry { recorded_at: e.recorded_at, expires_at: e.expires_at };
                if entry.is_live(now) { w.insert(e.token, entry); } else { dropped += 1; }
            }
            info!(target: "ledger", live = w.len(), dropped, "loaded revocation snapshot");
        }
        Ok(ledger)
    }

    pub fn max_lifetime_secs(&self) -> i64 { self.max_lifetime_secs }

    /// Record a token whose own expiry is unknown; it stays revoked for the maximum token lifetime.
    pub fn record(&self, token: &str, now: i64) -> AppResult<bool> {
        self.record_until(token, now.saturating_add(self.max_lifetime_secs), now)
    }

    /// Record a token as revoked until `expires_at`. Idempotent: a second record of the
    /// same value only ever extends the expiry. Returns true when the entry was new.
    pub fn record_until(&self, token: &str, expires_at: i64, now: i64) -> AppResult<bool> {
        if expires_at <= now {
            debug!(target: "ledger", token = %fingerprint(token), "skip record of already-expired token");
            return Ok(false);
        }
        let inserted = {
            let mut w = self.map.write();
            match w.get_mut(token) {
                Some(existing) if existing.is_live(now) => {
                    existing.expires_at = existing.expires_at.max(expires_at);
                    false
                }
                _ => {
                    w.insert(token.to_string(), RevocationEntry { recorded_at: now, expires_at });
                    true
                }
            }
        };
        debug!(target: "ledger", token = %fingerprint(token), inserted, expires_at, "token revoked");
        // The revocation holds in memory regardless; only a restart before the next good write loses it.
        if let Err(e) = self.save_snapshot(now) {
            warn!(target: "ledger", token = %fingerprint(token), "failed to persist revocation snapshot: {}", e);
        }
        Ok(inserted)
    }

    pub fn is_revoked(&self, token: &str, now: i64) -> bool {
        self.map.read().get(token).map(|e| e.is_live(now)).unwrap_or(false)
    }

    pub fn entry(&self, token: &str) -> Option<RevocationEntry> { self.map.read().get(token).copied() }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize { self.map.read().len() }

    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }

    /// Purge entries whose token would have expired by `now`. Returns how many were removed.
    pub fn sweep(&self, now: i64) -> usize {
        let removed = {
            let mut w = self.map.write();
            let before = w.len();
            w.retain(|_, e| e.is_live(now));
            before - w.len()
        };
        crate::tprintln!("ledger.sweep now={} removed={}", now, removed);
        if removed > 0 {
            if let Err(e) = self.save_snapshot(now) {
                warn!(target: "ledger", "failed to persist revocation snapshot after sweep: {}", e);
            }
        }
        removed
    }

    /// Start a background task that sweeps every `interval`.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let ledger = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = ledger.sweep(crate::clock::now_secs());
                if removed > 0 { debug!(target: "ledger", removed = removed, "revocation_sweep"); }
            }
        })
    }

    fn save_snapshot(&self, now: i64) -> AppResult<()> {
        let Some(path) = self.snapshot.as_ref() else { return Ok(()); };
        let _g = self.persist_guard.lock();
        let entries: Vec<SnapEntry> = self.map.read().iter()
            .map(|(k, e)| SnapEntry { token: k.clone(), recorded_at: e.recorded_at, expires_at: e.expires_at })
            .collect();
        let snap = Snapshot { version: SNAPSHOT_VERSION, created_at: now, entries };
        let bytes = bincode::serialize(&snap).map_err(|e| AppError::internal(e.to_string()))?;
        crate::storage::write_atomic(path, &bytes)?;
        Ok(())
    }
}

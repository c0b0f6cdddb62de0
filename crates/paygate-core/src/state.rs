//! Pending-Payment State Store
//!
//! Keyed, TTL-expiring storage for pending-payment records plus per-key
//! locking. One store instance is shared by every flow and every tool
//! invocation of a host integration.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::Result;
use crate::lock::{KeyGuard, KeyedMutex};

/// A persisted record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Opaque flow-defined payload
    pub args: serde_json::Value,

    /// When the record was written
    pub timestamp: DateTime<Utc>,

    /// When the record stops being readable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    /// Age of the record at wall-clock `now`
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.timestamp
    }
}

/// State store trait for pending-payment persistence.
///
/// Missing keys are never an error. Locking is process-local even for
/// backends that persist records elsewhere.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert or overwrite; with `ttl` the record becomes unreadable once it elapses
    async fn set(&self, key: &str, args: serde_json::Value, ttl: Option<Duration>) -> Result<()>;

    /// Read a record; expired records read as absent and are evicted
    async fn get(&self, key: &str) -> Result<Option<StoredRecord>>;

    /// Remove a record (idempotent)
    async fn delete(&self, key: &str) -> Result<()>;

    /// Acquire the key-scoped lock; released when the guard drops
    async fn lock(&self, key: &str) -> KeyGuard;
}

/// Run `f` exclusively with respect to any other lock on `key`.
///
/// The lock is released on both normal return and error; `f`'s error is
/// returned to the caller afterwards.
pub async fn with_lock<S, F, Fut, T>(store: &S, key: &str, f: F) -> T
where
    S: StateStore + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let _guard = store.lock(key).await;
    f().await
}

struct Entry {
    record: StoredRecord,
    deadline: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

/// In-memory state store (reference implementation)
pub struct MemoryStateStore {
    entries: RwLock<HashMap<String, Entry>>,
    locks: KeyedMutex,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            locks: KeyedMutex::new(),
        }
    }

    /// Drop every expired record; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Spawn a background sweep that reclaims expired records even when
    /// nothing reads them. The task ends once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Swept expired payment records");
                }
            }
        })
    }

    /// Number of stored records, expired or not
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently locked or waited on
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn set(&self, key: &str, args: serde_json::Value, ttl: Option<Duration>) -> Result<()> {
        let timestamp = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| timestamp + ttl);
        let deadline = ttl.map(|ttl| Instant::now() + ttl);

        let entry = Entry {
            record: StoredRecord {
                args,
                timestamp,
                expires_at,
            },
            deadline,
        };

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredRecord>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.record.clone())),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            tracing::trace!(key, "Evicted expired record on read");
        }
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    async fn lock(&self, key: &str) -> KeyGuard {
        self.locks.lock(key).await
    }
}

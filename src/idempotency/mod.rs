//! Processed-event ledger guarding against duplicate webhook delivery.
//!
//! `admit` records a key and reports whether the caller is the first to see
//! it inside the TTL window. Exactly one of several concurrent admissions for
//! the same key wins. Storage failures surface as
//! [`IdempotencyError::Unavailable`] so callers fail closed.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

use crate::db::{now_millis, Database};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Duplicate,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("idempotency store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn admit(&self, key: &str, ttl: Duration) -> Result<Admission, IdempotencyError>;

    /// Forget `key` so a redelivery is processed again. Used when an
    /// admitted event could not be applied for infrastructure reasons.
    async fn release(&self, key: &str) -> Result<(), IdempotencyError>;

    /// Drop expired entries. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, IdempotencyError>;
}

/// `processed_events` table in the shared SQLite database.
#[derive(Clone)]
pub struct SqliteIdempotencyStore {
    db: Database,
}

impl SqliteIdempotencyStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IdempotencyStore for SqliteIdempotencyStore {
    async fn admit(&self, key: &str, ttl: Duration) -> Result<Admission, IdempotencyError> {
        let key = key.to_string();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        let changed = self
            .db
            .call(move |conn| {
                let now = now_millis();
                // Insert, or take over an expired entry; a live entry is left untouched.
                let changed = conn.execute(
                    "INSERT INTO processed_events (key, first_seen_at_ms, expires_at_ms) \
                     VALUES (?1, ?2, ?3) \
                     ON CONFLICT(key) DO UPDATE SET first_seen_at_ms = excluded.first_seen_at_ms, \
                     expires_at_ms = excluded.expires_at_ms \
                     WHERE processed_events.expires_at_ms <= ?2",
                    rusqlite::params![key, now, now.saturating_add(ttl_ms)],
                )?;
                Ok(changed)
            })
            .await
            .map_err(|e| IdempotencyError::Unavailable(format!("{e:#}")))?;

        Ok(if changed > 0 {
            Admission::Admitted
        } else {
            Admission::Duplicate
        })
    }

    async fn release(&self, key: &str) -> Result<(), IdempotencyError> {
        let key = key.to_string();
        self.db
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM processed_events WHERE key = ?1",
                    rusqlite::params![key],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| IdempotencyError::Unavailable(format!("{e:#}")))
    }

    async fn purge_expired(&self) -> Result<usize, IdempotencyError> {
        let removed = self
            .db
            .call(|conn| {
                let removed = conn.execute(
                    "DELETE FROM processed_events WHERE expires_at_ms <= ?1",
                    rusqlite::params![now_millis()],
                )?;
                Ok(removed)
            })
            .await
            .map_err(|e| IdempotencyError::Unavailable(format!("{e:#}")))?;

        if removed > 0 {
            debug!(removed, "Purged expired idempotency keys");
        }
        Ok(removed)
    }
}

/// Process-local store, for tests and single-shot CLI runs.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyStore {
    inner: Arc<Mutex<HashMap<String, i64>>>,
}

impl InMemoryIdempotencyStore {
    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, i64>>, IdempotencyError> {
        self.inner
            .lock()
            .map_err(|_| IdempotencyError::Unavailable("lock poisoned".to_string()))
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn admit(&self, key: &str, ttl: Duration) -> Result<Admission, IdempotencyError> {
        let mut guard = self.lock()?;
        let now = now_millis();

        if let Some(expires_at) = guard.get(key) {
            if *expires_at > now {
                return Ok(Admission::Duplicate);
            }
        }

        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        guard.insert(key.to_string(), now.saturating_add(ttl_ms));
        Ok(Admission::Admitted)
    }

    async fn release(&self, key: &str) -> Result<(), IdempotencyError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, IdempotencyError> {
        let mut guard = self.lock()?;
        let now = now_millis();
        let before = guard.len();
        guard.retain(|_, expires_at| *expires_at > now);
        Ok(before - guard.len())
    }
}

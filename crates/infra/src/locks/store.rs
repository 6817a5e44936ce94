//! Lock store abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use cobranzas_core::RunId;

use super::types::{InsertOutcome, JobLock, LockKey, LockStoreError};

/// Store contract for lock rows.
///
/// Acquisition is a two-step compare-and-swap: attempt a create (uniqueness
/// conflict reported as a value), then a conditional take-over guarded by
/// "expired or released". Implementations must make both steps atomic with
/// respect to concurrent callers.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create a new lock row. `Conflict` when a row for the key exists.
    async fn try_insert(&self, lock: &JobLock) -> Result<InsertOutcome, LockStoreError>;

    /// Take over an existing row, only if its lease is expired (relative to
    /// `now`) or released. Returns whether a row was updated.
    async fn try_steal(
        &self,
        key: &LockKey,
        new_owner: RunId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        metadata: &JsonValue,
    ) -> Result<bool, LockStoreError>;

    /// Mark the row released, only while `owner` still holds it. Returns
    /// whether a row was updated.
    async fn release(
        &self,
        key: &LockKey,
        owner: RunId,
        released_at: DateTime<Utc>,
    ) -> Result<bool, LockStoreError>;

    /// Point lookup, mainly for diagnostics and tests.
    async fn get(&self, key: &LockKey) -> Result<Option<JobLock>, LockStoreError>;
}

#[async_trait]
impl<S> LockStore for Arc<S>
where
    S: LockStore + ?Sized,
{
    async fn try_insert(&self, lock: &JobLock) -> Result<InsertOutcome, LockStoreError> {
        (**self).try_insert(lock).await
    }

    async fn try_steal(
        &self,
        key: &LockKey,
        new_owner: RunId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        metadata: &JsonValue,
    ) -> Result<bool, LockStoreError> {
        (**self)
            .try_steal(key, new_owner, now, expires_at, metadata)
            .await
    }

    async fn release(
        &self,
        key: &LockKey,
        owner: RunId,
        released_at: DateTime<Utc>,
    ) -> Result<bool, LockStoreError> {
        (**self).release(key, owner, released_at).await
    }

    async fn get(&self, key: &LockKey) -> Result<Option<JobLock>, LockStoreError> {
        (**self).get(key).await
    }
}

/// In-memory lock store for tests/dev.
///
/// Single-process only; the production deployment uses the Postgres store.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    rows: RwLock<HashMap<LockKey, JobLock>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn rows_mut(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<LockKey, JobLock>>, LockStoreError> {
        self.rows
            .write()
            .map_err(|_| LockStoreError::Storage("lock poisoned".to_string()))
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_insert(&self, lock: &JobLock) -> Result<InsertOutcome, LockStoreError> {
        let mut rows = self.rows_mut()?;
        if rows.contains_key(&lock.lock_key) {
            return Ok(InsertOutcome::Conflict);
        }
        rows.insert(lock.lock_key.clone(), lock.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn try_steal(
        &self,
        key: &LockKey,
        new_owner: RunId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        metadata: &JsonValue,
    ) -> Result<bool, LockStoreError> {
        let mut rows = self.rows_mut()?;
        match rows.get_mut(key) {
            Some(row) if row.is_stealable(now) => {
                row.acquired_at = now;
                row.expires_at = expires_at;
                row.owner_run_id = new_owner;
                row.metadata = metadata.clone();
                row.released_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(
        &self,
        key: &LockKey,
        owner: RunId,
        released_at: DateTime<Utc>,
    ) -> Result<bool, LockStoreError> {
        let mut rows = self.rows_mut()?;
        match rows.get_mut(key) {
            Some(row) if row.owner_run_id == owner && !row.is_released() => {
                row.released_at = Some(released_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &LockKey) -> Result<Option<JobLock>, LockStoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| LockStoreError::Storage("lock poisoned".to_string()))?;
        Ok(rows.get(key).cloned())
    }
}

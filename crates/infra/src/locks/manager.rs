//! Lease acquisition over any [`LockStore`].

use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use tracing::debug;

use cobranzas_core::RunId;

use super::store::LockStore;
use super::types::{InsertOutcome, JobLock, LockKey, LockStoreError};

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum LockAcquisition {
    Acquired(JobLock),
    /// Another live holder exists. Routine under concurrent triggers.
    Denied,
}

/// Named mutual exclusion with expiry-based recovery from crashed holders.
#[derive(Debug, Clone)]
pub struct LockManager<S> {
    store: S,
}

impl<S: LockStore> LockManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Acquire a lease on `key` for `ttl_secs`, owned by `run_id`.
    ///
    /// Creates the row, or takes over an expired/released lease. `Denied`
    /// when another live holder exists. A storage error here is an
    /// infrastructure failure, not contention, and bubbles to the caller.
    pub async fn acquire(
        &self,
        key: LockKey,
        ttl_secs: u64,
        run_id: RunId,
        metadata: JsonValue,
        now: DateTime<Utc>,
    ) -> Result<LockAcquisition, LockStoreError> {
        let expires_at = now + Duration::seconds(ttl_secs as i64);
        let lock = JobLock {
            lock_key: key,
            acquired_at: now,
            expires_at,
            owner_run_id: run_id,
            metadata,
            released_at: None,
        };

        match self.store.try_insert(&lock).await? {
            InsertOutcome::Inserted => Ok(LockAcquisition::Acquired(lock)),
            InsertOutcome::Conflict => {
                let stolen = self
                    .store
                    .try_steal(&lock.lock_key, run_id, now, expires_at, &lock.metadata)
                    .await?;
                if stolen {
                    debug!(lock_key = %lock.lock_key, run_id = %run_id, "took over expired/released lease");
                    Ok(LockAcquisition::Acquired(lock))
                } else {
                    Ok(LockAcquisition::Denied)
                }
            }
        }
    }

    /// Release the lease, only while `run_id` still owns it.
    pub async fn release(
        &self,
        key: &LockKey,
        run_id: RunId,
        now: DateTime<Utc>,
    ) -> Result<bool, LockStoreError> {
        self.store.release(key, run_id, now).await
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::store::InMemoryLockStore;
    use chrono::{NaiveDate, TimeZone};

    fn key() -> LockKey {
        LockKey::compose(
            "collections.anchor_cycles",
            "global",
            NaiveDate::from_ymd_opt(2025, 7, 8).unwrap(),
        )
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 8, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn first_acquire_wins_second_is_denied() {
        let manager = LockManager::new(InMemoryLockStore::new());
        let first = RunId::new();

        let a = manager
            .acquire(key(), 600, first, serde_json::json!({}), t0())
            .await
            .unwrap();
        assert!(matches!(a, LockAcquisition::Acquired(_)));

        let b = manager
            .acquire(key(), 600, RunId::new(), serde_json::json!({}), t0())
            .await
            .unwrap();
        assert_eq!(b, LockAcquisition::Denied);
    }

    #[tokio::test]
    async fn acquire_steals_past_ttl() {
        let manager = LockManager::new(InMemoryLockStore::new());
        manager
            .acquire(key(), 600, RunId::new(), serde_json::json!({}), t0())
            .await
            .unwrap();

        let second = RunId::new();
        let later = t0() + Duration::seconds(601);
        let outcome = manager
            .acquire(key(), 600, second, serde_json::json!({}), later)
            .await
            .unwrap();

        match outcome {
            LockAcquisition::Acquired(lock) => {
                assert_eq!(lock.owner_run_id, second);
                assert_eq!(lock.expires_at, later + Duration::seconds(600));
            }
            LockAcquisition::Denied => panic!("expired lease must be stealable"),
        }
    }

    #[tokio::test]
    async fn released_key_is_immediately_reacquirable() {
        let manager = LockManager::new(InMemoryLockStore::new());
        let first = RunId::new();
        manager
            .acquire(key(), 600, first, serde_json::json!({}), t0())
            .await
            .unwrap();
        assert!(manager
            .release(&key(), first, t0() + Duration::seconds(1))
            .await
            .unwrap());

        // No TTL wait needed after a graceful release.
        let outcome = manager
            .acquire(
                key(),
                600,
                RunId::new(),
                serde_json::json!({}),
                t0() + Duration::seconds(2),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, LockAcquisition::Acquired(_)));
    }

    #[tokio::test]
    async fn stale_owner_cannot_release_reassigned_lease() {
        let store = InMemoryLockStore::arc();
        let manager = LockManager::new(store.clone());
        let first = RunId::new();
        manager
            .acquire(key(), 10, first, serde_json::json!({}), t0())
            .await
            .unwrap();

        // Lease expires; a second attempt takes it over.
        let second = RunId::new();
        let later = t0() + Duration::seconds(11);
        manager
            .acquire(key(), 600, second, serde_json::json!({}), later)
            .await
            .unwrap();

        // The straggler's release must not touch the new lease.
        assert!(!manager.release(&key(), first, later).await.unwrap());
        let row = store.get(&key()).await.unwrap().unwrap();
        assert!(row.released_at.is_none());
        assert_eq!(row.owner_run_id, second);
    }
}

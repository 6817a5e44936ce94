//! Postgres-backed lock store.
//!
//! The uniqueness conflict is absorbed by `ON CONFLICT DO NOTHING` and
//! reported as a value; the steal and release paths are single conditional
//! `UPDATE`s, so the row's guard predicate is evaluated atomically by the
//! database, not read-then-written by the process.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use cobranzas_core::RunId;

use super::store::LockStore;
use super::types::{InsertOutcome, JobLock, LockKey, LockStoreError};

/// Lock store over a `job_locks` table.
///
/// Expected schema:
///
/// ```sql
/// CREATE TABLE job_locks (
///     lock_key     TEXT PRIMARY KEY,
///     acquired_at  TIMESTAMPTZ NOT NULL,
///     expires_at   TIMESTAMPTZ NOT NULL,
///     owner_run_id UUID NOT NULL,
///     metadata     JSONB NOT NULL DEFAULT '{}',
///     released_at  TIMESTAMPTZ
/// );
/// ```
#[derive(Debug, Clone)]
pub struct PostgresLockStore {
    pool: Arc<PgPool>,
}

impl PostgresLockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn storage_err(operation: &str, e: sqlx::Error) -> LockStoreError {
    LockStoreError::Storage(format!("{operation}: {e}"))
}

#[async_trait]
impl LockStore for PostgresLockStore {
    #[instrument(skip(self, lock), fields(lock_key = %lock.lock_key), err)]
    async fn try_insert(&self, lock: &JobLock) -> Result<InsertOutcome, LockStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_locks (lock_key, acquired_at, expires_at, owner_run_id, metadata, released_at)
            VALUES ($1, $2, $3, $4, $5, NULL)
            ON CONFLICT (lock_key) DO NOTHING
            "#,
        )
        .bind(lock.lock_key.as_str())
        .bind(lock.acquired_at)
        .bind(lock.expires_at)
        .bind(*lock.owner_run_id.as_uuid())
        .bind(&lock.metadata)
        .execute(&*self.pool)
        .await
        .map_err(|e| storage_err("try_insert", e))?;

        if result.rows_affected() == 1 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::Conflict)
        }
    }

    #[instrument(skip(self, metadata), fields(lock_key = %key), err)]
    async fn try_steal(
        &self,
        key: &LockKey,
        new_owner: RunId,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        metadata: &JsonValue,
    ) -> Result<bool, LockStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE job_locks
            SET acquired_at = $2,
                expires_at = $3,
                owner_run_id = $4,
                metadata = $5,
                released_at = NULL
            WHERE lock_key = $1
              AND (expires_at <= $2 OR released_at IS NOT NULL)
            "#,
        )
        .bind(key.as_str())
        .bind(now)
        .bind(expires_at)
        .bind(*new_owner.as_uuid())
        .bind(metadata)
        .execute(&*self.pool)
        .await
        .map_err(|e| storage_err("try_steal", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(lock_key = %key), err)]
    async fn release(
        &self,
        key: &LockKey,
        owner: RunId,
        released_at: DateTime<Utc>,
    ) -> Result<bool, LockStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE job_locks
            SET released_at = $3
            WHERE lock_key = $1
              AND owner_run_id = $2
              AND released_at IS NULL
            "#,
        )
        .bind(key.as_str())
        .bind(*owner.as_uuid())
        .bind(released_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| storage_err("release", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(lock_key = %key), err)]
    async fn get(&self, key: &LockKey) -> Result<Option<JobLock>, LockStoreError> {
        let row = sqlx::query(
            r#"
            SELECT lock_key, acquired_at, expires_at, owner_run_id, metadata, released_at
            FROM job_locks
            WHERE lock_key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| storage_err("get", e))?;

        row.map(|row| -> Result<JobLock, LockStoreError> {
            Ok(JobLock {
                lock_key: key.clone(),
                acquired_at: row
                    .try_get("acquired_at")
                    .map_err(|e| storage_err("get.acquired_at", e))?,
                expires_at: row
                    .try_get("expires_at")
                    .map_err(|e| storage_err("get.expires_at", e))?,
                owner_run_id: RunId::from_uuid(
                    row.try_get::<Uuid, _>("owner_run_id")
                        .map_err(|e| storage_err("get.owner_run_id", e))?,
                ),
                metadata: row
                    .try_get("metadata")
                    .map_err(|e| storage_err("get.metadata", e))?,
                released_at: row
                    .try_get("released_at")
                    .map_err(|e| storage_err("get.released_at", e))?,
            })
        })
        .transpose()
    }
}

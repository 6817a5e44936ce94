//! Postgres-backed run store.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use cobranzas_collections::Counters;
use cobranzas_core::{RunId, UserId};

use super::store::{RunStore, RunStoreError};
use super::types::{JobName, JobRun, RunSource, RunStatus};

/// Run store over a `job_runs` table.
///
/// Expected schema:
///
/// ```sql
/// CREATE TABLE job_runs (
///     id             UUID PRIMARY KEY,
///     job_name       TEXT NOT NULL,
///     run_id         UUID NOT NULL,
///     source         TEXT NOT NULL,
///     status         TEXT NOT NULL,
///     started_at     TIMESTAMPTZ NOT NULL,
///     finished_at    TIMESTAMPTZ,
///     duration_ms    BIGINT,
///     target_date_ar DATE,
///     adapter        TEXT,
///     counters       JSONB NOT NULL DEFAULT '{}',
///     error_message  TEXT,
///     error_stack    TEXT,
///     metadata       JSONB NOT NULL DEFAULT '{}',
///     created_by     UUID
/// );
/// ```
#[derive(Debug, Clone)]
pub struct PostgresRunStore {
    pool: Arc<PgPool>,
}

impl PostgresRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn storage_err(operation: &str, e: impl std::fmt::Display) -> RunStoreError {
    RunStoreError::Storage(format!("{operation}: {e}"))
}

fn row_to_run(row: &PgRow) -> Result<JobRun, RunStoreError> {
    let job_name_raw: String = row
        .try_get("job_name")
        .map_err(|e| storage_err("row.job_name", e))?;
    let source_raw: String = row
        .try_get("source")
        .map_err(|e| storage_err("row.source", e))?;
    let status_raw: String = row
        .try_get("status")
        .map_err(|e| storage_err("row.status", e))?;
    let counters_raw: serde_json::Value = row
        .try_get("counters")
        .map_err(|e| storage_err("row.counters", e))?;

    Ok(JobRun {
        id: row.try_get("id").map_err(|e| storage_err("row.id", e))?,
        job_name: JobName::parse(&job_name_raw)
            .ok_or_else(|| storage_err("row.job_name", format!("unknown job {job_name_raw}")))?,
        run_id: RunId::from_uuid(
            row.try_get::<Uuid, _>("run_id")
                .map_err(|e| storage_err("row.run_id", e))?,
        ),
        source: RunSource::parse(&source_raw)
            .ok_or_else(|| storage_err("row.source", format!("unknown source {source_raw}")))?,
        status: RunStatus::parse(&status_raw)
            .ok_or_else(|| storage_err("row.status", format!("unknown status {status_raw}")))?,
        started_at: row
            .try_get("started_at")
            .map_err(|e| storage_err("row.started_at", e))?,
        finished_at: row
            .try_get("finished_at")
            .map_err(|e| storage_err("row.finished_at", e))?,
        duration_ms: row
            .try_get("duration_ms")
            .map_err(|e| storage_err("row.duration_ms", e))?,
        target_date_ar: row
            .try_get("target_date_ar")
            .map_err(|e| storage_err("row.target_date_ar", e))?,
        adapter: row
            .try_get("adapter")
            .map_err(|e| storage_err("row.adapter", e))?,
        counters: serde_json::from_value::<Counters>(counters_raw)
            .map_err(|e| storage_err("row.counters", e))?,
        error_message: row
            .try_get("error_message")
            .map_err(|e| storage_err("row.error_message", e))?,
        error_stack: row
            .try_get("error_stack")
            .map_err(|e| storage_err("row.error_stack", e))?,
        metadata: row
            .try_get("metadata")
            .map_err(|e| storage_err("row.metadata", e))?,
        created_by: row
            .try_get::<Option<Uuid>, _>("created_by")
            .map_err(|e| storage_err("row.created_by", e))?
            .map(UserId::from_uuid),
    })
}

#[async_trait]
impl RunStore for PostgresRunStore {
    #[instrument(skip(self, run), fields(run_id = %run.run_id, job = %run.job_name), err)]
    async fn insert(&self, run: &JobRun) -> Result<(), RunStoreError> {
        let counters = serde_json::to_value(&run.counters)
            .map_err(|e| storage_err("insert.counters", e))?;

        sqlx::query(
            r#"
            INSERT INTO job_runs (
                id, job_name, run_id, source, status,
                started_at, finished_at, duration_ms,
                target_date_ar, adapter, counters,
                error_message, error_stack, metadata, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(run.id)
        .bind(run.job_name.as_str())
        .bind(*run.run_id.as_uuid())
        .bind(run.source.as_str())
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.duration_ms)
        .bind(run.target_date_ar)
        .bind(run.adapter.as_deref())
        .bind(counters)
        .bind(run.error_message.as_deref())
        .bind(run.error_stack.as_deref())
        .bind(&run.metadata)
        .bind(run.created_by.map(|u| *u.as_uuid()))
        .execute(&*self.pool)
        .await
        .map_err(|e| storage_err("insert", e))?;

        Ok(())
    }

    #[instrument(skip(self, run), fields(run_id = %run.run_id, status = %run.status), err)]
    async fn update(&self, run: &JobRun) -> Result<(), RunStoreError> {
        let counters = serde_json::to_value(&run.counters)
            .map_err(|e| storage_err("update.counters", e))?;

        // Guarded on status = 'running' so a terminal row is finished at
        // most once even under a racing duplicate finisher.
        let result = sqlx::query(
            r#"
            UPDATE job_runs
            SET status = $2,
                finished_at = $3,
                duration_ms = $4,
                counters = $5,
                error_message = $6,
                error_stack = $7
            WHERE id = $1
              AND status = 'running'
            "#,
        )
        .bind(run.id)
        .bind(run.status.as_str())
        .bind(run.finished_at)
        .bind(run.duration_ms)
        .bind(counters)
        .bind(run.error_message.as_deref())
        .bind(run.error_stack.as_deref())
        .execute(&*self.pool)
        .await
        .map_err(|e| storage_err("update", e))?;

        if result.rows_affected() == 1 {
            Ok(())
        } else {
            match self.get(run.id).await? {
                Some(_) => Err(RunStoreError::AlreadyFinished(run.id)),
                None => Err(RunStoreError::NotFound(run.id)),
            }
        }
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: Uuid) -> Result<Option<JobRun>, RunStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, job_name, run_id, source, status,
                   started_at, finished_at, duration_ms,
                   target_date_ar, adapter, counters,
                   error_message, error_stack, metadata, created_by
            FROM job_runs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| storage_err("get", e))?;

        row.as_ref().map(row_to_run).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_recent(&self, limit: usize) -> Result<Vec<JobRun>, RunStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_name, run_id, source, status,
                   started_at, finished_at, duration_ms,
                   target_date_ar, adapter, counters,
                   error_message, error_stack, metadata, created_by
            FROM job_runs
            ORDER BY started_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| storage_err("list_recent", e))?;

        rows.iter().map(row_to_run).collect()
    }
}

//! Run ledger: start/finish transitions over any [`RunStore`].

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

use cobranzas_collections::Counters;
use cobranzas_core::{RunId, UserId};

use super::store::{RunStore, RunStoreError};
use super::types::{JobName, JobRun, RunErrorDetail, RunSource, RunStatus};

/// Append/update log of job executions.
#[derive(Debug, Clone)]
pub struct RunLedger<S> {
    store: S,
}

impl<S: RunStore> RunLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Open a run in the `Running` state.
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        &self,
        job_name: JobName,
        run_id: RunId,
        source: RunSource,
        target_date_ar: Option<NaiveDate>,
        adapter: Option<String>,
        metadata: JsonValue,
        created_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<JobRun, RunStoreError> {
        let run = JobRun::start(
            job_name,
            run_id,
            source,
            target_date_ar,
            adapter,
            metadata,
            created_by,
            now,
        );
        self.store.insert(&run).await?;
        info!(job = %job_name, run_id = %run_id, source = %source, "job run started");
        Ok(run)
    }

    /// Finish a run with a terminal status, exactly once.
    pub async fn finish(
        &self,
        mut run: JobRun,
        status: RunStatus,
        counters: Counters,
        error: Option<RunErrorDetail>,
        now: DateTime<Utc>,
    ) -> Result<JobRun, RunStoreError> {
        if run.status.is_terminal() {
            return Err(RunStoreError::AlreadyFinished(run.id));
        }
        if !status.is_terminal() {
            return Err(RunStoreError::Storage(format!(
                "cannot finish run {} with non-terminal status {status}",
                run.id
            )));
        }

        run.mark_finished(status, counters, error, now);
        self.store.update(&run).await?;
        info!(
            job = %run.job_name,
            run_id = %run.run_id,
            status = %run.status,
            duration_ms = run.duration_ms,
            "job run finished"
        );
        Ok(run)
    }

    /// Newest-first listing for operational inspection.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<JobRun>, RunStoreError> {
        self.store.list_recent(limit).await
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::store::InMemoryRunStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 8, 9, 0, 0).unwrap()
    }

    async fn started(ledger: &RunLedger<InMemoryRunStore>) -> JobRun {
        ledger
            .start(
                JobName::ExportBatch,
                RunId::new(),
                RunSource::Manual,
                NaiveDate::from_ymd_opt(2025, 7, 8),
                Some("coelsa".to_string()),
                serde_json::json!({}),
                None,
                t0(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn start_persists_a_running_row() {
        let ledger = RunLedger::new(InMemoryRunStore::new());
        let run = started(&ledger).await;

        let stored = ledger.store().get(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
        assert!(stored.finished_at.is_none());
    }

    #[tokio::test]
    async fn finish_is_rejected_twice() {
        let ledger = RunLedger::new(InMemoryRunStore::new());
        let run = started(&ledger).await;

        let finished = ledger
            .finish(
                run,
                RunStatus::Success,
                Counters::new().with("batches_exported", 1i64),
                None,
                t0() + Duration::seconds(2),
            )
            .await
            .unwrap();
        assert_eq!(finished.duration_ms, Some(2000));

        let again = ledger
            .finish(
                finished,
                RunStatus::Failed,
                Counters::new(),
                None,
                t0() + Duration::seconds(3),
            )
            .await;
        assert!(matches!(again, Err(RunStoreError::AlreadyFinished(_))));
    }

    #[tokio::test]
    async fn finish_refuses_non_terminal_status() {
        let ledger = RunLedger::new(InMemoryRunStore::new());
        let run = started(&ledger).await;
        let result = ledger
            .finish(run, RunStatus::Running, Counters::new(), None, t0())
            .await;
        assert!(matches!(result, Err(RunStoreError::Storage(_))));
    }

    #[tokio::test]
    async fn failed_runs_keep_error_detail() {
        let ledger = RunLedger::new(InMemoryRunStore::new());
        let run = started(&ledger).await;

        let finished = ledger
            .finish(
                run,
                RunStatus::Failed,
                Counters::new(),
                Some(RunErrorDetail {
                    message: "adapter timeout".to_string(),
                    stack: Some("ExportError::Timeout".to_string()),
                }),
                t0() + Duration::seconds(1),
            )
            .await
            .unwrap();

        assert_eq!(finished.error_message.as_deref(), Some("adapter timeout"));
        assert_eq!(finished.status, RunStatus::Failed);
    }
}

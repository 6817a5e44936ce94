//! Run store abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::types::JobRun;

/// Run store error.
#[derive(Debug, Error)]
pub enum RunStoreError {
    #[error("job run not found: {0}")]
    NotFound(Uuid),

    /// A terminal row was finished a second time. Runs are updated exactly
    /// once; this indicates a caller bug, not a storage fault.
    #[error("job run already finished: {0}")]
    AlreadyFinished(Uuid),

    #[error("run storage error: {0}")]
    Storage(String),
}

/// Store contract for job run rows.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert(&self, run: &JobRun) -> Result<(), RunStoreError>;

    /// Persist the terminal transition of a run.
    async fn update(&self, run: &JobRun) -> Result<(), RunStoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<JobRun>, RunStoreError>;

    /// Newest-first listing for operational inspection. The caller bounds it;
    /// no pagination contract at this layer.
    async fn list_recent(&self, limit: usize) -> Result<Vec<JobRun>, RunStoreError>;
}

#[async_trait]
impl<S> RunStore for Arc<S>
where
    S: RunStore + ?Sized,
{
    async fn insert(&self, run: &JobRun) -> Result<(), RunStoreError> {
        (**self).insert(run).await
    }

    async fn update(&self, run: &JobRun) -> Result<(), RunStoreError> {
        (**self).update(run).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRun>, RunStoreError> {
        (**self).get(id).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<JobRun>, RunStoreError> {
        (**self).list_recent(limit).await
    }
}

/// In-memory run store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    rows: RwLock<HashMap<Uuid, JobRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn insert(&self, run: &JobRun) -> Result<(), RunStoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| RunStoreError::Storage("lock poisoned".to_string()))?;
        rows.insert(run.id, run.clone());
        Ok(())
    }

    async fn update(&self, run: &JobRun) -> Result<(), RunStoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| RunStoreError::Storage("lock poisoned".to_string()))?;
        match rows.get(&run.id) {
            None => Err(RunStoreError::NotFound(run.id)),
            Some(existing) if existing.status.is_terminal() => {
                Err(RunStoreError::AlreadyFinished(run.id))
            }
            Some(_) => {
                rows.insert(run.id, run.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRun>, RunStoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| RunStoreError::Storage("lock poisoned".to_string()))?;
        Ok(rows.get(&id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<JobRun>, RunStoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| RunStoreError::Storage("lock poisoned".to_string()))?;
        let mut result: Vec<JobRun> = rows.values().cloned().collect();
        // UUIDv7 ids are time-ordered, so they break started_at ties stably.
        result.sort_by(|a, b| (b.started_at, b.id).cmp(&(a.started_at, a.id)));
        result.truncate(limit);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::types::{JobName, RunSource, RunStatus};
    use chrono::{Duration, TimeZone, Utc};
    use cobranzas_collections::Counters;
    use cobranzas_core::RunId;

    fn run_started_at(offset_secs: i64) -> JobRun {
        JobRun::start(
            JobName::PrepareBatch,
            RunId::new(),
            RunSource::Cron,
            None,
            Some("coelsa".to_string()),
            serde_json::json!({}),
            None,
            Utc.with_ymd_and_hms(2025, 7, 8, 9, 0, 0).unwrap() + Duration::seconds(offset_secs),
        )
    }

    #[tokio::test]
    async fn list_recent_is_newest_first_and_bounded() {
        let store = InMemoryRunStore::new();
        for offset in [0, 10, 20, 30] {
            store.insert(&run_started_at(offset)).await.unwrap();
        }

        let recent = store.list_recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].started_at > recent[1].started_at);
        assert!(recent[1].started_at > recent[2].started_at);
    }

    #[tokio::test]
    async fn update_of_unknown_run_is_not_found() {
        let store = InMemoryRunStore::new();
        let run = run_started_at(0);
        assert!(matches!(
            store.update(&run).await,
            Err(RunStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn terminal_rows_reject_further_updates() {
        let store = InMemoryRunStore::new();
        let mut run = run_started_at(0);
        store.insert(&run).await.unwrap();

        run.mark_finished(
            RunStatus::Success,
            Counters::new(),
            None,
            run.started_at + Duration::seconds(1),
        );
        store.update(&run).await.unwrap();

        assert!(matches!(
            store.update(&run).await,
            Err(RunStoreError::AlreadyFinished(_))
        ));
    }
}

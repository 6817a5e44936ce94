//! Trigger input, job outcome, and runner errors.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use cobranzas_collections::{Counters, DebitAdapter, FallbackProvider};
use cobranzas_core::{RunId, UserId};

use crate::locks::LockStoreError;
use crate::runs::{JobName, RunStatus, RunStoreError};

/// Input to a job trigger.
///
/// Manual and system sources bypass the scheduling deferrals; an operator can
/// force a run outside the automatic window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTrigger {
    pub source: crate::runs::RunSource,
    /// Operate on this business date verbatim instead of deriving today's.
    pub target_date_ar: Option<NaiveDate>,
    pub adapter: Option<DebitAdapter>,
    pub provider: Option<FallbackProvider>,
    pub actor: Option<UserId>,
    /// Bypass the "already prepared" guard (prepare-batch only).
    pub force: bool,
    pub dry_run: bool,
    /// Export one specific batch out of band (export-batch only).
    pub batch_id: Option<Uuid>,
}

impl JobTrigger {
    fn with_source(source: crate::runs::RunSource) -> Self {
        Self {
            source,
            target_date_ar: None,
            adapter: None,
            provider: None,
            actor: None,
            force: false,
            dry_run: false,
            batch_id: None,
        }
    }

    pub fn cron() -> Self {
        Self::with_source(crate::runs::RunSource::Cron)
    }

    pub fn manual() -> Self {
        Self::with_source(crate::runs::RunSource::Manual)
    }

    pub fn system() -> Self {
        Self::with_source(crate::runs::RunSource::System)
    }

    pub fn on_date(mut self, date: NaiveDate) -> Self {
        self.target_date_ar = Some(date);
        self
    }

    pub fn via_adapter(mut self, adapter: DebitAdapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn via_provider(mut self, provider: FallbackProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn by(mut self, actor: UserId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn for_batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }
}

/// Terminal result of one job trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub job_name: JobName,
    pub status: RunStatus,
    pub run_id: RunId,
    pub target_date_ar: NaiveDate,
    pub counters: Counters,
    /// Batch produced or exported, when the job deals in batches.
    pub batch_id: Option<Uuid>,
}

/// Runner-level error.
///
/// Store failures *before* a lock is held are infrastructure errors with no
/// ledger entry; a domain failure after the lock is recorded as a `failed`
/// run and re-surfaced as [`RunnerError::JobFailed`].
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("lock store failure: {0}")]
    LockStore(#[from] LockStoreError),

    #[error("run ledger failure: {0}")]
    RunStore(#[from] RunStoreError),

    #[error("job {job_name} (run {run_id}) failed: {message}")]
    JobFailed {
        job_name: JobName,
        run_id: RunId,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::RunSource;

    #[test]
    fn builders_start_from_a_bare_source() {
        let trigger = JobTrigger::manual()
            .on_date(NaiveDate::from_ymd_opt(2025, 7, 8).unwrap())
            .via_adapter(DebitAdapter::Coelsa)
            .forced();
        assert_eq!(trigger.source, RunSource::Manual);
        assert!(trigger.force);
        assert!(!trigger.dry_run);
        assert!(trigger.provider.is_none());
    }
}

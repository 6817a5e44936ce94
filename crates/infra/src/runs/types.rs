//! Job run row and its status state machine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use cobranzas_collections::Counters;
use cobranzas_core::{RunId, UserId};

/// The five collection job kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobName {
    AnchorCycles,
    PrepareBatch,
    ExportBatch,
    FallbackCreate,
    FallbackSync,
}

impl JobName {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobName::AnchorCycles => "collections.anchor_cycles",
            JobName::PrepareBatch => "collections.prepare_batch",
            JobName::ExportBatch => "collections.export_batch",
            JobName::FallbackCreate => "collections.fallback_create",
            JobName::FallbackSync => "collections.fallback_sync",
        }
    }
}

impl JobName {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collections.anchor_cycles" => Some(JobName::AnchorCycles),
            "collections.prepare_batch" => Some(JobName::PrepareBatch),
            "collections.export_batch" => Some(JobName::ExportBatch),
            "collections.fallback_create" => Some(JobName::FallbackCreate),
            "collections.fallback_sync" => Some(JobName::FallbackSync),
            _ => None,
        }
    }
}

impl core::fmt::Display for JobName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What triggered the run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    Cron,
    Manual,
    System,
}

impl RunSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunSource::Cron => "cron",
            RunSource::Manual => "manual",
            RunSource::System => "system",
        }
    }

    /// Scheduled runs respect business-day and cutoff deferrals; an operator
    /// forcing a manual/system run bypasses both.
    pub fn applies_schedule_policy(&self) -> bool {
        matches!(self, RunSource::Cron)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cron" => Some(RunSource::Cron),
            "manual" => Some(RunSource::Manual),
            "system" => Some(RunSource::System),
            _ => None,
        }
    }
}

impl core::fmt::Display for RunSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run status state machine: `Running` is the sole initial state, the five
/// others are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// All targeted units succeeded.
    Success,
    /// Some but not all targeted units succeeded.
    Partial,
    Failed,
    /// The lock was held elsewhere at call time; nothing ran.
    SkippedLocked,
    /// The job ran but made no state change (already satisfied, deferred,
    /// or structurally inapplicable).
    NoOp,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::SkippedLocked => "skipped_locked",
            RunStatus::NoOp => "no_op",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "partial" => Some(RunStatus::Partial),
            "failed" => Some(RunStatus::Failed),
            "skipped_locked" => Some(RunStatus::SkippedLocked),
            "no_op" => Some(RunStatus::NoOp),
            _ => None,
        }
    }
}

impl core::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure detail captured on a `Failed` run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunErrorDetail {
    pub message: String,
    /// Debug rendering of the error chain (no exception stacks in Rust).
    pub stack: Option<String>,
}

impl RunErrorDetail {
    pub fn from_error<E: std::error::Error>(error: &E) -> Self {
        Self {
            message: error.to_string(),
            stack: Some(format!("{error:?}")),
        }
    }
}

/// One job execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_name: JobName,
    /// Correlation token, one per attempt; also the lock owner id.
    pub run_id: RunId,
    pub source: RunSource,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Local business date the run operated on; None for date-agnostic jobs.
    pub target_date_ar: Option<NaiveDate>,
    /// Downstream integration targeted (debit adapter or fallback provider).
    pub adapter: Option<String>,
    pub counters: Counters,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
    pub metadata: JsonValue,
    pub created_by: Option<UserId>,
}

impl JobRun {
    /// Open a new attempt in the `Running` state.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        job_name: JobName,
        run_id: RunId,
        source: RunSource,
        target_date_ar: Option<NaiveDate>,
        adapter: Option<String>,
        metadata: JsonValue,
        created_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_name,
            run_id,
            source,
            status: RunStatus::Running,
            started_at: now,
            finished_at: None,
            duration_ms: None,
            target_date_ar,
            adapter,
            counters: Counters::new(),
            error_message: None,
            error_stack: None,
            metadata,
            created_by,
        }
    }

    /// Transition to a terminal status.
    ///
    /// Invariants: `finished_at` is set iff the run left `Running`, and
    /// `duration_ms` is set alongside it.
    pub fn mark_finished(
        &mut self,
        status: RunStatus,
        counters: Counters,
        error: Option<RunErrorDetail>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.finished_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0));
        self.counters = counters;
        if status == RunStatus::Failed {
            if let Some(detail) = error {
                self.error_message = Some(detail.message);
                self.error_stack = detail.stack;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 8, 9, 0, 0).unwrap()
    }

    fn running_run() -> JobRun {
        JobRun::start(
            JobName::AnchorCycles,
            RunId::new(),
            RunSource::Manual,
            NaiveDate::from_ymd_opt(2025, 7, 8),
            None,
            serde_json::json!({}),
            None,
            t0(),
        )
    }

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        for status in [
            RunStatus::Success,
            RunStatus::Partial,
            RunStatus::Failed,
            RunStatus::SkippedLocked,
            RunStatus::NoOp,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn started_run_has_no_finish_fields() {
        let run = running_run();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.finished_at.is_none());
        assert!(run.duration_ms.is_none());
    }

    #[test]
    fn finishing_sets_duration_and_counters() {
        let mut run = running_run();
        let counters = Counters::new().with("cycles_created", 3i64);
        run.mark_finished(
            RunStatus::Success,
            counters.clone(),
            None,
            t0() + chrono::Duration::milliseconds(1500),
        );
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.duration_ms, Some(1500));
        assert_eq!(run.counters, counters);
        assert!(run.error_message.is_none());
    }

    #[test]
    fn error_detail_is_only_kept_for_failed() {
        let detail = RunErrorDetail {
            message: "rail unavailable".to_string(),
            stack: Some("ExportError(...)".to_string()),
        };

        let mut ok = running_run();
        ok.mark_finished(
            RunStatus::Success,
            Counters::new(),
            Some(detail.clone()),
            t0(),
        );
        assert!(ok.error_message.is_none());

        let mut failed = running_run();
        failed.mark_finished(RunStatus::Failed, Counters::new(), Some(detail), t0());
        assert_eq!(failed.error_message.as_deref(), Some("rail unavailable"));
        assert!(failed.error_stack.is_some());
    }
}

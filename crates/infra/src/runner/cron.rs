//! Cron dispatcher: the single scheduled entry point.
//!
//! A tick never raises. Each sub-job's own terminal status (or failure) is
//! captured in the tick result; a disabled configuration returns an explicit
//! "disabled" result with every sub-result `None` and performs zero lock or
//! ledger writes.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::runner::executor::JobRunner;
use crate::runner::trigger::{JobOutcome, JobTrigger, RunnerError};
use crate::runs::JobName;

/// One sub-job's contribution to a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum TickOutcome {
    Completed(JobOutcome),
    Failed { job_name: JobName, error: String },
}

/// Structured result of one scheduled tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CronTickResult {
    pub enabled: bool,
    pub run_anchor: Option<TickOutcome>,
    pub prepare_batch: Option<TickOutcome>,
    pub export_batch: Option<TickOutcome>,
    pub fallback_create: Option<TickOutcome>,
    pub fallback_sync: Option<TickOutcome>,
}

impl CronTickResult {
    fn disabled() -> Self {
        Self {
            enabled: false,
            run_anchor: None,
            prepare_batch: None,
            export_batch: None,
            fallback_create: None,
            fallback_sync: None,
        }
    }
}

/// Sequences the collection jobs for the current operational date.
pub struct CronDispatcher {
    runner: Arc<JobRunner>,
}

impl CronDispatcher {
    pub fn new(runner: Arc<JobRunner>) -> Self {
        Self { runner }
    }

    /// Run one scheduled billing tick: anchor, then prepare, then export,
    /// plus the fallback jobs when auto-sync is configured.
    pub async fn run_billing_cron_tick(&self) -> CronTickResult {
        if !self.runner.config().enabled {
            info!("collections cron disabled, skipping tick");
            return CronTickResult::disabled();
        }

        let run_anchor = Some(capture(
            JobName::AnchorCycles,
            self.runner.run_anchor(JobTrigger::cron()).await,
        ));
        let prepare_batch = Some(capture(
            JobName::PrepareBatch,
            self.runner.run_prepare_batch(JobTrigger::cron()).await,
        ));
        let export_batch = Some(capture(
            JobName::ExportBatch,
            self.runner.run_export_batch(JobTrigger::cron()).await,
        ));

        let (fallback_create, fallback_sync) = if self.runner.config().fallback_auto_sync {
            let create = Some(capture(
                JobName::FallbackCreate,
                self.runner.run_fallback_create(JobTrigger::cron()).await,
            ));
            let sync = Some(capture(
                JobName::FallbackSync,
                self.runner.run_fallback_sync(JobTrigger::cron()).await,
            ));
            (create, sync)
        } else {
            (None, None)
        };

        CronTickResult {
            enabled: true,
            run_anchor,
            prepare_batch,
            export_batch,
            fallback_create,
            fallback_sync,
        }
    }
}

/// Swallow a sub-job failure into the tick result.
fn capture(job_name: JobName, result: Result<JobOutcome, RunnerError>) -> TickOutcome {
    match result {
        Ok(outcome) => TickOutcome::Completed(outcome),
        Err(e) => {
            error!(job = %job_name, error = %e, "cron sub-job failed");
            TickOutcome::Failed {
                job_name,
                error: e.to_string(),
            }
        }
    }
}

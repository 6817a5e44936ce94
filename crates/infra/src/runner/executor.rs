//! The orchestrator: one shared execution template behind five job triggers.
//!
//! Template, per trigger:
//!
//! 1. resolve the operational target date (caller's verbatim, else today's
//!    local date)
//! 2. apply CRON deferral rules before any work (non-business day; export
//!    cutoff hour); manual/system sources bypass both
//! 3. acquire the job lock; denial returns `skipped_locked` with no ledger
//!    row and never invokes the domain operation
//! 4. open a `running` ledger row
//! 5. agency-scoped jobs partition the active agencies by rollout flags
//! 6. invoke the domain operation (idempotent on its side)
//! 7. finish `success`/`partial`/`no_op`
//! 8. on error, finish `failed` with message and detail, re-surface to the
//!    caller
//! 9. release the lock on every path taken after acquisition

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use cobranzas_calendar::BusinessCalendar;
use cobranzas_collections::{
    CollectionOps, Counters, DebitAdapter, FallbackProvider, SubscriptionRegistry,
};
use cobranzas_config::CollectionsConfig;
use cobranzas_core::{AgencyId, RunId};
use cobranzas_rollout::{resolve_cutoff_hour, AgencyRollout};

use crate::locks::{LockAcquisition, LockKey, LockManager, LockStore};
use crate::runner::clock::{Clock, SystemClock};
use crate::runner::rollout_store::{resolve_rollouts, RolloutStore};
use crate::runner::trigger::{JobOutcome, JobTrigger, RunnerError};
use crate::runs::{
    JobName, JobRun, RunErrorDetail, RunLedger, RunStatus, RunStore, RunStoreError,
};

/// Result of the domain phase (steps 5-7), before ledger finalization.
struct ExecOutput {
    status: RunStatus,
    counters: Counters,
    batch_id: Option<Uuid>,
}

/// Composes calendar, config, locks, ledger, rollout and the domain-side
/// collection operations into the public job triggers.
pub struct JobRunner {
    config: CollectionsConfig,
    calendar: BusinessCalendar,
    locks: LockManager<Arc<dyn LockStore>>,
    ledger: RunLedger<Arc<dyn RunStore>>,
    rollouts: Arc<dyn RolloutStore>,
    registry: Arc<dyn SubscriptionRegistry>,
    ops: Arc<dyn CollectionOps>,
    clock: Arc<dyn Clock>,
}

impl JobRunner {
    pub fn new(
        config: CollectionsConfig,
        locks: Arc<dyn LockStore>,
        runs: Arc<dyn RunStore>,
        rollouts: Arc<dyn RolloutStore>,
        registry: Arc<dyn SubscriptionRegistry>,
        ops: Arc<dyn CollectionOps>,
    ) -> Self {
        let calendar = config.calendar();
        Self {
            config,
            calendar,
            locks: LockManager::new(locks),
            ledger: RunLedger::new(runs),
            rollouts,
            registry,
            ops,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CollectionsConfig {
        &self.config
    }

    /// Anchor billing cycles for agencies whose anchor date has arrived.
    pub async fn run_anchor(&self, trigger: JobTrigger) -> Result<JobOutcome, RunnerError> {
        self.trigger_job(JobName::AnchorCycles, trigger).await
    }

    /// Build the direct-debit presentment batch for the target date.
    pub async fn run_prepare_batch(&self, trigger: JobTrigger) -> Result<JobOutcome, RunnerError> {
        self.trigger_job(JobName::PrepareBatch, trigger).await
    }

    /// Export pending prepared batches to the downstream rail.
    pub async fn run_export_batch(&self, trigger: JobTrigger) -> Result<JobOutcome, RunnerError> {
        self.trigger_job(JobName::ExportBatch, trigger).await
    }

    /// Create fallback payment intents for eligible failed charges.
    pub async fn run_fallback_create(
        &self,
        trigger: JobTrigger,
    ) -> Result<JobOutcome, RunnerError> {
        self.trigger_job(JobName::FallbackCreate, trigger).await
    }

    /// Reconcile the status of previously created fallback intents.
    pub async fn run_fallback_sync(&self, trigger: JobTrigger) -> Result<JobOutcome, RunnerError> {
        self.trigger_job(JobName::FallbackSync, trigger).await
    }

    /// Newest-first run history for operational inspection.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<JobRun>, RunStoreError> {
        self.ledger.list_recent(limit).await
    }

    async fn trigger_job(
        &self,
        job: JobName,
        trigger: JobTrigger,
    ) -> Result<JobOutcome, RunnerError> {
        let now = self.clock.now();
        let run_id = RunId::new();
        let target_date = trigger
            .target_date_ar
            .unwrap_or_else(|| self.calendar.local_date(now));

        if let Some(outcome) = self.schedule_deferral(job, &trigger, target_date, now, run_id) {
            return Ok(outcome);
        }

        let scope = self.scope_for(job, &trigger);
        let key = LockKey::compose(job.as_str(), &scope, target_date);
        let lock_metadata = json!({
            "job": job.as_str(),
            "source": trigger.source.as_str(),
            "actor": trigger.actor.map(|a| a.to_string()),
        });

        match self
            .locks
            .acquire(
                key.clone(),
                self.config.lock_ttl_secs,
                run_id,
                lock_metadata,
                now,
            )
            .await?
        {
            LockAcquisition::Acquired(_) => {}
            LockAcquisition::Denied => {
                // Routine contention under concurrent triggers; no ledger row
                // is written for an attempt that never truly started.
                info!(job = %job, lock_key = %key, "lock held elsewhere, skipping");
                return Ok(JobOutcome {
                    job_name: job,
                    status: RunStatus::SkippedLocked,
                    run_id,
                    target_date_ar: target_date,
                    counters: Counters::new(),
                    batch_id: None,
                });
            }
        }

        let result = self
            .run_with_ledger(job, &trigger, target_date, run_id, &scope)
            .await;

        if let Err(e) = self.locks.release(&key, run_id, self.clock.now()).await {
            warn!(job = %job, lock_key = %key, error = %e, "failed to release job lock");
        }

        result
    }

    /// Steps 4-8: everything that happens while the lock is held.
    async fn run_with_ledger(
        &self,
        job: JobName,
        trigger: &JobTrigger,
        target_date: NaiveDate,
        run_id: RunId,
        scope: &str,
    ) -> Result<JobOutcome, RunnerError> {
        let adapter = match job {
            JobName::AnchorCycles => None,
            _ => Some(scope.to_string()),
        };
        let run_metadata = json!({
            "force": trigger.force,
            "dry_run": trigger.dry_run,
        });

        let run = self
            .ledger
            .start(
                job,
                run_id,
                trigger.source,
                Some(target_date),
                adapter,
                run_metadata,
                trigger.actor,
                self.clock.now(),
            )
            .await?;

        match self.execute_domain(job, trigger, target_date).await {
            Ok(output) => {
                let finished = self
                    .ledger
                    .finish(
                        run,
                        output.status,
                        output.counters,
                        None,
                        self.clock.now(),
                    )
                    .await?;
                Ok(JobOutcome {
                    job_name: job,
                    status: finished.status,
                    run_id,
                    target_date_ar: target_date,
                    counters: finished.counters,
                    batch_id: output.batch_id,
                })
            }
            Err((detail, counters)) => {
                let message = detail.message.clone();
                if let Err(ledger_err) = self
                    .ledger
                    .finish(
                        run,
                        RunStatus::Failed,
                        counters,
                        Some(detail),
                        self.clock.now(),
                    )
                    .await
                {
                    error!(
                        job = %job,
                        run_id = %run_id,
                        error = %ledger_err,
                        "failed to record job failure"
                    );
                }
                Err(RunnerError::JobFailed {
                    job_name: job,
                    run_id,
                    message,
                })
            }
        }
    }

    /// CRON deferral rules (step 2). Returns a `no_op` outcome without
    /// acquiring a lock or touching the ledger.
    fn schedule_deferral(
        &self,
        job: JobName,
        trigger: &JobTrigger,
        target_date: NaiveDate,
        now: DateTime<Utc>,
        run_id: RunId,
    ) -> Option<JobOutcome> {
        if !trigger.source.applies_schedule_policy() {
            return None;
        }

        if self.config.business_days_only && !self.calendar.is_business_date(target_date) {
            info!(job = %job, %target_date, "non-business day, deferring");
            return Some(JobOutcome {
                job_name: job,
                status: RunStatus::NoOp,
                run_id,
                target_date_ar: target_date,
                counters: Counters::new().with("skipped_non_business_day", 1i64),
                batch_id: None,
            });
        }

        if job == JobName::ExportBatch {
            if let Some(cutoff) = resolve_cutoff_hour(None, self.config.export_cutoff_hour) {
                let local_hour = self.calendar.local_hour(now);
                if local_hour >= cutoff {
                    info!(job = %job, local_hour, cutoff, "past export cutoff, deferring");
                    return Some(JobOutcome {
                        job_name: job,
                        status: RunStatus::NoOp,
                        run_id,
                        target_date_ar: target_date,
                        counters: Counters::new().with("deferred_by_cutoff", 1i64),
                        batch_id: None,
                    });
                }
            }
        }

        None
    }

    fn scope_for(&self, job: JobName, trigger: &JobTrigger) -> String {
        match job {
            JobName::AnchorCycles => "global".to_string(),
            JobName::PrepareBatch | JobName::ExportBatch => trigger
                .adapter
                .unwrap_or(self.config.default_debit_adapter)
                .as_str()
                .to_string(),
            JobName::FallbackCreate | JobName::FallbackSync => trigger
                .provider
                .unwrap_or(self.config.fallback_provider)
                .as_str()
                .to_string(),
        }
    }

    /// Steps 5-7: rollout partitioning plus the domain operation itself.
    ///
    /// Errors carry the counters accumulated so far, so a failed run still
    /// records how far it got.
    async fn execute_domain(
        &self,
        job: JobName,
        trigger: &JobTrigger,
        target_date: NaiveDate,
    ) -> Result<ExecOutput, (RunErrorDetail, Counters)> {
        let mut counters = Counters::new();
        if trigger.dry_run {
            counters.set("dry_run", true);
        }

        match job {
            JobName::AnchorCycles => {
                let processed = self
                    .eligible_agencies(&mut counters, AgencyRollout::pd_automation_enabled)
                    .await?;
                if processed.is_empty() {
                    return Ok(ExecOutput {
                        status: RunStatus::NoOp,
                        counters,
                        batch_id: None,
                    });
                }

                let outcome = self
                    .ops
                    .anchor_billing_cycles(target_date, &processed, trigger.dry_run)
                    .await
                    .map_err(|e| (RunErrorDetail::from_error(&e), counters.clone()))?;
                let partial = outcome.is_partial();
                counters.merge(&outcome.into_counters());
                Ok(ExecOutput {
                    status: if partial {
                        RunStatus::Partial
                    } else {
                        RunStatus::Success
                    },
                    counters,
                    batch_id: None,
                })
            }

            JobName::PrepareBatch => {
                let adapter = self.adapter_for(trigger);
                let outcome = self
                    .ops
                    .prepare_presentment_batch(target_date, adapter, trigger.force, trigger.dry_run)
                    .await
                    .map_err(|e| (RunErrorDetail::from_error(&e), counters.clone()))?;
                let no_op = outcome.no_op;
                let batch_id = outcome.batch_id;
                counters.merge(&outcome.into_counters());
                Ok(ExecOutput {
                    status: if no_op {
                        RunStatus::NoOp
                    } else {
                        RunStatus::Success
                    },
                    counters,
                    batch_id,
                })
            }

            JobName::ExportBatch => {
                let adapter = self.adapter_for(trigger);
                let outcome = self
                    .ops
                    .export_pending_batches(target_date, adapter, trigger.batch_id, trigger.dry_run)
                    .await
                    .map_err(|e| (RunErrorDetail::from_error(&e), counters.clone()))?;
                let no_op = outcome.no_op;
                counters.merge(&outcome.into_counters());
                Ok(ExecOutput {
                    status: if no_op {
                        RunStatus::NoOp
                    } else {
                        RunStatus::Success
                    },
                    counters,
                    batch_id: trigger.batch_id,
                })
            }

            JobName::FallbackCreate => {
                let provider = self.provider_for(trigger);
                let processed = self
                    .eligible_agencies(&mut counters, AgencyRollout::fallback_automation_enabled)
                    .await?;
                if processed.is_empty() {
                    return Ok(ExecOutput {
                        status: RunStatus::NoOp,
                        counters,
                        batch_id: None,
                    });
                }

                let outcome = self
                    .ops
                    .create_fallback_intents(target_date, provider, &processed, trigger.dry_run)
                    .await
                    .map_err(|e| (RunErrorDetail::from_error(&e), counters.clone()))?;
                let partial = outcome.is_partial();
                counters.merge(&outcome.into_counters());
                Ok(ExecOutput {
                    status: if partial {
                        RunStatus::Partial
                    } else {
                        RunStatus::Success
                    },
                    counters,
                    batch_id: None,
                })
            }

            JobName::FallbackSync => {
                let provider = self.provider_for(trigger);
                // Scheduled syncs additionally require the per-agency
                // auto-sync opt-in; an operator syncing manually only needs
                // fallback itself enabled.
                let gate: fn(&AgencyRollout) -> bool = if trigger.source.applies_schedule_policy() {
                    AgencyRollout::can_auto_sync_fallback
                } else {
                    AgencyRollout::fallback_automation_enabled
                };
                let processed = self.eligible_agencies(&mut counters, gate).await?;
                if processed.is_empty() {
                    return Ok(ExecOutput {
                        status: RunStatus::NoOp,
                        counters,
                        batch_id: None,
                    });
                }

                let outcome = self
                    .ops
                    .sync_fallback_statuses(provider, &processed)
                    .await
                    .map_err(|e| (RunErrorDetail::from_error(&e), counters.clone()))?;
                counters.merge(&outcome.into_counters());
                Ok(ExecOutput {
                    status: RunStatus::Success,
                    counters,
                    batch_id: None,
                })
            }
        }
    }

    fn adapter_for(&self, trigger: &JobTrigger) -> DebitAdapter {
        trigger.adapter.unwrap_or(self.config.default_debit_adapter)
    }

    fn provider_for(&self, trigger: &JobTrigger) -> FallbackProvider {
        trigger.provider.unwrap_or(self.config.fallback_provider)
    }

    /// Load the active agency population, resolve rollout flags, and
    /// partition into processed vs skipped-disabled.
    async fn eligible_agencies(
        &self,
        counters: &mut Counters,
        allowed: impl Fn(&AgencyRollout) -> bool,
    ) -> Result<Vec<AgencyId>, (RunErrorDetail, Counters)> {
        let agencies = self
            .registry
            .active_agency_ids()
            .await
            .map_err(|e| (RunErrorDetail::from_error(&e), counters.clone()))?;

        let rollouts: HashMap<AgencyId, AgencyRollout> = resolve_rollouts(
            self.rollouts.as_ref(),
            &agencies,
            self.config.require_agency_flag,
        )
        .await
        .map_err(|e| (RunErrorDetail::from_error(&e), counters.clone()))?;

        let processed: Vec<AgencyId> = agencies
            .iter()
            .filter(|agency_id| rollouts.get(*agency_id).map(&allowed).unwrap_or(false))
            .copied()
            .collect();

        counters.set("agencies_considered", agencies.len() as i64);
        counters.set("agencies_processed", processed.len() as i64);
        counters.set(
            "agencies_skipped_disabled",
            (agencies.len() - processed.len()) as i64,
        );

        Ok(processed)
    }
}

//! Async contracts for the domain-side collection operations.
//!
//! Every operation is idempotent on the domain side: re-invoking it for a
//! date/scope that was already fully processed reports `skipped_idempotent`
//! instead of duplicating effects. The orchestrator trusts and surfaces that
//! counter; it never re-implements idempotency itself.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use cobranzas_core::{AgencyId, DomainResult};

use crate::counters::Counters;
use crate::rails::{DebitAdapter, FallbackProvider};

/// Result of anchoring billing cycles for a set of agencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnchorOutcome {
    pub cycles_created: u64,
    pub cycles_advanced: u64,
    pub skipped_idempotent: u64,
    /// Agencies whose anchoring failed, with the failure reason.
    pub failed: Vec<(AgencyId, String)>,
}

impl AnchorOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn into_counters(self) -> Counters {
        Counters::new()
            .with("cycles_created", self.cycles_created)
            .with("cycles_advanced", self.cycles_advanced)
            .with("skipped_idempotent", self.skipped_idempotent)
            .with("agencies_failed", self.failed.len() as i64)
    }
}

/// Result of building a direct-debit presentment batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepareOutcome {
    /// True when there was nothing to batch (or the date was already
    /// prepared and `force` was not set).
    pub no_op: bool,
    pub batch_id: Option<Uuid>,
    pub charges_batched: u64,
    pub skipped_idempotent: u64,
    pub total_amount_cents: i64,
}

impl PrepareOutcome {
    pub fn into_counters(self) -> Counters {
        Counters::new()
            .with("no_op", self.no_op)
            .with("charges_batched", self.charges_batched)
            .with("skipped_idempotent", self.skipped_idempotent)
            .with("total_amount_cents", self.total_amount_cents)
    }
}

/// Result of exporting prepared batches to the downstream rail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOutcome {
    pub no_op: bool,
    pub batches_exported: u64,
    pub charges_exported: u64,
    pub skipped_idempotent: u64,
}

impl ExportOutcome {
    pub fn into_counters(self) -> Counters {
        Counters::new()
            .with("no_op", self.no_op)
            .with("batches_exported", self.batches_exported)
            .with("charges_exported", self.charges_exported)
            .with("skipped_idempotent", self.skipped_idempotent)
    }
}

/// Result of creating fallback payment intents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackCreateOutcome {
    pub intents_created: u64,
    pub skipped_idempotent: u64,
    /// Agencies that had no eligible failed charges.
    pub skipped_no_candidates: u64,
    pub failed: Vec<(AgencyId, String)>,
}

impl FallbackCreateOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn into_counters(self) -> Counters {
        Counters::new()
            .with("intents_created", self.intents_created)
            .with("skipped_idempotent", self.skipped_idempotent)
            .with("skipped_no_candidates", self.skipped_no_candidates)
            .with("agencies_failed", self.failed.len() as i64)
    }
}

/// Result of reconciling previously created fallback intents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackSyncOutcome {
    pub intents_synced: u64,
    pub intents_settled: u64,
    pub intents_expired: u64,
}

impl FallbackSyncOutcome {
    pub fn into_counters(self) -> Counters {
        Counters::new()
            .with("intents_synced", self.intents_synced)
            .with("intents_settled", self.intents_settled)
            .with("intents_expired", self.intents_expired)
    }
}

/// Source of the agency population eligible for collection automation.
#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    /// Ids of agencies that currently hold at least one active subscription.
    async fn active_agency_ids(&self) -> DomainResult<Vec<AgencyId>>;
}

#[async_trait]
impl<S> SubscriptionRegistry for std::sync::Arc<S>
where
    S: SubscriptionRegistry + ?Sized,
{
    async fn active_agency_ids(&self) -> DomainResult<Vec<AgencyId>> {
        (**self).active_agency_ids().await
    }
}

/// The domain-side collection operations the orchestrator drives.
#[async_trait]
pub trait CollectionOps: Send + Sync {
    /// Compute/advance billing cycles for subscriptions whose anchor date
    /// has arrived. Idempotent per agency per date.
    async fn anchor_billing_cycles(
        &self,
        date: NaiveDate,
        agencies: &[AgencyId],
        dry_run: bool,
    ) -> DomainResult<AnchorOutcome>;

    /// Build a presentment batch of due, not-yet-presented charges.
    /// `force` bypasses the "already prepared for this date" guard.
    async fn prepare_presentment_batch(
        &self,
        date: NaiveDate,
        adapter: DebitAdapter,
        force: bool,
        dry_run: bool,
    ) -> DomainResult<PrepareOutcome>;

    /// Export pending prepared batches to the downstream rail. An explicit
    /// `batch_id` exports that batch out of band.
    async fn export_pending_batches(
        &self,
        date: NaiveDate,
        adapter: DebitAdapter,
        batch_id: Option<Uuid>,
        dry_run: bool,
    ) -> DomainResult<ExportOutcome>;

    /// Create fallback payment intents for charges eligible after a failed
    /// direct-debit attempt.
    async fn create_fallback_intents(
        &self,
        date: NaiveDate,
        provider: FallbackProvider,
        agencies: &[AgencyId],
        dry_run: bool,
    ) -> DomainResult<FallbackCreateOutcome>;

    /// Poll/reconcile the status of previously created fallback intents.
    async fn sync_fallback_statuses(
        &self,
        provider: FallbackProvider,
        agencies: &[AgencyId],
    ) -> DomainResult<FallbackSyncOutcome>;
}

#[async_trait]
impl<S> CollectionOps for std::sync::Arc<S>
where
    S: CollectionOps + ?Sized,
{
    async fn anchor_billing_cycles(
        &self,
        date: NaiveDate,
        agencies: &[AgencyId],
        dry_run: bool,
    ) -> DomainResult<AnchorOutcome> {
        (**self).anchor_billing_cycles(date, agencies, dry_run).await
    }

    async fn prepare_presentment_batch(
        &self,
        date: NaiveDate,
        adapter: DebitAdapter,
        force: bool,
        dry_run: bool,
    ) -> DomainResult<PrepareOutcome> {
        (**self)
            .prepare_presentment_batch(date, adapter, force, dry_run)
            .await
    }

    async fn export_pending_batches(
        &self,
        date: NaiveDate,
        adapter: DebitAdapter,
        batch_id: Option<Uuid>,
        dry_run: bool,
    ) -> DomainResult<ExportOutcome> {
        (**self)
            .export_pending_batches(date, adapter, batch_id, dry_run)
            .await
    }

    async fn create_fallback_intents(
        &self,
        date: NaiveDate,
        provider: FallbackProvider,
        agencies: &[AgencyId],
        dry_run: bool,
    ) -> DomainResult<FallbackCreateOutcome> {
        (**self)
            .create_fallback_intents(date, provider, agencies, dry_run)
            .await
    }

    async fn sync_fallback_statuses(
        &self,
        provider: FallbackProvider,
        agencies: &[AgencyId],
    ) -> DomainResult<FallbackSyncOutcome> {
        (**self).sync_fallback_statuses(provider, agencies).await
    }
}

//! Batched agency rollout resolution.
//!
//! The rollout registry is written by the administrative surface; the
//! orchestrator only reads it, fresh on every decision. A deployment where
//! the rollout schema has not been migrated yet must degrade to defaults
//! rather than block all collection activity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

use cobranzas_core::AgencyId;
use cobranzas_rollout::AgencyRollout;

/// Rollout store error.
#[derive(Debug, Error)]
pub enum RolloutStoreError {
    /// The backing schema is structurally absent (not yet migrated).
    /// Callers degrade to defaults instead of failing the run.
    #[error("rollout storage unavailable: {0}")]
    Unavailable(String),

    #[error("rollout storage error: {0}")]
    Storage(String),
}

/// Store contract for explicit rollout override rows.
#[async_trait]
pub trait RolloutStore: Send + Sync {
    /// Fetch the override rows for the given agencies. Agencies without an
    /// explicit row are simply absent from the map.
    async fn fetch(
        &self,
        agencies: &[AgencyId],
    ) -> Result<HashMap<AgencyId, AgencyRollout>, RolloutStoreError>;
}

#[async_trait]
impl<S> RolloutStore for Arc<S>
where
    S: RolloutStore + ?Sized,
{
    async fn fetch(
        &self,
        agencies: &[AgencyId],
    ) -> Result<HashMap<AgencyId, AgencyRollout>, RolloutStoreError> {
        (**self).fetch(agencies).await
    }
}

/// Resolve effective rollouts for a set of agencies.
///
/// Agencies with no explicit row get the `require_agency_flag`-polarized
/// default. A structurally unavailable store degrades every agency to the
/// fail-open default: the feature gate is not worth blocking collections
/// over. Ordinary storage errors still propagate.
pub async fn resolve_rollouts<S: RolloutStore + ?Sized>(
    store: &S,
    agencies: &[AgencyId],
    require_agency_flag: bool,
) -> Result<HashMap<AgencyId, AgencyRollout>, RolloutStoreError> {
    match store.fetch(agencies).await {
        Ok(mut rows) => {
            for agency_id in agencies {
                rows.entry(*agency_id)
                    .or_insert_with(|| AgencyRollout::default_for(*agency_id, require_agency_flag));
            }
            Ok(rows)
        }
        Err(RolloutStoreError::Unavailable(reason)) => {
            warn!(%reason, "rollout registry unavailable, degrading to fail-open defaults");
            Ok(agencies
                .iter()
                .map(|agency_id| (*agency_id, AgencyRollout::default_for(*agency_id, false)))
                .collect())
        }
        Err(other) => Err(other),
    }
}

/// In-memory rollout store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRolloutStore {
    rows: RwLock<HashMap<AgencyId, AgencyRollout>>,
    unavailable: AtomicBool,
}

impl InMemoryRolloutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn upsert(&self, rollout: AgencyRollout) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert(rollout.agency_id, rollout);
        }
    }

    /// Simulate a deployment where the rollout schema is missing.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl RolloutStore for InMemoryRolloutStore {
    async fn fetch(
        &self,
        agencies: &[AgencyId],
    ) -> Result<HashMap<AgencyId, AgencyRollout>, RolloutStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RolloutStoreError::Unavailable(
                "schema not migrated".to_string(),
            ));
        }
        let rows = self
            .rows
            .read()
            .map_err(|_| RolloutStoreError::Storage("lock poisoned".to_string()))?;
        Ok(agencies
            .iter()
            .filter_map(|agency_id| rows.get(agency_id).map(|r| (*agency_id, r.clone())))
            .collect())
    }
}

/// Rollout store over an `agency_collections_rollout` table.
///
/// An `undefined_table` error (SQLSTATE 42P01) maps to
/// [`RolloutStoreError::Unavailable`]: the schema simply has not been
/// migrated in that environment yet.
#[derive(Debug, Clone)]
pub struct PostgresRolloutStore {
    pool: Arc<PgPool>,
}

impl PostgresRolloutStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn map_fetch_error(e: sqlx::Error) -> RolloutStoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some("42P01") {
            return RolloutStoreError::Unavailable(db.message().to_string());
        }
    }
    RolloutStoreError::Storage(format!("fetch: {e}"))
}

#[async_trait]
impl RolloutStore for PostgresRolloutStore {
    #[instrument(skip(self, agencies), fields(agencies = agencies.len()), err)]
    async fn fetch(
        &self,
        agencies: &[AgencyId],
    ) -> Result<HashMap<AgencyId, AgencyRollout>, RolloutStoreError> {
        let ids: Vec<Uuid> = agencies.iter().map(|a| *a.as_uuid()).collect();

        let rows = sqlx::query(
            r#"
            SELECT agency_id, pd_enabled, dunning_enabled, fallback_enabled,
                   fallback_provider, fallback_auto_sync_enabled, suspended,
                   cutoff_override_hour, notes
            FROM agency_collections_rollout
            WHERE agency_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(map_fetch_error)?;

        let mut result = HashMap::with_capacity(rows.len());
        for row in rows {
            let agency_id = AgencyId::from_uuid(
                row.try_get::<Uuid, _>("agency_id")
                    .map_err(|e| RolloutStoreError::Storage(format!("row.agency_id: {e}")))?,
            );
            let provider: Option<String> = row
                .try_get("fallback_provider")
                .map_err(|e| RolloutStoreError::Storage(format!("row.fallback_provider: {e}")))?;
            let cutoff: Option<i32> = row
                .try_get("cutoff_override_hour")
                .map_err(|e| RolloutStoreError::Storage(format!("row.cutoff_override_hour: {e}")))?;

            let rollout = AgencyRollout {
                agency_id,
                has_config: true,
                pd_enabled: row
                    .try_get("pd_enabled")
                    .map_err(|e| RolloutStoreError::Storage(format!("row.pd_enabled: {e}")))?,
                dunning_enabled: row
                    .try_get("dunning_enabled")
                    .map_err(|e| RolloutStoreError::Storage(format!("row.dunning_enabled: {e}")))?,
                fallback_enabled: row
                    .try_get("fallback_enabled")
                    .map_err(|e| RolloutStoreError::Storage(format!("row.fallback_enabled: {e}")))?,
                // Unknown provider strings are dropped, not fatal: the global
                // default applies instead.
                fallback_provider: provider.and_then(|p| p.parse().ok()),
                fallback_auto_sync_enabled: row.try_get("fallback_auto_sync_enabled").map_err(
                    |e| RolloutStoreError::Storage(format!("row.fallback_auto_sync_enabled: {e}")),
                )?,
                suspended: row
                    .try_get("suspended")
                    .map_err(|e| RolloutStoreError::Storage(format!("row.suspended: {e}")))?,
                cutoff_override_hour: cutoff.and_then(|h| u32::try_from(h).ok()),
                notes: row
                    .try_get("notes")
                    .map_err(|e| RolloutStoreError::Storage(format!("row.notes: {e}")))?,
            };
            result.insert(agency_id, rollout);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_rows_get_polarized_defaults() {
        let store = InMemoryRolloutStore::new();
        let with_row = AgencyId::new();
        let without_row = AgencyId::new();
        store.upsert(AgencyRollout {
            suspended: true,
            has_config: true,
            ..AgencyRollout::default_for(with_row, false)
        });

        let resolved = resolve_rollouts(&store, &[with_row, without_row], true)
            .await
            .unwrap();
        assert!(resolved[&with_row].suspended);
        assert!(resolved[&with_row].has_config);
        // Fail-closed default for the agency without a row.
        assert!(!resolved[&without_row].has_config);
        assert!(!resolved[&without_row].pd_automation_enabled());
    }

    #[tokio::test]
    async fn unavailable_store_degrades_to_fail_open() {
        let store = InMemoryRolloutStore::new();
        store.set_unavailable(true);
        let agency = AgencyId::new();

        // Even under require_agency_flag, availability wins.
        let resolved = resolve_rollouts(&store, &[agency], true).await.unwrap();
        assert!(resolved[&agency].pd_automation_enabled());
    }

    #[tokio::test]
    async fn resolution_covers_every_requested_agency() {
        let store = InMemoryRolloutStore::new();
        let agencies: Vec<AgencyId> = (0..5).map(|_| AgencyId::new()).collect();
        let resolved = resolve_rollouts(&store, &agencies, false).await.unwrap();
        assert_eq!(resolved.len(), agencies.len());
    }
}

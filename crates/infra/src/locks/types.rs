//! Lock row and store-level primitives.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use cobranzas_core::RunId;

/// Composite mutual-exclusion key: one job kind, one scope, one target date.
///
/// Unrelated scopes and dates run concurrently; two triggers for the same
/// composite serialize on this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockKey(String);

impl LockKey {
    pub fn compose(job: &str, scope: &str, target_date: NaiveDate) -> Self {
        Self(format!("{job}:{scope}:{}", target_date.format("%Y-%m-%d")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for LockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted lock lease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLock {
    pub lock_key: LockKey,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Correlates the lease to exactly one job run attempt.
    pub owner_run_id: RunId,
    /// Diagnostic context (job name, source, actor).
    pub metadata: JsonValue,
    /// Set on graceful release; absence past expiry means stealable.
    pub released_at: Option<DateTime<Utc>>,
}

impl JobLock {
    pub fn is_released(&self) -> bool {
        self.released_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// An expired or already-released lease may be taken over.
    pub fn is_stealable(&self, now: DateTime<Utc>) -> bool {
        self.is_released() || self.is_expired(now)
    }
}

/// Result of attempting to create a new lock row.
///
/// The store reports uniqueness conflicts as a value, not an error: conflict
/// is the expected path under concurrent triggers and feeds the steal
/// attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

/// Lock store infrastructure error.
///
/// Denied acquisition is **not** an error (see [`InsertOutcome`] and the
/// manager's `Denied` result); these are genuine storage failures.
#[derive(Debug, Error)]
pub enum LockStoreError {
    #[error("lock storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_lock(now: DateTime<Utc>) -> JobLock {
        JobLock {
            lock_key: LockKey::compose(
                "collections.export_batch",
                "coelsa",
                NaiveDate::from_ymd_opt(2025, 7, 8).unwrap(),
            ),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(600),
            owner_run_id: RunId::new(),
            metadata: serde_json::json!({}),
            released_at: None,
        }
    }

    #[test]
    fn compose_formats_the_documented_shape() {
        let key = LockKey::compose(
            "collections.anchor_cycles",
            "global",
            NaiveDate::from_ymd_opt(2025, 7, 8).unwrap(),
        );
        assert_eq!(key.as_str(), "collections.anchor_cycles:global:2025-07-08");
    }

    #[test]
    fn live_lease_is_not_stealable() {
        let now = Utc.with_ymd_and_hms(2025, 7, 8, 12, 0, 0).unwrap();
        let lock = base_lock(now);
        assert!(!lock.is_stealable(now + chrono::Duration::seconds(599)));
    }

    #[test]
    fn expired_or_released_lease_is_stealable() {
        let now = Utc.with_ymd_and_hms(2025, 7, 8, 12, 0, 0).unwrap();
        let lock = base_lock(now);
        assert!(lock.is_stealable(now + chrono::Duration::seconds(600)));

        let released = JobLock {
            released_at: Some(now),
            ..base_lock(now)
        };
        assert!(released.is_stealable(now));
    }
}

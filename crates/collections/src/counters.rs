//! The string-keyed counters map persisted on every job run.
//!
//! Job kinds report genuinely different metrics, so the ledger-facing shape
//! is an open map. Domain operations build their own structured outcome types
//! and convert here only at the ledger-write boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single counter value: a number or a flag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CounterValue {
    Count(i64),
    Flag(bool),
}

impl From<i64> for CounterValue {
    fn from(value: i64) -> Self {
        CounterValue::Count(value)
    }
}

impl From<u64> for CounterValue {
    fn from(value: u64) -> Self {
        CounterValue::Count(value as i64)
    }
}

impl From<bool> for CounterValue {
    fn from(value: bool) -> Self {
        CounterValue::Flag(value)
    }
}

/// Ordered map of operation-specific result metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counters(BTreeMap<String, CounterValue>);

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a counter, overwriting any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<CounterValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<CounterValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Add to a numeric counter, creating it at zero first.
    pub fn add(&mut self, key: impl Into<String>, delta: i64) {
        let entry = self
            .0
            .entry(key.into())
            .or_insert(CounterValue::Count(0));
        if let CounterValue::Count(n) = entry {
            *n += delta;
        }
    }

    pub fn count(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(CounterValue::Count(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.0.get(key) {
            Some(CounterValue::Flag(b)) => Some(*b),
            _ => None,
        }
    }

    /// Merge another counters map in; numeric keys are summed, flags are
    /// overwritten by the right-hand side.
    pub fn merge(&mut self, other: &Counters) {
        for (key, value) in &other.0 {
            match value {
                CounterValue::Count(n) => self.add(key.clone(), *n),
                CounterValue::Flag(b) => self.set(key.clone(), *b),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CounterValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_creates_missing_keys_at_zero() {
        let mut counters = Counters::new();
        counters.add("cycles_created", 3);
        counters.add("cycles_created", 2);
        assert_eq!(counters.count("cycles_created"), Some(5));
    }

    #[test]
    fn flags_and_counts_are_distinct() {
        let counters = Counters::new()
            .with("deferred_by_cutoff", true)
            .with("skipped_idempotent", 0i64);
        assert_eq!(counters.flag("deferred_by_cutoff"), Some(true));
        assert_eq!(counters.count("deferred_by_cutoff"), None);
        assert_eq!(counters.count("skipped_idempotent"), Some(0));
    }

    #[test]
    fn merge_sums_counts_and_overwrites_flags() {
        let mut left = Counters::new()
            .with("charges_exported", 4i64)
            .with("no_op", true);
        let right = Counters::new()
            .with("charges_exported", 6i64)
            .with("no_op", false);
        left.merge(&right);
        assert_eq!(left.count("charges_exported"), Some(10));
        assert_eq!(left.flag("no_op"), Some(false));
    }

    #[test]
    fn serializes_as_a_flat_json_map() {
        let counters = Counters::new()
            .with("agencies_processed", 2i64)
            .with("dry_run", true);
        let json = serde_json::to_value(&counters).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"agencies_processed": 2, "dry_run": true})
        );
    }
}

//! Named, TTL-bounded mutual exclusion backed by the shared store.
//!
//! A lock row is created on acquisition and updated in place on steal or
//! release; it is never hard-deleted, so the row doubles as an audit trail of
//! who last held each key. At most one unreleased, unexpired lock exists per
//! key at any instant; an expired or released lease may be taken over.

pub mod manager;
pub mod postgres;
pub mod store;
pub mod types;

pub use manager::{LockAcquisition, LockManager};
pub use postgres::PostgresLockStore;
pub use store::{InMemoryLockStore, LockStore};
pub use types::{InsertOutcome, JobLock, LockKey, LockStoreError};

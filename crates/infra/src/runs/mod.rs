//! Durable, append-mostly record of job executions.
//!
//! A row is opened `running` only once its lock is held, finished exactly
//! once with a terminal status, and never mutated thereafter. The ledger is
//! both the idempotency witness ("did this date already run?") and the first
//! stop of incident diagnosis.

pub mod ledger;
pub mod postgres;
pub mod store;
pub mod types;

pub use ledger::RunLedger;
pub use postgres::PostgresRunStore;
pub use store::{InMemoryRunStore, RunStore};
pub use types::{JobName, JobRun, RunErrorDetail, RunSource, RunStatus, RunStoreError};

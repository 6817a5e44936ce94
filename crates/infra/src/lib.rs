//! Infrastructure layer: job locks, the run ledger, and the orchestrator.
//!
//! ## Design
//!
//! - One lock row per `{job}:{scope}:{date}` key is the sole serialization
//!   point across racing processes (cron tick vs manual trigger)
//! - The run ledger is append-mostly: a row is created `running` while the
//!   lock is held and finished exactly once with a terminal status
//! - Store traits ship an in-memory implementation (tests/dev) and a
//!   Postgres implementation behind the same contract
//! - The runner composes config, calendar, rollout and the domain-side
//!   collection operations; it owns scheduling policy, never collection
//!   logic

pub mod locks;
pub mod runner;
pub mod runs;


pub use locks::{InMemoryLockStore, JobLock, LockAcquisition, LockManager, LockStore};
pub use runner::{
    CronDispatcher, CronTickResult, JobOutcome, JobRunner, JobTrigger, RunnerError,
};
pub use runs::{JobName, JobRun, RunLedger, RunSource, RunStatus};

//! `cobranzas-collections` — contracts between the job orchestrator and the
//! domain-side collection operations.
//!
//! The orchestrator never performs collection work itself; it drives
//! implementations of [`CollectionOps`] and records their outcomes. Each
//! operation has a concrete, structured outcome type internally; the
//! heterogeneous string-keyed [`Counters`] map exists only at the run-ledger
//! boundary, where job kinds genuinely differ in shape.

pub mod counters;
pub mod ops;
pub mod rails;

pub use counters::{CounterValue, Counters};
pub use ops::{
    AnchorOutcome, CollectionOps, ExportOutcome, FallbackCreateOutcome, FallbackSyncOutcome,
    PrepareOutcome, SubscriptionRegistry,
};
pub use rails::{DebitAdapter, FallbackProvider};

//! # reportd scheduler
//!
//! Decides when jobs run and drives each execution through
//! render → assemble → persist → mail, recording the outcome.

pub mod interval;
pub mod orchestrator;
pub mod persistence;
pub mod pool;
pub mod store;

pub use interval::compute_next_run;
pub use orchestrator::{Orchestrator, OrchestratorConfig, RetryPolicy};
pub use persistence::SqliteStore;
pub use pool::{PoolStats, WorkerPool};
pub use store::ReportStore;

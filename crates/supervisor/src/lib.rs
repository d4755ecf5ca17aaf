//! # Taskforge Supervisor
//!
//! The orchestration layer: the priority task queue, the worker pool, the
//! durable event log with its diagnostics dispatcher, and the supervisor
//! control loop that ties them to the ledger and the execution loop.

pub mod eventlog;
pub mod pool;
pub mod queue;
pub mod supervisor;

pub use eventlog::{DiagnosticsState, EventDispatcher, EventLog};
pub use pool::{CrashTracker, WorkerContext, WorkerExit, WorkerPool};
pub use queue::{BackendSimilarity, SimilarityCheck, TaskQueue};
pub use supervisor::{StatusReport, Supervisor};

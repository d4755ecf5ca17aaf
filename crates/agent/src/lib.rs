//! # Taskforge Agent
//!
//! The reasoning side of the orchestrator: the round-based tool-calling
//! execution loop, the backend fallback chain, and the failure circuit
//! breaker. The supervisor crate wires these onto workers; this crate knows
//! nothing about worker pools or queues.

pub mod breaker;
pub mod fallback;
pub mod runner;

pub use breaker::CircuitBreaker;
pub use fallback::{FallbackBackend, FallbackEntry};
pub use runner::{ExecutionLoop, OutcomeStatus, TaskOutcome};

//! # Taskforge Ledger
//!
//! Durable budget accounting for the orchestrator. The ledger is the single
//! authority on spend: tasks reserve an estimate before running, commit
//! actual usage when they finish, and the supervisor consults the ledger
//! before dispatching anything new.
//!
//! All writes happen inside a named store lock so that multiple processes
//! sharing one data directory serialize their updates.

pub mod ledger;
pub mod model;

pub use ledger::BudgetLedger;
pub use model::{
    ActualUsage, AlertLevel, BudgetSnapshot, BudgetState, DriftReport, PendingReservation,
    Reservation,
};

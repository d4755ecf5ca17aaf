//! # Taskforge Core
//!
//! Domain types, traits, and error definitions for the Taskforge
//! orchestration runtime. This crate has **zero framework dependencies** —
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (reasoning backend, durable store, version
//! control, notifier) is defined as a trait here. Implementations live in
//! their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod backend;
pub mod channel;
pub mod error;
pub mod event;
pub mod store;
pub mod task;
pub mod tool;
pub mod vcs;
pub mod worker;

// Re-export key types at crate root for ergonomics
pub use backend::{BackendRequest, BackendResponse, Message, ReasoningBackend, Role, Usage};
pub use channel::{InboundMessage, Notifier};
pub use error::{Error, Result};
pub use event::{Event, EventBus, EventKind, Severity};
pub use store::{DurableStore, FileStore, StoreLock};
pub use task::{Task, TaskId, TaskKind, TaskStatus};
pub use tool::{Tool, ToolCall, ToolCallRecord, ToolRegistry, ToolResult};
pub use vcs::VersionControl;
pub use worker::{Heartbeat, WorkerId};

//! Error types for the Taskforge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Taskforge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Queue errors ---
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    // --- Ledger errors ---
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // --- Backend errors ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Channel errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Version control errors ---
    #[error("Version control error: {0}")]
    Vcs(#[from] VcsError),

    // --- Worker crash (unexpected exit outside the task's own control flow) ---
    #[error("Worker {worker_id} crashed: {reason}")]
    WorkerCrash { worker_id: u32, reason: String },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("Duplicate of task {existing_id}: {reason}")]
    Duplicate { existing_id: String, reason: String },

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Retry limit reached for task {task_id} ({retries} retries)")]
    RetryLimit { task_id: String, retries: u32 },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Snapshot rejected: {0}")]
    StaleSnapshot(String),

    #[error("Self-directed intake halted: {0}")]
    SelfDirectedHalted(String),
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Ledger lock not acquired within {waited_secs}s")]
    LockTimeout { waited_secs: u64 },

    #[error("Budget exhausted: requested ${requested:.4}, remaining ${remaining:.4}")]
    Exhausted { requested: f64, remaining: f64 },

    #[error("Unknown reservation: {0}")]
    UnknownReservation(String),

    #[error("Ledger storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Empty response from backend: {0}")]
    EmptyResponse(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend not configured: {0}")]
    NotConfigured(String),
}

impl BackendError {
    /// Whether this failure is transient infrastructure trouble rather than a
    /// real error in the request itself. Transient failures are retried and
    /// never counted against failure circuit breakers.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::EmptyResponse(_) | Self::Timeout(_) | Self::Network(_) | Self::RateLimited { .. }
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Lock on '{name}' not acquired within {waited_secs}s")]
    LockTimeout { name: String, waited_secs: u64 },

    #[error("Corrupted record: {0}")]
    Corrupted(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Message delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Channel closed: {0}")]
    Closed(String),
}

#[derive(Debug, Clone, Error)]
pub enum VcsError {
    #[error("{operation} failed: {reason}")]
    CommandFailed { operation: String, reason: String },

    #[error("Revision not found: {0}")]
    RevisionNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_error_displays_correctly() {
        let err = Error::Queue(QueueError::Duplicate {
            existing_id: "abc-123".into(),
            reason: "exact payload match".into(),
        });
        assert!(err.to_string().contains("abc-123"));
        assert!(err.to_string().contains("exact payload match"));
    }

    #[test]
    fn ledger_error_displays_correctly() {
        let err = Error::Ledger(LedgerError::Exhausted {
            requested: 0.5,
            remaining: 0.1,
        });
        assert!(err.to_string().contains("0.5000"));
        assert!(err.to_string().contains("0.1000"));
    }

    #[test]
    fn transient_classification() {
        assert!(BackendError::EmptyResponse("no content".into()).is_transient());
        assert!(BackendError::Network("conn refused".into()).is_transient());
        assert!(
            !BackendError::ApiError {
                status_code: 400,
                message: "bad request".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn worker_crash_carries_id() {
        let err = Error::WorkerCrash {
            worker_id: 0,
            reason: "panicked".into(),
        };
        assert!(err.to_string().contains("Worker 0"));
    }
}

//! Domain event system — the audit trail and live pub/sub backbone.
//!
//! Every significant transition in the system is expressed as an [`Event`]:
//! published on the in-process [`EventBus`] for live subscribers, and
//! appended to the durable event log which is authoritative for recovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::task::{TaskId, TaskKind};
use crate::worker::WorkerId;

/// All event kinds in the system, tagged for durable serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    TaskEnqueued {
        kind: TaskKind,
        payload_preview: String,
    },
    TaskStarted {
        worker_id: WorkerId,
    },
    TaskCompleted {
        kind: TaskKind,
        rounds: u32,
        spent_usd: f64,
    },
    TaskFailed {
        kind: TaskKind,
        rounds: u32,
        reason: String,
    },
    TaskCancelled,
    TaskRetried {
        original_task_id: TaskId,
        retry_count: u32,
    },
    WorkerSpawned {
        worker_id: WorkerId,
        code_revision: String,
    },
    WorkerTimedOut {
        worker_id: WorkerId,
        running_secs: u64,
    },
    WorkerCrashed {
        worker_id: WorkerId,
        reason: String,
    },
    CrashStorm {
        crashes: u32,
        window_secs: u64,
        fallback_revision: String,
    },
    BudgetCommitted {
        amount_usd: f64,
        total_spent_usd: f64,
    },
    BudgetThreshold {
        level: String,
        pct_used: f64,
    },
    BudgetDrift {
        tracked_usd: f64,
        authoritative_usd: f64,
    },
    ToolFailed {
        tool_name: String,
        reason: String,
    },
    SupervisorHeartbeat {
        active_workers: usize,
        pending_tasks: usize,
    },
    SlowCycle {
        duration_ms: u64,
        limit_ms: u64,
    },
    EmergencyStop {
        reason: String,
    },
}

impl EventKind {
    /// Stable name used as the dispatch key in the handler table.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskEnqueued { .. } => "task_enqueued",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskCancelled => "task_cancelled",
            Self::TaskRetried { .. } => "task_retried",
            Self::WorkerSpawned { .. } => "worker_spawned",
            Self::WorkerTimedOut { .. } => "worker_timed_out",
            Self::WorkerCrashed { .. } => "worker_crashed",
            Self::CrashStorm { .. } => "crash_storm",
            Self::BudgetCommitted { .. } => "budget_committed",
            Self::BudgetThreshold { .. } => "budget_threshold",
            Self::BudgetDrift { .. } => "budget_drift",
            Self::ToolFailed { .. } => "tool_failed",
            Self::SupervisorHeartbeat { .. } => "supervisor_heartbeat",
            Self::SlowCycle { .. } => "slow_cycle",
            Self::EmergencyStop { .. } => "emergency_stop",
        }
    }
}

/// Event severity, used for alert routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A single entry in the system's audit trail.
///
/// `seq` is assigned by the durable log on append and is strictly monotonic
/// within one log; events constructed but not yet appended carry `seq = 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub severity: Severity,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: 0,
            timestamp: Utc::now(),
            kind,
            task_id: None,
            severity: Severity::Info,
        }
    }

    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Components
/// subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<Event>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: Event) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

//! Task domain types.
//!
//! A task is the unit of work flowing through the system: enqueued, scheduled
//! onto a worker, executed by the reasoning loop, and closed with a terminal
//! status. Retries are new tasks linked back to the first attempt through
//! `original_task_id`, so lineage survives any number of requeues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The origin class of a task, which determines scheduling priority.
///
/// User and Review work always runs before self-directed work; Background
/// runs only when nothing else is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Directly requested by the user.
    User,
    /// A review of previously produced work, requested by the user.
    Review,
    /// Self-directed improvement work generated by the system itself.
    Evolution,
    /// Low-priority housekeeping generated during idle periods.
    Background,
}

impl TaskKind {
    /// Scheduling class: lower runs first. User and Review share the top
    /// class and are FIFO among themselves.
    pub fn priority_class(&self) -> u8 {
        match self {
            Self::User | Self::Review => 0,
            Self::Evolution => 1,
            Self::Background => 2,
        }
    }

    /// Self-directed work halts at the budget ceiling while user work
    /// continues to the full budget.
    pub fn is_self_directed(&self) -> bool {
        matches!(self, Self::Evolution | Self::Background)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::User => "user",
            Self::Review => "review",
            Self::Evolution => "evolution",
            Self::Background => "background",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle status of a task. Transitions are monotonic: once terminal,
/// a task never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition to `next` is legal.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Cancelled),
            Self::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID.
    pub id: TaskId,

    /// The task that spawned this one (e.g. a review spawned by a user task).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<TaskId>,

    /// First attempt in this task's retry lineage. `None` for first attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_task_id: Option<TaskId>,

    /// Priority class of this task.
    pub kind: TaskKind,

    /// The instruction text to execute.
    pub payload: String,

    /// Current lifecycle status.
    pub status: TaskStatus,

    /// How many times this lineage has been retried.
    #[serde(default)]
    pub retry_count: u32,

    /// The worker currently executing this task, if any. Worker 0 is a
    /// valid assignment; absence is always `None`, never a sentinel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<crate::worker::WorkerId>,

    /// Final output, present once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a new first-attempt task.
    pub fn new(kind: TaskKind, payload: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            parent_id: None,
            original_task_id: None,
            kind,
            payload: payload.into(),
            status: TaskStatus::Pending,
            retry_count: 0,
            assigned_worker: None,
            result: None,
            created_at: Utc::now(),
        }
    }

    /// Create a child task spawned by this one.
    pub fn child(&self, kind: TaskKind, payload: impl Into<String>) -> Self {
        let mut task = Self::new(kind, payload);
        task.parent_id = Some(self.id);
        task
    }

    /// Create the next retry attempt for this task.
    ///
    /// The retry gets a fresh ID and points back at the first attempt in
    /// the lineage, so a retry of a retry still references the original.
    pub fn retry(&self) -> Self {
        Self {
            id: TaskId::new(),
            parent_id: self.parent_id,
            original_task_id: Some(self.original_task_id.unwrap_or(self.id)),
            kind: self.kind,
            payload: self.payload.clone(),
            status: TaskStatus::Pending,
            retry_count: self.retry_count + 1,
            assigned_worker: None,
            result: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_is_pending() {
        let task = Task::new(TaskKind::User, "do the thing");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        assert!(task.original_task_id.is_none());
        assert!(task.assigned_worker.is_none());
    }

    #[test]
    fn priority_classes_ordered() {
        assert!(TaskKind::User.priority_class() < TaskKind::Evolution.priority_class());
        assert!(TaskKind::Evolution.priority_class() < TaskKind::Background.priority_class());
        assert_eq!(
            TaskKind::User.priority_class(),
            TaskKind::Review.priority_class()
        );
    }

    #[test]
    fn retry_links_to_original() {
        let first = Task::new(TaskKind::Evolution, "improve something");
        let second = first.retry();
        assert_eq!(second.original_task_id, Some(first.id));
        assert_eq!(second.retry_count, 1);
        assert_ne!(second.id, first.id);

        // A retry of a retry still points at the first attempt.
        let third = second.retry();
        assert_eq!(third.original_task_id, Some(first.id));
        assert_eq!(third.retry_count, 2);
    }

    #[test]
    fn status_transitions_monotonic() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn task_serialization_roundtrip() {
        let task = Task::new(TaskKind::Review, "review the patch");
        let json = serde_json::to_string(&task).unwrap();
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, task.id);
        assert_eq!(parsed.kind, TaskKind::Review);
        assert_eq!(parsed.payload, "review the patch");
    }

    #[test]
    fn self_directed_classification() {
        assert!(!TaskKind::User.is_self_directed());
        assert!(!TaskKind::Review.is_self_directed());
        assert!(TaskKind::Evolution.is_self_directed());
        assert!(TaskKind::Background.is_self_directed());
    }
}

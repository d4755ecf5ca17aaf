//! Worker identity and liveness types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Worker slot identifier. Slots are numbered from zero, and slot 0 is a
/// perfectly ordinary worker; "no worker" is expressed as `Option<WorkerId>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// A liveness signal sent by a running worker to the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker_id: WorkerId,
    pub task_id: Option<TaskId>,
    pub at: DateTime<Utc>,
}

impl Heartbeat {
    pub fn new(worker_id: WorkerId, task_id: Option<TaskId>) -> Self {
        Self {
            worker_id,
            task_id,
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_zero_is_a_real_worker() {
        let assigned: Option<WorkerId> = Some(WorkerId(0));
        assert!(assigned.is_some());
        assert_eq!(assigned.unwrap().to_string(), "worker-0");
    }

    #[test]
    fn heartbeat_carries_task() {
        let hb = Heartbeat::new(WorkerId(3), Some(TaskId::new()));
        assert_eq!(hb.worker_id, WorkerId(3));
        assert!(hb.task_id.is_some());
    }
}

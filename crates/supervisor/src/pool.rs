//! The worker pool: slot allocation, liveness tracking, and termination.
//!
//! Workers are tokio tasks occupying numbered slots in `[0, capacity)`.
//! A freed slot is reused immediately — the next spawn always takes the
//! lowest free id, and id 0 is as real as any other. Each worker gets a
//! cancellation token and a heartbeat sender; the supervisor drains
//! heartbeats every cycle and uses them to find hung workers.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;

use taskforge_core::error::{Error, Result};
use taskforge_core::task::Task;
use taskforge_core::worker::{Heartbeat, WorkerId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything a worker body needs from the pool.
pub struct WorkerContext {
    pub worker_id: WorkerId,
    pub cancel: CancellationToken,
    pub heartbeats: mpsc::Sender<Heartbeat>,
}

struct WorkerSlot<T> {
    task: Task,
    code_revision: String,
    started: Instant,
    last_heartbeat: Instant,
    cancel: CancellationToken,
    handle: JoinHandle<T>,
}

/// How a worker's tenure in its slot ended.
#[derive(Debug)]
pub enum WorkerExit<T> {
    /// The worker body ran to completion and produced its output.
    Finished(T),
    /// The worker task panicked or was aborted.
    Crashed(String),
}

pub struct WorkerPool<T> {
    capacity: usize,
    workers: HashMap<u32, WorkerSlot<T>>,
    heartbeat_tx: mpsc::Sender<Heartbeat>,
    heartbeat_rx: mpsc::Receiver<Heartbeat>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(capacity: usize) -> Self {
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(capacity.max(1) * 16);
        Self {
            capacity,
            workers: HashMap::new(),
            heartbeat_tx,
            heartbeat_rx,
        }
    }

    /// The lowest unoccupied worker id, if any.
    pub fn lowest_free_id(&self) -> Option<WorkerId> {
        (0..self.capacity as u32)
            .find(|id| !self.workers.contains_key(id))
            .map(WorkerId)
    }

    pub fn has_capacity(&self) -> bool {
        self.workers.len() < self.capacity
    }

    pub fn active_count(&self) -> usize {
        self.workers.len()
    }

    pub fn active_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<u32> = self.workers.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().map(WorkerId).collect()
    }

    pub fn task_of(&self, id: WorkerId) -> Option<&Task> {
        self.workers.get(&id.0).map(|s| &s.task)
    }

    pub fn code_revision_of(&self, id: WorkerId) -> Option<&str> {
        self.workers.get(&id.0).map(|s| s.code_revision.as_str())
    }

    /// Spawn a worker for a task in the lowest free slot. `code_revision`
    /// is captured by the caller at spawn time, not at process start, so a
    /// worker always records the code it is actually running.
    pub fn spawn<F, Fut>(&mut self, task: Task, code_revision: String, body: F) -> Result<WorkerId>
    where
        F: FnOnce(WorkerContext) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let id = self
            .lowest_free_id()
            .ok_or_else(|| Error::Internal("no free worker slot".into()))?;
        let cancel = CancellationToken::new();
        let ctx = WorkerContext {
            worker_id: id,
            cancel: cancel.clone(),
            heartbeats: self.heartbeat_tx.clone(),
        };
        let handle = tokio::spawn(body(ctx));
        debug!(worker = %id, task_id = %task.id, revision = %code_revision, "Worker spawned");
        self.workers.insert(
            id.0,
            WorkerSlot {
                task,
                code_revision,
                started: Instant::now(),
                last_heartbeat: Instant::now(),
                cancel,
                handle,
            },
        );
        Ok(id)
    }

    /// Apply all heartbeats received since the last cycle.
    pub fn drain_heartbeats(&mut self) {
        while let Ok(hb) = self.heartbeat_rx.try_recv() {
            if let Some(slot) = self.workers.get_mut(&hb.worker_id.0) {
                slot.last_heartbeat = Instant::now();
            }
        }
    }

    /// Workers whose last heartbeat is older than `stale_after`.
    pub fn stale(&self, stale_after: Duration) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, s)| s.last_heartbeat.elapsed() > stale_after)
            .map(|(&id, _)| WorkerId(id))
            .collect()
    }

    /// Workers running longer than the hard timeout.
    pub fn overrunning(&self, hard_timeout: Duration) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, s)| s.started.elapsed() > hard_timeout)
            .map(|(&id, _)| WorkerId(id))
            .collect()
    }

    pub fn running_secs(&self, id: WorkerId) -> Option<u64> {
        self.workers.get(&id.0).map(|s| s.started.elapsed().as_secs())
    }

    /// Signal every worker to stop. Slots stay occupied until reaped.
    pub fn cancel_all(&self) {
        for slot in self.workers.values() {
            slot.cancel.cancel();
        }
    }

    /// Cancel a worker and wait up to `grace` for it to finish on its own;
    /// after that the task is aborted outright.
    pub async fn terminate(&mut self, id: WorkerId, grace: Duration) -> Option<(Task, WorkerExit<T>)> {
        let mut slot = self.workers.remove(&id.0)?;
        slot.cancel.cancel();

        let joined = match tokio::time::timeout(grace, &mut slot.handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(worker = %id, grace_secs = grace.as_secs(), "Worker ignored cancellation, aborting");
                slot.handle.abort();
                slot.handle.await
            }
        };
        let exit = match joined {
            Ok(output) => WorkerExit::Finished(output),
            Err(e) if e.is_cancelled() => WorkerExit::Crashed("aborted after grace period".into()),
            Err(e) => WorkerExit::Crashed(format!("worker panicked: {e}")),
        };
        Some((slot.task, exit))
    }

    /// Collect workers whose bodies have finished, freeing their slots.
    /// A `Crashed` exit here means the tokio task itself died (panic), not
    /// that the task failed — task-level failure lives in `T`.
    pub async fn reap_finished(&mut self) -> Vec<(WorkerId, Task, WorkerExit<T>)> {
        let finished: Vec<u32> = self
            .workers
            .iter()
            .filter(|(_, s)| s.handle.is_finished())
            .map(|(&id, _)| id)
            .collect();

        let mut reaped = Vec::with_capacity(finished.len());
        for id in finished {
            if let Some(slot) = self.workers.remove(&id) {
                let exit = match slot.handle.await {
                    Ok(output) => WorkerExit::Finished(output),
                    Err(e) if e.is_panic() => {
                        WorkerExit::Crashed(format!("worker panicked: {e}"))
                    }
                    Err(e) => WorkerExit::Crashed(format!("worker aborted: {e}")),
                };
                reaped.push((WorkerId(id), slot.task, exit));
            }
        }
        reaped
    }
}

/// Sliding-window crash counter for detecting crash storms.
pub struct CrashTracker {
    window: Duration,
    threshold: u32,
    crashes: VecDeque<Instant>,
}

impl CrashTracker {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            window,
            threshold,
            crashes: VecDeque::new(),
        }
    }

    /// Record a crash. Returns the number of crashes inside the window if
    /// the threshold has been reached — the storm signal.
    pub fn record(&mut self) -> Option<u32> {
        let now = Instant::now();
        self.crashes.push_back(now);
        while let Some(&front) = self.crashes.front() {
            if now.duration_since(front) > self.window {
                self.crashes.pop_front();
            } else {
                break;
            }
        }
        let count = self.crashes.len() as u32;
        (count >= self.threshold).then_some(count)
    }

    pub fn clear(&mut self) {
        self.crashes.clear();
    }
}

//! The task queue: priority scheduling, duplicate suppression, retry
//! lineage, and a durable snapshot for restart recovery.
//!
//! Ordering is (priority class, sequence): user and review work always
//! runs before self-directed work, FIFO within a class. Retries and
//! recovered in-flight tasks requeue at the *front* of their class using
//! negative sequence numbers, so they run before everything that arrived
//! after them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskforge_config::QueueConfig;
use taskforge_core::backend::{BackendRequest, Message, ReasoningBackend};
use taskforge_core::error::{Error, QueueError, Result};
use taskforge_core::store::DurableStore;
use taskforge_core::task::{Task, TaskId, TaskStatus};
use taskforge_core::worker::WorkerId;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

const SNAPSHOT_KEY: &str = "queue/snapshot.json";

/// Pluggable paraphrase detection over task payloads. Keyword heuristics
/// under-catch paraphrases, so the production check delegates to the
/// reasoning backend; tests script their own.
#[async_trait]
pub trait SimilarityCheck: Send + Sync {
    /// Similarity between two payloads in [0.0, 1.0]. Must never fail:
    /// a check that cannot be performed scores 0.0 so infrastructure
    /// trouble never blocks enqueue.
    async fn similarity(&self, a: &str, b: &str) -> f32;
}

/// Asks the reasoning backend to score how likely two requests describe
/// the same work.
pub struct BackendSimilarity {
    backend: Arc<dyn ReasoningBackend>,
    model: String,
}

impl BackendSimilarity {
    pub fn new(backend: Arc<dyn ReasoningBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
        }
    }
}

#[async_trait]
impl SimilarityCheck for BackendSimilarity {
    async fn similarity(&self, a: &str, b: &str) -> f32 {
        let request = BackendRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(
                    "Rate whether these two task requests describe the same work. \
                     Reply with only a number between 0.0 and 1.0.",
                ),
                Message::user(format!("First request:\n{a}\n\nSecond request:\n{b}")),
            ],
            max_tokens: Some(8),
            tools: Vec::new(),
        };
        // Run on a separate task so a misbehaving backend cannot poison
        // the enqueue path.
        let backend = self.backend.clone();
        let outcome = tokio::spawn(async move { backend.complete(request).await }).await;
        match outcome {
            Ok(Ok(response)) => match response.message.content.trim().parse::<f32>() {
                Ok(score) => score.clamp(0.0, 1.0),
                Err(_) => {
                    warn!("Similarity check returned a non-numeric score, treating as distinct");
                    0.0
                }
            },
            Ok(Err(e)) => {
                warn!(error = %e, "Similarity check failed, treating as distinct");
                0.0
            }
            Err(e) => {
                warn!(error = %e, "Similarity check crashed, treating as distinct");
                0.0
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct QueueSnapshot {
    saved_at: DateTime<Utc>,
    /// Pending tasks in scheduling order.
    pending: Vec<Task>,
    /// Tasks that were running when the snapshot was taken.
    running: Vec<Task>,
}

struct QueueInner {
    /// Scheduling order: (priority class, sequence) → task id.
    pending: BTreeMap<(u8, i64), TaskId>,
    /// Every task this queue has seen, terminal ones included.
    tasks: HashMap<TaskId, Task>,
    seq_of: HashMap<TaskId, (u8, i64)>,
    notifiers: HashMap<TaskId, watch::Sender<TaskStatus>>,
    next_seq: i64,
    /// Decreasing negative sequence for front requeues.
    next_front_seq: i64,
}

impl QueueInner {
    fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            tasks: HashMap::new(),
            seq_of: HashMap::new(),
            notifiers: HashMap::new(),
            next_seq: 0,
            next_front_seq: -1,
        }
    }

    fn insert_pending(&mut self, task: Task, front: bool) {
        let seq = if front {
            let s = self.next_front_seq;
            self.next_front_seq -= 1;
            s
        } else {
            let s = self.next_seq;
            self.next_seq += 1;
            s
        };
        let key = (task.kind.priority_class(), seq);
        self.pending.insert(key, task.id);
        self.seq_of.insert(task.id, key);
        let (tx, _) = watch::channel(task.status);
        self.notifiers.insert(task.id, tx);
        self.tasks.insert(task.id, task);
    }

    fn notify(&self, id: TaskId, status: TaskStatus) {
        if let Some(tx) = self.notifiers.get(&id) {
            let _ = tx.send(status);
        }
    }
}

/// The shared task queue.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    store: Arc<dyn DurableStore>,
    similarity: Box<dyn SimilarityCheck>,
    config: QueueConfig,
}

impl TaskQueue {
    pub fn new(
        store: Arc<dyn DurableStore>,
        config: QueueConfig,
        similarity: Box<dyn SimilarityCheck>,
    ) -> Self {
        Self {
            inner: Mutex::new(QueueInner::new()),
            store,
            similarity,
            config,
        }
    }

    /// Enqueue a task, rejecting duplicates of anything not yet terminal.
    /// An exact payload match is always a duplicate; otherwise payloads at
    /// or above the similarity threshold are treated as duplicates too.
    ///
    /// The similarity checks run against a snapshot of the candidates with
    /// the queue unlocked, so a slow check never stalls dispatch or
    /// completion. Tasks enqueued concurrently are re-screened for exact
    /// matches only.
    pub async fn enqueue(&self, task: Task) -> Result<TaskId> {
        let candidates: Vec<(TaskId, String)> = {
            let inner = self.inner.lock().await;
            inner
                .tasks
                .values()
                .filter(|t| !t.status.is_terminal())
                .map(|t| (t.id, t.payload.clone()))
                .collect()
        };

        for (existing_id, payload) in &candidates {
            if *payload == task.payload {
                return Err(QueueError::Duplicate {
                    existing_id: existing_id.to_string(),
                    reason: "exact payload match".into(),
                }
                .into());
            }
            let score = self.similarity.similarity(payload, &task.payload).await;
            if score >= self.config.similarity_threshold {
                return Err(QueueError::Duplicate {
                    existing_id: existing_id.to_string(),
                    reason: format!("similar to task {existing_id} (score {score:.2})"),
                }
                .into());
            }
        }

        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner
            .tasks
            .values()
            .find(|t| !t.status.is_terminal() && t.payload == task.payload)
        {
            return Err(QueueError::Duplicate {
                existing_id: existing.id.to_string(),
                reason: "exact payload match".into(),
            }
            .into());
        }

        let id = task.id;
        debug!(task_id = %id, kind = %task.kind, "Task enqueued");
        inner.insert_pending(task, false);
        self.persist(&inner).await?;
        Ok(id)
    }

    /// Requeue a task at the front of its priority class. Used for retries
    /// and for in-flight work recovered after a restart.
    pub async fn requeue_front(&self, mut task: Task) -> Result<TaskId> {
        task.status = TaskStatus::Pending;
        task.assigned_worker = None;
        let id = task.id;
        let mut inner = self.inner.lock().await;
        inner.insert_pending(task, true);
        self.persist(&inner).await?;
        Ok(id)
    }

    /// Build and front-requeue the next retry attempt for a failed task.
    pub async fn retry(&self, task: &Task) -> Result<Task> {
        if task.retry_count >= self.config.max_retries {
            return Err(QueueError::RetryLimit {
                task_id: task.id.to_string(),
                retries: task.retry_count,
            }
            .into());
        }
        let attempt = task.retry();
        info!(
            task_id = %attempt.id,
            original = %attempt.original_task_id.unwrap_or(task.id),
            retry_count = attempt.retry_count,
            "Retrying task at front of queue"
        );
        self.requeue_front(attempt.clone()).await?;
        Ok(attempt)
    }

    /// Pop the highest-priority pending task that satisfies the predicate
    /// and hand it to a worker. The task transitions to Running atomically
    /// with its removal from the pending order.
    pub async fn pop_next_where<F>(&self, worker: WorkerId, pred: F) -> Result<Option<Task>>
    where
        F: Fn(&Task) -> bool,
    {
        let mut inner = self.inner.lock().await;

        let picked = inner.pending.iter().find_map(|(&key, &id)| {
            let task = inner.tasks.get(&id)?;
            pred(task).then_some((key, id))
        });
        let Some((key, id)) = picked else {
            return Ok(None);
        };

        inner.pending.remove(&key);
        inner.seq_of.remove(&id);
        let task = {
            let task = inner
                .tasks
                .get_mut(&id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            task.status = TaskStatus::Running;
            task.assigned_worker = Some(worker);
            task.clone()
        };
        inner.notify(id, TaskStatus::Running);
        self.persist(&inner).await?;
        Ok(Some(task))
    }

    /// Close a running task with a terminal status.
    pub async fn complete(
        &self,
        id: TaskId,
        status: TaskStatus,
        result: Option<String>,
    ) -> Result<Task> {
        let mut inner = self.inner.lock().await;
        let task = {
            let task = inner
                .tasks
                .get_mut(&id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            if !task.status.can_transition_to(status) {
                return Err(QueueError::InvalidTransition {
                    from: task.status.to_string(),
                    to: status.to_string(),
                }
                .into());
            }
            task.status = status;
            task.result = result;
            task.assigned_worker = None;
            task.clone()
        };
        inner.notify(id, status);
        self.persist(&inner).await?;
        Ok(task)
    }

    /// Cancel a pending task. Running tasks are cancelled through their
    /// worker's cancellation token and closed via [`complete`].
    ///
    /// [`complete`]: TaskQueue::complete
    pub async fn cancel(&self, id: TaskId) -> Result<Task> {
        let mut inner = self.inner.lock().await;
        let key = inner
            .seq_of
            .remove(&id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        inner.pending.remove(&key);
        let task = {
            let task = inner
                .tasks
                .get_mut(&id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            task.status = TaskStatus::Cancelled;
            task.clone()
        };
        inner.notify(id, TaskStatus::Cancelled);
        self.persist(&inner).await?;
        Ok(task)
    }

    pub async fn get(&self, id: TaskId) -> Option<Task> {
        self.inner.lock().await.tasks.get(&id).cloned()
    }

    /// Watch a task's status changes. None if the task is unknown.
    pub async fn subscribe(&self, id: TaskId) -> Option<watch::Receiver<TaskStatus>> {
        self.inner
            .lock()
            .await
            .notifiers
            .get(&id)
            .map(|tx| tx.subscribe())
    }

    /// Wait until a task reaches a terminal status.
    pub async fn wait_terminal(&self, id: TaskId) -> Result<TaskStatus> {
        let mut rx = self
            .subscribe(id)
            .await
            .ok_or_else(|| Error::from(QueueError::NotFound(id.to_string())))?;
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return Ok(status);
            }
            if rx.changed().await.is_err() {
                // Sender dropped: read the final value directly.
                let status = *rx.borrow();
                return Ok(status);
            }
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Restore queue state from the durable snapshot. Pending tasks return
    /// to the queue in their saved order; tasks that were running when the
    /// snapshot was taken are returned to the caller, which decides whether
    /// to requeue them. A snapshot older than the configured maximum age is
    /// rejected as stale.
    pub async fn restore(&self) -> Result<Vec<Task>> {
        let Some(raw) = self.store.read(SNAPSHOT_KEY).await? else {
            return Ok(Vec::new());
        };
        let snapshot: QueueSnapshot = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Queue snapshot corrupted, starting empty");
                return Ok(Vec::new());
            }
        };

        let age = Utc::now().signed_duration_since(snapshot.saved_at);
        if age.num_seconds() < 0 || age.num_seconds() as u64 > self.config.snapshot_max_age_secs {
            return Err(QueueError::StaleSnapshot(format!(
                "snapshot is {}s old, max {}s",
                age.num_seconds(),
                self.config.snapshot_max_age_secs
            ))
            .into());
        }

        let mut inner = self.inner.lock().await;
        for task in snapshot.pending {
            inner.insert_pending(task, false);
        }
        info!(
            pending = inner.pending.len(),
            interrupted = snapshot.running.len(),
            "Queue restored from snapshot"
        );
        Ok(snapshot.running)
    }

    async fn persist(&self, inner: &QueueInner) -> Result<()> {
        let pending: Vec<Task> = inner
            .pending
            .values()
            .filter_map(|id| inner.tasks.get(id).cloned())
            .collect();
        let running: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .cloned()
            .collect();
        let snapshot = QueueSnapshot {
            saved_at: Utc::now(),
            pending,
            running,
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        self.store.write(SNAPSHOT_KEY, &json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_core::store::FileStore;
    use taskforge_core::task::TaskKind;
    use tempfile::TempDir;

    /// Scores every payload pair with a fixed similarity.
    struct FixedSimilarity(f32);

    #[async_trait]
    impl SimilarityCheck for FixedSimilarity {
        async fn similarity(&self, _a: &str, _b: &str) -> f32 {
            self.0
        }
    }

    fn queue_config() -> QueueConfig {
        QueueConfig {
            max_retries: 1,
            similarity_threshold: 0.85,
            snapshot_max_age_secs: 900,
        }
    }

    fn queue_with(score: f32, config: QueueConfig) -> (TempDir, TaskQueue) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path().to_path_buf()));
        (
            dir,
            TaskQueue::new(store, config, Box::new(FixedSimilarity(score))),
        )
    }

    fn queue() -> (TempDir, TaskQueue) {
        queue_with(0.0, queue_config())
    }

    async fn pop_any(q: &TaskQueue) -> Option<Task> {
        q.pop_next_where(WorkerId(0), |_| true).await.unwrap()
    }

    #[tokio::test]
    async fn user_work_runs_before_self_directed() {
        let (_dir, q) = queue();
        q.enqueue(Task::new(TaskKind::Background, "tidy the logs"))
            .await
            .unwrap();
        q.enqueue(Task::new(TaskKind::Evolution, "improve the parser"))
            .await
            .unwrap();
        q.enqueue(Task::new(TaskKind::User, "answer the question"))
            .await
            .unwrap();

        assert_eq!(pop_any(&q).await.unwrap().kind, TaskKind::User);
        assert_eq!(pop_any(&q).await.unwrap().kind, TaskKind::Evolution);
        assert_eq!(pop_any(&q).await.unwrap().kind, TaskKind::Background);
        assert!(pop_any(&q).await.is_none());
    }

    #[tokio::test]
    async fn fifo_within_a_class() {
        let (_dir, q) = queue();
        let first = q
            .enqueue(Task::new(TaskKind::User, "first question"))
            .await
            .unwrap();
        let second = q
            .enqueue(Task::new(TaskKind::User, "second question"))
            .await
            .unwrap();

        assert_eq!(pop_any(&q).await.unwrap().id, first);
        assert_eq!(pop_any(&q).await.unwrap().id, second);
    }

    #[tokio::test]
    async fn exact_duplicate_rejected() {
        let (_dir, q) = queue();
        q.enqueue(Task::new(TaskKind::User, "run the tests"))
            .await
            .unwrap();
        let err = q
            .enqueue(Task::new(TaskKind::Evolution, "run the tests"))
            .await
            .unwrap_err();
        match err {
            Error::Queue(QueueError::Duplicate { reason, .. }) => {
                assert_eq!(reason, "exact payload match");
            }
            other => panic!("Expected Duplicate, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn paraphrase_rejected_at_threshold() {
        let (_dir, q) = queue_with(0.92, queue_config());
        q.enqueue(Task::new(TaskKind::User, "review the login module"))
            .await
            .unwrap();

        let err = q
            .enqueue(Task::new(
                TaskKind::User,
                "please check the login module code",
            ))
            .await
            .unwrap_err();
        match err {
            Error::Queue(QueueError::Duplicate { reason, .. }) => {
                assert!(reason.contains("0.92"), "unexpected reason: {reason}");
            }
            other => panic!("Expected Duplicate, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn distinct_work_accepted_below_threshold() {
        let (_dir, q) = queue_with(0.40, queue_config());
        q.enqueue(Task::new(TaskKind::User, "review the login module"))
            .await
            .unwrap();
        q.enqueue(Task::new(TaskKind::User, "write release notes"))
            .await
            .unwrap();
        assert_eq!(q.pending_count().await, 2);
    }

    /// Signals when a check begins and blocks until released.
    struct BlockingSimilarity {
        entered: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl SimilarityCheck for BlockingSimilarity {
        async fn similarity(&self, _a: &str, _b: &str) -> f32 {
            self.entered.notify_one();
            self.release.notified().await;
            0.0
        }
    }

    #[tokio::test]
    async fn queue_stays_responsive_during_similarity_check() {
        let entered = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path().to_path_buf()));
        let q = Arc::new(TaskQueue::new(
            store,
            queue_config(),
            Box::new(BlockingSimilarity {
                entered: entered.clone(),
                release: release.clone(),
            }),
        ));

        let first = q
            .enqueue(Task::new(TaskKind::User, "index the repository"))
            .await
            .unwrap();

        // Second enqueue parks inside its similarity check against the
        // first task.
        let enqueue = {
            let q = q.clone();
            tokio::spawn(async move { q.enqueue(Task::new(TaskKind::User, "summarize the repository")).await })
        };
        entered.notified().await;

        // Dispatch must not be blocked by the in-flight check.
        let picked = tokio::time::timeout(std::time::Duration::from_secs(1), pop_any(&q))
            .await
            .expect("pop stalled behind a similarity check")
            .unwrap();
        assert_eq!(picked.id, first);

        release.notify_one();
        enqueue.await.unwrap().unwrap();
        assert_eq!(q.pending_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_of_terminal_task_is_allowed() {
        let (_dir, q) = queue();
        let id = q
            .enqueue(Task::new(TaskKind::User, "run the tests"))
            .await
            .unwrap();
        pop_any(&q).await.unwrap();
        q.complete(id, TaskStatus::Completed, Some("passed".into()))
            .await
            .unwrap();

        // Re-running the same request later is legitimate.
        q.enqueue(Task::new(TaskKind::User, "run the tests"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn front_requeue_preempts_class_fifo() {
        let (_dir, q) = queue();
        q.enqueue(Task::new(TaskKind::User, "older user task"))
            .await
            .unwrap();
        let recovered = Task::new(TaskKind::User, "interrupted task");
        let recovered_id = q.requeue_front(recovered).await.unwrap();

        assert_eq!(pop_any(&q).await.unwrap().id, recovered_id);
    }

    #[tokio::test]
    async fn retry_respects_limit_and_links_lineage() {
        let (_dir, q) = queue();
        let mut task = Task::new(TaskKind::Evolution, "flaky work");
        task.status = TaskStatus::Running;
        let original_id = task.id;

        let attempt = q.retry(&task).await.unwrap();
        assert_eq!(attempt.original_task_id, Some(original_id));
        assert_eq!(attempt.retry_count, 1);

        // max_retries = 1: no second retry.
        let err = q.retry(&attempt).await.unwrap_err();
        assert!(matches!(err, Error::Queue(QueueError::RetryLimit { .. })));
    }

    #[tokio::test]
    async fn cancel_pending_task() {
        let (_dir, q) = queue();
        let id = q
            .enqueue(Task::new(TaskKind::Background, "optional cleanup"))
            .await
            .unwrap();
        let cancelled = q.cancel(id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert!(pop_any(&q).await.is_none());
    }

    #[tokio::test]
    async fn invalid_transition_rejected() {
        let (_dir, q) = queue();
        let id = q
            .enqueue(Task::new(TaskKind::User, "some work"))
            .await
            .unwrap();
        // Pending → Completed without running first.
        let err = q
            .complete(id, TaskStatus::Completed, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Queue(QueueError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn predicate_skips_blocked_kinds() {
        let (_dir, q) = queue();
        q.enqueue(Task::new(TaskKind::Evolution, "self-directed work"))
            .await
            .unwrap();
        q.enqueue(Task::new(TaskKind::User, "user work"))
            .await
            .unwrap();

        // Self-directed dispatch is blocked: the user task is picked even
        // though evolution is also pending.
        let picked = q
            .pop_next_where(WorkerId(1), |t| !t.kind.is_self_directed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.kind, TaskKind::User);
        assert_eq!(picked.assigned_worker, Some(WorkerId(1)));
        assert_eq!(q.pending_count().await, 1);
    }

    #[tokio::test]
    async fn wait_terminal_observes_completion() {
        let (_dir, q) = queue();
        let q = Arc::new(q);
        let id = q
            .enqueue(Task::new(TaskKind::User, "watched work"))
            .await
            .unwrap();

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.wait_terminal(id).await })
        };

        pop_any(&q).await.unwrap();
        q.complete(id, TaskStatus::Completed, Some("done".into()))
            .await
            .unwrap();

        let status = waiter.await.unwrap().unwrap();
        assert_eq!(status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn snapshot_restores_pending_order_and_reports_interrupted() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path().to_path_buf()));

        let interrupted_payload;
        {
            let q = TaskQueue::new(store.clone(), queue_config(), Box::new(FixedSimilarity(0.0)));
            q.enqueue(Task::new(TaskKind::Evolution, "queued improvement"))
                .await
                .unwrap();
            q.enqueue(Task::new(TaskKind::User, "queued question"))
                .await
                .unwrap();
            let running = q
                .pop_next_where(WorkerId(0), |t| t.kind == TaskKind::User)
                .await
                .unwrap()
                .unwrap();
            interrupted_payload = running.payload.clone();
        }

        let q = TaskQueue::new(store, queue_config(), Box::new(FixedSimilarity(0.0)));
        let interrupted = q.restore().await.unwrap();
        assert_eq!(interrupted.len(), 1);
        assert_eq!(interrupted[0].payload, interrupted_payload);
        assert_eq!(q.pending_count().await, 1);
        assert_eq!(pop_any(&q).await.unwrap().payload, "queued improvement");
    }

    #[tokio::test]
    async fn stale_snapshot_rejected() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path().to_path_buf()));
        {
            let q = TaskQueue::new(store.clone(), queue_config(), Box::new(FixedSimilarity(0.0)));
            q.enqueue(Task::new(TaskKind::User, "old work")).await.unwrap();
        }

        let mut config = queue_config();
        config.snapshot_max_age_secs = 0;
        // Any nonzero age now exceeds the limit.
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let q = TaskQueue::new(store, config, Box::new(FixedSimilarity(0.0)));
        let err = q.restore().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Queue(QueueError::StaleSnapshot(_))
        ));
    }
}

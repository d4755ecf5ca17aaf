//! The supervisor: the control loop that ties the queue, the worker pool,
//! the ledger, and the event log together.
//!
//! Each cycle drains heartbeats, reaps finished workers, terminates hung
//! ones, and dispatches pending tasks into free slots. Dispatch is gated
//! per task kind: budget headroom, the self-directed circuit breaker, and
//! the operator flags all apply before a task is handed to a worker. The
//! code revision a worker runs is captured live at spawn time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskforge_agent::{CircuitBreaker, ExecutionLoop, FallbackBackend, OutcomeStatus, TaskOutcome};
use taskforge_config::OrchestratorConfig;
use taskforge_context::{AssembledPrompt, ContextAssembler, ContextSection};
use taskforge_core::backend::ReasoningBackend;
use taskforge_core::channel::Notifier;
use taskforge_core::error::{Error, QueueError, Result};
use taskforge_core::event::{Event, EventBus, EventKind, Severity};
use taskforge_core::store::DurableStore;
use taskforge_core::task::{Task, TaskId, TaskKind, TaskStatus};
use taskforge_core::tool::ToolRegistry;
use taskforge_core::vcs::VersionControl;
use taskforge_core::worker::{Heartbeat, WorkerId};
use taskforge_ledger::{BudgetLedger, BudgetSnapshot, DriftReport};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::eventlog::{DiagnosticsState, EventDispatcher, EventLog};
use crate::pool::{CrashTracker, WorkerExit, WorkerPool};
use crate::queue::{BackendSimilarity, TaskQueue};

const SYSTEM_INSTRUCTIONS: &str = "You are a task execution agent. Work the task \
to completion using the available tools, then reply with a final summary of \
what was done. Prefer small verifiable steps over sweeping changes.";

const PAYLOAD_PREVIEW_CHARS: usize = 80;

/// A point-in-time view of the whole system for the status surface.
#[derive(Debug)]
pub struct StatusReport {
    pub active_workers: Vec<WorkerId>,
    pub pending_tasks: usize,
    pub budget: BudgetSnapshot,
    pub breaker_open: bool,
    pub emergency_stopped: bool,
    pub diagnostics: DiagnosticsState,
}

/// Per-kind dispatch permissions computed once per cycle.
struct DispatchGates {
    user: bool,
    evolution: bool,
    background: bool,
}

impl DispatchGates {
    fn allows(&self, kind: TaskKind) -> bool {
        match kind {
            TaskKind::User | TaskKind::Review => self.user,
            TaskKind::Evolution => self.evolution,
            TaskKind::Background => self.background,
        }
    }
}

pub struct Supervisor {
    config: OrchestratorConfig,
    queue: Arc<TaskQueue>,
    pool: Mutex<WorkerPool<TaskOutcome>>,
    ledger: Arc<BudgetLedger>,
    runner: Arc<ExecutionLoop>,
    log: Arc<EventLog>,
    dispatcher: Arc<EventDispatcher>,
    bus: Arc<EventBus>,
    vcs: Arc<dyn VersionControl>,
    notifier: Arc<dyn Notifier>,
    assembler: ContextAssembler,
    crash_tracker: Mutex<CrashTracker>,
    breaker: CircuitBreaker,
    emergency_stopped: AtomicBool,
    self_directed_enabled: AtomicBool,
    background_enabled: AtomicBool,
    last_heartbeat_event: Mutex<Instant>,
}

impl Supervisor {
    pub async fn new(
        config: OrchestratorConfig,
        store: Arc<dyn DurableStore>,
        backend: Arc<dyn ReasoningBackend>,
        tools: Arc<ToolRegistry>,
        vcs: Arc<dyn VersionControl>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let bus = Arc::new(EventBus::new(config.events.bus_capacity));
        let ledger = Arc::new(
            BudgetLedger::open(store.clone(), config.budget.clone(), bus.clone()).await?,
        );
        // Every backend call goes through the fallback chain: empty or
        // failed responses from the primary escalate to the configured
        // fallback models in order.
        let chain: Arc<dyn ReasoningBackend> = Arc::new(FallbackBackend::with_models(
            backend,
            &config.execution.model,
            &config.execution.fallback_models,
            Duration::from_secs(config.execution.backend_timeout_secs),
        ));
        let queue = Arc::new(TaskQueue::new(
            store.clone(),
            config.queue.clone(),
            Box::new(BackendSimilarity::new(
                chain.clone(),
                config.execution.model.clone(),
            )),
        ));
        let log = Arc::new(EventLog::open(store, bus.clone()).await?);
        let runner = Arc::new(ExecutionLoop::new(
            chain,
            tools,
            ledger.clone(),
            bus.clone(),
            config.execution.clone(),
            Arc::new(Mutex::new(())),
        ));

        Ok(Self {
            pool: Mutex::new(WorkerPool::new(config.workers.count)),
            crash_tracker: Mutex::new(CrashTracker::new(
                config.workers.crash_storm_threshold,
                Duration::from_secs(config.workers.crash_storm_window_secs),
            )),
            breaker: CircuitBreaker::new(config.execution.breaker_threshold),
            assembler: ContextAssembler::from_config(&config.context),
            dispatcher: Arc::new(EventDispatcher::with_default_handlers()),
            emergency_stopped: AtomicBool::new(false),
            self_directed_enabled: AtomicBool::new(true),
            background_enabled: AtomicBool::new(true),
            last_heartbeat_event: Mutex::new(Instant::now()),
            config,
            queue,
            ledger,
            runner,
            log,
            bus,
            vcs,
            notifier,
        })
    }

    /// Rebuild in-memory state after a restart: replay the durable event
    /// log through the diagnostics handlers, restore the queue snapshot,
    /// and requeue work that was running when the process died. Returns
    /// the number of interrupted tasks requeued.
    pub async fn recover(&self) -> Result<usize> {
        for event in self.log.replay().await? {
            self.dispatcher.dispatch(&event);
        }

        let interrupted = match self.queue.restore().await {
            Ok(tasks) => tasks,
            Err(Error::Queue(QueueError::StaleSnapshot(msg))) => {
                warn!(%msg, "Discarding stale queue snapshot");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        let count = interrupted.len();
        for task in interrupted {
            info!(task_id = %task.id, "Requeuing task interrupted by restart");
            self.queue.requeue_front(task).await?;
        }
        Ok(count)
    }

    /// Run the control loop until the shutdown token fires. Cycle errors
    /// are logged, not fatal: one bad cycle must not take the system down.
    pub async fn run(&self, shutdown: CancellationToken) {
        let poll = Duration::from_secs(self.config.workers.poll_interval_secs);
        info!(workers = self.config.workers.count, "Supervisor running");
        loop {
            if let Err(e) = self.cycle().await {
                warn!(error = %e, "Supervisor cycle failed");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll) => {}
            }
        }
        self.pool.lock().await.cancel_all();
        info!("Supervisor stopped");
    }

    /// One pass of the control loop.
    pub async fn cycle(&self) -> Result<()> {
        let cycle_started = Instant::now();
        let mut pool = self.pool.lock().await;

        pool.drain_heartbeats();

        for (worker_id, task, exit) in pool.reap_finished().await {
            match exit {
                WorkerExit::Finished(outcome) => self.handle_outcome(task, outcome).await?,
                WorkerExit::Crashed(reason) => self.handle_crash(worker_id, task, reason).await?,
            }
        }

        self.terminate_hung_workers(&mut pool).await?;

        if !self.emergency_stopped.load(Ordering::SeqCst) {
            let user_active = pool
                .active_ids()
                .iter()
                .any(|&id| pool.task_of(id).is_some_and(|t| !t.kind.is_self_directed()));
            let mut gates = self.dispatch_gates(user_active).await?;
            while pool.has_capacity() {
                let Some(worker_id) = pool.lowest_free_id() else {
                    break;
                };
                let Some(task) = self
                    .queue
                    .pop_next_where(worker_id, |t| gates.allows(t.kind))
                    .await?
                else {
                    break;
                };
                if !task.kind.is_self_directed() {
                    gates.background = false;
                }
                self.spawn_worker(&mut pool, task).await?;
            }
        }

        self.maybe_emit_heartbeat(&pool).await?;
        drop(pool);

        let elapsed_ms = cycle_started.elapsed().as_millis() as u64;
        if elapsed_ms > self.config.events.slow_cycle_ms {
            warn!(elapsed_ms, "Slow supervisor cycle");
            self.record(
                Event::new(EventKind::SlowCycle {
                    duration_ms: elapsed_ms,
                    limit_ms: self.config.events.slow_cycle_ms,
                })
                .with_severity(Severity::Warning),
            )
            .await?;
        }
        Ok(())
    }

    /// Enqueue a new task and record its arrival. Self-directed intake is
    /// refused outright while the circuit breaker is open or the mode is
    /// disabled; user work is always accepted.
    pub async fn submit(&self, kind: TaskKind, payload: impl Into<String>) -> Result<TaskId> {
        if kind.is_self_directed() && !self.self_directed_intake_open() {
            return Err(QueueError::SelfDirectedHalted(
                "circuit breaker open or self-directed mode disabled".into(),
            )
            .into());
        }
        let task = Task::new(kind, payload);
        let preview: String = task.payload.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
        let id = self.queue.enqueue(task).await?;
        self.record(
            Event::new(EventKind::TaskEnqueued {
                kind,
                payload_preview: preview,
            })
            .for_task(id),
        )
        .await?;
        Ok(id)
    }

    /// Enqueue a review of a previously completed task. The review is a
    /// child of the reviewed task and runs at user priority.
    pub async fn request_review(&self, of: TaskId, instructions: &str) -> Result<TaskId> {
        let parent = self
            .queue
            .get(of)
            .await
            .ok_or_else(|| Error::Queue(QueueError::NotFound(of.to_string())))?;
        let review = parent.child(
            TaskKind::Review,
            format!(
                "Review the result of task {of}.\n\nOriginal request:\n{}\n\nResult:\n{}\n\n{instructions}",
                parent.payload,
                parent.result.as_deref().unwrap_or("(no result recorded)"),
            ),
        );
        let preview: String = review.payload.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
        let id = self.queue.enqueue(review).await?;
        self.record(
            Event::new(EventKind::TaskEnqueued {
                kind: TaskKind::Review,
                payload_preview: preview,
            })
            .for_task(id),
        )
        .await?;
        Ok(id)
    }

    /// Wait until a task reaches a terminal status, up to `timeout`.
    pub async fn wait_for(&self, id: TaskId, timeout: Duration) -> Result<TaskStatus> {
        tokio::time::timeout(timeout, self.queue.wait_terminal(id))
            .await
            .map_err(|_| {
                Error::Internal(format!(
                    "task {id} not terminal after {}s",
                    timeout.as_secs()
                ))
            })?
    }

    pub async fn task(&self, id: TaskId) -> Option<Task> {
        self.queue.get(id).await
    }

    /// Cancel a task. Pending tasks leave the queue directly; running tasks
    /// have their worker stopped first. A deliberate cancel is not a crash:
    /// it never retries and never feeds the crash window. Terminal tasks are
    /// returned as-is.
    pub async fn cancel(&self, id: TaskId) -> Result<TaskStatus> {
        let task = self
            .queue
            .get(id)
            .await
            .ok_or_else(|| Error::Queue(QueueError::NotFound(id.to_string())))?;
        if task.status.is_terminal() {
            return Ok(task.status);
        }

        if task.status == TaskStatus::Pending {
            self.queue.cancel(id).await?;
            info!(task_id = %id, "Pending task cancelled");
            self.record(Event::new(EventKind::TaskCancelled).for_task(id))
                .await?;
            return Ok(TaskStatus::Cancelled);
        }

        let grace = Duration::from_secs(self.config.workers.grace_secs);
        let mut pool = self.pool.lock().await;
        let worker = pool
            .active_ids()
            .into_iter()
            .find(|&w| pool.task_of(w).is_some_and(|t| t.id == id));
        let exit = match worker {
            Some(w) => pool.terminate(w, grace).await.map(|(_, exit)| exit),
            None => None,
        };
        drop(pool);

        match exit {
            // The worker finished real work during the grace period: the
            // result still counts.
            Some(WorkerExit::Finished(outcome))
                if matches!(outcome.status, OutcomeStatus::Completed) =>
            {
                self.handle_outcome(task, outcome).await?;
                Ok(TaskStatus::Completed)
            }
            _ => {
                self.queue.complete(id, TaskStatus::Cancelled, None).await?;
                info!(task_id = %id, "Running task cancelled");
                self.record(Event::new(EventKind::TaskCancelled).for_task(id))
                    .await?;
                Ok(TaskStatus::Cancelled)
            }
        }
    }

    /// Cancel everything in flight and refuse all dispatch until a soft
    /// restart. The flag survives cycles, not process restarts.
    pub async fn emergency_stop(&self, reason: &str) -> Result<()> {
        error!(reason, "EMERGENCY STOP");
        self.emergency_stopped.store(true, Ordering::SeqCst);
        self.pool.lock().await.cancel_all();
        self.record(
            Event::new(EventKind::EmergencyStop {
                reason: reason.to_string(),
            })
            .with_severity(Severity::Critical),
        )
        .await?;
        self.notify(&format!("EMERGENCY STOP: {reason}")).await;
        Ok(())
    }

    /// Kill the current workers and clear the emergency flag, the circuit
    /// breaker, and the crash window. Queue and ledger state is already
    /// durable; interrupted tasks fail and retry through the normal path.
    pub async fn soft_restart(&self) {
        self.pool.lock().await.cancel_all();
        self.emergency_stopped.store(false, Ordering::SeqCst);
        self.breaker.reset();
        self.crash_tracker.lock().await.clear();
        info!("Soft restart: dispatch re-enabled");
    }

    fn self_directed_intake_open(&self) -> bool {
        self.self_directed_enabled.load(Ordering::SeqCst) && !self.breaker.is_open()
    }

    pub fn set_self_directed_enabled(&self, enabled: bool) {
        self.self_directed_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_background_enabled(&self, enabled: bool) {
        self.background_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Check tracked spend against an authoritative external total.
    pub async fn reconcile(&self, authoritative_usd: f64) -> Result<Option<DriftReport>> {
        let report = self.ledger.reconcile(authoritative_usd).await?;
        if let Some(r) = &report {
            self.notify(&format!(
                "Budget drift: tracked ${:.2}, authoritative ${:.2}",
                r.tracked_usd, r.authoritative_usd
            ))
            .await;
        }
        Ok(report)
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let pool = self.pool.lock().await;
        Ok(StatusReport {
            active_workers: pool.active_ids(),
            pending_tasks: self.queue.pending_count().await,
            budget: self.ledger.snapshot().await?,
            breaker_open: self.breaker.is_open(),
            emergency_stopped: self.emergency_stopped.load(Ordering::SeqCst),
            diagnostics: self.dispatcher.state(),
        })
    }

    async fn handle_outcome(&self, task: Task, outcome: TaskOutcome) -> Result<()> {
        match outcome.status {
            OutcomeStatus::Completed => {
                info!(task_id = %task.id, rounds = outcome.rounds, "Task completed");
                self.queue
                    .complete(task.id, TaskStatus::Completed, Some(outcome.text.clone()))
                    .await?;
                self.record(
                    Event::new(EventKind::TaskCompleted {
                        kind: task.kind,
                        rounds: outcome.rounds,
                        spent_usd: outcome.spent_usd,
                    })
                    .for_task(task.id),
                )
                .await?;
                if task.kind.is_self_directed() {
                    self.breaker.record_success();
                }
            }
            OutcomeStatus::Cancelled => {
                self.queue
                    .complete(task.id, TaskStatus::Cancelled, None)
                    .await?;
                self.record(Event::new(EventKind::TaskCancelled).for_task(task.id))
                    .await?;
            }
            OutcomeStatus::Failed { ref reason } => {
                // Zero-round failures are API trouble, not evidence about
                // the task, and never feed the breaker.
                if task.kind.is_self_directed()
                    && !outcome.is_zero_round_failure()
                    && self.breaker.record_failure()
                {
                    self.notify(&format!(
                        "Circuit breaker opened after {} consecutive self-directed failures; \
                         self-directed dispatch halted",
                        self.config.execution.breaker_threshold
                    ))
                    .await;
                }
                self.fail_and_maybe_retry(&task, outcome.rounds, reason.clone())
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_crash(&self, worker_id: WorkerId, task: Task, reason: String) -> Result<()> {
        error!(worker = %worker_id, task_id = %task.id, reason, "Worker crashed");
        self.record(
            Event::new(EventKind::WorkerCrashed {
                worker_id,
                reason: reason.clone(),
            })
            .for_task(task.id)
            .with_severity(Severity::Critical),
        )
        .await?;

        let storm = self.crash_tracker.lock().await.record();
        if let Some(crashes) = storm {
            self.fall_back_to_stable(crashes).await?;
        }

        self.fail_and_maybe_retry(&task, 0, format!("worker crashed: {reason}"))
            .await
    }

    /// Crash storm response: check out the last known-good revision so the
    /// next workers run code that is known to hold up.
    async fn fall_back_to_stable(&self, crashes: u32) -> Result<()> {
        let revision = match self.vcs.stable_revision().await {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "Crash storm: stable revision unavailable");
                return Ok(());
            }
        };
        if let Err(e) = self.vcs.checkout(&revision).await {
            error!(error = %e, revision, "Crash storm: checkout failed");
            return Ok(());
        }
        self.crash_tracker.lock().await.clear();
        error!(crashes, revision, "Crash storm: fell back to stable revision");
        self.record(
            Event::new(EventKind::CrashStorm {
                crashes,
                window_secs: self.config.workers.crash_storm_window_secs,
                fallback_revision: revision.clone(),
            })
            .with_severity(Severity::Critical),
        )
        .await?;
        self.notify(&format!(
            "Crash storm ({crashes} crashes): fell back to stable revision {revision}"
        ))
        .await;
        Ok(())
    }

    async fn fail_and_maybe_retry(&self, task: &Task, rounds: u32, reason: String) -> Result<()> {
        self.queue
            .complete(task.id, TaskStatus::Failed, Some(reason.clone()))
            .await?;
        self.record(
            Event::new(EventKind::TaskFailed {
                kind: task.kind,
                rounds,
                reason,
            })
            .for_task(task.id)
            .with_severity(Severity::Warning),
        )
        .await?;

        match self.queue.retry(task).await {
            Ok(attempt) => {
                self.record(
                    Event::new(EventKind::TaskRetried {
                        original_task_id: attempt.original_task_id.unwrap_or(task.id),
                        retry_count: attempt.retry_count,
                    })
                    .for_task(attempt.id),
                )
                .await?;
            }
            Err(Error::Queue(QueueError::RetryLimit { .. })) => {
                info!(task_id = %task.id, "Retry limit reached, task stays failed");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn terminate_hung_workers(&self, pool: &mut WorkerPool<TaskOutcome>) -> Result<()> {
        let stale_after = Duration::from_secs(self.config.workers.heartbeat_stale_secs);
        let hard_timeout = Duration::from_secs(self.config.workers.hard_timeout_secs);
        let grace = Duration::from_secs(self.config.workers.grace_secs);

        let mut hung = pool.overrunning(hard_timeout);
        for id in pool.stale(stale_after) {
            if !hung.contains(&id) {
                hung.push(id);
            }
        }

        for id in hung {
            let running_secs = pool.running_secs(id).unwrap_or(0);
            let Some((task, exit)) = pool.terminate(id, grace).await else {
                continue;
            };
            warn!(worker = %id, task_id = %task.id, running_secs, "Terminated hung worker");
            self.record(
                Event::new(EventKind::WorkerTimedOut {
                    worker_id: id,
                    running_secs,
                })
                .for_task(task.id)
                .with_severity(Severity::Warning),
            )
            .await?;
            match exit {
                // Finished during the grace period: the outcome still counts.
                WorkerExit::Finished(outcome) => self.handle_outcome(task, outcome).await?,
                WorkerExit::Crashed(_) => {
                    self.fail_and_maybe_retry(
                        &task,
                        0,
                        format!("hard timeout after {running_secs}s"),
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// The background stream yields to user work: it pauses whenever a
    /// user-originated task is running.
    async fn dispatch_gates(&self, user_active: bool) -> Result<DispatchGates> {
        let user = self.ledger.can_start(TaskKind::User).await?;
        let self_directed_open =
            self.self_directed_enabled.load(Ordering::SeqCst) && !self.breaker.is_open();
        let evolution =
            self_directed_open && self.ledger.can_start(TaskKind::Evolution).await?;
        let background = self_directed_open
            && !user_active
            && self.background_enabled.load(Ordering::SeqCst)
            && self.ledger.can_start(TaskKind::Background).await?;
        Ok(DispatchGates {
            user,
            evolution,
            background,
        })
    }

    async fn spawn_worker(&self, pool: &mut WorkerPool<TaskOutcome>, task: Task) -> Result<()> {
        // Captured live so mid-session code changes are observed.
        let code_revision = match self.vcs.head_revision().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Head revision unavailable, recording as unknown");
                "unknown".to_string()
            }
        };
        let prompt = self.assemble_prompt().await?;
        let runner = self.runner.clone();
        let body_task = task.clone();
        let heartbeat_every =
            Duration::from_secs((self.config.workers.heartbeat_stale_secs / 4).max(1));

        let worker_id = pool.spawn(task.clone(), code_revision.clone(), move |ctx| async move {
            let ticker = tokio::spawn(heartbeat_ticker(
                ctx.heartbeats.clone(),
                ctx.worker_id,
                body_task.id,
                ctx.cancel.clone(),
                heartbeat_every,
            ));
            let result = runner.run(&body_task, &prompt, &ctx.cancel).await;
            ticker.abort();
            result.unwrap_or_else(|e| TaskOutcome {
                status: OutcomeStatus::Failed {
                    reason: e.to_string(),
                },
                text: String::new(),
                rounds: 0,
                spent_usd: 0.0,
                records: Vec::new(),
            })
        })?;

        self.record(
            Event::new(EventKind::WorkerSpawned {
                worker_id,
                code_revision,
            })
            .for_task(task.id),
        )
        .await?;
        self.record(Event::new(EventKind::TaskStarted { worker_id }).for_task(task.id))
            .await?;
        Ok(())
    }

    async fn assemble_prompt(&self) -> Result<AssembledPrompt> {
        let budget_line = self.ledger.report_line().await?;
        let diag = self.dispatcher.state();
        let sections = [
            ContextSection::fixed("instructions", SYSTEM_INSTRUCTIONS),
            ContextSection::semi_stable("budget", format!("Session budget: {budget_line}"), 1),
            ContextSection::dynamic(
                "recent activity",
                format!(
                    "{} tasks completed, {} failed so far this session.",
                    diag.tasks_completed, diag.tasks_failed
                ),
                10,
            ),
        ];
        self.assembler
            .assemble(&sections)
            .map_err(|e| Error::Internal(e.to_string()))
    }

    async fn maybe_emit_heartbeat(&self, pool: &WorkerPool<TaskOutcome>) -> Result<()> {
        let interval = Duration::from_secs(self.config.events.heartbeat_interval_secs);
        let mut last = self.last_heartbeat_event.lock().await;
        if last.elapsed() < interval {
            return Ok(());
        }
        *last = Instant::now();
        drop(last);
        self.record(Event::new(EventKind::SupervisorHeartbeat {
            active_workers: pool.active_count(),
            pending_tasks: self.queue.pending_count().await,
        }))
        .await
    }

    /// Append to the durable log and feed the diagnostics handlers. The
    /// log publishes to the live bus itself.
    async fn record(&self, event: Event) -> Result<()> {
        let event = self.log.append(event).await?;
        self.dispatcher.dispatch(&event);
        Ok(())
    }

    /// Notification delivery is best-effort: failures are logged, never
    /// propagated.
    async fn notify(&self, text: &str) {
        if let Err(e) = self.notifier.notify(text).await {
            warn!(error = %e, "Notification delivery failed");
        }
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }
}

async fn heartbeat_ticker(
    tx: mpsc::Sender<Heartbeat>,
    worker_id: WorkerId,
    task_id: TaskId,
    cancel: CancellationToken,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if tx.send(Heartbeat::new(worker_id, Some(task_id))).await.is_err() {
                    break;
                }
            }
        }
    }
}

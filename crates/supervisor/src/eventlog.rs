//! Durable event log and the diagnostics dispatcher.
//!
//! Events are appended as one JSON object per line; the log is the
//! authoritative record for post-restart recovery, while the in-process
//! bus serves live subscribers. Sequence numbers are assigned at append
//! time and continue from wherever the existing log left off.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use taskforge_core::error::Result;
use taskforge_core::event::{Event, EventBus, EventKind};
use taskforge_core::store::DurableStore;
use tracing::{debug, warn};

const LOG_KEY: &str = "events/log.jsonl";

/// Append-only durable event log.
pub struct EventLog {
    store: Arc<dyn DurableStore>,
    bus: Arc<EventBus>,
    next_seq: AtomicU64,
}

impl EventLog {
    /// Open the log, continuing sequence numbers after the last durable
    /// event. Corrupted lines are skipped, not fatal.
    pub async fn open(store: Arc<dyn DurableStore>, bus: Arc<EventBus>) -> Result<Self> {
        let mut last_seq = 0u64;
        for line in store.read_lines(LOG_KEY).await? {
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => last_seq = last_seq.max(event.seq),
                Err(e) => warn!(error = %e, "Skipping corrupted event log line"),
            }
        }
        Ok(Self {
            store,
            bus,
            next_seq: AtomicU64::new(last_seq + 1),
        })
    }

    /// Assign the next sequence number, persist the event, and publish it
    /// to live subscribers.
    pub async fn append(&self, mut event: Event) -> Result<Event> {
        event.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&event)?;
        self.store.append_line(LOG_KEY, &line).await?;
        self.bus.publish(event.clone());
        Ok(event)
    }

    /// Read back every durable event in append order. Corrupted lines are
    /// skipped with a warning.
    pub async fn replay(&self) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for line in self.store.read_lines(LOG_KEY).await? {
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(error = %e, "Skipping corrupted event log line"),
            }
        }
        Ok(events)
    }
}

/// Aggregate view maintained by the dispatcher's handlers.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsState {
    /// Events seen per kind name.
    pub counts: HashMap<String, u64>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    /// Consecutive self-directed failures with at least one completed
    /// round. Zero-round failures are API trouble and never counted.
    pub consecutive_self_directed_failures: u32,
    pub slow_cycles: u64,
    pub crashes: u64,
    pub spent_seen_usd: f64,
}

type Handler = Box<dyn Fn(&Event, &mut DiagnosticsState) + Send + Sync>;

/// Table-driven event processing: one handler per event kind name.
/// Unknown kinds are logged and skipped; a panicking handler is isolated
/// so it cannot take the supervisor down.
pub struct EventDispatcher {
    handlers: HashMap<&'static str, Handler>,
    state: std::sync::Mutex<DiagnosticsState>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            state: std::sync::Mutex::new(DiagnosticsState::default()),
        }
    }

    /// A dispatcher with the standard diagnostics handlers installed.
    pub fn with_default_handlers() -> Self {
        let mut dispatcher = Self::new();

        dispatcher.register("task_completed", |event, state| {
            state.tasks_completed += 1;
            if let EventKind::TaskCompleted { kind, .. } = &event.kind
                && kind.is_self_directed()
            {
                state.consecutive_self_directed_failures = 0;
            }
        });
        dispatcher.register("task_failed", |event, state| {
            state.tasks_failed += 1;
            if let EventKind::TaskFailed { kind, rounds, .. } = &event.kind
                && kind.is_self_directed()
                && *rounds > 0
            {
                state.consecutive_self_directed_failures += 1;
            }
        });
        dispatcher.register("worker_crashed", |_event, state| {
            state.crashes += 1;
        });
        dispatcher.register("slow_cycle", |_event, state| {
            state.slow_cycles += 1;
        });
        dispatcher.register("budget_committed", |event, state| {
            if let EventKind::BudgetCommitted { amount_usd, .. } = &event.kind {
                state.spent_seen_usd += amount_usd;
            }
        });

        dispatcher
    }

    pub fn register<F>(&mut self, name: &'static str, handler: F)
    where
        F: Fn(&Event, &mut DiagnosticsState) + Send + Sync + 'static,
    {
        self.handlers.insert(name, Box::new(handler));
    }

    /// Route one event through its handler. Every event is counted even
    /// when no handler is registered for its kind.
    pub fn dispatch(&self, event: &Event) {
        let name = event.kind.name();
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *state.counts.entry(name.to_string()).or_insert(0) += 1;

        let Some(handler) = self.handlers.get(name) else {
            debug!(kind = name, "No handler registered for event kind");
            return;
        };
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            handler(event, &mut state);
        }));
        if outcome.is_err() {
            warn!(kind = name, "Event handler panicked, event skipped");
        }
    }

    pub fn state(&self) -> DiagnosticsState {
        match self.state.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskforge_core::event::Severity;
    use taskforge_core::store::FileStore;
    use taskforge_core::task::TaskKind;
    use tempfile::TempDir;

    async fn open_log() -> (TempDir, Arc<FileStore>, EventLog) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path().to_path_buf()));
        let bus = Arc::new(EventBus::new(64));
        let log = EventLog::open(store.clone(), bus).await.unwrap();
        (dir, store, log)
    }

    fn completed(kind: TaskKind) -> Event {
        Event::new(EventKind::TaskCompleted {
            kind,
            rounds: 3,
            spent_usd: 0.05,
        })
    }

    fn failed(kind: TaskKind, rounds: u32) -> Event {
        Event::new(EventKind::TaskFailed {
            kind,
            rounds,
            reason: "went sideways".into(),
        })
    }

    #[tokio::test]
    async fn sequence_is_monotonic_and_survives_reopen() {
        let (_dir, store, log) = open_log().await;
        let first = log.append(completed(TaskKind::User)).await.unwrap();
        let second = log.append(failed(TaskKind::User, 2)).await.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);

        let bus = Arc::new(EventBus::new(64));
        let reopened = EventLog::open(store, bus).await.unwrap();
        let third = reopened.append(completed(TaskKind::User)).await.unwrap();
        assert_eq!(third.seq, 3);

        let replayed = reopened.replay().await.unwrap();
        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed[2].seq, 3);
    }

    #[tokio::test]
    async fn append_publishes_to_bus() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(dir.path().to_path_buf()));
        let bus = Arc::new(EventBus::new(64));
        let mut rx = bus.subscribe();
        let log = EventLog::open(store, bus).await.unwrap();

        log.append(completed(TaskKind::Review)).await.unwrap();
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.kind.name(), "task_completed");
        assert_eq!(seen.seq, 1);
    }

    #[tokio::test]
    async fn corrupted_lines_skipped_on_replay() {
        let (_dir, store, log) = open_log().await;
        log.append(completed(TaskKind::User)).await.unwrap();
        store
            .append_line("events/log.jsonl", "{broken json")
            .await
            .unwrap();
        log.append(failed(TaskKind::User, 1)).await.unwrap();

        let replayed = log.replay().await.unwrap();
        assert_eq!(replayed.len(), 2);
    }

    #[test]
    fn failure_streak_skips_zero_round_failures() {
        let dispatcher = EventDispatcher::with_default_handlers();

        dispatcher.dispatch(&failed(TaskKind::Evolution, 4));
        dispatcher.dispatch(&failed(TaskKind::Evolution, 0)); // API failure
        dispatcher.dispatch(&failed(TaskKind::Evolution, 2));
        assert_eq!(dispatcher.state().consecutive_self_directed_failures, 2);
        assert_eq!(dispatcher.state().tasks_failed, 3);

        // A self-directed success resets the streak.
        dispatcher.dispatch(&completed(TaskKind::Background));
        assert_eq!(dispatcher.state().consecutive_self_directed_failures, 0);
    }

    #[test]
    fn user_failures_do_not_feed_the_streak() {
        let dispatcher = EventDispatcher::with_default_handlers();
        dispatcher.dispatch(&failed(TaskKind::User, 5));
        dispatcher.dispatch(&failed(TaskKind::Review, 5));
        assert_eq!(dispatcher.state().consecutive_self_directed_failures, 0);
    }

    #[test]
    fn unknown_kind_counted_but_not_handled() {
        let dispatcher = EventDispatcher::new();
        dispatcher.dispatch(
            &Event::new(EventKind::EmergencyStop {
                reason: "test".into(),
            })
            .with_severity(Severity::Critical),
        );
        assert_eq!(dispatcher.state().counts["emergency_stop"], 1);
    }

    #[test]
    fn panicking_handler_is_isolated() {
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register("task_cancelled", |_, _| panic!("handler bug"));
        dispatcher.dispatch(&Event::new(EventKind::TaskCancelled));
        // Still usable afterwards.
        dispatcher.dispatch(&Event::new(EventKind::TaskCancelled));
        assert_eq!(dispatcher.state().counts["task_cancelled"], 2);
    }
}

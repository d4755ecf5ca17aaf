//! The budget ledger: durable, single-writer spend accounting.
//!
//! Every mutation runs inside a named store lock held across the whole
//! load-modify-write, so concurrent supervisor and worker processes can
//! never interleave updates. Reads go through the same atomic-rename
//! snapshot the writes produce, so they need no lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskforge_core::error::{LedgerError, StoreError};
use taskforge_core::event::{Event, EventBus, EventKind, Severity};
use taskforge_core::store::DurableStore;
use taskforge_core::task::TaskKind;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{
    ActualUsage, AlertLevel, BudgetSnapshot, BudgetState, DriftReport, PendingReservation,
    Reservation,
};
use taskforge_config::BudgetConfig;

const STATE_KEY: &str = "budget/state.json";
const BACKUP_KEY: &str = "budget/state.last_good.json";
const LOCK_NAME: &str = "budget";

/// Durable budget accounting shared by the supervisor and all workers.
pub struct BudgetLedger {
    store: Arc<dyn DurableStore>,
    config: BudgetConfig,
    bus: Arc<EventBus>,
    /// Spend recorded before this session started, the baseline for drift
    /// reconciliation against an authoritative external total.
    session_start_spent: f64,
    level: Mutex<AlertLevel>,
}

impl BudgetLedger {
    /// Open (or initialize) the ledger. The budget total always comes from
    /// configuration so an operator can raise it between sessions.
    pub async fn open(
        store: Arc<dyn DurableStore>,
        config: BudgetConfig,
        bus: Arc<EventBus>,
    ) -> Result<Self, LedgerError> {
        let timeout = Duration::from_secs(config.lock_timeout_secs);
        let _guard = store
            .acquire_lock(LOCK_NAME, timeout)
            .await
            .map_err(map_store_err)?;

        let mut state = load_state(store.as_ref(), config.total_usd).await?;
        state.total_usd = config.total_usd;
        save_state(store.as_ref(), &mut state).await?;

        let session_start_spent = state.spent_usd;
        let level = level_for(&config, state.pct_used());
        info!(
            spent_usd = state.spent_usd,
            total_usd = state.total_usd,
            "Budget ledger opened"
        );

        Ok(Self {
            store,
            config,
            bus,
            session_start_spent,
            level: Mutex::new(level),
        })
    }

    /// Set aside an estimated amount before a task runs. Fails when the
    /// estimate would push committed + pending spend past the limit for the
    /// task's kind.
    pub async fn reserve(
        &self,
        kind: TaskKind,
        estimate_usd: f64,
    ) -> Result<Reservation, LedgerError> {
        let _guard = self.lock().await?;
        let mut state = load_state(self.store.as_ref(), self.config.total_usd).await?;

        check_headroom(&self.config, &state, kind, estimate_usd)?;

        let reservation = Reservation {
            id: Uuid::new_v4(),
            amount_usd: estimate_usd,
            kind,
        };
        state.pending.insert(
            reservation.id,
            PendingReservation {
                amount_usd: estimate_usd,
                kind,
            },
        );
        save_state(self.store.as_ref(), &mut state).await?;
        Ok(reservation)
    }

    /// Replace a reservation's estimate with what the task actually spent.
    /// Partial spend from cancelled tasks is committed the same way: money
    /// already sent to the backend is gone either way.
    pub async fn commit(
        &self,
        reservation: &Reservation,
        usage: &ActualUsage,
    ) -> Result<BudgetSnapshot, LedgerError> {
        let state = {
            let _guard = self.lock().await?;
            let mut state = load_state(self.store.as_ref(), self.config.total_usd).await?;

            let pending = state
                .pending
                .remove(&reservation.id)
                .ok_or_else(|| LedgerError::UnknownReservation(reservation.id.to_string()))?;

            state.spent_usd += usage.cost_usd;
            if pending.kind == TaskKind::Background {
                state.spent_background_usd += usage.cost_usd;
            }
            state.calls += usage.calls;
            state.prompt_tokens += usage.prompt_tokens;
            state.completion_tokens += usage.completion_tokens;
            save_state(self.store.as_ref(), &mut state).await?;
            state
        };

        self.bus.publish(Event::new(EventKind::BudgetCommitted {
            amount_usd: usage.cost_usd,
            total_spent_usd: state.spent_usd,
        }));
        self.publish_threshold_transition(state.pct_used()).await;

        Ok(self.snapshot_of(&state))
    }

    /// Whether a new task of this kind may start, using the standard
    /// per-task reserve as the estimate. Never mutates the ledger.
    pub async fn can_start(&self, kind: TaskKind) -> Result<bool, LedgerError> {
        let state = load_state(self.store.as_ref(), self.config.total_usd).await?;
        Ok(check_headroom(&self.config, &state, kind, self.config.task_reserve_usd).is_ok())
    }

    /// A read-only view of the ledger. Lock-free: reads observe the last
    /// atomically renamed state file.
    pub async fn snapshot(&self) -> Result<BudgetSnapshot, LedgerError> {
        let state = load_state(self.store.as_ref(), self.config.total_usd).await?;
        Ok(self.snapshot_of(&state))
    }

    /// Compare this session's tracked spend against an authoritative
    /// external total. Divergence past the alert threshold is reported and
    /// published, but never fatal: the tracked number stays authoritative
    /// for enforcement.
    pub async fn reconcile(
        &self,
        authoritative_usd: f64,
    ) -> Result<Option<DriftReport>, LedgerError> {
        let state = load_state(self.store.as_ref(), self.config.total_usd).await?;
        let tracked_usd = state.spent_usd - self.session_start_spent;
        let divergence_usd = (authoritative_usd - tracked_usd).abs();

        if divergence_usd <= self.config.drift_alert_usd {
            return Ok(None);
        }

        warn!(
            tracked_usd,
            authoritative_usd, divergence_usd, "Budget drift detected"
        );
        self.bus.publish(
            Event::new(EventKind::BudgetDrift {
                tracked_usd,
                authoritative_usd,
            })
            .with_severity(Severity::Warning),
        );
        Ok(Some(DriftReport {
            tracked_usd,
            authoritative_usd,
            divergence_usd,
        }))
    }

    /// The standard per-task reservation amount.
    pub fn task_reserve_usd(&self) -> f64 {
        self.config.task_reserve_usd
    }

    /// Current alert level as of the last commit.
    pub async fn alert_level(&self) -> AlertLevel {
        *self.level.lock().await
    }

    /// One-line spend report for status output.
    pub async fn report_line(&self) -> Result<String, LedgerError> {
        Ok(self.snapshot().await?.report_line())
    }

    async fn lock(&self) -> Result<taskforge_core::store::StoreLock, LedgerError> {
        let timeout = Duration::from_secs(self.config.lock_timeout_secs);
        self.store
            .acquire_lock(LOCK_NAME, timeout)
            .await
            .map_err(map_store_err)
    }

    fn snapshot_of(&self, state: &BudgetState) -> BudgetSnapshot {
        let pending_usd = state.pending_total();
        BudgetSnapshot {
            total_usd: state.total_usd,
            spent_usd: state.spent_usd,
            pending_usd,
            remaining_usd: (state.total_usd - state.spent_usd - pending_usd).max(0.0),
            pct_used: state.pct_used(),
            calls: state.calls,
            prompt_tokens: state.prompt_tokens,
            completion_tokens: state.completion_tokens,
            level: level_for(&self.config, state.pct_used()),
        }
    }

    /// Publish a threshold event when the alert level escalates. Each level
    /// fires once per escalation, not on every commit inside the band.
    async fn publish_threshold_transition(&self, pct_used: f64) {
        let new_level = level_for(&self.config, pct_used);
        let mut current = self.level.lock().await;
        if new_level <= *current {
            return;
        }
        *current = new_level;

        let severity = match new_level {
            AlertLevel::Warning => Severity::Warning,
            _ => Severity::Critical,
        };
        warn!(level = %new_level, pct_used = pct_used * 100.0, "Budget threshold crossed");
        self.bus.publish(
            Event::new(EventKind::BudgetThreshold {
                level: new_level.to_string(),
                pct_used,
            })
            .with_severity(severity),
        );
    }
}

fn level_for(config: &BudgetConfig, pct_used: f64) -> AlertLevel {
    if pct_used >= config.emergency_pct {
        AlertLevel::Emergency
    } else if pct_used >= config.critical_pct {
        AlertLevel::Critical
    } else if pct_used >= config.warning_pct {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

/// Reject a reservation that would overshoot the limit for this task kind.
/// Self-directed work stops short of the full budget so user requests always
/// have headroom; background work additionally fits under its own sub-cap.
fn check_headroom(
    config: &BudgetConfig,
    state: &BudgetState,
    kind: TaskKind,
    estimate_usd: f64,
) -> Result<(), LedgerError> {
    let committed = state.spent_usd + state.pending_total();
    let limit = if kind.is_self_directed() {
        state.total_usd * config.self_directed_ceiling_pct
    } else {
        state.total_usd
    };
    if committed + estimate_usd > limit + 1e-9 {
        return Err(LedgerError::Exhausted {
            requested: estimate_usd,
            remaining: (limit - committed).max(0.0),
        });
    }

    if kind == TaskKind::Background {
        let bg_pending: f64 = state
            .pending
            .values()
            .filter(|p| p.kind == TaskKind::Background)
            .map(|p| p.amount_usd)
            .sum();
        let bg_committed = state.spent_background_usd + bg_pending;
        let bg_limit = state.total_usd * config.background_cap_pct;
        if bg_committed + estimate_usd > bg_limit + 1e-9 {
            return Err(LedgerError::Exhausted {
                requested: estimate_usd,
                remaining: (bg_limit - bg_committed).max(0.0),
            });
        }
    }
    Ok(())
}

fn map_store_err(e: StoreError) -> LedgerError {
    match e {
        StoreError::LockTimeout { waited_secs, .. } => LedgerError::LockTimeout { waited_secs },
        other => LedgerError::Storage(other.to_string()),
    }
}

async fn load_state(store: &dyn DurableStore, total_usd: f64) -> Result<BudgetState, LedgerError> {
    let raw = store
        .read(STATE_KEY)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
    let Some(raw) = raw else {
        return Ok(BudgetState::new(total_usd));
    };

    match serde_json::from_str(&raw) {
        Ok(state) => Ok(state),
        Err(e) => {
            // Fall back to the last known-good copy rather than losing
            // the spend history to one corrupt write.
            warn!(error = %e, "Budget state corrupted, loading last-good copy");
            let backup = store
                .read(BACKUP_KEY)
                .await
                .map_err(|e| LedgerError::Storage(e.to_string()))?
                .ok_or_else(|| LedgerError::Storage(format!("state corrupted, no backup: {e}")))?;
            serde_json::from_str(&backup).map_err(|e| LedgerError::Storage(e.to_string()))
        }
    }
}

async fn save_state(store: &dyn DurableStore, state: &mut BudgetState) -> Result<(), LedgerError> {
    state.updated_at = Utc::now();
    let json =
        serde_json::to_string_pretty(state).map_err(|e| LedgerError::Storage(e.to_string()))?;
    store
        .write(STATE_KEY, &json)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
    store
        .write(BACKUP_KEY, &json)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
    Ok(())
}

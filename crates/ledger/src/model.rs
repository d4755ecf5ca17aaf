//! Data model for budget accounting: persisted state, reservations,
//! snapshots, and alert levels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskforge_core::task::TaskKind;
use uuid::Uuid;

/// Escalating budget alert level, derived from the spent fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        };
        write!(f, "{s}")
    }
}

/// A slice of budget set aside for a task before it runs. Committing the
/// reservation replaces the estimate with the actual spend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub amount_usd: f64,
    pub kind: TaskKind,
}

/// What a task actually consumed, reported at commit time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActualUsage {
    pub cost_usd: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub calls: u64,
}

/// A pending reservation as persisted inside the ledger record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingReservation {
    pub amount_usd: f64,
    pub kind: TaskKind,
}

/// The durable ledger record. Mutated only inside the single-writer
/// critical section and written back atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetState {
    pub total_usd: f64,
    pub spent_usd: f64,
    /// Spend attributed to background work, for the sub-cap.
    pub spent_background_usd: f64,
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub pending: HashMap<Uuid, PendingReservation>,
    pub updated_at: DateTime<Utc>,
}

impl BudgetState {
    pub fn new(total_usd: f64) -> Self {
        Self {
            total_usd,
            spent_usd: 0.0,
            spent_background_usd: 0.0,
            calls: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            pending: HashMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn pending_total(&self) -> f64 {
        self.pending.values().map(|p| p.amount_usd).sum()
    }

    pub fn pct_used(&self) -> f64 {
        if self.total_usd <= 0.0 {
            return 1.0;
        }
        self.spent_usd / self.total_usd
    }
}

/// A read-only view of the ledger at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub total_usd: f64,
    pub spent_usd: f64,
    pub pending_usd: f64,
    pub remaining_usd: f64,
    pub pct_used: f64,
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub level: AlertLevel,
}

impl BudgetSnapshot {
    /// One-line budget report for the status surface.
    pub fn report_line(&self) -> String {
        format!(
            "${:.2} / ${:.2} ({:.1}%)",
            self.spent_usd,
            self.total_usd,
            self.pct_used * 100.0
        )
    }
}

/// Result of comparing tracked spend against an authoritative external total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub tracked_usd: f64,
    pub authoritative_usd: f64,
    pub divergence_usd: f64,
}

//! Configuration loading, validation, and management for Taskforge.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Backend API key (never printed; redacted in Debug output)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Directory for all durable state (ledger, queue snapshots, event log)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Task queue and scheduling settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Worker pool settings
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Budget ledger settings
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Execution loop settings
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Context assembly settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Event log and diagnostics settings
    #[serde(default)]
    pub events: EventConfig,
}

fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".taskforge")
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("api_key", &redact(&self.api_key))
            .field("data_dir", &self.data_dir)
            .field("queue", &self.queue)
            .field("workers", &self.workers)
            .field("budget", &self.budget)
            .field("execution", &self.execution)
            .field("context", &self.context)
            .field("events", &self.events)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum retries per task lineage.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Similarity score at or above which a new task is a duplicate.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// A persisted queue snapshot older than this is discarded at boot.
    #[serde(default = "default_snapshot_max_age_secs")]
    pub snapshot_max_age_secs: u64,
}

fn default_max_retries() -> u32 {
    1
}
fn default_similarity_threshold() -> f32 {
    0.85
}
fn default_snapshot_max_age_secs() -> u64 {
    900
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            similarity_threshold: default_similarity_threshold(),
            snapshot_max_age_secs: default_snapshot_max_age_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of worker slots.
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// A worker silent for this long is declared dead.
    #[serde(default = "default_heartbeat_stale_secs")]
    pub heartbeat_stale_secs: u64,

    /// Hard wall-clock limit for a single task.
    #[serde(default = "default_hard_timeout_secs")]
    pub hard_timeout_secs: u64,

    /// Grace period between cancellation and forced abort.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Supervisor poll interval.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Crashes within the window that trigger the stable-revision fallback.
    #[serde(default = "default_crash_storm_threshold")]
    pub crash_storm_threshold: u32,

    /// Crash-storm detection window.
    #[serde(default = "default_crash_storm_window_secs")]
    pub crash_storm_window_secs: u64,
}

fn default_worker_count() -> usize {
    2
}
fn default_heartbeat_stale_secs() -> u64 {
    120
}
fn default_hard_timeout_secs() -> u64 {
    900
}
fn default_grace_secs() -> u64 {
    10
}
fn default_poll_interval_secs() -> u64 {
    20
}
fn default_crash_storm_threshold() -> u32 {
    3
}
fn default_crash_storm_window_secs() -> u64 {
    60
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            heartbeat_stale_secs: default_heartbeat_stale_secs(),
            hard_timeout_secs: default_hard_timeout_secs(),
            grace_secs: default_grace_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            crash_storm_threshold: default_crash_storm_threshold(),
            crash_storm_window_secs: default_crash_storm_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Total session budget in USD.
    #[serde(default = "default_total_usd")]
    pub total_usd: f64,

    /// Per-task reservation in USD.
    #[serde(default = "default_task_reserve_usd")]
    pub task_reserve_usd: f64,

    /// Alert threshold fractions of the total budget.
    #[serde(default = "default_warning_pct")]
    pub warning_pct: f64,
    #[serde(default = "default_critical_pct")]
    pub critical_pct: f64,
    #[serde(default = "default_emergency_pct")]
    pub emergency_pct: f64,

    /// Fraction of the total at which self-directed work halts.
    /// User work continues to the full budget.
    #[serde(default = "default_self_directed_ceiling_pct")]
    pub self_directed_ceiling_pct: f64,

    /// Background work may never consume more than this fraction of total.
    #[serde(default = "default_background_cap_pct")]
    pub background_cap_pct: f64,

    /// Bounded wait for the ledger's single-writer lock.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Absolute divergence (USD) that raises a drift alert.
    #[serde(default = "default_drift_alert_usd")]
    pub drift_alert_usd: f64,
}

fn default_total_usd() -> f64 {
    10.0
}
fn default_task_reserve_usd() -> f64 {
    0.50
}
fn default_warning_pct() -> f64 {
    0.50
}
fn default_critical_pct() -> f64 {
    0.75
}
fn default_emergency_pct() -> f64 {
    0.90
}
fn default_self_directed_ceiling_pct() -> f64 {
    0.95
}
fn default_background_cap_pct() -> f64 {
    0.35
}
fn default_lock_timeout_secs() -> u64 {
    4
}
fn default_drift_alert_usd() -> f64 {
    1.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            total_usd: default_total_usd(),
            task_reserve_usd: default_task_reserve_usd(),
            warning_pct: default_warning_pct(),
            critical_pct: default_critical_pct(),
            emergency_pct: default_emergency_pct(),
            self_directed_ceiling_pct: default_self_directed_ceiling_pct(),
            background_cap_pct: default_background_cap_pct(),
            lock_timeout_secs: default_lock_timeout_secs(),
            drift_alert_usd: default_drift_alert_usd(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Primary model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Ordered fallback models tried when the primary returns nothing.
    #[serde(default)]
    pub fallback_models: Vec<String>,

    /// Maximum reasoning rounds per task.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Upper bound on any single tool call. Tools may declare tighter
    /// timeouts, never looser ones.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Per-backend request timeout in the fallback chain.
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,

    /// Tool results longer than this are truncated before entering context.
    #[serde(default = "default_result_max_chars")]
    pub result_max_chars: usize,

    /// A checkpoint note is injected every N rounds.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,

    /// Consecutive real failures that open the self-directed circuit breaker.
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
}

fn default_model() -> String {
    "primary-large".into()
}
fn default_max_rounds() -> u32 {
    40
}
fn default_tool_timeout_secs() -> u64 {
    120
}
fn default_backend_timeout_secs() -> u64 {
    120
}
fn default_result_max_chars() -> usize {
    15_000
}
fn default_checkpoint_interval() -> u32 {
    8
}
fn default_breaker_threshold() -> u32 {
    3
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            fallback_models: vec![],
            max_rounds: default_max_rounds(),
            tool_timeout_secs: default_tool_timeout_secs(),
            backend_timeout_secs: default_backend_timeout_secs(),
            result_max_chars: default_result_max_chars(),
            checkpoint_interval: default_checkpoint_interval(),
            breaker_threshold: default_breaker_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Total token budget for an assembled prompt.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Soft cap for the semi-stable tier under pressure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semi_stable_max_tokens: Option<usize>,
}

fn default_token_budget() -> usize {
    16_384
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            semi_stable_max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Interval between supervisor heartbeat events.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// A supervisor cycle longer than this emits a slow-cycle event.
    #[serde(default = "default_slow_cycle_ms")]
    pub slow_cycle_ms: u64,

    /// Event bus channel capacity.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_heartbeat_interval_secs() -> u64 {
    300
}
fn default_slow_cycle_ms() -> u64 {
    2_000
}
fn default_bus_capacity() -> usize {
    256
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            slow_cycle_ms: default_slow_cycle_ms(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from the default path (`$TASKFORGE_CONFIG` or
    /// `~/.taskforge/config.toml`), then apply environment overrides:
    /// - `TASKFORGE_API_KEY`
    /// - `TASKFORGE_DATA_DIR`
    /// - `TASKFORGE_MODEL`
    /// - `TASKFORGE_BUDGET_USD`
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("TASKFORGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir().join("config.toml"));
        let mut config = Self::load_from(&path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("TASKFORGE_API_KEY").ok();
        }
        if let Ok(dir) = std::env::var("TASKFORGE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(model) = std::env::var("TASKFORGE_MODEL") {
            config.execution.model = model;
        }
        if let Ok(total) = std::env::var("TASKFORGE_BUDGET_USD")
            && let Ok(parsed) = total.parse::<f64>()
        {
            config.budget.total_usd = parsed;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.count == 0 {
            return Err(ConfigError::ValidationError(
                "workers.count must be at least 1".into(),
            ));
        }
        if self.budget.total_usd <= 0.0 {
            return Err(ConfigError::ValidationError(
                "budget.total_usd must be positive".into(),
            ));
        }
        for (name, pct) in [
            ("warning_pct", self.budget.warning_pct),
            ("critical_pct", self.budget.critical_pct),
            ("emergency_pct", self.budget.emergency_pct),
            (
                "self_directed_ceiling_pct",
                self.budget.self_directed_ceiling_pct,
            ),
            ("background_cap_pct", self.budget.background_cap_pct),
        ] {
            if !(0.0..=1.0).contains(&pct) {
                return Err(ConfigError::ValidationError(format!(
                    "budget.{name} must be between 0.0 and 1.0"
                )));
            }
        }
        if !(self.budget.warning_pct <= self.budget.critical_pct
            && self.budget.critical_pct <= self.budget.emergency_pct)
        {
            return Err(ConfigError::ValidationError(
                "budget thresholds must be ordered warning <= critical <= emergency".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.queue.similarity_threshold) {
            return Err(ConfigError::ValidationError(
                "queue.similarity_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if self.execution.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "execution.max_rounds must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            data_dir: default_data_dir(),
            queue: QueueConfig::default(),
            workers: WorkerConfig::default(),
            budget: BudgetConfig::default(),
            execution: ExecutionConfig::default(),
            context: ContextConfig::default(),
            events: EventConfig::default(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

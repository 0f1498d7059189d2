use crate::error::ValidationError;
use crate::state::Vitals;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Shortest allowed delay between an action and its observed outcome.
pub const RESOLUTION_WINDOW_MIN: u64 = 3;
/// Longest allowed delay between an action and its observed outcome.
pub const RESOLUTION_WINDOW_MAX: u64 = 10;
/// Pending actions older than this are dropped without a record.
pub const ACTION_TIMEOUT_TICKS: u64 = 20;
/// Default per-call cap on any adaptive parameter change.
pub const MAX_DELTA: f64 = 0.01;
/// Default noise floor below which a learning step is not applied.
pub const MIN_DELTA: f64 = 0.001;
/// Default size of the active memory.
pub const MEMORY_CAPACITY: usize = 50;
/// Default size of the adaptation history ring.
pub const HISTORY_CAPACITY: usize = 50;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimaConfig {
    pub scheduler: SchedulerConfig,
    pub memory: MemoryConfig,
    pub feedback: FeedbackConfig,
    pub learning: LearningConfig,
    pub adaptation: AdaptationConfig,
    pub vitals: VitalsConfig,
    pub persistence: PersistenceConfig,
}

impl AnimaConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied and the result is validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: AnimaConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Try to load from path; if the file is missing or invalid, return
    /// defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({:#}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                if let Err(e) = cfg.validate() {
                    tracing::warn!("Environment overrides rejected ({}), using plain defaults", e);
                    return Self::default();
                }
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ANIMA_TICK_INTERVAL_MS") {
            if let Ok(n) = v.parse() {
                self.scheduler.tick_interval_ms = n;
            }
        }
        if let Ok(v) = std::env::var("ANIMA_SNAPSHOT_INTERVAL") {
            if let Ok(n) = v.parse() {
                self.scheduler.snapshot_interval = n;
            }
        }
        if let Ok(v) = std::env::var("ANIMA_MEMORY_CAP") {
            if let Ok(n) = v.parse() {
                self.memory.capacity = n;
            }
        }
        if let Ok(v) = std::env::var("ANIMA_DATA_DIR") {
            self.persistence.data_dir = PathBuf::from(v);
        }
    }

    /// Check cross-field constraints the engines rely on.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        self.scheduler.validate()?;
        self.memory.validate()?;
        self.feedback.validate()?;
        self.learning.validate()?;
        self.adaptation.validate()?;
        self.vitals.validate()?;
        Ok(())
    }
}

fn config_err(msg: impl Into<String>) -> ValidationError {
    ValidationError::Config(msg.into())
}

fn check_delta_bounds(section: &str, min_delta: f64, max_delta: f64) -> std::result::Result<(), ValidationError> {
    if !(max_delta.is_finite() && max_delta > 0.0 && max_delta <= 1.0) {
        return Err(config_err(format!("{section}.max_delta must be in (0, 1]")));
    }
    if !(min_delta.is_finite() && min_delta >= 0.0 && min_delta <= max_delta) {
        return Err(config_err(format!("{section}.min_delta must be in [0, max_delta]")));
    }
    Ok(())
}

// ============================================================================
// Sub-configs
// ============================================================================

/// Tick timing and the tick multiples at which each subsystem runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    pub decay_interval: u64,
    pub archive_interval: u64,
    pub learning_interval: u64,
    /// Must be greater than `learning_interval`.
    pub adaptation_interval: u64,
    pub snapshot_interval: u64,
    /// Stimuli with significance at or below this are not remembered.
    pub significance_threshold: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 100,
            decay_interval: 10,
            archive_interval: 50,
            learning_interval: 20,
            adaptation_interval: 60,
            snapshot_interval: 100,
            significance_threshold: 0.0,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.tick_interval_ms == 0 {
            return Err(config_err("scheduler.tick_interval_ms must be at least 1"));
        }
        let intervals = [
            ("decay_interval", self.decay_interval),
            ("archive_interval", self.archive_interval),
            ("learning_interval", self.learning_interval),
            ("adaptation_interval", self.adaptation_interval),
            ("snapshot_interval", self.snapshot_interval),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(config_err(format!("scheduler.{name} must be at least 1")));
            }
        }
        if self.adaptation_interval <= self.learning_interval {
            return Err(config_err(
                "scheduler.adaptation_interval must be greater than scheduler.learning_interval",
            ));
        }
        if !(0.0..1.0).contains(&self.significance_threshold) {
            return Err(config_err("scheduler.significance_threshold must be in [0, 1)"));
        }
        Ok(())
    }
}

/// Active memory sizing, decay and archival criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub capacity: usize,
    /// Weight assigned to a freshly recorded entry.
    pub initial_weight: f64,
    pub decay_factor: f64,
    /// Decay never takes a weight below this.
    pub min_weight: f64,
    /// On overflow, entries below this weight are evicted first.
    pub eviction_floor: f64,
    /// Base number of entries returned by recall.
    pub recall_k: usize,
    pub archive_max_age_secs: Option<u64>,
    pub archive_min_weight: Option<f64>,
    pub archive_min_significance: Option<f64>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: MEMORY_CAPACITY,
            initial_weight: 1.0,
            decay_factor: 0.98,
            min_weight: 0.01,
            eviction_floor: 0.05,
            recall_k: 5,
            archive_max_age_secs: Some(7 * 86_400),
            archive_min_weight: Some(0.05),
            archive_min_significance: None,
        }
    }
}

impl MemoryConfig {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.capacity == 0 {
            return Err(config_err("memory.capacity must be at least 1"));
        }
        if !(self.decay_factor > 0.0 && self.decay_factor <= 1.0) {
            return Err(config_err("memory.decay_factor must be in (0, 1]"));
        }
        if !(self.min_weight >= 0.0 && self.min_weight <= self.initial_weight) {
            return Err(config_err("memory.min_weight must be in [0, initial_weight]"));
        }
        if !(self.initial_weight > 0.0 && self.initial_weight <= 1.0) {
            return Err(config_err("memory.initial_weight must be in (0, 1]"));
        }
        if !self.eviction_floor.is_finite() || self.eviction_floor < 0.0 {
            return Err(config_err("memory.eviction_floor must be non-negative"));
        }
        if self.recall_k == 0 {
            return Err(config_err("memory.recall_k must be at least 1"));
        }
        Ok(())
    }
}

/// Delayed feedback correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub min_window: u64,
    pub max_window: u64,
    pub timeout_ticks: u64,
    /// Deltas whose largest component is below this are treated as noise.
    pub epsilon: f64,
    /// Seed for window sampling. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            min_window: RESOLUTION_WINDOW_MIN,
            max_window: RESOLUTION_WINDOW_MAX,
            timeout_ticks: ACTION_TIMEOUT_TICKS,
            epsilon: 0.05,
            seed: None,
        }
    }
}

impl FeedbackConfig {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        for window in [self.min_window, self.max_window] {
            if !(RESOLUTION_WINDOW_MIN..=RESOLUTION_WINDOW_MAX).contains(&window) {
                return Err(ValidationError::ResolutionWindow {
                    window,
                    min: RESOLUTION_WINDOW_MIN,
                    max: RESOLUTION_WINDOW_MAX,
                });
            }
        }
        if self.min_window > self.max_window {
            return Err(config_err("feedback.min_window must not exceed feedback.max_window"));
        }
        if self.timeout_ticks < self.max_window {
            return Err(config_err("feedback.timeout_ticks must be at least feedback.max_window"));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(config_err("feedback.epsilon must be positive"));
        }
        Ok(())
    }
}

/// Statistical nudging of the learning parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub max_delta: f64,
    pub min_delta: f64,
    /// Frequency above which a value moves toward 1.
    pub high_frequency: f64,
    /// Frequency below which a value moves toward 0.
    pub low_frequency: f64,
    pub high_significance: f64,
    pub low_significance: f64,
    /// Fewer memory entries than this and the run is skipped.
    pub min_samples: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            max_delta: MAX_DELTA,
            min_delta: MIN_DELTA,
            high_frequency: 0.3,
            low_frequency: 0.05,
            high_significance: 0.7,
            low_significance: 0.3,
            min_samples: 5,
        }
    }
}

impl LearningConfig {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        check_delta_bounds("learning", self.min_delta, self.max_delta)?;
        if !(0.0 <= self.low_frequency && self.low_frequency < self.high_frequency && self.high_frequency <= 1.0) {
            return Err(config_err("learning frequency thresholds must satisfy 0 <= low < high <= 1"));
        }
        if !(0.0 <= self.low_significance
            && self.low_significance < self.high_significance
            && self.high_significance <= 1.0)
        {
            return Err(config_err("learning significance thresholds must satisfy 0 <= low < high <= 1"));
        }
        Ok(())
    }
}

/// Slow convergence of the adaptation parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptationConfig {
    pub max_delta: f64,
    pub history_capacity: usize,
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            max_delta: MAX_DELTA,
            history_capacity: HISTORY_CAPACITY,
        }
    }
}

impl AdaptationConfig {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        check_delta_bounds("adaptation", 0.0, self.max_delta)?;
        if self.history_capacity == 0 {
            return Err(config_err("adaptation.history_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Starting vitals and the weakness penalty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalsConfig {
    pub initial: Vitals,
    /// Energy below this triggers the weakness penalty.
    pub weakness_threshold: f64,
    /// Integrity lost per tick at zero energy (scaled by the deficit).
    pub weakness_integrity_penalty: f64,
    /// Stability lost per tick at zero energy (scaled by the deficit).
    pub weakness_stability_penalty: f64,
}

impl Default for VitalsConfig {
    fn default() -> Self {
        Self {
            initial: Vitals::default(),
            weakness_threshold: 20.0,
            weakness_integrity_penalty: 0.5,
            weakness_stability_penalty: 0.3,
        }
    }
}

impl VitalsConfig {
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        self.initial.validate()?;
        if !(self.weakness_threshold.is_finite() && self.weakness_threshold >= 0.0) {
            return Err(config_err("vitals.weakness_threshold must be non-negative"));
        }
        for (name, value) in [
            ("weakness_integrity_penalty", self.weakness_integrity_penalty),
            ("weakness_stability_penalty", self.weakness_stability_penalty),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(config_err(format!("vitals.{name} must be non-negative")));
            }
        }
        Ok(())
    }
}

/// Where archive and snapshot files go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub data_dir: PathBuf,
    pub archive_file: String,
    pub snapshot_file: String,
    /// Per-call timeout for snapshot writes.
    pub snapshot_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            archive_file: "archive.json".to_string(),
            snapshot_file: "snapshot.json".to_string(),
            snapshot_timeout_ms: 500,
        }
    }
}

impl PersistenceConfig {
    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join(&self.archive_file)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================

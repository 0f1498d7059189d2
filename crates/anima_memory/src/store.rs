//! Memory Engine - bounded active memory over an append-only archive
//!
//! - Active memory keeps insertion order and never exceeds its capacity.
//!   On overflow, entries below the eviction floor go first, then the
//!   lowest-weight entries (oldest first) until the cap holds again.
//! - Decay only ever lowers weights, and never below the configured floor.
//! - Archival moves matching entries out of active memory and persists the
//!   whole archive. A failed save puts every moved entry back where it was.
//! - Recall ranks by significance, newest first among ties.

use crate::archive::ArchiveStore;
use crate::feedback::FeedbackRecord;
use anima_core::config::MemoryConfig;
use anima_core::{PersistenceError, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

/// Event type under which feedback records are stored.
pub const FEEDBACK_EVENT_TYPE: &str = "feedback";

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub event_type: String,
    /// In `[0, 1]`.
    pub significance: f64,
    pub timestamp: DateTime<Utc>,
    /// Retention weight. Only decay changes it after recording.
    pub weight: f64,
    #[serde(default)]
    pub feedback: Option<FeedbackRecord>,
    /// Position on the subjective time axis when recorded.
    #[serde(default)]
    pub subjective_timestamp: Option<f64>,
}

impl MemoryEntry {
    pub fn new(
        event_type: impl Into<String>,
        significance: f64,
        timestamp: DateTime<Utc>,
        weight: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            significance: clamp_unit(significance),
            timestamp,
            weight: if weight.is_finite() { weight.max(0.0) } else { 0.0 },
            feedback: None,
            subjective_timestamp: None,
        }
    }

    /// Wrap a feedback record. Feedback is a fact, not an event, so its
    /// significance is zero.
    pub fn from_feedback(record: FeedbackRecord, timestamp: DateTime<Utc>, weight: f64) -> Self {
        let mut entry = Self::new(FEEDBACK_EVENT_TYPE, 0.0, timestamp, weight);
        entry.feedback = Some(record);
        entry
    }

    pub fn with_subjective_timestamp(mut self, subjective_age: f64) -> Self {
        self.subjective_timestamp = Some(subjective_age);
        self
    }

    pub fn is_feedback(&self) -> bool {
        self.feedback.is_some()
    }

    /// Check the bounds `new` enforces by clamping. Deserialized entries
    /// bypass `new`, so they go through this instead.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.significance.is_finite() {
            return Err(ValidationError::NonFinite {
                field: "memory significance",
                value: self.significance,
            });
        }
        if !(0.0..=1.0).contains(&self.significance) {
            return Err(ValidationError::OutOfBounds {
                field: "memory significance",
                value: self.significance,
                min: 0.0,
                max: 1.0,
            });
        }
        if !self.weight.is_finite() {
            return Err(ValidationError::NonFinite {
                field: "memory weight",
                value: self.weight,
            });
        }
        if self.weight < 0.0 {
            return Err(ValidationError::OutOfBounds {
                field: "memory weight",
                value: self.weight,
                min: 0.0,
                max: f64::MAX,
            });
        }
        if let Some(t) = self.subjective_timestamp.filter(|t| !t.is_finite()) {
            return Err(ValidationError::NonFinite {
                field: "memory subjective timestamp",
                value: t,
            });
        }
        Ok(())
    }

    /// Age in seconds relative to `now`, zero for entries stamped in the future.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.timestamp).num_milliseconds().max(0);
        millis as f64 / 1000.0
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Archival criteria. An entry is archived when it matches any of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveCriteria {
    pub max_age: Option<Duration>,
    pub min_weight: Option<f64>,
    pub min_significance: Option<f64>,
}

impl ArchiveCriteria {
    pub fn from_config(config: &MemoryConfig) -> Self {
        Self {
            max_age: config.archive_max_age_secs.map(Duration::from_secs),
            min_weight: config.archive_min_weight,
            min_significance: config.archive_min_significance,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_age.is_none() && self.min_weight.is_none() && self.min_significance.is_none()
    }

    pub fn matches(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> bool {
        let too_old = self
            .max_age
            .is_some_and(|max| entry.age_secs(now) > max.as_secs_f64());
        let too_light = self.min_weight.is_some_and(|min| entry.weight < min);
        let too_dull = self
            .min_significance
            .is_some_and(|min| entry.significance < min);
        too_old || too_light || too_dull
    }
}

/// Aggregate view of memory used by logging and learning.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStatistics {
    pub active_count: usize,
    pub archive_count: usize,
    pub feedback_count: usize,
    pub counts_by_type: BTreeMap<String, usize>,
    /// Mean significance over active entries, 0 when empty.
    pub average_significance: f64,
    pub min_weight: Option<f64>,
    pub max_weight: Option<f64>,
}

pub struct MemoryEngine {
    config: MemoryConfig,
    active: Vec<MemoryEntry>,
    archive: Vec<MemoryEntry>,
    store: Box<dyn ArchiveStore>,
    /// JSON rendering of `active`, rebuilt lazily after any mutation.
    active_json: Option<serde_json::Value>,
    archive_json: Option<serde_json::Value>,
}

impl MemoryEngine {
    /// Create the engine and load whatever the store already holds.
    pub fn new(config: MemoryConfig, store: Box<dyn ArchiveStore>) -> Result<Self, PersistenceError> {
        let archive = store.load()?;
        if !archive.is_empty() {
            tracing::info!("Loaded {} archived memories", archive.len());
        }
        Ok(Self {
            config,
            active: Vec::new(),
            archive,
            store,
            active_json: None,
            archive_json: None,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn active(&self) -> &[MemoryEntry] {
        &self.active
    }

    pub fn archived(&self) -> &[MemoryEntry] {
        &self.archive
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Feedback records still held in active memory, oldest first.
    pub fn feedback_records(&self) -> impl Iterator<Item = &FeedbackRecord> {
        self.active.iter().filter_map(|e| e.feedback.as_ref())
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Append an entry, evicting on overflow. Returns the evicted entries.
    pub fn record(&mut self, entry: MemoryEntry) -> Vec<MemoryEntry> {
        self.active.push(entry);
        self.active_json = None;
        self.enforce_capacity()
    }

    fn enforce_capacity(&mut self) -> Vec<MemoryEntry> {
        let cap = self.config.capacity;
        if self.active.len() <= cap {
            return Vec::new();
        }

        let floor = self.config.eviction_floor;
        let (mut evicted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|e| e.weight < floor);
        self.active = kept;

        if self.active.len() > cap {
            let excess = self.active.len() - cap;
            let mut order: Vec<usize> = (0..self.active.len()).collect();
            order.sort_by(|&a, &b| {
                let (ea, eb) = (&self.active[a], &self.active[b]);
                ea.weight
                    .total_cmp(&eb.weight)
                    .then(ea.timestamp.cmp(&eb.timestamp))
                    .then(a.cmp(&b))
            });
            let doomed: HashSet<usize> = order.into_iter().take(excess).collect();

            let mut kept = Vec::with_capacity(cap);
            for (i, entry) in std::mem::take(&mut self.active).into_iter().enumerate() {
                if doomed.contains(&i) {
                    evicted.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            self.active = kept;
        }

        tracing::debug!(evicted = evicted.len(), active = self.active.len(), "Active memory trimmed");
        evicted
    }

    /// Lower every weight according to age and significance.
    /// Returns how many entries sit at `min_weight` afterwards.
    pub fn decay(&mut self, decay_factor: f64, min_weight: f64, now: DateTime<Utc>) -> usize {
        let mut at_floor = 0;
        for entry in &mut self.active {
            let age_days = entry.age_secs(now) / SECONDS_PER_DAY;
            let factor = decay_factor * (1.0 / (1.0 + age_days)) * (0.5 + 0.5 * entry.significance);
            let decayed = entry.weight * factor;
            let next = if decayed.is_finite() {
                decayed.max(min_weight).min(entry.weight)
            } else {
                entry.weight
            };
            entry.weight = next;
            if next <= min_weight {
                at_floor += 1;
            }
        }
        if !self.active.is_empty() {
            self.active_json = None;
        }
        at_floor
    }

    /// Move entries matching `criteria` to the archive and persist it.
    ///
    /// On a persistence failure the archive is left as it was, the moved
    /// entries are back at their original positions, and the error is
    /// returned.
    pub fn archive(
        &mut self,
        criteria: &ArchiveCriteria,
        now: DateTime<Utc>,
    ) -> Result<usize, PersistenceError> {
        if criteria.is_empty() || !self.active.iter().any(|e| criteria.matches(e, now)) {
            return Ok(0);
        }

        let mut moved: Vec<(usize, MemoryEntry)> = Vec::new();
        let mut kept = Vec::with_capacity(self.active.len());
        for (i, entry) in std::mem::take(&mut self.active).into_iter().enumerate() {
            if criteria.matches(&entry, now) {
                moved.push((i, entry));
            } else {
                kept.push(entry);
            }
        }
        self.active = kept;

        let archive_len = self.archive.len();
        self.archive.extend(moved.iter().map(|(_, e)| e.clone()));

        match self.store.save(&self.archive) {
            Ok(()) => {
                self.active_json = None;
                self.archive_json = None;
                tracing::info!(archived = moved.len(), total = self.archive.len(), "Memories archived");
                Ok(moved.len())
            }
            Err(e) => {
                self.archive.truncate(archive_len);
                // Ascending original indices rebuild the original order.
                for (i, entry) in moved {
                    self.active.insert(i, entry);
                }
                Err(e)
            }
        }
    }

    /// Replace both tiers, used when restoring from a snapshot.
    /// Every entry is checked first; on error nothing changes. Active memory
    /// is trimmed to capacity if needed.
    pub fn restore(&mut self, active: Vec<MemoryEntry>, archive: Vec<MemoryEntry>) -> Result<(), ValidationError> {
        for entry in active.iter().chain(archive.iter()) {
            entry.validate()?;
        }
        self.active = active;
        self.archive = archive;
        self.active_json = None;
        self.archive_json = None;
        let evicted = self.enforce_capacity();
        if !evicted.is_empty() {
            tracing::warn!("Restored memory exceeded capacity, evicted {}", evicted.len());
        }
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Top `k` entries of `event_type` by significance, newest first on ties.
    pub fn recall(&self, event_type: &str, k: usize) -> Vec<&MemoryEntry> {
        let mut matches: Vec<&MemoryEntry> = self
            .active
            .iter()
            .filter(|e| e.event_type == event_type)
            .collect();
        matches.sort_by(|a, b| {
            b.significance
                .total_cmp(&a.significance)
                .then(b.timestamp.cmp(&a.timestamp))
        });
        matches.truncate(k);
        matches
    }

    /// Recall with the base K scaled by the time-perception signal.
    pub fn recall_perceived(&self, event_type: &str, time_perception: f64) -> Vec<&MemoryEntry> {
        let scaled = (self.config.recall_k as f64 * time_perception).round();
        let k = if scaled.is_finite() { scaled.max(1.0) as usize } else { 1 };
        self.recall(event_type, k)
    }

    pub fn statistics(&self) -> MemoryStatistics {
        let mut counts_by_type = BTreeMap::new();
        let mut feedback_count = 0;
        let mut significance_sum = 0.0;
        let mut min_weight: Option<f64> = None;
        let mut max_weight: Option<f64> = None;

        for entry in &self.active {
            *counts_by_type.entry(entry.event_type.clone()).or_insert(0) += 1;
            if entry.is_feedback() {
                feedback_count += 1;
            }
            significance_sum += entry.significance;
            min_weight = Some(min_weight.map_or(entry.weight, |m| m.min(entry.weight)));
            max_weight = Some(max_weight.map_or(entry.weight, |m| m.max(entry.weight)));
        }

        let average_significance = if self.active.is_empty() {
            0.0
        } else {
            significance_sum / self.active.len() as f64
        };

        MemoryStatistics {
            active_count: self.active.len(),
            archive_count: self.archive.len(),
            feedback_count,
            counts_by_type,
            average_significance,
            min_weight,
            max_weight,
        }
    }

    /// JSON rendering of active memory. Cached until the next mutation.
    pub fn serialized_active(&mut self) -> Result<serde_json::Value, PersistenceError> {
        if self.active_json.is_none() {
            self.active_json = Some(serde_json::to_value(&self.active)?);
        }
        Ok(self.active_json.clone().unwrap_or_default())
    }

    /// JSON rendering of the archive. Cached until the next archival.
    pub fn serialized_archive(&mut self) -> Result<serde_json::Value, PersistenceError> {
        if self.archive_json.is_none() {
            self.archive_json = Some(serde_json::to_value(&self.archive)?);
        }
        Ok(self.archive_json.clone().unwrap_or_default())
    }

    #[cfg(test)]
    pub(crate) fn is_serialization_cached(&self) -> bool {
        self.active_json.is_some()
    }
}

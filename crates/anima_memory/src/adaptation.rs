//! Adaptation Engine - slow convergence toward the learning parameters
//!
//! The adaptation set trails the learning set: every run moves each value
//! toward its learning counterpart by at most `max_delta`. Applied changes
//! are recorded in a bounded history ring so any recent adaptation state can
//! be restored.

use crate::history::HistoryRing;
use anima_core::config::AdaptationConfig;
use anima_core::{BehaviorParams, ParamChange, ValidationError, NEUTRAL_VALUE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DELTA_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationHistoryEntry {
    /// Stable logical index within the history ring.
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    pub tick: u64,
    pub old_params: BehaviorParams,
    pub new_params: BehaviorParams,
    pub diff: Vec<ParamChange>,
    /// Learning parameters the run converged toward.
    pub source_learning_params: BehaviorParams,
}

/// Which history entry to roll back to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTarget {
    /// Latest entry recorded at or before this instant.
    Timestamp(DateTime<Utc>),
    /// Entry this many steps before the newest (0 = newest).
    StepsBack(usize),
    /// Entry with this logical index.
    Index(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationOutcome {
    pub params: BehaviorParams,
    pub changes: Vec<ParamChange>,
    /// History index of the entry recording this run.
    pub entry_index: u64,
}

pub struct AdaptationEngine {
    config: AdaptationConfig,
    history: HistoryRing<AdaptationHistoryEntry>,
}

impl AdaptationEngine {
    pub fn new(config: AdaptationConfig) -> Self {
        let history = HistoryRing::new(config.history_capacity);
        Self { config, history }
    }

    pub fn history(&self) -> &HistoryRing<AdaptationHistoryEntry> {
        &self.history
    }

    /// Move `adaptation` one bounded step toward `learning`.
    ///
    /// Returns `Ok(None)` when the two sets already agree.
    pub fn run(
        &mut self,
        adaptation: &BehaviorParams,
        learning: &BehaviorParams,
        tick: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<AdaptationOutcome>, ValidationError> {
        let max_delta = self.config.max_delta;
        let mut next = adaptation.clone();

        for (kind, key, target) in learning.entries() {
            let old = adaptation.get(kind, key.as_str()).unwrap_or(NEUTRAL_VALUE);
            let step = (target - old).clamp(-max_delta, max_delta);
            let new = (old + step).clamp(0.0, 1.0);
            if adaptation.get(kind, key.as_str()).is_none() || new != old {
                next.group_mut(kind).set(key.clone(), new)?;
            }
        }

        let changes = adaptation.diff(&next);
        for change in &changes {
            let delta = change.delta();
            if delta.abs() > max_delta + DELTA_TOLERANCE {
                return Err(ValidationError::DeltaExceedsBound {
                    key: format!("{}.{}", change.group, change.key),
                    delta,
                    bound: max_delta,
                });
            }
        }
        if changes.is_empty() {
            return Ok(None);
        }

        let entry_index = self.history.next_index();
        self.history.push(AdaptationHistoryEntry {
            index: entry_index,
            timestamp: now,
            tick,
            old_params: adaptation.clone(),
            new_params: next.clone(),
            diff: changes.clone(),
            source_learning_params: learning.clone(),
        });
        tracing::debug!(entry_index, changes = changes.len(), "Adaptation step recorded");

        Ok(Some(AdaptationOutcome {
            params: next,
            changes,
            entry_index,
        }))
    }

    /// Parameters recorded by the selected history entry, returned verbatim.
    ///
    /// The jump back is a restoration, so it is not limited by `max_delta`.
    pub fn rollback_to(&self, target: RollbackTarget) -> Result<BehaviorParams, ValidationError> {
        let entry = match target {
            RollbackTarget::StepsBack(steps) => self.history.back(steps),
            RollbackTarget::Index(index) => self.history.get(index),
            RollbackTarget::Timestamp(at) => self.history.iter().rev().find(|e| e.timestamp <= at),
        };
        entry
            .map(|e| e.new_params.clone())
            .ok_or_else(|| ValidationError::RollbackTarget(format!("{target:?}")))
    }

    /// History entries oldest first, for snapshots.
    pub fn history_entries(&self) -> Vec<AdaptationHistoryEntry> {
        self.history.iter().cloned().collect()
    }

    /// Rebuild the history from a snapshot. Indices must be contiguous.
    pub fn restore_history(&mut self, entries: Vec<AdaptationHistoryEntry>) -> Result<(), ValidationError> {
        let first = entries.first().map_or(0, |e| e.index);
        for (offset, entry) in entries.iter().enumerate() {
            if entry.index != first + offset as u64 {
                return Err(ValidationError::RollbackTarget(format!(
                    "history indices not contiguous at {}",
                    entry.index
                )));
            }
        }
        self.history = HistoryRing::from_parts(self.config.history_capacity, first, entries);
        Ok(())
    }
}

//! Learning Engine - statistical nudging of the learning parameter set
//!
//! Periodically reads active memory and the feedback records it holds:
//! - event type frequency drives `event_type_sensitivity`
//! - average significance per event type drives `significance_bias`
//! - response pattern usage frequency drives `response_preference`
//!
//! A statistic in the high bucket moves its value toward 1, one in the low
//! bucket toward 0, each by at most `max_delta` per run. Steps smaller than
//! `min_delta` are skipped. The output is checked against both bounds
//! before it is handed back.

use crate::feedback::FeedbackRecord;
use crate::store::MemoryEntry;
use anima_core::config::LearningConfig;
use anima_core::{BehaviorParams, ParamChange, ParamGroupKind, ParamKey, ValidationError, NEUTRAL_VALUE};
use serde::Serialize;
use std::collections::BTreeMap;

/// Slack for floating point error when re-checking delta bounds.
const DELTA_TOLERANCE: f64 = 1e-9;

/// Statistics one run was based on.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearningStatistics {
    /// Non-feedback entries considered.
    pub event_samples: usize,
    pub feedback_samples: usize,
    pub type_frequency: BTreeMap<String, f64>,
    pub type_average_significance: BTreeMap<String, f64>,
    pub pattern_frequency: BTreeMap<String, f64>,
}

impl LearningStatistics {
    pub fn collect(memory: &[MemoryEntry], feedback: &[FeedbackRecord]) -> Self {
        let mut counts: BTreeMap<String, (usize, f64)> = BTreeMap::new();
        let mut event_samples = 0;
        for entry in memory.iter().filter(|e| !e.is_feedback()) {
            let slot = counts.entry(entry.event_type.clone()).or_insert((0, 0.0));
            slot.0 += 1;
            slot.1 += entry.significance;
            event_samples += 1;
        }

        let mut type_frequency = BTreeMap::new();
        let mut type_average_significance = BTreeMap::new();
        for (kind, (count, sum)) in counts {
            type_frequency.insert(kind.clone(), count as f64 / event_samples as f64);
            type_average_significance.insert(kind, sum / count as f64);
        }

        let mut pattern_counts: BTreeMap<String, usize> = BTreeMap::new();
        for record in feedback {
            *pattern_counts
                .entry(record.response_pattern.as_str().to_string())
                .or_insert(0) += 1;
        }
        let pattern_frequency = pattern_counts
            .into_iter()
            .map(|(k, n)| (k, n as f64 / feedback.len() as f64))
            .collect();

        Self {
            event_samples,
            feedback_samples: feedback.len(),
            type_frequency,
            type_average_significance,
            pattern_frequency,
        }
    }
}

/// Result of a run that changed at least one value.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningOutcome {
    pub params: BehaviorParams,
    pub changes: Vec<ParamChange>,
    pub statistics: LearningStatistics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
    Hold,
}

pub struct LearningEngine {
    config: LearningConfig,
}

impl LearningEngine {
    pub fn new(config: LearningConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Run one learning cycle.
    ///
    /// Returns `Ok(None)` when neither memory nor feedback holds
    /// `min_samples` entries, or when no value moved.
    pub fn run(
        &self,
        memory: &[MemoryEntry],
        feedback: &[FeedbackRecord],
        current: &BehaviorParams,
    ) -> Result<Option<LearningOutcome>, ValidationError> {
        let stats = LearningStatistics::collect(memory, feedback);
        let events_ready = stats.event_samples >= self.config.min_samples;
        let feedback_ready = stats.feedback_samples >= self.config.min_samples;
        if !events_ready && !feedback_ready {
            tracing::debug!(
                events = stats.event_samples,
                feedback = stats.feedback_samples,
                "Learning skipped: insufficient samples"
            );
            return Ok(None);
        }

        let mut next = current.clone();
        if events_ready {
            let freq = self.frequency_direction();
            self.nudge_group(&mut next, ParamGroupKind::EventTypeSensitivity, &stats.type_frequency, freq)?;
            let sig = self.significance_direction();
            self.nudge_group(
                &mut next,
                ParamGroupKind::SignificanceBias,
                &stats.type_average_significance,
                sig,
            )?;
        }
        if feedback_ready {
            let freq = self.frequency_direction();
            self.nudge_group(&mut next, ParamGroupKind::ResponsePreference, &stats.pattern_frequency, freq)?;
        }

        let changes = current.diff(&next);
        self.check_bounds(&changes)?;
        if changes.is_empty() {
            return Ok(None);
        }

        tracing::debug!(changes = changes.len(), "Learning parameters updated");
        Ok(Some(LearningOutcome {
            params: next,
            changes,
            statistics: stats,
        }))
    }

    fn frequency_direction(&self) -> impl Fn(f64) -> Direction + '_ {
        move |f| {
            if f > self.config.high_frequency {
                Direction::Up
            } else if f < self.config.low_frequency {
                Direction::Down
            } else {
                Direction::Hold
            }
        }
    }

    fn significance_direction(&self) -> impl Fn(f64) -> Direction + '_ {
        move |s| {
            if s > self.config.high_significance {
                Direction::Up
            } else if s < self.config.low_significance {
                Direction::Down
            } else {
                Direction::Hold
            }
        }
    }

    /// Nudge every observed key of `kind`. Keys already in the group but no
    /// longer observed count as frequency 0 for the frequency groups.
    fn nudge_group(
        &self,
        params: &mut BehaviorParams,
        kind: ParamGroupKind,
        observed: &BTreeMap<String, f64>,
        direction: impl Fn(f64) -> Direction,
    ) -> Result<(), ValidationError> {
        let mut signals: Vec<(ParamKey, f64)> = Vec::new();
        for (raw, value) in observed {
            match ParamKey::new(raw.as_str()) {
                Ok(key) => signals.push((key, *value)),
                Err(e) => tracing::debug!("Skipping unusable key `{}`: {}", raw, e),
            }
        }
        if kind != ParamGroupKind::SignificanceBias {
            for key in params.group(kind).keys() {
                if !observed.contains_key(key.as_str()) {
                    signals.push((key.clone(), 0.0));
                }
            }
        }

        let group = params.group_mut(kind);
        for (key, signal) in signals {
            let old = group.get(key.as_str()).unwrap_or(NEUTRAL_VALUE);
            let new = match direction(signal) {
                Direction::Up => (old + self.config.max_delta).min(1.0),
                Direction::Down => (old - self.config.max_delta).max(0.0),
                Direction::Hold => continue,
            };
            if (new - old).abs() < self.config.min_delta {
                continue;
            }
            group.set(key, new.clamp(0.0, 1.0))?;
        }
        Ok(())
    }

    fn check_bounds(&self, changes: &[ParamChange]) -> Result<(), ValidationError> {
        for change in changes {
            if !(0.0..=1.0).contains(&change.new) {
                return Err(ValidationError::OutOfBounds {
                    field: "learning parameter",
                    value: change.new,
                    min: 0.0,
                    max: 1.0,
                });
            }
            let delta = change.delta();
            if delta.abs() > self.config.max_delta + DELTA_TOLERANCE {
                return Err(ValidationError::DeltaExceedsBound {
                    key: format!("{}.{}", change.group, change.key),
                    delta,
                    bound: self.config.max_delta,
                });
            }
        }
        Ok(())
    }
}

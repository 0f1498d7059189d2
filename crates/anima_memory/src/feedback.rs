//! Feedback Correlator - links actions to their delayed outcomes
//!
//! Every executed response pattern is registered as a pending action with a
//! resolution window of 3-10 ticks. When the window elapses, the vitals at
//! that moment are compared to the vitals captured at registration:
//! - Delta below epsilon on every vital: noise, nothing is recorded
//! - Resolved on any tick other than the window's own: missed, nothing is
//!   recorded
//! - Older than the timeout: dropped
//! - Otherwise a [`FeedbackRecord`] ties the pattern to the observed change
//!
//! Pending actions sit in a min-heap keyed by due tick, so each resolve call
//! only touches what is actually due.

use anima_core::config::{FeedbackConfig, RESOLUTION_WINDOW_MAX, RESOLUTION_WINDOW_MIN};
use anima_core::{ParamKey, ValidationError, VitalDelta, Vitals};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use uuid::Uuid;

/// An executed response awaiting its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub action_id: Uuid,
    pub response_pattern: ParamKey,
    /// Vitals right after the stimulus impact was applied.
    pub state_before: Vitals,
    pub registered_tick: u64,
    /// Ticks until the outcome is observed, in `[3, 10]`.
    pub resolution_window: u64,
    pub timeout_ticks: u64,
    pub stimulus_ids: Vec<Uuid>,
    pub correlation_id: Uuid,
}

impl PendingAction {
    pub fn due_tick(&self) -> u64 {
        self.registered_tick + self.resolution_window
    }
}

/// Where an action came from, for tracing the outcome back to its stimuli.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOrigin {
    pub stimulus_ids: Vec<Uuid>,
    pub correlation_id: Uuid,
}

impl ActionOrigin {
    pub fn new(stimulus_ids: Vec<Uuid>, correlation_id: Uuid) -> Self {
        Self {
            stimulus_ids,
            correlation_id,
        }
    }
}

/// Observed outcome of one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub action_id: Uuid,
    pub response_pattern: ParamKey,
    /// `vitals_now - state_before`.
    pub state_delta: VitalDelta,
    pub delay_ticks: u64,
    pub stimulus_ids: Vec<Uuid>,
    pub correlation_id: Uuid,
}

/// What one resolve call did with the due actions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub records: Vec<FeedbackRecord>,
    /// Resolved with a change below epsilon.
    pub noise: usize,
    /// Resolved after the window had already passed.
    pub missed: usize,
    /// Dropped after exceeding the timeout.
    pub timed_out: usize,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.noise == 0 && self.missed == 0 && self.timed_out == 0
    }
}

/// Heap slot: ordered by due tick, then registration order.
#[derive(Debug)]
struct Due {
    due_tick: u64,
    seq: u64,
    action: PendingAction,
}

impl PartialEq for Due {
    fn eq(&self, other: &Self) -> bool {
        self.due_tick == other.due_tick && self.seq == other.seq
    }
}

impl Eq for Due {}

impl Ord for Due {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due_tick
            .cmp(&other.due_tick)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct FeedbackCorrelator {
    config: FeedbackConfig,
    pending: BinaryHeap<Reverse<Due>>,
    next_seq: u64,
    rng: StdRng,
}

impl FeedbackCorrelator {
    pub fn new(config: FeedbackConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            pending: BinaryHeap::new(),
            next_seq: 0,
            rng,
        }
    }

    /// Register an action with a window sampled uniformly from the
    /// configured bounds. Returns the new action id.
    pub fn register(
        &mut self,
        response_pattern: ParamKey,
        state_before: Vitals,
        tick: u64,
        origin: ActionOrigin,
    ) -> Result<Uuid, ValidationError> {
        let window = self
            .rng
            .gen_range(self.config.min_window..=self.config.max_window);
        self.register_with_window(response_pattern, state_before, tick, origin, window)
    }

    /// Register an action with an explicit window. Windows outside
    /// `[3, 10]` or outside the configured bounds are refused.
    pub fn register_with_window(
        &mut self,
        response_pattern: ParamKey,
        state_before: Vitals,
        tick: u64,
        origin: ActionOrigin,
        window: u64,
    ) -> Result<Uuid, ValidationError> {
        let min = self.config.min_window.max(RESOLUTION_WINDOW_MIN);
        let max = self.config.max_window.min(RESOLUTION_WINDOW_MAX);
        if !(min..=max).contains(&window) {
            return Err(ValidationError::ResolutionWindow { window, min, max });
        }
        state_before.validate()?;

        let action = PendingAction {
            action_id: Uuid::new_v4(),
            response_pattern,
            state_before,
            registered_tick: tick,
            resolution_window: window,
            timeout_ticks: self.config.timeout_ticks,
            stimulus_ids: origin.stimulus_ids,
            correlation_id: origin.correlation_id,
        };
        let action_id = action.action_id;
        tracing::trace!(
            %action_id,
            pattern = %action.response_pattern,
            due_tick = action.due_tick(),
            "Action registered"
        );
        self.pending.push(Reverse(Due {
            due_tick: action.due_tick(),
            seq: self.next_seq,
            action,
        }));
        self.next_seq += 1;
        Ok(action_id)
    }

    /// Resolve every action due at or before `tick` against `current`.
    pub fn resolve(&mut self, tick: u64, current: Vitals) -> Resolution {
        let mut resolution = Resolution::default();

        while let Some(Reverse(next)) = self.pending.peek() {
            if next.due_tick > tick {
                break;
            }
            let Some(Reverse(Due { action, .. })) = self.pending.pop() else {
                break;
            };

            let elapsed = tick.saturating_sub(action.registered_tick);
            if elapsed > action.timeout_ticks {
                tracing::debug!(action_id = %action.action_id, elapsed, "Pending action timed out");
                resolution.timed_out += 1;
                continue;
            }
            // Only an observation exactly at the sampled window counts
            if elapsed != action.resolution_window {
                tracing::debug!(action_id = %action.action_id, elapsed, "Resolution window missed");
                resolution.missed += 1;
                continue;
            }

            let state_delta = current - action.state_before;
            if state_delta.max_abs() < self.config.epsilon {
                resolution.noise += 1;
                continue;
            }

            resolution.records.push(FeedbackRecord {
                action_id: action.action_id,
                response_pattern: action.response_pattern,
                state_delta,
                delay_ticks: elapsed,
                stimulus_ids: action.stimulus_ids,
                correlation_id: action.correlation_id,
            });
        }

        resolution
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Earliest due tick among pending actions.
    pub fn next_due(&self) -> Option<u64> {
        self.pending.peek().map(|Reverse(due)| due.due_tick)
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingAction> {
        self.pending.iter().map(|Reverse(due)| &due.action)
    }
}

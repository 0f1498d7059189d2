//! Contracts with the outside world: where stimuli come from and how they are
//! interpreted. Both sides are collaborators; the heartbeat only calls them.

use crate::params::ParamKey;
use crate::state::{AgentState, VitalDelta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

/// One externally injected event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    pub id: Uuid,
    /// Event type, e.g. `"noise"`, `"contact"`, `"warmth"`.
    pub kind: String,
    /// Raw intensity in `[0, 1]`.
    pub intensity: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Stimulus {
    pub fn new(kind: impl Into<String>, intensity: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            intensity,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Result of interpreting one stimulus against the current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    /// Importance in `[0, 1]`. Zero means "not worth remembering".
    pub significance: f64,
    /// Impact on the vitals, applied with clamping.
    pub impact: VitalDelta,
    /// Response pattern to execute, if any.
    pub response: Option<ParamKey>,
}

impl Interpretation {
    /// An interpretation with no effect at all.
    pub fn inert() -> Self {
        Self {
            significance: 0.0,
            impact: VitalDelta::default(),
            response: None,
        }
    }
}

/// Queue of pending stimuli, drained fully once per tick in arrival order.
pub trait StimulusSource: Send {
    fn drain(&mut self) -> Vec<Stimulus>;
}

impl StimulusSource for VecDeque<Stimulus> {
    fn drain(&mut self) -> Vec<Stimulus> {
        VecDeque::drain(self, ..).collect()
    }
}

/// Turns a stimulus into significance, impact and a response pattern.
///
/// Implementations must be pure: the heartbeat may call them at any point in
/// the tick and relies on them having no side effects.
pub trait Interpreter: Send + Sync {
    fn interpret(&self, stimulus: &Stimulus, state: &AgentState) -> Interpretation;
}

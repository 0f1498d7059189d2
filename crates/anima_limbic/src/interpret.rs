//! Baseline stimulus interpretation.
//!
//! Maps each stimulus kind to a per-unit impact on the vitals and a list of
//! candidate response patterns. The behavioral parameters shape the result:
//! - `event_type_sensitivity[kind]` and `significance_bias[kind]` scale the
//!   significance around the raw intensity
//! - `response_preference[pattern]` ranks the candidate responses
//!
//! Adaptation parameters are read first, then learning parameters, then the
//! neutral value, so both learning and rollback change what the agent does.

use anima_core::{
    AgentState, Interpretation, Interpreter, ParamGroupKind, ParamKey, Stimulus, VitalDelta,
    NEUTRAL_VALUE,
};
use std::collections::BTreeMap;

/// How one kind of stimulus affects the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusProfile {
    /// Impact at intensity 1.0. Scaled linearly by intensity.
    pub impact: VitalDelta,
    /// Candidate responses, in order of precedence on equal preference.
    pub responses: Vec<ParamKey>,
}

impl StimulusProfile {
    pub fn new(impact: VitalDelta, responses: &[&str]) -> Self {
        Self {
            impact,
            responses: responses
                .iter()
                .filter_map(|r| ParamKey::new(*r).ok())
                .collect(),
        }
    }
}

pub struct BaselineInterpreter {
    profiles: BTreeMap<String, StimulusProfile>,
    fallback: StimulusProfile,
}

impl Default for BaselineInterpreter {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "noise".to_string(),
            StimulusProfile::new(
                VitalDelta {
                    energy: -0.5,
                    integrity: 0.0,
                    stability: -2.0,
                },
                &["dampen", "orient"],
            ),
        );
        profiles.insert(
            "contact".to_string(),
            StimulusProfile::new(
                VitalDelta {
                    energy: -0.2,
                    integrity: -3.0,
                    stability: -0.5,
                },
                &["withdraw", "brace"],
            ),
        );
        profiles.insert(
            "warmth".to_string(),
            StimulusProfile::new(
                VitalDelta {
                    energy: 1.0,
                    integrity: 0.0,
                    stability: 0.5,
                },
                &["bask"],
            ),
        );
        profiles.insert(
            "nourishment".to_string(),
            StimulusProfile::new(
                VitalDelta {
                    energy: 5.0,
                    integrity: 0.5,
                    stability: 0.0,
                },
                &["consume"],
            ),
        );
        Self {
            profiles,
            fallback: StimulusProfile::new(
                VitalDelta {
                    energy: -0.2,
                    integrity: 0.0,
                    stability: -0.2,
                },
                &["orient"],
            ),
        }
    }
}

impl BaselineInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, kind: impl Into<String>, profile: StimulusProfile) -> Self {
        self.profiles.insert(kind.into(), profile);
        self
    }

    pub fn profile(&self, kind: &str) -> &StimulusProfile {
        self.profiles.get(kind).unwrap_or(&self.fallback)
    }
}

/// Adaptation value, else learning value, else neutral.
fn effective_param(state: &AgentState, kind: ParamGroupKind, key: &str) -> f64 {
    state
        .adaptation_params()
        .get(kind, key)
        .or_else(|| state.learning_params().get(kind, key))
        .unwrap_or(NEUTRAL_VALUE)
}

impl Interpreter for BaselineInterpreter {
    fn interpret(&self, stimulus: &Stimulus, state: &AgentState) -> Interpretation {
        let intensity = if stimulus.intensity.is_finite() {
            stimulus.intensity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if intensity == 0.0 {
            return Interpretation::inert();
        }

        let profile = self.profile(&stimulus.kind);
        let sensitivity = effective_param(state, ParamGroupKind::EventTypeSensitivity, &stimulus.kind);
        let bias = effective_param(state, ParamGroupKind::SignificanceBias, &stimulus.kind);
        // Neutral parameters leave the intensity unchanged
        let significance = (intensity * (0.5 + sensitivity) * (0.5 + bias)).clamp(0.0, 1.0);

        let mut response: Option<(&ParamKey, f64)> = None;
        for candidate in &profile.responses {
            let preference = effective_param(state, ParamGroupKind::ResponsePreference, candidate.as_str());
            if response.map_or(true, |(_, best)| preference > best) {
                response = Some((candidate, preference));
            }
        }

        Interpretation {
            significance,
            impact: profile.impact.scaled(intensity),
            response: response.map(|(key, _)| key.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anima_core::BehaviorParams;

    fn state_with(adaptation: BehaviorParams, learning: BehaviorParams) -> AgentState {
        let mut state = AgentState::default();
        state.set_adaptation_params(adaptation);
        state.set_learning_params(learning);
        state
    }

    fn set(params: &mut BehaviorParams, kind: ParamGroupKind, key: &str, value: f64) {
        params
            .group_mut(kind)
            .set(ParamKey::new(key).unwrap(), value)
            .unwrap();
    }

    #[test]
    fn test_neutral_params_keep_intensity() {
        let interp = BaselineInterpreter::new();
        let out = interp.interpret(&Stimulus::new("noise", 0.4), &AgentState::default());
        assert!((out.significance - 0.4).abs() < 1e-12);
        assert!((out.impact.stability - (-0.8)).abs() < 1e-12);
        assert_eq!(out.response.as_ref().map(ParamKey::as_str), Some("dampen"));
    }

    #[test]
    fn test_zero_or_invalid_intensity_is_inert() {
        let interp = BaselineInterpreter::new();
        let state = AgentState::default();
        assert_eq!(interp.interpret(&Stimulus::new("noise", 0.0), &state), Interpretation::inert());
        assert_eq!(
            interp.interpret(&Stimulus::new("noise", f64::NAN), &state),
            Interpretation::inert()
        );
    }

    #[test]
    fn test_adaptation_overrides_learning() {
        let interp = BaselineInterpreter::new();
        let mut learning = BehaviorParams::default();
        set(&mut learning, ParamGroupKind::EventTypeSensitivity, "noise", 1.0);
        let mut adaptation = BehaviorParams::default();
        set(&mut adaptation, ParamGroupKind::EventTypeSensitivity, "noise", 0.0);

        let out = interp.interpret(&Stimulus::new("noise", 0.8), &state_with(adaptation, learning.clone()));
        assert!((out.significance - 0.4).abs() < 1e-12);

        // Falls back to learning when adaptation has no value
        let out = interp.interpret(&Stimulus::new("noise", 0.8), &state_with(BehaviorParams::default(), learning));
        assert!((out.significance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_preference_picks_response() {
        let interp = BaselineInterpreter::new();
        let mut adaptation = BehaviorParams::default();
        set(&mut adaptation, ParamGroupKind::ResponsePreference, "orient", 0.8);
        let out = interp.interpret(
            &Stimulus::new("noise", 0.5),
            &state_with(adaptation, BehaviorParams::default()),
        );
        assert_eq!(out.response.as_ref().map(ParamKey::as_str), Some("orient"));
    }

    #[test]
    fn test_unknown_kind_uses_fallback() {
        let interp = BaselineInterpreter::new();
        let out = interp.interpret(&Stimulus::new("glare", 1.0), &AgentState::default());
        assert_eq!(out.impact.energy, -0.2);
        assert_eq!(out.response.as_ref().map(ParamKey::as_str), Some("orient"));
    }
}

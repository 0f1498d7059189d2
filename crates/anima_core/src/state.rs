//! Agent state store.
//!
//! All mutable vitals and counters live in [`AgentState`]. Fields are private;
//! every change goes through an explicit mutator that returns a `Result`, so
//! there is no hidden validation path:
//!
//! - `set_*` rejects non-finite and out-of-range values outright.
//! - [`AgentState::apply_delta`] adds an impact delta and clamps the result
//!   into range (non-finite deltas are still rejected).
//!
//! Parameter sets are typed ([`BehaviorParams`]) and cannot carry reserved
//! control keys.

use crate::error::ValidationError;
use crate::params::BehaviorParams;
use serde::{Deserialize, Serialize};
use std::ops::Sub;

/// Lower bound of every vital.
pub const VITAL_MIN: f64 = 0.0;
/// Upper bound of every vital.
pub const VITAL_MAX: f64 = 100.0;

/// The scalar vitals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vital {
    Energy,
    Integrity,
    Stability,
}

impl Vital {
    pub const ALL: [Vital; 3] = [Vital::Energy, Vital::Integrity, Vital::Stability];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vital::Energy => "energy",
            Vital::Integrity => "integrity",
            Vital::Stability => "stability",
        }
    }
}

fn check_vital(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite { field, value });
    }
    if !(VITAL_MIN..=VITAL_MAX).contains(&value) {
        return Err(ValidationError::OutOfBounds {
            field,
            value,
            min: VITAL_MIN,
            max: VITAL_MAX,
        });
    }
    Ok(value)
}

/// A copy of the three vitals at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub energy: f64,
    pub integrity: f64,
    pub stability: f64,
}

impl Default for Vitals {
    fn default() -> Self {
        Self {
            energy: 80.0,
            integrity: 100.0,
            stability: 70.0,
        }
    }
}

impl Vitals {
    pub fn get(&self, vital: Vital) -> f64 {
        match vital {
            Vital::Energy => self.energy,
            Vital::Integrity => self.integrity,
            Vital::Stability => self.stability,
        }
    }

    /// Reject a snapshot with any vital out of range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_vital("energy", self.energy)?;
        check_vital("integrity", self.integrity)?;
        check_vital("stability", self.stability)?;
        Ok(())
    }
}

impl Sub for Vitals {
    type Output = VitalDelta;

    fn sub(self, before: Vitals) -> VitalDelta {
        VitalDelta {
            energy: self.energy - before.energy,
            integrity: self.integrity - before.integrity,
            stability: self.stability - before.stability,
        }
    }
}

/// Per-vital numeric difference (impact of a stimulus, or an observed change).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalDelta {
    pub energy: f64,
    pub integrity: f64,
    pub stability: f64,
}

impl VitalDelta {
    pub fn get(&self, vital: Vital) -> f64 {
        match vital {
            Vital::Energy => self.energy,
            Vital::Integrity => self.integrity,
            Vital::Stability => self.stability,
        }
    }

    /// Largest absolute component.
    pub fn max_abs(&self) -> f64 {
        self.energy
            .abs()
            .max(self.integrity.abs())
            .max(self.stability.abs())
    }

    pub fn is_finite(&self) -> bool {
        self.energy.is_finite() && self.integrity.is_finite() && self.stability.is_finite()
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            energy: self.energy * factor,
            integrity: self.integrity * factor,
            stability: self.stability * factor,
        }
    }
}

/// Complete agent state: vitals, clocks and the two parameter sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    vitals: Vitals,
    tick_count: u64,
    /// Seconds of simulated wall time.
    physical_age: f64,
    /// Seconds on the subjective time axis.
    subjective_age: f64,
    learning_params: BehaviorParams,
    adaptation_params: BehaviorParams,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            vitals: Vitals::default(),
            tick_count: 0,
            physical_age: 0.0,
            subjective_age: 0.0,
            learning_params: BehaviorParams::default(),
            adaptation_params: BehaviorParams::default(),
        }
    }
}

impl AgentState {
    pub fn with_vitals(vitals: Vitals) -> Result<Self, ValidationError> {
        vitals.validate()?;
        Ok(Self {
            vitals,
            ..Self::default()
        })
    }

    // ---- read access ------------------------------------------------------

    pub fn vitals(&self) -> Vitals {
        self.vitals
    }

    pub fn energy(&self) -> f64 {
        self.vitals.energy
    }

    pub fn integrity(&self) -> f64 {
        self.vitals.integrity
    }

    pub fn stability(&self) -> f64 {
        self.vitals.stability
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn physical_age(&self) -> f64 {
        self.physical_age
    }

    pub fn subjective_age(&self) -> f64 {
        self.subjective_age
    }

    pub fn learning_params(&self) -> &BehaviorParams {
        &self.learning_params
    }

    pub fn adaptation_params(&self) -> &BehaviorParams {
        &self.adaptation_params
    }

    /// Rate at which subjective time passes relative to physical time.
    /// Low energy slows the subjective clock: `0.5 + energy/100`, in `[0.5, 1.5]`.
    pub fn time_perception(&self) -> f64 {
        0.5 + self.vitals.energy / VITAL_MAX
    }

    // ---- mutators ---------------------------------------------------------

    pub fn set_energy(&mut self, value: f64) -> Result<(), ValidationError> {
        self.vitals.energy = check_vital("energy", value)?;
        Ok(())
    }

    pub fn set_integrity(&mut self, value: f64) -> Result<(), ValidationError> {
        self.vitals.integrity = check_vital("integrity", value)?;
        Ok(())
    }

    pub fn set_stability(&mut self, value: f64) -> Result<(), ValidationError> {
        self.vitals.stability = check_vital("stability", value)?;
        Ok(())
    }

    pub fn set_vital(&mut self, vital: Vital, value: f64) -> Result<(), ValidationError> {
        match vital {
            Vital::Energy => self.set_energy(value),
            Vital::Integrity => self.set_integrity(value),
            Vital::Stability => self.set_stability(value),
        }
    }

    /// Add `delta` to the vitals, clamping each into range.
    /// Returns the delta that was actually applied after clamping.
    pub fn apply_delta(&mut self, delta: &VitalDelta) -> Result<VitalDelta, ValidationError> {
        for vital in Vital::ALL {
            let d = delta.get(vital);
            if !d.is_finite() {
                return Err(ValidationError::NonFinite {
                    field: vital.as_str(),
                    value: d,
                });
            }
        }
        let before = self.vitals;
        let next = Vitals {
            energy: (before.energy + delta.energy).clamp(VITAL_MIN, VITAL_MAX),
            integrity: (before.integrity + delta.integrity).clamp(VITAL_MIN, VITAL_MAX),
            stability: (before.stability + delta.stability).clamp(VITAL_MIN, VITAL_MAX),
        };
        next.validate()?;
        self.vitals = next;
        Ok(next - before)
    }

    /// Advance the clocks by one tick of `dt_secs` physical seconds.
    /// Returns the new tick count.
    pub fn advance_clock(&mut self, dt_secs: f64) -> Result<u64, ValidationError> {
        if !dt_secs.is_finite() || dt_secs < 0.0 {
            return Err(ValidationError::OutOfBounds {
                field: "dt",
                value: dt_secs,
                min: 0.0,
                max: f64::MAX,
            });
        }
        let perception = self.time_perception();
        self.tick_count += 1;
        self.physical_age += dt_secs;
        self.subjective_age += dt_secs * perception;
        Ok(self.tick_count)
    }

    pub fn set_learning_params(&mut self, params: BehaviorParams) {
        self.learning_params = params;
    }

    pub fn set_adaptation_params(&mut self, params: BehaviorParams) {
        self.adaptation_params = params;
    }

    /// Re-check every invariant. Used after restoring from a snapshot.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.vitals.validate()?;
        for (field, value) in [
            ("physical_age", self.physical_age),
            ("subjective_age", self.subjective_age),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::OutOfBounds {
                    field,
                    value,
                    min: 0.0,
                    max: f64::MAX,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_valid() {
        let state = AgentState::default();
        assert!(state.validate().is_ok());
        assert_eq!(state.tick_count(), 0);
    }

    #[test]
    fn test_setters_reject_out_of_range() {
        let mut state = AgentState::default();
        assert!(state.set_energy(50.0).is_ok());
        assert_eq!(state.energy(), 50.0);

        let err = state.set_energy(150.0).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfBounds { field: "energy", .. }));
        assert_eq!(state.energy(), 50.0, "failed set must not change the value");

        assert!(matches!(
            state.set_stability(f64::NAN),
            Err(ValidationError::NonFinite { .. })
        ));
        assert!(state.set_integrity(-0.1).is_err());
    }

    #[test]
    fn test_apply_delta_clamps() {
        let mut state = AgentState::with_vitals(Vitals {
            energy: 95.0,
            integrity: 3.0,
            stability: 50.0,
        })
        .unwrap();

        let applied = state
            .apply_delta(&VitalDelta {
                energy: 10.0,
                integrity: -10.0,
                stability: 1.5,
            })
            .unwrap();

        assert_eq!(state.energy(), VITAL_MAX);
        assert_eq!(state.integrity(), VITAL_MIN);
        assert_eq!(state.stability(), 51.5);
        assert_eq!(applied.energy, 5.0);
        assert_eq!(applied.integrity, -3.0);
    }

    #[test]
    fn test_apply_delta_rejects_non_finite() {
        let mut state = AgentState::default();
        let before = state.vitals();
        let result = state.apply_delta(&VitalDelta {
            energy: f64::INFINITY,
            ..Default::default()
        });
        assert!(result.is_err());
        assert_eq!(state.vitals(), before);
    }

    #[test]
    fn test_advance_clock_uses_time_perception() {
        let mut state = AgentState::default();
        state.set_energy(0.0).unwrap();
        state.advance_clock(2.0).unwrap();
        assert_eq!(state.tick_count(), 1);
        assert_eq!(state.physical_age(), 2.0);
        assert!((state.subjective_age() - 1.0).abs() < 1e-12);

        state.set_energy(100.0).unwrap();
        state.advance_clock(2.0).unwrap();
        assert!((state.subjective_age() - 4.0).abs() < 1e-12);

        assert!(state.advance_clock(-1.0).is_err());
    }

    #[test]
    fn test_vitals_subtraction() {
        let before = Vitals {
            energy: 50.0,
            integrity: 80.0,
            stability: 60.0,
        };
        let after = Vitals {
            energy: 49.5,
            ..before
        };
        let delta = after - before;
        assert_eq!(delta.energy, -0.5);
        assert_eq!(delta.max_abs(), 0.5);
    }
}

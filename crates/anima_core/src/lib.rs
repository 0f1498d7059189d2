//! # Anima Core
//!
//! Shared vocabulary of the Anima heartbeat: the agent state store, the typed
//! behavioral parameter groups, the stimulus/interpretation contracts, the
//! error taxonomy and the TOML configuration.

pub mod config;
pub mod error;
pub mod params;
pub mod state;
pub mod stimulus;

pub use config::AnimaConfig;
pub use error::{CoreError, CoreResult, PeripheralError, PersistenceError, ValidationError};
pub use params::{BehaviorParams, ParamChange, ParamGroup, ParamGroupKind, ParamKey, NEUTRAL_VALUE};
pub use state::{AgentState, Vital, VitalDelta, Vitals, VITAL_MAX, VITAL_MIN};
pub use stimulus::{Interpretation, Interpreter, Stimulus, StimulusSource};

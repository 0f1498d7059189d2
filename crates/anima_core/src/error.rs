//! Error taxonomy shared by every Anima crate.
//!
//! - [`ValidationError`]: a value, key or delta broke a declared bound.
//!   Fatal to the call that produced it; engines skip their update for the
//!   cycle, while a failed AgentState mutation halts the heartbeat.
//! - [`PersistenceError`]: archive or snapshot I/O failed. Recovered and
//!   retried on the next eligible interval.
//! - [`PeripheralError`]: an optional side task (snapshot write) failed or
//!   timed out. Never reaches the tick loop's control flow.
//! - [`CoreError`]: what the heartbeat itself returns when it must stop.

use std::path::PathBuf;
use thiserror::Error;

/// A value, key or delta violated a declared bound.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} is not finite ({value})")]
    NonFinite { field: &'static str, value: f64 },

    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfBounds {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("reserved control key `{0}` cannot be used as a parameter key")]
    ReservedKey(String),

    #[error("parameter key is empty")]
    EmptyKey,

    #[error("change of {delta:.6} on `{key}` exceeds the bound {bound:.6}")]
    DeltaExceedsBound { key: String, delta: f64, bound: f64 },

    #[error("resolution window of {window} ticks is outside [{min}, {max}]")]
    ResolutionWindow { window: u64, min: u64, max: u64 },

    #[error("rollback target not found: {0}")]
    RollbackTarget(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Archive or snapshot persistence failed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("persistence backend unavailable: {0}")]
    Unavailable(String),
}

/// Failure of an optional peripheral operation.
#[derive(Debug, Error)]
pub enum PeripheralError {
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: &'static str, after_ms: u64 },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Errors that halt the heartbeat.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("agent state validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("core invariant violated: {0}")]
    Invariant(String),

    #[error("state mutated outside the owning execution context ({detail})")]
    ConcurrencyViolation { detail: String },

    #[error("heartbeat is not running")]
    NotRunning,

    #[error("startup persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

//! # Anima Limbic (the heartbeat)
//!
//! The single-owner tick loop that keeps the agent alive. One scheduler owns
//! the state store, memory, feedback correlator and both parameter engines;
//! nothing else mutates them.
//!
//! ## Architecture
//!
//! Each tick the heartbeat:
//! 1. Advances the physical and subjective clocks
//! 2. Interprets drained stimuli and applies their impact
//! 3. Runs decay, archival, learning and adaptation on their intervals
//! 4. Resolves delayed feedback and writes periodic snapshots
//!
//! Observers read a [`StatusSnapshot`] through a [`SchedulerHandle`] and send
//! rollback or stop requests that are served at tick boundaries.
//!
//! ## Time Scales
//!
//! - Every tick: clocks, stimuli, feedback
//! - Tens of ticks: decay, learning
//! - Hundreds of ticks: archival, adaptation, snapshots

mod handle;
mod heartbeat;
pub mod interpret;
pub mod scheduler;
pub mod snapshot;

pub use handle::{Command, Lifecycle, SchedulerHandle, StatusSnapshot};
pub use heartbeat::HeartbeatConfig;
pub use interpret::{BaselineInterpreter, StimulusProfile};
pub use scheduler::{Phase, Scheduler, TickOutcome};
pub use snapshot::{
    JsonFileSnapshotSink, NullSnapshotSink, SnapshotPayload, SnapshotSink, SnapshotStatus,
    SNAPSHOT_VERSION,
};

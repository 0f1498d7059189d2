//! # Anima Memory
//!
//! Everything the heartbeat remembers and learns from:
//! - [`MemoryEngine`]: bounded, weight-decayed active memory over an
//!   append-only archive persisted through an [`ArchiveStore`]
//! - [`FeedbackCorrelator`]: links executed responses to delayed changes in
//!   the vitals
//! - [`LearningEngine`]: nudges the learning parameters from memory statistics
//! - [`AdaptationEngine`]: lets the adaptation parameters trail the learning
//!   parameters, with rollback through a bounded history

pub mod adaptation;
pub mod archive;
pub mod feedback;
pub mod history;
pub mod learning;
pub mod store;

pub use adaptation::{AdaptationEngine, AdaptationHistoryEntry, AdaptationOutcome, RollbackTarget};
pub use archive::{ArchiveStore, InMemoryArchiveStore, JsonArchiveStore};
pub use feedback::{ActionOrigin, FeedbackCorrelator, FeedbackRecord, PendingAction, Resolution};
pub use history::HistoryRing;
pub use learning::{LearningEngine, LearningOutcome, LearningStatistics};
pub use store::{ArchiveCriteria, MemoryEngine, MemoryEntry, MemoryStatistics, FEEDBACK_EVENT_TYPE};

//! Periodic snapshot output.
//!
//! The scheduler hands a [`SnapshotPayload`] to a [`SnapshotSink`] every
//! snapshot interval under a timeout. Writes are best effort: a failure or a
//! timeout is reported in the tick outcome and never stops the heartbeat.

use anima_core::{AgentState, PersistenceError};
use anima_memory::AdaptationHistoryEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to resume the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub version: u32,
    pub written_at: DateTime<Utc>,
    /// Wall clock at physical age zero; memory timestamps count from here.
    pub epoch: DateTime<Utc>,
    /// Counters, vitals and both parameter sets.
    pub state: AgentState,
    pub adaptation_history: Vec<AdaptationHistoryEntry>,
    pub active_memory: serde_json::Value,
    pub archive_memory: serde_json::Value,
}

/// Result of one snapshot attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum SnapshotStatus {
    Written,
    Failed(String),
    /// The write did not finish in time; the heartbeat runs degraded.
    TimedOut,
}

impl SnapshotStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, SnapshotStatus::TimedOut)
    }
}

#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn write(&self, payload: &SnapshotPayload) -> Result<(), PersistenceError>;
}

/// Discards every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSnapshotSink;

#[async_trait]
impl SnapshotSink for NullSnapshotSink {
    async fn write(&self, _payload: &SnapshotPayload) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Writes the payload as pretty JSON, via a temp file renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotSink {
    path: PathBuf,
}

impl JsonFileSnapshotSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the last snapshot, if one was written.
    pub async fn load(&self) -> Result<Option<SnapshotPayload>, PersistenceError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        Ok(Some(serde_json::from_str(&content)?))
    }
}

#[async_trait]
impl SnapshotSink for JsonFileSnapshotSink {
    async fn write(&self, payload: &SnapshotPayload) -> Result<(), PersistenceError> {
        let io_err = |path: &Path, source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_err(parent, e))?;
            }
        }
        let json = serde_json::to_vec_pretty(payload)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_err(&self.path, e))?;
        tracing::debug!(path = %self.path.display(), tick = payload.state.tick_count(), "Snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> SnapshotPayload {
        SnapshotPayload {
            version: SNAPSHOT_VERSION,
            written_at: Utc::now(),
            epoch: Utc::now(),
            state: AgentState::default(),
            adaptation_history: Vec::new(),
            active_memory: serde_json::json!([]),
            archive_memory: serde_json::json!([]),
        }
    }

    #[tokio::test]
    async fn test_json_sink_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSnapshotSink::new(dir.path().join("snap").join("snapshot.json"));
        assert_eq!(sink.load().await.unwrap(), None);

        let p = payload();
        sink.write(&p).await.unwrap();
        assert_eq!(sink.load().await.unwrap(), Some(p));
    }

    #[tokio::test]
    async fn test_null_sink_accepts_everything() {
        assert!(NullSnapshotSink.write(&payload()).await.is_ok());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SnapshotStatus::Failed("disk full".into())).unwrap();
        assert_eq!(json, r#"{"status":"failed","detail":"disk full"}"#);
        assert!(SnapshotStatus::TimedOut.is_degraded());
        assert!(!SnapshotStatus::Written.is_degraded());
    }
}

//! Read-only access to a running heartbeat.
//!
//! The scheduler owns every mutation. Outside code sees a [`StatusSnapshot`]
//! published on a watch channel after each tick, and asks for anything else
//! through a command channel that the scheduler drains at tick boundaries.

use crate::snapshot::SnapshotStatus;
use anima_core::{BehaviorParams, CoreError, ValidationError, Vitals};
use anima_memory::{AdaptationHistoryEntry, MemoryStatistics, RollbackTarget};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};

/// Heartbeat lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Ticking
    #[default]
    Running,
    /// Stop requested; the current tick completes first
    Stopping,
    /// No further ticks will run
    Stopped,
}

/// Published view of the agent, possibly one tick stale.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub lifecycle: Lifecycle,
    pub tick_count: u64,
    pub physical_age: f64,
    pub subjective_age: f64,
    pub time_perception: f64,
    /// Simulated wall clock of the last tick.
    pub clock: DateTime<Utc>,
    pub vitals: Vitals,
    pub learning_params: BehaviorParams,
    pub adaptation_params: BehaviorParams,
    pub memory: MemoryStatistics,
    pub pending_actions: usize,
    pub adaptation_history_len: usize,
    pub last_snapshot: Option<SnapshotStatus>,
    /// Set while the most recent snapshot attempt timed out.
    pub degraded: bool,
    /// Error that halted the heartbeat, if any.
    pub halted_by: Option<String>,
}

/// Requests served by the scheduler between ticks.
#[derive(Debug)]
pub enum Command {
    Rollback {
        target: RollbackTarget,
        reply: oneshot::Sender<Result<BehaviorParams, ValidationError>>,
    },
    AdaptationHistory {
        reply: oneshot::Sender<Vec<AdaptationHistoryEntry>>,
    },
    Stop,
}

/// Cloneable handle to a scheduler.
pub struct SchedulerHandle {
    status_rx: watch::Receiver<StatusSnapshot>,
    commands: mpsc::Sender<Command>,
    thread: Option<std::thread::JoinHandle<Result<(), CoreError>>>,
}

impl Clone for SchedulerHandle {
    fn clone(&self) -> Self {
        Self {
            status_rx: self.status_rx.clone(),
            commands: self.commands.clone(),
            thread: None,
        }
    }
}

impl SchedulerHandle {
    pub(crate) fn new(status_rx: watch::Receiver<StatusSnapshot>, commands: mpsc::Sender<Command>) -> Self {
        Self {
            status_rx,
            commands,
            thread: None,
        }
    }

    pub(crate) fn attach_thread(&mut self, thread: std::thread::JoinHandle<Result<(), CoreError>>) {
        self.thread = Some(thread);
    }

    /// Latest published status.
    pub fn status(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    /// Receiver notified after every published tick.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    /// Ask the heartbeat to stop after its current tick.
    pub async fn stop(&self) -> Result<(), CoreError> {
        self.send(Command::Stop).await
    }

    /// Restore the adaptation parameters recorded by a history entry.
    /// Applied at the next tick boundary.
    pub async fn rollback(&self, target: RollbackTarget) -> Result<BehaviorParams, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Rollback { target, reply }).await?;
        let result = rx.await.map_err(|_| CoreError::NotRunning)?;
        Ok(result?)
    }

    pub async fn adaptation_history(&self) -> Result<Vec<AdaptationHistoryEntry>, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AdaptationHistory { reply }).await?;
        rx.await.map_err(|_| CoreError::NotRunning)
    }

    /// Wait until the heartbeat reports `Stopped`.
    pub async fn stopped(&self) -> StatusSnapshot {
        let mut rx = self.status_rx.clone();
        let status = match rx.wait_for(|s| s.lifecycle == Lifecycle::Stopped).await {
            Ok(status) => status.clone(),
            // Sender gone: the scheduler was dropped
            Err(_) => self.status(),
        };
        status
    }

    /// Join the heartbeat thread started by `Scheduler::spawn`.
    /// Blocks the calling thread.
    pub fn join(mut self) -> Result<(), CoreError> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| CoreError::Invariant("heartbeat thread panicked".to_string()))?,
            None => Ok(()),
        }
    }

    async fn send(&self, command: Command) -> Result<(), CoreError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CoreError::NotRunning)
    }
}

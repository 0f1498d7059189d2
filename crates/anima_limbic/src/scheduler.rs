//! The heartbeat scheduler
//!
//! The Scheduler is the only writer of the agent. Each tick it:
//! 1. Advances the physical and subjective clocks
//! 2. Interprets every drained stimulus, applies its impact, registers the
//!    chosen response and remembers significant events
//! 3. Applies the weakness penalty when energy runs low
//! 4. Runs decay, archival, learning and adaptation on their intervals
//!    (adaptation always after learning)
//! 5. Resolves due feedback into memory
//! 6. Writes a best-effort snapshot on its interval
//! 7. Serves queued commands and publishes a fresh status
//!
//! Peripheral failures (archive, snapshot, engine validation) are logged and
//! skipped. A failed state mutation halts the heartbeat.

use crate::handle::{Command, Lifecycle, SchedulerHandle, StatusSnapshot};
use crate::heartbeat::HeartbeatConfig;
use crate::interpret::BaselineInterpreter;
use crate::snapshot::{
    JsonFileSnapshotSink, SnapshotPayload, SnapshotSink, SnapshotStatus, SNAPSHOT_VERSION,
};
use anima_core::{
    AgentState, AnimaConfig, BehaviorParams, CoreError, Interpreter, PeripheralError,
    PersistenceError, Stimulus, StimulusSource, ValidationError, VitalDelta,
};
use anima_memory::{
    ActionOrigin, AdaptationEngine, ArchiveCriteria, ArchiveStore, FeedbackCorrelator,
    FeedbackRecord, JsonArchiveStore, LearningEngine, MemoryEngine, MemoryEntry, RollbackTarget,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

const COMMAND_QUEUE: usize = 32;

/// Tick sub-steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Clock,
    Stimuli,
    Weakness,
    Decay,
    Archive,
    Learning,
    Adaptation,
    Feedback,
    Snapshot,
    Commands,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickOutcome {
    pub tick: u64,
    pub phases: Vec<Phase>,
    pub stimuli_processed: usize,
    pub memories_recorded: usize,
    pub memories_evicted: usize,
    pub actions_registered: usize,
    pub feedback_records: usize,
    /// Entries at the weight floor after decay, when decay ran.
    pub decayed_to_floor: Option<usize>,
    /// Entries archived, when archival ran and succeeded.
    pub archived: Option<usize>,
    pub archive_failed: bool,
    /// Parameter changes applied, when the engine ran.
    pub learning_changes: Option<usize>,
    pub adaptation_changes: Option<usize>,
    pub snapshot: Option<SnapshotStatus>,
    pub duration: Duration,
}

impl TickOutcome {
    fn new(tick: u64) -> Self {
        Self {
            tick,
            phases: Vec::new(),
            stimuli_processed: 0,
            memories_recorded: 0,
            memories_evicted: 0,
            actions_registered: 0,
            feedback_records: 0,
            decayed_to_floor: None,
            archived: None,
            archive_failed: false,
            learning_changes: None,
            adaptation_changes: None,
            snapshot: None,
            duration: Duration::ZERO,
        }
    }

    pub fn degraded(&self) -> bool {
        self.snapshot.as_ref().is_some_and(SnapshotStatus::is_degraded)
    }
}

pub struct Scheduler {
    config: AnimaConfig,
    heartbeat: HeartbeatConfig,
    state: AgentState,
    memory: MemoryEngine,
    feedback: FeedbackCorrelator,
    learning: LearningEngine,
    adaptation: AdaptationEngine,
    interpreter: Box<dyn Interpreter>,
    snapshot_sink: Arc<dyn SnapshotSink>,
    archive_criteria: ArchiveCriteria,
    /// Thread that ran the first tick. Every later tick must come from it.
    owner: Option<ThreadId>,
    lifecycle: Lifecycle,
    /// Wall clock at physical age zero.
    epoch: DateTime<Utc>,
    last_snapshot: Option<SnapshotStatus>,
    halted_by: Option<String>,
    status_tx: watch::Sender<StatusSnapshot>,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
}

impl Scheduler {
    pub fn new(
        config: AnimaConfig,
        interpreter: Box<dyn Interpreter>,
        archive_store: Box<dyn ArchiveStore>,
        snapshot_sink: Arc<dyn SnapshotSink>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let state = AgentState::with_vitals(config.vitals.initial)?;
        let memory = MemoryEngine::new(config.memory.clone(), archive_store)?;
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE);

        let scheduler = Self {
            heartbeat: HeartbeatConfig::from(&config.scheduler),
            feedback: FeedbackCorrelator::new(config.feedback.clone()),
            learning: LearningEngine::new(config.learning.clone()),
            adaptation: AdaptationEngine::new(config.adaptation.clone()),
            archive_criteria: ArchiveCriteria::from_config(&config.memory),
            config,
            state,
            memory,
            interpreter,
            snapshot_sink,
            owner: None,
            lifecycle: Lifecycle::Running,
            epoch: Utc::now(),
            last_snapshot: None,
            halted_by: None,
            status_tx: watch::channel(StatusSnapshot::default()).0,
            commands_tx,
            commands_rx,
        };
        scheduler.publish();
        Ok(scheduler)
    }

    /// Scheduler with the baseline interpreter and JSON files under the
    /// configured data directory.
    pub fn from_config(config: AnimaConfig) -> Result<Self, CoreError> {
        let archive = JsonArchiveStore::new(config.persistence.archive_path());
        let sink = JsonFileSnapshotSink::new(config.persistence.snapshot_path());
        Self::new(
            config,
            Box::new(BaselineInterpreter::new()),
            Box::new(archive),
            Arc::new(sink),
        )
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &AnimaConfig {
        &self.config
    }

    pub fn state(&self) -> &AgentState {
        &self.state
    }

    pub fn memory(&self) -> &MemoryEngine {
        &self.memory
    }

    pub fn feedback(&self) -> &FeedbackCorrelator {
        &self.feedback
    }

    pub fn adaptation(&self) -> &AdaptationEngine {
        &self.adaptation
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Simulated wall clock: epoch plus physical age.
    pub fn clock(&self) -> DateTime<Utc> {
        // Tick and restore both refuse ages the clock cannot represent
        simulated_clock(self.epoch, self.state.physical_age()).unwrap_or(self.epoch)
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(self.status_tx.subscribe(), self.commands_tx.clone())
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            lifecycle: self.lifecycle,
            tick_count: self.state.tick_count(),
            physical_age: self.state.physical_age(),
            subjective_age: self.state.subjective_age(),
            time_perception: self.state.time_perception(),
            clock: self.clock(),
            vitals: self.state.vitals(),
            learning_params: self.state.learning_params().clone(),
            adaptation_params: self.state.adaptation_params().clone(),
            memory: self.memory.statistics(),
            pending_actions: self.feedback.pending_count(),
            adaptation_history_len: self.adaptation.history().len(),
            last_snapshot: self.last_snapshot.clone(),
            degraded: self.last_snapshot.as_ref().is_some_and(SnapshotStatus::is_degraded),
            halted_by: self.halted_by.clone(),
        }
    }

    /// Request a stop. The loop exits after the tick in flight.
    pub fn request_stop(&mut self) {
        if self.lifecycle == Lifecycle::Running {
            tracing::info!("Heartbeat stop requested");
            self.lifecycle = Lifecycle::Stopping;
            self.publish();
        }
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Run one tick of `dt` over `stimuli`, in arrival order.
    ///
    /// Any error halts the scheduler: it moves to `Stopped` and refuses
    /// further ticks.
    pub async fn tick(&mut self, dt: Duration, stimuli: Vec<Stimulus>) -> Result<TickOutcome, CoreError> {
        if self.lifecycle == Lifecycle::Stopped {
            return Err(CoreError::NotRunning);
        }
        let result = match self.check_owner() {
            Ok(()) => self.tick_inner(dt, stimuli).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::error!("Heartbeat halted: {}", e);
            self.halted_by = Some(e.to_string());
            self.set_lifecycle(Lifecycle::Stopped);
        }
        result
    }

    async fn tick_inner(&mut self, dt: Duration, stimuli: Vec<Stimulus>) -> Result<TickOutcome, CoreError> {
        let started = Instant::now();

        let now = simulated_clock(self.epoch, self.state.physical_age() + dt.as_secs_f64())?;
        let tick = self.state.advance_clock(dt.as_secs_f64())?;
        let mut outcome = TickOutcome::new(tick);
        outcome.phases.push(Phase::Clock);

        outcome.phases.push(Phase::Stimuli);
        for stimulus in stimuli {
            self.process_stimulus(stimulus, tick, now, &mut outcome)?;
        }

        outcome.phases.push(Phase::Weakness);
        self.apply_weakness()?;

        let intervals = self.config.scheduler.clone();

        if tick % intervals.decay_interval == 0 {
            outcome.phases.push(Phase::Decay);
            let memory_cfg = &self.config.memory;
            let at_floor = self.memory.decay(memory_cfg.decay_factor, memory_cfg.min_weight, now);
            outcome.decayed_to_floor = Some(at_floor);
        }

        if tick % intervals.archive_interval == 0 {
            outcome.phases.push(Phase::Archive);
            match self.memory.archive(&self.archive_criteria, now) {
                Ok(n) => outcome.archived = Some(n),
                Err(e) => {
                    tracing::warn!("Archive failed, entries kept active until next interval: {}", e);
                    outcome.archive_failed = true;
                }
            }
        }

        if tick % intervals.learning_interval == 0 {
            outcome.phases.push(Phase::Learning);
            outcome.learning_changes = self.run_learning();
        }

        if tick % intervals.adaptation_interval == 0 {
            outcome.phases.push(Phase::Adaptation);
            outcome.adaptation_changes = self.run_adaptation(tick, now);
        }

        outcome.phases.push(Phase::Feedback);
        self.resolve_feedback(tick, now, &mut outcome);

        if tick % intervals.snapshot_interval == 0 {
            outcome.phases.push(Phase::Snapshot);
            let status = self.write_snapshot().await;
            self.last_snapshot = Some(status.clone());
            outcome.snapshot = Some(status);
        }

        outcome.phases.push(Phase::Commands);
        self.serve_commands();

        outcome.duration = started.elapsed();
        self.publish();
        tracing::debug!(
            tick,
            duration_us = outcome.duration.as_micros() as u64,
            stimuli = outcome.stimuli_processed,
            energy = self.state.energy(),
            "Tick boundary"
        );
        Ok(outcome)
    }

    fn check_owner(&mut self) -> Result<(), CoreError> {
        let current = std::thread::current().id();
        match self.owner {
            None => {
                self.owner = Some(current);
                Ok(())
            }
            Some(owner) if owner == current => Ok(()),
            Some(owner) => {
                let detail = format!("owned by {:?}, ticked from {:?}", owner, current);
                tracing::error!("Concurrency violation: {}", detail);
                if cfg!(debug_assertions) {
                    panic!("scheduler mutated off its owner thread: {detail}");
                }
                Err(CoreError::ConcurrencyViolation { detail })
            }
        }
    }

    fn process_stimulus(
        &mut self,
        stimulus: Stimulus,
        tick: u64,
        now: DateTime<Utc>,
        outcome: &mut TickOutcome,
    ) -> Result<(), CoreError> {
        let correlation_id = Uuid::new_v4();
        let span = tracing::debug_span!("stimulus", %correlation_id, kind = %stimulus.kind);
        let _guard = span.enter();

        tracing::debug!(stage = "received", stimulus_id = %stimulus.id, intensity = stimulus.intensity);
        let interpretation = self.interpreter.interpret(&stimulus, &self.state);
        tracing::debug!(
            stage = "interpreted",
            significance = interpretation.significance,
            response = ?interpretation.response.as_ref().map(|r| r.as_str())
        );

        let applied = self.state.apply_delta(&interpretation.impact)?;
        tracing::debug!(
            stage = "decided",
            energy = applied.energy,
            integrity = applied.integrity,
            stability = applied.stability
        );

        if let Some(pattern) = interpretation.response {
            let origin = ActionOrigin::new(vec![stimulus.id], correlation_id);
            match self.feedback.register(pattern, self.state.vitals(), tick, origin) {
                Ok(action_id) => {
                    outcome.actions_registered += 1;
                    tracing::debug!(stage = "acted", %action_id);
                }
                Err(e) => tracing::warn!("Response not registered: {}", e),
            }
        }

        let significance = interpretation.significance;
        if significance.is_finite() && significance > self.config.scheduler.significance_threshold {
            let entry = MemoryEntry::new(stimulus.kind, significance, now, self.config.memory.initial_weight)
                .with_subjective_timestamp(self.state.subjective_age());
            outcome.memories_evicted += self.memory.record(entry).len();
            outcome.memories_recorded += 1;
        }
        outcome.stimuli_processed += 1;
        Ok(())
    }

    /// Low energy wears down integrity and stability in proportion to the deficit.
    fn apply_weakness(&mut self) -> Result<(), CoreError> {
        let vitals = &self.config.vitals;
        let threshold = vitals.weakness_threshold;
        let energy = self.state.energy();
        if threshold <= 0.0 || energy >= threshold {
            return Ok(());
        }
        let deficit = (threshold - energy) / threshold;
        let penalty = VitalDelta {
            energy: 0.0,
            integrity: -vitals.weakness_integrity_penalty * deficit,
            stability: -vitals.weakness_stability_penalty * deficit,
        };
        self.state.apply_delta(&penalty)?;
        tracing::trace!(deficit, "Weakness penalty applied");
        Ok(())
    }

    fn run_learning(&mut self) -> Option<usize> {
        let feedback: Vec<FeedbackRecord> = self.memory.feedback_records().cloned().collect();
        match self
            .learning
            .run(self.memory.active(), &feedback, self.state.learning_params())
        {
            Ok(Some(outcome)) => {
                let changes = outcome.changes.len();
                self.state.set_learning_params(outcome.params);
                tracing::info!(changes, "Learning parameters updated");
                Some(changes)
            }
            Ok(None) => Some(0),
            Err(e) => {
                tracing::warn!("Learning update rejected: {}", e);
                None
            }
        }
    }

    fn run_adaptation(&mut self, tick: u64, now: DateTime<Utc>) -> Option<usize> {
        match self.adaptation.run(
            self.state.adaptation_params(),
            self.state.learning_params(),
            tick,
            now,
        ) {
            Ok(Some(outcome)) => {
                let changes = outcome.changes.len();
                self.state.set_adaptation_params(outcome.params);
                tracing::info!(changes, entry = outcome.entry_index, "Adaptation step applied");
                Some(changes)
            }
            Ok(None) => Some(0),
            Err(e) => {
                tracing::warn!("Adaptation update rejected: {}", e);
                None
            }
        }
    }

    fn resolve_feedback(&mut self, tick: u64, now: DateTime<Utc>, outcome: &mut TickOutcome) {
        let resolution = self.feedback.resolve(tick, self.state.vitals());
        if resolution.noise + resolution.missed + resolution.timed_out > 0 {
            tracing::trace!(
                noise = resolution.noise,
                missed = resolution.missed,
                timed_out = resolution.timed_out,
                "Pending actions closed without feedback"
            );
        }
        for record in resolution.records {
            let span = tracing::debug_span!("stimulus", correlation_id = %record.correlation_id);
            let _guard = span.enter();
            tracing::debug!(
                stage = "fed_back",
                action_id = %record.action_id,
                pattern = %record.response_pattern,
                delay_ticks = record.delay_ticks,
                max_change = record.state_delta.max_abs()
            );
            let entry = MemoryEntry::from_feedback(record, now, self.config.memory.initial_weight)
                .with_subjective_timestamp(self.state.subjective_age());
            outcome.memories_evicted += self.memory.record(entry).len();
            outcome.feedback_records += 1;
        }
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn snapshot_payload(&mut self) -> Result<SnapshotPayload, PersistenceError> {
        Ok(SnapshotPayload {
            version: SNAPSHOT_VERSION,
            written_at: Utc::now(),
            epoch: self.epoch,
            state: self.state.clone(),
            adaptation_history: self.adaptation.history_entries(),
            active_memory: self.memory.serialized_active()?,
            archive_memory: self.memory.serialized_archive()?,
        })
    }

    async fn write_snapshot(&mut self) -> SnapshotStatus {
        let payload = match self.snapshot_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Snapshot not built: {}", e);
                return SnapshotStatus::Failed(e.to_string());
            }
        };
        let timeout = self.config.persistence.snapshot_timeout();
        let sink = Arc::clone(&self.snapshot_sink);

        match tokio::time::timeout(timeout, sink.write(&payload)).await {
            Ok(Ok(())) => SnapshotStatus::Written,
            Ok(Err(e)) => {
                let err = PeripheralError::from(e);
                tracing::warn!("Snapshot write failed: {}", err);
                SnapshotStatus::Failed(err.to_string())
            }
            Err(_) => {
                let err = PeripheralError::Timeout {
                    operation: "snapshot write",
                    after_ms: timeout.as_millis() as u64,
                };
                tracing::warn!("{}; continuing degraded", err);
                SnapshotStatus::TimedOut
            }
        }
    }

    /// Reload counters, vitals, parameters, memory and adaptation history.
    /// Nothing changes unless the whole payload is valid.
    pub fn restore(&mut self, payload: SnapshotPayload) -> Result<(), CoreError> {
        payload.state.validate()?;
        simulated_clock(payload.epoch, payload.state.physical_age())?;
        let active: Vec<MemoryEntry> = serde_json::from_value(payload.active_memory)
            .map_err(|e| CoreError::Persistence(PersistenceError::from(e)))?;
        let archive: Vec<MemoryEntry> = serde_json::from_value(payload.archive_memory)
            .map_err(|e| CoreError::Persistence(PersistenceError::from(e)))?;
        for entry in active.iter().chain(archive.iter()) {
            entry.validate()?;
        }
        self.adaptation.restore_history(payload.adaptation_history)?;

        self.memory.restore(active, archive)?;
        self.state = payload.state;
        // Entry timestamps are relative to the snapshot's epoch
        self.epoch = payload.epoch;
        tracing::info!(
            tick = self.state.tick_count(),
            memories = self.memory.len(),
            "Restored from snapshot"
        );
        self.publish();
        Ok(())
    }

    // ========================================================================
    // Commands and publishing
    // ========================================================================

    fn serve_commands(&mut self) {
        while let Ok(command) = self.commands_rx.try_recv() {
            match command {
                Command::Rollback { target, reply } => {
                    let result = self.rollback(target);
                    let _ = reply.send(result);
                }
                Command::AdaptationHistory { reply } => {
                    let _ = reply.send(self.adaptation.history_entries());
                }
                Command::Stop => self.request_stop(),
            }
        }
    }

    /// Restore the adaptation parameters of a history entry, verbatim.
    pub fn rollback(&mut self, target: RollbackTarget) -> Result<BehaviorParams, ValidationError> {
        let params = self.adaptation.rollback_to(target)?;
        self.state.set_adaptation_params(params.clone());
        tracing::info!(?target, "Adaptation parameters rolled back");
        Ok(params)
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }

    fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
        self.publish();
    }

    // ========================================================================
    // Loop
    // ========================================================================

    /// Tick on the heartbeat interval until stopped, the tick limit is
    /// reached, or a core error halts the loop.
    ///
    /// Must be polled from a single thread for its whole life (a
    /// current-thread runtime, or [`Scheduler::spawn`]).
    pub async fn run<S: StimulusSource + ?Sized>(&mut self, source: &mut S) -> Result<(), CoreError> {
        if self.lifecycle == Lifecycle::Stopped {
            return Err(CoreError::NotRunning);
        }
        let heartbeat = self.heartbeat.clone();
        let mut interval = tokio::time::interval(heartbeat.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_ms = heartbeat.interval.as_millis() as u64, "Heartbeat started");

        // The first interval tick completes immediately
        interval.tick().await;
        let mut last = tokio::time::Instant::now();

        loop {
            interval.tick().await;
            let now = tokio::time::Instant::now();
            let dt = now.duration_since(last);
            last = now;

            let stimuli = source.drain();
            let outcome = self.tick(dt, stimuli).await?;
            if heartbeat.is_last(outcome.tick) {
                self.request_stop();
            }
            if self.lifecycle == Lifecycle::Stopping {
                break;
            }
        }

        self.set_lifecycle(Lifecycle::Stopped);
        tracing::info!(ticks = self.state.tick_count(), "Heartbeat stopped");
        Ok(())
    }

    /// Move the scheduler onto a dedicated thread with its own
    /// current-thread runtime and start the loop there.
    pub fn spawn(self, mut source: Box<dyn StimulusSource>) -> std::io::Result<SchedulerHandle> {
        let mut handle = self.handle();
        let mut scheduler = self;
        // Ownership moves with the value
        scheduler.owner = None;
        let thread = std::thread::Builder::new()
            .name("anima-heartbeat".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| CoreError::Invariant(format!("heartbeat runtime: {e}")))?;
                runtime.block_on(scheduler.run(source.as_mut()))
            })?;
        handle.attach_thread(thread);
        Ok(handle)
    }
}

/// Wall clock `physical_age` seconds after `epoch`, if chrono can represent it.
fn simulated_clock(epoch: DateTime<Utc>, physical_age: f64) -> Result<DateTime<Utc>, ValidationError> {
    let out_of_range = || ValidationError::OutOfBounds {
        field: "physical age",
        value: physical_age,
        min: 0.0,
        max: (DateTime::<Utc>::MAX_UTC - epoch).num_seconds() as f64,
    };
    let millis = physical_age * 1000.0;
    if !(0.0..i64::MAX as f64).contains(&millis) {
        return Err(out_of_range());
    }
    chrono::Duration::try_milliseconds(millis as i64)
        .and_then(|offset| epoch.checked_add_signed(offset))
        .ok_or_else(out_of_range)
}

//! Integration tests for the heartbeat: tick ordering across subsystems,
//! peripheral failure handling, the command channel and restarts.

use anima_core::config::{FeedbackConfig, LearningConfig, SchedulerConfig};
use anima_core::{
    AgentState, AnimaConfig, CoreError, Interpretation, Interpreter, ParamGroupKind, ParamKey,
    PersistenceError, Stimulus, VitalDelta, Vitals,
};
use anima_limbic::{
    BaselineInterpreter, HeartbeatConfig, JsonFileSnapshotSink, Lifecycle, NullSnapshotSink,
    Scheduler, SnapshotPayload, SnapshotSink, SnapshotStatus,
};
use anima_memory::{InMemoryArchiveStore, MemoryEntry, RollbackTarget};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

const DT: Duration = Duration::from_millis(100);

// ============================================================================
// Fixtures
// ============================================================================

/// Fixed interpretation per stimulus kind; unknown kinds are inert.
#[derive(Default)]
struct ScriptedInterpreter {
    scripts: HashMap<String, Interpretation>,
}

impl ScriptedInterpreter {
    fn with(mut self, kind: &str, significance: f64, impact: VitalDelta, response: Option<&str>) -> Self {
        self.scripts.insert(
            kind.to_string(),
            Interpretation {
                significance,
                impact,
                response: response.map(|r| ParamKey::new(r).unwrap()),
            },
        );
        self
    }
}

impl Interpreter for ScriptedInterpreter {
    fn interpret(&self, stimulus: &Stimulus, _state: &AgentState) -> Interpretation {
        self.scripts
            .get(&stimulus.kind)
            .cloned()
            .unwrap_or_else(Interpretation::inert)
    }
}

struct SlowSink(Duration);

#[async_trait]
impl SnapshotSink for SlowSink {
    async fn write(&self, _payload: &SnapshotPayload) -> Result<(), PersistenceError> {
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

struct FailingSink;

#[async_trait]
impl SnapshotSink for FailingSink {
    async fn write(&self, _payload: &SnapshotPayload) -> Result<(), PersistenceError> {
        Err(PersistenceError::Unavailable("disk detached".into()))
    }
}

fn base_config() -> AnimaConfig {
    AnimaConfig {
        feedback: FeedbackConfig {
            seed: Some(11),
            ..FeedbackConfig::default()
        },
        ..AnimaConfig::default()
    }
}

fn energy(delta: f64) -> VitalDelta {
    VitalDelta {
        energy: delta,
        ..VitalDelta::default()
    }
}

fn build(config: AnimaConfig, interpreter: impl Interpreter + 'static) -> Scheduler {
    Scheduler::new(
        config,
        Box::new(interpreter),
        Box::new(InMemoryArchiveStore::new()),
        Arc::new(NullSnapshotSink),
    )
    .unwrap()
}

fn noise_learner() -> ScriptedInterpreter {
    ScriptedInterpreter::default().with("noise", 0.9, VitalDelta::default(), None)
}

// ============================================================================
// State
// ============================================================================

#[tokio::test]
async fn test_non_finite_impact_halts_heartbeat() {
    let interp = ScriptedInterpreter::default().with("glitch", 0.5, energy(f64::NAN), None);
    let mut s = build(base_config(), interp);
    let before = s.state().vitals();

    let err = s.tick(DT, vec![Stimulus::new("glitch", 1.0)]).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert_eq!(s.state().vitals(), before);
    assert_eq!(s.lifecycle(), Lifecycle::Stopped);
    assert!(s.status().halted_by.is_some());

    assert!(matches!(s.tick(DT, vec![]).await, Err(CoreError::NotRunning)));
}

#[tokio::test]
async fn test_weakness_penalty_scales_with_deficit() {
    let mut config = base_config();
    config.vitals.initial = Vitals {
        energy: 10.0,
        ..Vitals::default()
    };
    let mut s = build(config, ScriptedInterpreter::default());

    s.tick(DT, vec![]).await.unwrap();
    // Half the threshold: half of each penalty
    assert!((s.state().integrity() - 99.75).abs() < 1e-9);
    assert!((s.state().stability() - 69.85).abs() < 1e-9);
    assert_eq!(s.state().energy(), 10.0);
}

#[tokio::test]
async fn test_healthy_energy_has_no_weakness() {
    let mut s = build(base_config(), ScriptedInterpreter::default());
    let before = s.state().vitals();
    s.tick(DT, vec![]).await.unwrap();
    assert_eq!(s.state().vitals(), before);
}

// ============================================================================
// Learning and adaptation
// ============================================================================

#[tokio::test]
async fn test_learning_on_interval_then_adaptation_trails_it() {
    let mut s = build(base_config(), noise_learner());

    for tick in 1..=60u64 {
        let out = s.tick(DT, vec![Stimulus::new("noise", 1.0)]).await.unwrap();
        match tick {
            20 => assert_eq!(out.learning_changes, Some(2)),
            60 => {
                assert!(out.learning_changes.is_some());
                assert_eq!(out.adaptation_changes, Some(2));
            }
            _ if tick % 20 != 0 => assert_eq!(out.learning_changes, None),
            _ => {}
        }
        if tick < 60 {
            assert_eq!(out.adaptation_changes, None);
        }
    }

    let learned = s
        .state()
        .learning_params()
        .get(ParamGroupKind::EventTypeSensitivity, "noise")
        .unwrap();
    assert!((learned - 0.53).abs() < 1e-9);

    let adapted = s
        .state()
        .adaptation_params()
        .get(ParamGroupKind::EventTypeSensitivity, "noise")
        .unwrap();
    assert!((adapted - 0.51).abs() < 1e-9);

    // The adaptation run saw this tick's learning output
    let history = s.adaptation().history_entries();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].tick, 60);
    assert_eq!(&history[0].source_learning_params, s.state().learning_params());
}

// ============================================================================
// Feedback
// ============================================================================

#[tokio::test]
async fn test_response_feedback_lands_in_memory() {
    let interp = ScriptedInterpreter::default()
        .with("noise", 0.6, energy(-0.5), Some("dampen"))
        .with("warmth", 0.0, energy(1.0), None);
    let mut s = build(base_config(), interp);

    let noise = Stimulus::new("noise", 0.5);
    let noise_id = noise.id;
    let out = s.tick(DT, vec![noise]).await.unwrap();
    assert_eq!(out.actions_registered, 1);
    // Zero significance is not remembered
    let out = s.tick(DT, vec![Stimulus::new("warmth", 0.5)]).await.unwrap();
    assert_eq!(out.memories_recorded, 0);

    let mut fed_back = 0;
    for _ in 3..=12 {
        fed_back += s.tick(DT, vec![]).await.unwrap().feedback_records;
    }
    assert_eq!(fed_back, 1);
    assert_eq!(s.feedback().pending_count(), 0);

    let records: Vec<_> = s.memory().feedback_records().collect();
    assert_eq!(records.len(), 1);
    let record = records[0];
    assert_eq!(record.response_pattern.as_str(), "dampen");
    assert_eq!(record.stimulus_ids, vec![noise_id]);
    assert!((3..=10).contains(&record.delay_ticks));
    assert!((record.state_delta.energy - 1.0).abs() < 1e-9);
    assert!(!record.correlation_id.is_nil());
}

// ============================================================================
// Peripherals
// ============================================================================

fn snapshot_every_tick(timeout_ms: u64) -> AnimaConfig {
    let mut config = base_config();
    config.scheduler.snapshot_interval = 1;
    config.persistence.snapshot_timeout_ms = timeout_ms;
    config
}

#[tokio::test]
async fn test_slow_snapshot_times_out_and_tick_continues() {
    let mut s = Scheduler::new(
        snapshot_every_tick(20),
        Box::new(BaselineInterpreter::new()),
        Box::new(InMemoryArchiveStore::new()),
        Arc::new(SlowSink(Duration::from_millis(500))),
    )
    .unwrap();

    let out = s.tick(DT, vec![Stimulus::new("noise", 0.5)]).await.unwrap();
    assert_eq!(out.snapshot, Some(SnapshotStatus::TimedOut));
    assert!(out.degraded());
    assert!(s.status().degraded);
    assert_eq!(out.memories_recorded, 1);

    assert_eq!(s.tick(DT, vec![]).await.unwrap().tick, 2);
}

#[tokio::test]
async fn test_failing_snapshot_is_reported_not_fatal() {
    let mut s = Scheduler::new(
        snapshot_every_tick(100),
        Box::new(BaselineInterpreter::new()),
        Box::new(InMemoryArchiveStore::new()),
        Arc::new(FailingSink),
    )
    .unwrap();

    let out = s.tick(DT, vec![]).await.unwrap();
    assert!(matches!(out.snapshot, Some(SnapshotStatus::Failed(_))));
    assert!(!out.degraded());
    assert_eq!(s.lifecycle(), Lifecycle::Running);
}

#[tokio::test]
async fn test_archive_failure_keeps_entries_until_retry() {
    let mut config = base_config();
    config.scheduler.archive_interval = 2;
    config.memory.archive_max_age_secs = None;
    config.memory.archive_min_weight = Some(2.0);

    let store = InMemoryArchiveStore::new();
    store.set_unavailable(true);
    let mut s = Scheduler::new(
        config,
        Box::new(BaselineInterpreter::new()),
        Box::new(store.clone()),
        Arc::new(NullSnapshotSink),
    )
    .unwrap();

    s.tick(DT, vec![Stimulus::new("noise", 0.5)]).await.unwrap();
    let out = s.tick(DT, vec![]).await.unwrap();
    assert!(out.archive_failed);
    assert_eq!(out.archived, None);
    assert_eq!(s.memory().len(), 1);
    assert!(s.memory().archived().is_empty());

    store.set_unavailable(false);
    s.tick(DT, vec![]).await.unwrap();
    let out = s.tick(DT, vec![]).await.unwrap();
    assert_eq!(out.archived, Some(1));
    assert!(s.memory().is_empty());
    assert_eq!(store.saved().len(), 1);
}

// ============================================================================
// Commands
// ============================================================================

fn fast_adaptation_config() -> AnimaConfig {
    AnimaConfig {
        scheduler: SchedulerConfig {
            learning_interval: 1,
            adaptation_interval: 2,
            ..SchedulerConfig::default()
        },
        learning: LearningConfig {
            min_samples: 1,
            ..LearningConfig::default()
        },
        ..base_config()
    }
}

#[tokio::test]
async fn test_rollback_served_at_tick_boundary() {
    let mut s = build(fast_adaptation_config(), noise_learner());
    for _ in 0..4 {
        s.tick(DT, vec![Stimulus::new("noise", 1.0)]).await.unwrap();
    }
    let history = s.adaptation().history_entries();
    assert_eq!(history.len(), 2);

    let handle = s.handle();
    let (restored, tick) = tokio::join!(handle.rollback(RollbackTarget::StepsBack(1)), s.tick(DT, vec![]));
    tick.unwrap();
    let restored = restored.unwrap();

    assert_eq!(restored, history[0].new_params);
    assert_eq!(s.state().adaptation_params(), &history[0].new_params);
    let value = restored
        .get(ParamGroupKind::EventTypeSensitivity, "noise")
        .unwrap();
    assert!((value - 0.51).abs() < 1e-9);
}

#[tokio::test]
async fn test_rollback_to_missing_entry_is_rejected() {
    let mut s = build(fast_adaptation_config(), noise_learner());
    let handle = s.handle();
    let before = s.state().adaptation_params().clone();

    let (result, tick) = tokio::join!(handle.rollback(RollbackTarget::Index(7)), s.tick(DT, vec![]));
    tick.unwrap();
    assert!(matches!(result, Err(CoreError::Validation(_))));
    assert_eq!(s.state().adaptation_params(), &before);
}

#[tokio::test]
async fn test_history_query_through_handle() {
    let mut s = build(fast_adaptation_config(), noise_learner());
    for _ in 0..2 {
        s.tick(DT, vec![Stimulus::new("noise", 1.0)]).await.unwrap();
    }
    let handle = s.handle();
    let (history, tick) = tokio::join!(handle.adaptation_history(), s.tick(DT, vec![]));
    tick.unwrap();
    assert_eq!(history.unwrap(), s.adaptation().history_entries());
}

#[tokio::test]
async fn test_stop_through_handle_ends_run() {
    let mut s = build(base_config(), ScriptedInterpreter::default()).with_heartbeat(HeartbeatConfig::testing());
    let handle = s.handle();
    let mut source: VecDeque<Stimulus> = VecDeque::new();

    let (run, stop) = tokio::join!(s.run(&mut source), handle.stop());
    run.unwrap();
    stop.unwrap();

    assert_eq!(s.lifecycle(), Lifecycle::Stopped);
    assert_eq!(s.state().tick_count(), 1);
    let status = handle.stopped().await;
    assert_eq!(status.lifecycle, Lifecycle::Stopped);
    assert_eq!(status.tick_count, 1);
}

#[test]
fn test_spawned_heartbeat_stops_at_tick_limit() {
    let s = build(base_config(), BaselineInterpreter::new())
        .with_heartbeat(HeartbeatConfig::testing().with_tick_limit(5));
    let mut source = VecDeque::new();
    source.push_back(Stimulus::new("noise", 0.5));

    let handle = s.spawn(Box::new(source)).unwrap();
    let observer = handle.clone();
    handle.join().unwrap();

    let status = observer.status();
    assert_eq!(status.lifecycle, Lifecycle::Stopped);
    assert_eq!(status.tick_count, 5);
    assert_eq!(status.memory.active_count, 1);
    assert!(status.halted_by.is_none());
}

// ============================================================================
// Restart
// ============================================================================

#[tokio::test]
async fn test_restore_from_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let sink = JsonFileSnapshotSink::new(dir.path().join("snapshot.json"));

    let mut first = Scheduler::new(
        snapshot_every_tick(1_000),
        Box::new(BaselineInterpreter::new()),
        Box::new(InMemoryArchiveStore::new()),
        Arc::new(sink.clone()),
    )
    .unwrap();
    let out = first.tick(DT, vec![Stimulus::new("contact", 0.5)]).await.unwrap();
    assert_eq!(out.snapshot, Some(SnapshotStatus::Written));

    let payload = sink.load().await.unwrap().unwrap();
    let mut second = build(base_config(), BaselineInterpreter::new());
    second.restore(payload).unwrap();

    assert_eq!(second.state().tick_count(), 1);
    let (restored, original) = (second.state().vitals(), first.state().vitals());
    assert!((restored.integrity - original.integrity).abs() < 1e-9);
    assert!((restored.energy - original.energy).abs() < 1e-9);
    let ids = |s: &Scheduler| s.memory().active().iter().map(|e| e.id).collect::<Vec<_>>();
    assert_eq!(ids(&second), ids(&first));
    assert_eq!(second.status().tick_count, 1);
    assert_eq!(second.tick(DT, vec![]).await.unwrap().tick, 2);
}

#[tokio::test]
async fn test_corrupt_snapshot_changes_nothing() {
    let mut s = build(base_config(), BaselineInterpreter::new());
    s.tick(DT, vec![Stimulus::new("noise", 0.5)]).await.unwrap();
    let payload = s.snapshot_payload().unwrap();
    let mut fresh = build(base_config(), BaselineInterpreter::new());

    let mut unparsable = payload.clone();
    unparsable.active_memory = serde_json::json!("not a memory list");
    assert!(matches!(fresh.restore(unparsable), Err(CoreError::Persistence(_))));

    let mut bad_significance = payload.clone();
    bad_significance.active_memory[0]["significance"] = serde_json::json!(7.5);
    assert!(matches!(fresh.restore(bad_significance), Err(CoreError::Validation(_))));

    let mut bad_weight = payload.clone();
    bad_weight.active_memory[0]["weight"] = serde_json::json!(-3.0);
    assert!(matches!(fresh.restore(bad_weight), Err(CoreError::Validation(_))));

    let mut bad_archive = payload;
    bad_archive.archive_memory = bad_archive.active_memory.clone();
    bad_archive.archive_memory[0]["weight"] = serde_json::json!(f64::MAX);
    bad_archive.archive_memory[0]["significance"] = serde_json::json!(-0.5);
    assert!(matches!(fresh.restore(bad_archive), Err(CoreError::Validation(_))));

    assert_eq!(fresh.state().tick_count(), 0);
    assert!(fresh.memory().is_empty());
    assert!(fresh.memory().archived().is_empty());
}

#[tokio::test]
async fn test_restore_keeps_snapshot_epoch() {
    let mut first = build(base_config(), BaselineInterpreter::new());
    first.tick(DT, vec![Stimulus::new("contact", 0.5)]).await.unwrap();
    for _ in 0..20 {
        first.tick(DT, vec![]).await.unwrap();
    }
    let mut payload = first.snapshot_payload().unwrap();

    // Same snapshot as if written thirty days ago
    let shift = chrono::Duration::days(30);
    payload.epoch = payload.epoch - shift;
    let mut entries: Vec<MemoryEntry> = serde_json::from_value(payload.active_memory).unwrap();
    for entry in &mut entries {
        entry.timestamp = entry.timestamp - shift;
    }
    payload.active_memory = serde_json::to_value(&entries).unwrap();
    let epoch = payload.epoch;

    let mut second = build(base_config(), BaselineInterpreter::new());
    second.restore(payload).unwrap();

    assert_eq!(second.epoch(), epoch);
    assert_eq!(second.clock(), epoch + (first.clock() - first.epoch()));
    let age = |s: &Scheduler| s.memory().active()[0].age_secs(s.clock());
    assert!((age(&second) - age(&first)).abs() < 1e-9);
    assert!((age(&second) - 2.0).abs() < 0.002);

    second.tick(DT, vec![]).await.unwrap();
    assert!((age(&second) - 2.1).abs() < 0.002);
}

// ============================================================================
// Ownership
// ============================================================================

#[test]
fn test_tick_from_second_thread_is_rejected() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut s = build(base_config(), ScriptedInterpreter::default());
    runtime.block_on(s.tick(DT, vec![])).unwrap();

    let result = std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(s.tick(DT, vec![])).map(|out| out.tick)
    })
    .join();

    if cfg!(debug_assertions) {
        // Debug builds fail loudly
        assert!(result.is_err());
    } else {
        assert!(matches!(result, Ok(Err(CoreError::ConcurrencyViolation { .. }))));
    }
}

//! End-to-end checks of the memory, feedback and learning engines on the
//! reference scenarios.

use anima_core::config::{FeedbackConfig, LearningConfig, MemoryConfig};
use anima_core::{BehaviorParams, ParamGroupKind, ParamKey, ValidationError, Vitals};
use anima_memory::{
    ActionOrigin, FeedbackCorrelator, InMemoryArchiveStore, JsonArchiveStore, LearningEngine,
    MemoryEngine, MemoryEntry, FEEDBACK_EVENT_TYPE,
};
use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

fn correlator() -> FeedbackCorrelator {
    FeedbackCorrelator::new(FeedbackConfig {
        seed: Some(100),
        ..FeedbackConfig::default()
    })
}

#[test]
fn test_dampen_feedback_after_five_ticks() {
    let mut fc = correlator();
    let before = Vitals {
        energy: 50.0,
        ..Vitals::default()
    };
    let correlation_id = Uuid::new_v4();
    fc.register_with_window(
        ParamKey::new("dampen").unwrap(),
        before,
        100,
        ActionOrigin::new(vec![], correlation_id),
        5,
    )
    .unwrap();

    let mut records = Vec::new();
    for tick in 101..=105 {
        let now = if tick < 105 {
            before
        } else {
            Vitals {
                energy: 49.5,
                ..before
            }
        };
        records.extend(fc.resolve(tick, now).records);
    }

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].delay_ticks, 5);
    assert!((records[0].state_delta.energy - (-0.5)).abs() < 1e-9);
    assert_eq!(records[0].correlation_id, correlation_id);

    // Stored as a zero-significance memory
    let mut mem = MemoryEngine::new(MemoryConfig::default(), Box::new(InMemoryArchiveStore::new())).unwrap();
    mem.record(MemoryEntry::from_feedback(records.remove(0), Utc::now(), 1.0));
    assert_eq!(mem.active()[0].event_type, FEEDBACK_EVENT_TYPE);
    assert_eq!(mem.active()[0].significance, 0.0);
    assert_eq!(mem.feedback_records().count(), 1);
}

#[test]
fn test_sixty_entries_keep_fifty_heaviest_in_order() {
    let mut mem = MemoryEngine::new(MemoryConfig::default(), Box::new(InMemoryArchiveStore::new())).unwrap();
    let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut ids = Vec::new();
    for i in 0..60 {
        // Strictly increasing weights, all above the eviction floor
        let weight = 0.1 + i as f64 * 0.01;
        let entry = MemoryEntry::new("noise", 0.5, t0 + Duration::seconds(i), weight);
        ids.push(entry.id);
        mem.record(entry);
    }

    assert_eq!(mem.len(), 50);
    let kept: Vec<Uuid> = mem.active().iter().map(|e| e.id).collect();
    assert_eq!(kept, ids[10..].to_vec());
}

#[test]
fn test_noise_sensitivity_climbs_to_half_in_thirty_runs() {
    let engine = LearningEngine::new(LearningConfig::default());
    let t0 = Utc::now();
    let memory: Vec<MemoryEntry> = (0..20)
        .map(|i| MemoryEntry::new("noise", 0.5, t0 + Duration::seconds(i), 1.0))
        .collect();

    let mut params = BehaviorParams::default();
    params
        .event_type_sensitivity
        .set(ParamKey::new("noise").unwrap(), 0.20)
        .unwrap();

    let mut previous = 0.20;
    for _ in 0..30 {
        params = engine.run(&memory, &[], &params).unwrap().unwrap().params;
        let value = params
            .get(ParamGroupKind::EventTypeSensitivity, "noise")
            .unwrap();
        assert!(value - previous <= 0.01 + 1e-9);
        assert!(value <= 0.50 + 1e-9);
        previous = value;
    }
    assert!((previous - 0.50).abs() < 1e-9);
}

#[test]
fn test_window_beyond_bound_rejected_at_registration() {
    let mut fc = correlator();
    let err = fc
        .register_with_window(
            ParamKey::new("dampen").unwrap(),
            Vitals::default(),
            100,
            ActionOrigin::default(),
            15,
        )
        .unwrap_err();
    assert!(matches!(err, ValidationError::ResolutionWindow { window: 15, .. }));
    assert_eq!(fc.pending_count(), 0);
}

#[test]
fn test_archive_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.json");
    let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    {
        let mut mem = MemoryEngine::new(MemoryConfig::default(), Box::new(JsonArchiveStore::new(&path))).unwrap();
        mem.record(MemoryEntry::new("noise", 0.5, t0, 0.01));
        mem.record(MemoryEntry::new("contact", 0.5, t0, 1.0));
        let criteria = anima_memory::ArchiveCriteria {
            min_weight: Some(0.05),
            ..Default::default()
        };
        assert_eq!(mem.archive(&criteria, t0).unwrap(), 1);
    }

    let mem = MemoryEngine::new(MemoryConfig::default(), Box::new(JsonArchiveStore::new(&path))).unwrap();
    assert_eq!(mem.archived().len(), 1);
    assert_eq!(mem.archived()[0].event_type, "noise");
    assert!(mem.is_empty());
}

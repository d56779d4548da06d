//! Tests for reverie-core: categories, axis values, triggers, energy, records, events, errors

use chrono::{Duration, Utc};
use reverie_core::*;
use std::sync::{Arc, Mutex};

// ===========================================================================
// Category
// ===========================================================================

#[test]
fn category_parse_is_lenient() {
    assert_eq!(Category::parse("ethical"), Some(Category::Ethical));
    assert_eq!(Category::parse("  Existential. "), Some(Category::Existential));
    assert_eq!(Category::parse("**CREATIVE**"), Some(Category::Creative));
    assert_eq!(Category::parse("astrology"), None);
    assert_eq!(Category::parse(""), None);
}

#[test]
fn category_serializes_lowercase() {
    assert_eq!(
        serde_json::to_string(&Category::Metacognitive).unwrap(),
        r#""metacognitive""#
    );
    let back: Category = serde_json::from_str(r#""social""#).unwrap();
    assert_eq!(back, Category::Social);
}

#[test]
fn deeper_categories_cost_more_energy() {
    assert!(Category::Existential.energy_cost() > Category::Emotional.energy_cost());
    assert!(Category::Philosophical.depth() > Category::Social.depth());
}

#[test]
fn every_category_has_an_affinity_axis() {
    let axes: std::collections::HashSet<Axis> =
        Category::ALL.iter().map(|c| c.affinity()).collect();
    assert_eq!(axes.len(), 3, "all three axes should be reachable");
}

// ===========================================================================
// AxisTriple / AxisWeights
// ===========================================================================

#[test]
fn axis_triple_get_set() {
    let mut t = AxisTriple::new(0.1, 0.2, 0.3);
    assert_eq!(t.get(Axis::Coherence), 0.2);
    t.set(Axis::Dissonance, 0.9);
    assert_eq!(t.dissonance, 0.9);
    assert!((t.sum() - 1.2).abs() < 1e-12);
}

#[test]
fn axis_triple_detects_non_finite() {
    assert!(AxisTriple::new(0.1, 0.2, 0.3).is_finite());
    assert!(!AxisTriple::new(f64::NAN, 0.2, 0.3).is_finite());
    assert!(!AxisTriple::new(0.1, f64::INFINITY, 0.3).is_finite());
}

#[test]
fn default_split_sums_to_one() {
    let w = AxisWeights::default_split();
    assert!((w.values.sum() - 1.0).abs() < 1e-12);
    assert_eq!(w.version, 0);
    assert!(w.is_valid(0.1, 0.6));
}

#[test]
fn weights_out_of_bounds_are_invalid() {
    let mut w = AxisWeights::default_split();
    w.values = AxisTriple::new(0.05, 0.45, 0.5);
    assert!(!w.is_valid(0.1, 0.6));
}

#[test]
fn weight_history_row_roundtrips_weights() {
    let mut w = AxisWeights::default_split();
    w.version = 7;
    let row = WeightHistoryRow::from_weights(&w, "manual", serde_json::json!({"k": 1}));
    assert_eq!(row.version, 7);
    assert_eq!(row.trigger_type, "manual");
    assert_eq!(row.to_weights().values, w.values);
}

#[test]
fn axis_weights_serialize_flat() {
    let w = AxisWeights::default_split();
    let json = serde_json::to_value(&w).unwrap();
    assert_eq!(json["empathy"], 0.33);
    assert_eq!(json["dissonance"], 0.34);
    assert_eq!(json["version"], 0);
}

// ===========================================================================
// Trigger
// ===========================================================================

#[test]
fn trigger_priority_tracks_importance() {
    assert_eq!(priority_for(0.0), 1);
    assert_eq!(priority_for(0.5), 3);
    assert_eq!(priority_for(1.0), 4);
    assert_eq!(priority_for(7.0), 4);
}

#[test]
fn trigger_new_clamps_importance() {
    let t = Trigger::new(
        "What is owed to strangers?",
        Category::Ethical,
        3.0,
        TriggerSource::Manual,
        serde_json::Value::Null,
    );
    assert_eq!(t.importance, 1.0);
    assert_eq!(t.priority, 4);
    assert_eq!(t.energy_cost, Category::Ethical.energy_cost());
    assert!(!t.id.is_empty());

    let nan = Trigger::new("q", Category::Social, f64::NAN, TriggerSource::Backlog, serde_json::Value::Null);
    assert_eq!(nan.importance, 0.5);
}

// ===========================================================================
// EnergyState
// ===========================================================================

#[test]
fn energy_consume_and_ratio() {
    let mut e = EnergyState::full(100.0, 1.0);
    e.consume(30.0);
    assert!((e.ratio() - 0.7).abs() < 1e-12);
    e.consume(500.0);
    assert_eq!(e.available, 0.0);
    assert_eq!(e.ratio(), 0.0);
}

#[test]
fn energy_recovers_with_time_and_caps() {
    let mut e = EnergyState::full(100.0, 2.0);
    e.consume(50.0);
    let later = e.updated_at + Duration::minutes(10);
    e.recover(later);
    assert!((e.available - 70.0).abs() < 1e-9);
    e.recover(later + Duration::hours(10));
    assert_eq!(e.available, 100.0);
}

#[test]
fn energy_zero_maximum_has_zero_ratio() {
    let e = EnergyState::full(0.0, 1.0);
    assert_eq!(e.ratio(), 0.0);
}

// ===========================================================================
// MemoryRecord
// ===========================================================================

#[test]
fn memory_record_accessors() {
    let idea = UnresolvedIdea::new("Why do we dream?", Category::Scientific, 0.8);
    let rec: MemoryRecord = idea.clone().into();
    assert_eq!(rec.kind(), MemoryKind::UnresolvedIdea);
    assert_eq!(rec.id(), idea.id);
    assert_eq!(rec.text(), "Why do we dream?");
    assert_eq!(rec.weight(), 0.8);
}

#[test]
fn memory_record_tagged_serde() {
    let rec: MemoryRecord = CoreBelief::new("Kindness compounds", 0.7).into();
    let json = serde_json::to_string(&rec).unwrap();
    assert!(json.contains(r#""kind":"core_belief""#));
    let back: MemoryRecord = serde_json::from_str(&json).unwrap();
    assert_eq!(back, rec);
}

#[test]
fn insight_thought_has_insight_origin() {
    let t = SignificantThought::insight("Both can hold", 0.3);
    assert_eq!(t.origin, ThoughtOrigin::Insight);
    assert_eq!(t.confidence, 0.3);
}

#[test]
fn transient_kinds_exclude_beliefs_and_logs() {
    assert!(!MemoryKind::TRANSIENT.contains(&MemoryKind::CoreBelief));
    assert!(!MemoryKind::TRANSIENT.contains(&MemoryKind::SleepLog));
}

// ===========================================================================
// Events
// ===========================================================================

#[test]
fn event_serializes_with_tag() {
    let event = Event::GenerationDenied {
        denial: GateDenial::GlobalCooldown { remaining_ms: 1500 },
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["event"], "generation_denied");
    assert_eq!(json["denial"]["reason"], "global_cooldown");
    assert_eq!(json["denial"]["remaining_ms"], 1500);
    assert_eq!(event.name(), "generation_denied");
}

#[test]
fn closure_is_an_event_sink() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = seen.clone();
    let sink = move |e: Event| captured.lock().unwrap().push(e.name());
    sink.emit(Event::ConsolidationStarted {
        reason: "manual".into(),
    });
    NullSink.emit(Event::ConsolidationStarted {
        reason: "ignored".into(),
    });
    assert_eq!(seen.lock().unwrap().as_slice(), &["consolidation_started"]);
}

#[test]
fn gate_denial_display() {
    let d = GateDenial::Burst {
        count: 5,
        limit: 5,
        resets_in_ms: 1000,
    };
    assert_eq!(d.to_string(), "burst limit 5/5, resets in 1000ms");
    assert!(GateDenial::Dormant.to_string().contains("dormant"));
}

// ===========================================================================
// Error
// ===========================================================================

#[test]
fn error_display() {
    let e = Error::repository("insert", "disk full");
    assert_eq!(e.to_string(), "repository error: insert - disk full");
    assert_eq!(Error::Timeout(250).to_string(), "timed out after 250ms");
    assert_eq!(Error::config("bad").to_string(), "config error: bad");
}

#[test]
fn error_from_json() {
    let err: Error = serde_json::from_str::<serde_json::Value>("{nope")
        .unwrap_err()
        .into();
    assert!(matches!(err, Error::JsonError(_)));
}

#[test]
fn deliberation_new_assigns_id() {
    let d = Deliberation::new(
        "t-1",
        vec![Statement {
            agent: "a".into(),
            content: "x".into(),
            confidence: 0.5,
            emotional_tone: None,
        }],
        vec![],
        SafetyAudit::default(),
    );
    assert_eq!(d.trigger_id, "t-1");
    assert!(!d.id.is_empty());
    assert!(d.completed_at <= Utc::now());
}

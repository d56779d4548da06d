//! Integration tests for reverie-engine
//!
//! These exercise the public API across component boundaries:
//! - weight adaptation invariants over long score sequences
//! - gate, dormancy and consolidation interplay
//! - configuration files on disk
//! - events emitted by a full cycle
//! - persistence surviving a restart
//! - consolidation waiting out an in-flight cycle

use async_trait::async_trait;
use chrono::Utc;
use reverie_core::{
    Axis, AxisTriple, Category, Critique, Deliberation, Event, GateDenial, MemoryKind, Result,
    SafetyAudit, Statement, Trigger, UnresolvedIdea,
};
use reverie_engine::config::{CooldownConfig, ScoringMode, WeightConfig};
use reverie_engine::{
    BroadcastSink, CooldownGate, Deliberator, Dormancy, EngineConfig, Entropy, GateDecision,
    InMemoryRepository, JsonFileRepository, Mind, TickOutcome, WeightAdapter, WeightOutcome,
};
use reverie_llm::{CancellationToken, ScriptedEvaluator};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Agreeable;

#[async_trait]
impl Deliberator for Agreeable {
    async fn deliberate(&self, trigger: &Trigger, _: &CancellationToken) -> Result<Deliberation> {
        Ok(Deliberation::new(
            trigger.id.clone(),
            vec![
                Statement {
                    agent: "analyst".into(),
                    content: "Care for others grounds fairness".into(),
                    confidence: 0.8,
                    emotional_tone: Some("warm".into()),
                },
                Statement {
                    agent: "skeptic".into(),
                    content: "Mostly agreed".into(),
                    confidence: 0.7,
                    emotional_tone: None,
                },
            ],
            vec![Critique {
                from: "skeptic".into(),
                to: "analyst".into(),
                content: "Well put".into(),
                offers_alternative: Some(false),
            }],
            SafetyAudit { passed: true, ..Default::default() },
        ))
    }
}

fn offline_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.scoring.mode = ScoringMode::HeuristicOnly;
    config.trigger.evolved_probability = 0.0;
    config.cooldown.global_cooldown_ms = 0;
    config.cooldown.category_base_ms = 0;
    config.cooldown.depth_step_ms = 0;
    config.cooldown.max_burst_count = 1000;
    config
}

// ============================================================
// Weight adaptation invariants
// ============================================================

#[test]
fn weights_stay_on_simplex_for_random_scores() {
    let config = WeightConfig::default();
    let (min, max) = (config.min_weight, config.max_weight);
    let mut adapter = WeightAdapter::new(config, Entropy::seeded(3));
    let mut scores = Entropy::seeded(99);

    for _ in 0..500 {
        let observed = AxisTriple::new(scores.unit(), scores.unit(), scores.unit());
        match adapter.update(&observed) {
            WeightOutcome::Updated(u) => {
                assert!((u.weights.values.sum() - 1.0).abs() < 1e-6);
                for axis in Axis::ALL {
                    let w = u.weights.get(axis);
                    assert!(w >= min - 1e-9 && w <= max + 1e-9, "{:?} = {}", axis, w);
                }
            }
            other => panic!("unexpected reset: {:?}", other),
        }
    }
    assert!(adapter.learning_rate() >= 0.01);
}

#[test]
fn identical_scores_settle_within_twenty_cycles() {
    let mut adapter = WeightAdapter::new(WeightConfig::default(), Entropy::seeded(1));
    let observed = AxisTriple::new(0.5, 0.5, 0.5);
    for _ in 0..20 {
        adapter.update(&observed);
    }
    assert!(adapter.last_magnitude().unwrap() < 0.01);
}

#[test]
fn nan_scores_reset_to_default_split() {
    let mut adapter = WeightAdapter::new(WeightConfig::default(), Entropy::seeded(1));
    adapter.update(&AxisTriple::new(0.9, 0.1, 0.1));
    match adapter.update(&AxisTriple::new(f64::NAN, 0.5, 0.5)) {
        WeightOutcome::Reset { weights, .. } => {
            assert!((weights.values.empathy - 0.33).abs() < 1e-9);
            assert!((weights.values.coherence - 0.33).abs() < 1e-9);
            assert!((weights.values.dissonance - 0.34).abs() < 1e-9);
            assert_eq!(weights.version, 2);
        }
        other => panic!("expected reset, got {:?}", other),
    }
}

// ============================================================
// Gate and dormancy
// ============================================================

#[test]
fn dormancy_closes_the_gate() {
    let dormancy = Dormancy::new();
    let gate = CooldownGate::new(CooldownConfig::default(), dormancy.clone());
    let now = Utc::now();
    assert!(gate.can_generate(1.0, 0.0, now).is_allowed());

    let guard = dormancy.try_enter().unwrap();
    assert_eq!(gate.can_generate(1.0, 0.0, now), GateDecision::Denied(GateDenial::Dormant));
    drop(guard);
    assert!(gate.can_generate(1.0, 0.0, now).is_allowed());
}

#[test]
fn attempts_within_global_cooldown_denied() {
    let mut gate = CooldownGate::new(CooldownConfig::default(), Dormancy::new());
    let now = Utc::now();
    gate.record_generation(Category::Creative, 1.0, 0.0, now);
    let later = now + chrono::Duration::seconds(10);
    assert!(matches!(
        gate.can_generate(1.0, 0.0, later),
        GateDecision::Denied(GateDenial::GlobalCooldown { .. })
    ));
}

// ============================================================
// Configuration files
// ============================================================

#[test]
fn config_file_overrides_and_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reverie.toml");
    std::fs::write(
        &path,
        "[weights]\nlearning_rate = 0.05\n\n[trigger]\nevolved_probability = 0.5\n\n\
         [[trigger.seed_questions]]\nquestion = \"What is home?\"\ncategory = \"existential\"\n",
    )
    .unwrap();

    let config = EngineConfig::load(&path);
    assert_eq!(config.weights.learning_rate, 0.05);
    assert_eq!(config.weights.max_weight, 0.6);
    assert_eq!(config.trigger.evolved_probability, 0.5);
    assert_eq!(config.trigger.seed_questions.len(), 1);
    assert_eq!(config.trigger.seed_questions[0].importance, 0.5);
    assert!(config.validate().is_ok());
}

#[test]
fn broken_config_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reverie.toml");
    std::fs::write(&path, "[weights\nlearning_rate = ").unwrap();
    let config = EngineConfig::load(&path);
    assert_eq!(config.weights.learning_rate, WeightConfig::default().learning_rate);
}

#[test]
fn dumped_defaults_load_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reverie.toml");
    std::fs::write(&path, EngineConfig::default().to_toml()).unwrap();
    let config = EngineConfig::load(&path);
    assert_eq!(config.cooldown.global_cooldown_ms, 30_000);
    assert_eq!(config.consolidation.failsafe_age_hours, 48);
}

// ============================================================
// Full cycles
// ============================================================

#[tokio::test]
async fn cycle_emits_events_in_order() {
    let sink = BroadcastSink::new(64);
    let mut rx = sink.subscribe();
    let mind = Mind::new(
        offline_config(),
        Arc::new(InMemoryRepository::new()),
        Arc::new(ScriptedEvaluator::failing()),
        Arc::new(Agreeable),
        Arc::new(sink),
        Entropy::seeded(8),
    )
    .unwrap();

    mind.enqueue("What makes a promise binding?", Category::Ethical, 0.7).await;
    assert!(matches!(mind.tick(0.0, &CancellationToken::new()).await, TickOutcome::Completed { .. }));

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec!["trigger_generated", "cooldown_state", "scores_computed", "weights_updated"]
    );
}

#[tokio::test]
async fn weights_and_memory_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("memory.json");
    let cancel = CancellationToken::new();

    let version = {
        let repo = Arc::new(JsonFileRepository::open(&path).await.unwrap());
        let mind = Mind::new(
            offline_config(),
            repo,
            Arc::new(ScriptedEvaluator::failing()),
            Arc::new(Agreeable),
            Arc::new(reverie_core::NullSink),
            Entropy::seeded(2),
        )
        .unwrap();
        for q in ["Is trust earned?", "Can art be wrong?", "Why do we remember?"] {
            mind.enqueue(q, Category::Philosophical, 0.6).await;
            assert!(matches!(mind.tick(0.0, &cancel).await, TickOutcome::Completed { .. }));
        }
        mind.weights().await.version
    };
    assert_eq!(version, 3);

    let repo = Arc::new(JsonFileRepository::open(&path).await.unwrap());
    let snapshot = repo.snapshot().await;
    assert_eq!(snapshot.weight_history.len(), 3);
    assert_eq!(snapshot.score_history.len(), 3);
    // Both statements clear the default 0.6 confidence bar.
    assert_eq!(snapshot.count(MemoryKind::SignificantThought), 6);

    let mind = Mind::new(
        offline_config(),
        repo,
        Arc::new(ScriptedEvaluator::failing()),
        Arc::new(Agreeable),
        Arc::new(reverie_core::NullSink),
        Entropy::seeded(2),
    )
    .unwrap();
    mind.restore().await;
    assert_eq!(mind.weights().await.version, 3);
}

#[tokio::test]
async fn manual_consolidation_emits_phase_events() {
    let sink = BroadcastSink::new(64);
    let mut rx = sink.subscribe();
    let mind = Mind::new(
        offline_config(),
        Arc::new(InMemoryRepository::new()),
        Arc::new(ScriptedEvaluator::failing()),
        Arc::new(Agreeable),
        Arc::new(sink),
        Entropy::seeded(4),
    )
    .unwrap();

    let log = mind
        .consolidate(reverie_engine::ConsolidationReason::Manual("test".into()), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(log.reason, "manual: test");

    let mut phases = 0;
    let mut completed = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            Event::ConsolidationPhase { .. } => phases += 1,
            Event::ConsolidationCompleted { .. } => completed = true,
            _ => {}
        }
    }
    assert_eq!(phases, 4);
    assert!(completed);
}

#[tokio::test]
async fn manual_consolidation_waits_for_running_cycle() {
    let sink = BroadcastSink::new(64);
    let mut rx = sink.subscribe();
    let mut config = offline_config();
    config.trigger.evolved_probability = 1.0;
    let evaluator = ScriptedEvaluator::new().delay_when(
        "pose one new question",
        Duration::from_millis(300),
        "QUESTION: Is doubt a virtue?\nCATEGORY: Philosophical",
    );
    let mind = Mind::new(
        config,
        Arc::new(InMemoryRepository::new()),
        Arc::new(evaluator),
        Arc::new(Agreeable),
        Arc::new(sink),
        Entropy::seeded(6),
    )
    .unwrap();
    mind.store()
        .insert(UnresolvedIdea::new("Why keep promises?", Category::Ethical, 0.7))
        .await;
    let cancel = CancellationToken::new();

    let (outcome, log) = tokio::join!(mind.tick(0.0, &cancel), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        mind.consolidate(reverie_engine::ConsolidationReason::Manual("overlap".into()), &cancel)
            .await
    });
    match outcome {
        TickOutcome::Completed { report } => assert_eq!(report.trigger.question, "Is doubt a virtue?"),
        other => panic!("expected completed cycle, got {:?}", other),
    }
    assert!(log.is_some());

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    let position = |name: &str| names.iter().position(|n| *n == name);
    let started = position("consolidation_started").unwrap();
    assert!(position("trigger_generated").unwrap() < started);
    assert!(position("weights_updated").unwrap() < started);
}

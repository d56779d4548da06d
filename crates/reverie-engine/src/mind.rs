//! The thinking loop
//!
//! `Mind` owns the gate, scheduler, scorer and weight adapter behind one cycle
//! lock, so at most one cycle runs at a time. Consolidation takes the same lock
//! and shares the energy pool and the dormancy flag.
//!
//! One tick:
//!   recover energy → maybe consolidate → gate → next trigger → deliberate
//!   → score → adapt weights → persist thoughts and unresolved questions

use crate::config::EngineConfig;
use crate::consolidation::{ConsolidationReason, ConsolidationScheduler};
use crate::cooldown::{CooldownGate, CooldownStatus, GateDecision};
use crate::deliberation::Deliberator;
use crate::dormancy::Dormancy;
use crate::entropy::Entropy;
use crate::repository::Repository;
use crate::score::{ScoreEngine, ScoredCycle, SystemState};
use crate::store::Store;
use crate::trigger::TriggerScheduler;
use crate::weights::{WeightAdapter, WeightOutcome};
use chrono::Utc;
use reverie_core::{
    AxisWeights, Category, Deliberation, EnergyState, Event, EventSink, GateDenial, Result,
    SignificantThought, SleepLog, Trigger, UnresolvedIdea, WeightHistoryRow,
};
use reverie_llm::{CancellationToken, Evaluator};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct CycleState {
    gate: CooldownGate,
    scheduler: TriggerScheduler,
    scorer: ScoreEngine,
    weights: WeightAdapter,
}

/// Everything one completed cycle produced.
#[derive(Clone, Debug, Serialize)]
pub struct CycleReport {
    pub trigger: Trigger,
    pub deliberation: Deliberation,
    pub scored: ScoredCycle,
    pub weights: AxisWeights,
    pub weights_reset: bool,
    pub thoughts_kept: usize,
    pub unresolved: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// The gate refused to generate.
    Denied { denial: GateDenial },
    /// Nothing to think about.
    Idle,
    /// A consolidation pass ran instead of a cycle.
    Consolidated { log: SleepLog },
    /// A trigger was generated but its deliberation failed.
    Failed { trigger: Trigger, reason: String },
    Completed { report: Box<CycleReport> },
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub completed: u64,
    pub denied: u64,
    pub idle: u64,
    pub failed: u64,
    pub consolidations: u64,
}

impl RunSummary {
    fn count(&mut self, outcome: &TickOutcome) {
        self.ticks += 1;
        match outcome {
            TickOutcome::Denied { .. } => self.denied += 1,
            TickOutcome::Idle => self.idle += 1,
            TickOutcome::Consolidated { .. } => self.consolidations += 1,
            TickOutcome::Failed { .. } => self.failed += 1,
            TickOutcome::Completed { .. } => self.completed += 1,
        }
    }
}

/// Monitoring snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct MindStatus {
    pub weights: AxisWeights,
    pub learning_rate: f64,
    pub convergence: Option<f64>,
    pub energy: EnergyState,
    pub cooldown: CooldownStatus,
    pub category_distribution: BTreeMap<Category, f64>,
    pub pending_manual: usize,
    pub consolidating: bool,
}

pub struct Mind {
    config: EngineConfig,
    store: Store,
    deliberator: Arc<dyn Deliberator>,
    sink: Arc<dyn EventSink>,
    energy: Arc<Mutex<EnergyState>>,
    cycle: Mutex<CycleState>,
    consolidation: ConsolidationScheduler,
}

impl Mind {
    /// Wire the components together. Fails only on invalid configuration.
    pub fn new(
        config: EngineConfig,
        repository: Arc<dyn Repository>,
        evaluator: Arc<dyn Evaluator>,
        deliberator: Arc<dyn Deliberator>,
        sink: Arc<dyn EventSink>,
        mut entropy: Entropy,
    ) -> Result<Self> {
        config.validate()?;

        let store = Store::new(repository, Duration::from_millis(config.store.timeout_ms));
        let evaluator_timeout = config.evaluator.timeout();
        let dormancy = Dormancy::new();
        let energy = Arc::new(Mutex::new(EnergyState::full(
            config.energy.maximum,
            config.energy.recovery_per_minute,
        )));

        let cycle = CycleState {
            gate: CooldownGate::new(config.cooldown.clone(), dormancy.clone()),
            scheduler: TriggerScheduler::new(
                config.trigger.clone(),
                store.clone(),
                evaluator.clone(),
                evaluator_timeout,
                entropy.fork(),
            ),
            scorer: ScoreEngine::new(config.scoring.clone(), evaluator.clone(), evaluator_timeout),
            weights: WeightAdapter::new(config.weights.clone(), entropy.fork()),
        };

        let consolidation = ConsolidationScheduler::new(
            config.consolidation.clone(),
            &config.energy,
            store.clone(),
            evaluator,
            evaluator_timeout,
            dormancy,
            energy.clone(),
            sink.clone(),
        );

        Ok(Self {
            config,
            store,
            deliberator,
            sink,
            energy,
            cycle: Mutex::new(cycle),
            consolidation,
        })
    }

    /// Pick up persisted weights and the last cycle's scores.
    pub async fn restore(&self) {
        let mut cycle = self.cycle.lock().await;
        cycle.weights.restore(&self.store).await;
        let previous = self.store.score_history(1).await.into_iter().next().map(|s| s.values);
        cycle.scorer.set_previous(previous);
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Queue an explicit question for the next cycle.
    pub async fn enqueue(&self, question: impl Into<String>, category: Category, importance: f64) -> Trigger {
        self.cycle.lock().await.scheduler.enqueue(question, category, importance)
    }

    pub async fn weights(&self) -> AxisWeights {
        self.cycle.lock().await.weights.weights().clone()
    }

    pub async fn energy(&self) -> EnergyState {
        self.energy.lock().await.clone()
    }

    pub async fn status(&self) -> MindStatus {
        let now = Utc::now();
        let energy = self.energy().await;
        let cycle = self.cycle.lock().await;
        MindStatus {
            weights: cycle.weights.weights().clone(),
            learning_rate: cycle.weights.learning_rate(),
            convergence: cycle.weights.convergence_metric(),
            energy,
            cooldown: cycle.gate.status(now),
            category_distribution: cycle.scheduler.category_distribution(),
            pending_manual: cycle.scheduler.pending_manual(),
            consolidating: self.consolidation.is_running(),
        }
    }

    /// Run consolidation now. Waits for an in-flight cycle to finish first.
    /// `None` when a pass is already running.
    pub async fn consolidate(&self, reason: ConsolidationReason, cancel: &CancellationToken) -> Option<SleepLog> {
        let _cycle = self.cycle.lock().await;
        self.consolidation.run(reason, cancel).await
    }

    /// One gated cycle.
    pub async fn tick(&self, system_load: f64, cancel: &CancellationToken) -> TickOutcome {
        let now = Utc::now();
        let energy = {
            let mut energy = self.energy.lock().await;
            energy.recover(now);
            energy.clone()
        };

        // Held for the whole cycle; consolidation never overlaps generation.
        let mut guard = self.cycle.lock().await;
        if let Some(reason) = self.consolidation.should_consolidate(&energy, now) {
            return match self.consolidation.run(reason, cancel).await {
                Some(log) => TickOutcome::Consolidated { log },
                None => TickOutcome::Idle,
            };
        }

        let cycle = &mut *guard;
        let energy_ratio = energy.ratio();

        if let GateDecision::Denied(denial) = cycle.gate.can_generate(energy_ratio, system_load, now) {
            debug!("Generation denied: {}", denial);
            self.sink.emit(Event::GenerationDenied { denial: denial.clone() });
            return TickOutcome::Denied { denial };
        }

        let weights = cycle.weights.weights().clone();
        let gate = &cycle.gate;
        let trigger = match cycle
            .scheduler
            .next_trigger(|c| gate.category_ready(c, now), &weights, cancel)
            .await
        {
            Some(t) => t,
            None => {
                debug!("No trigger available");
                return TickOutcome::Idle;
            }
        };

        cycle.gate.record_generation(trigger.category, energy_ratio, system_load, now);
        let cooldown = cycle.gate.status(now);
        self.sink.emit(Event::TriggerGenerated { trigger: trigger.clone() });
        self.sink.emit(Event::CooldownState {
            global_remaining_ms: cooldown.global_remaining_ms,
            burst_count: cooldown.burst_count,
            burst_limit: cooldown.burst_limit,
        });
        self.energy.lock().await.consume(trigger.energy_cost);

        info!("Deliberating on [{}] {}", trigger.category, trigger.question);
        let timeout = Duration::from_millis(self.config.cycle.deliberation_timeout_ms);
        let deliberation = match tokio::time::timeout(timeout, self.deliberator.deliberate(&trigger, cancel)).await {
            Ok(Ok(d)) => d,
            Ok(Err(e)) => {
                warn!("Deliberation on {} failed: {}", trigger.id, e);
                return TickOutcome::Failed { trigger, reason: e.to_string() };
            }
            Err(_) => {
                warn!("Deliberation on {} timed out after {}ms", trigger.id, timeout.as_millis());
                return TickOutcome::Failed { trigger, reason: format!("timed out after {}ms", timeout.as_millis()) };
            }
        };

        if cycle.scheduler.consume(&trigger).await {
            debug!("Backlog idea behind {} consumed", trigger.id);
        }

        let system = SystemState { energy_ratio: self.energy.lock().await.ratio(), system_load };
        let scored = cycle.scorer.score(&trigger, &deliberation, &weights, system, cancel).await;
        self.store.append_scores(scored.scores.clone()).await;
        self.sink.emit(Event::ScoresComputed {
            scores: scored.scores.clone(),
            paradigm_shift: scored.is_paradigm_shift(),
        });

        let (new_weights, weights_reset) = self.apply_weights(cycle, &trigger, &scored).await;
        let (thoughts_kept, unresolved) = self.remember(&trigger, &deliberation, &scored).await;

        TickOutcome::Completed {
            report: Box::new(CycleReport {
                trigger,
                deliberation,
                scored,
                weights: new_weights,
                weights_reset,
                thoughts_kept,
                unresolved,
            }),
        }
    }

    async fn apply_weights(&self, cycle: &mut CycleState, trigger: &Trigger, scored: &ScoredCycle) -> (AxisWeights, bool) {
        let context = json!({
            "trigger_id": trigger.id,
            "deliberation_id": scored.scores.context.deliberation_id,
            "scores": scored.scores.values,
        });
        match cycle.weights.update(&scored.scores.values) {
            WeightOutcome::Updated(update) => {
                let row = WeightHistoryRow::from_weights(&update.weights, trigger.source.as_str(), context);
                self.store.append_weights(row).await;
                self.sink.emit(Event::WeightsUpdated {
                    weights: update.weights.clone(),
                    magnitude: update.magnitude,
                    perturbed: update.perturbed,
                });
                (update.weights, false)
            }
            WeightOutcome::Reset { weights, reason } => {
                let row = WeightHistoryRow::from_weights(&weights, "reset", context);
                self.store.append_weights(row).await;
                self.sink.emit(Event::WeightsReset { weights: weights.clone(), reason });
                (weights, true)
            }
        }
    }

    /// Keep confident statements as thoughts; send tense cycles back to the backlog.
    async fn remember(&self, trigger: &Trigger, deliberation: &Deliberation, scored: &ScoredCycle) -> (usize, bool) {
        let mut kept = 0;
        for s in deliberation
            .statements
            .iter()
            .filter(|s| s.confidence >= self.config.cycle.thought_min_confidence)
        {
            let thought = SignificantThought::new(s.content.clone(), Some(trigger.category), s.confidence);
            if self.store.insert(thought).await {
                kept += 1;
            }
        }

        let dissonance = scored.scores.values.dissonance;
        let unresolved = dissonance >= self.config.cycle.unresolved_dissonance
            && self
                .store
                .insert(UnresolvedIdea::new(trigger.question.clone(), trigger.category, trigger.importance))
                .await;
        if unresolved {
            debug!("Question left unresolved (dissonance {:.2}), returned to backlog", dissonance);
        }
        (kept, unresolved)
    }

    /// Tick until cancelled or `max_ticks` ticks have run.
    pub async fn run(&self, cancel: CancellationToken, max_ticks: Option<u64>) -> RunSummary {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.cycle.tick_interval_ms.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut summary = RunSummary::default();

        info!("=== Reverie active (tick every {}ms) ===", self.config.cycle.tick_interval_ms);
        loop {
            if max_ticks.map_or(false, |max| summary.ticks >= max) {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let load = system_load().await;
            let outcome = self.tick(load, &cancel).await;
            match &outcome {
                TickOutcome::Completed { report } => info!(
                    "Cycle done: total {:.3}, weights {:.3}/{:.3}/{:.3}{}",
                    report.scored.scores.weighted_total,
                    report.weights.values.empathy,
                    report.weights.values.coherence,
                    report.weights.values.dissonance,
                    if report.scored.is_paradigm_shift() { " (paradigm shift)" } else { "" }
                ),
                TickOutcome::Consolidated { log } => info!("Slept: {} phases", log.phases.len()),
                TickOutcome::Failed { reason, .. } => warn!("Cycle failed: {}", reason),
                TickOutcome::Denied { .. } | TickOutcome::Idle => {}
            }
            summary.count(&outcome);
        }

        info!(
            "Loop stopped after {} ticks ({} cycles, {} sleeps)",
            summary.ticks, summary.completed, summary.consolidations
        );
        summary
    }
}

/// One-minute load average per CPU. Zero when unavailable.
pub async fn system_load() -> f64 {
    let content = match tokio::fs::read_to_string("/proc/loadavg").await {
        Ok(c) => c,
        Err(_) => return 0.0,
    };
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) as f64;
    content
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
        .map(|load| (load / cpus).max(0.0))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use async_trait::async_trait;
    use reverie_core::{Critique, Error, NullSink, SafetyAudit, Statement};
    use reverie_llm::ScriptedEvaluator;

    struct Fixed {
        confidence: f64,
        alternative: bool,
    }

    #[async_trait]
    impl Deliberator for Fixed {
        async fn deliberate(&self, trigger: &Trigger, _: &CancellationToken) -> Result<Deliberation> {
            Ok(Deliberation::new(
                trigger.id.clone(),
                vec![Statement {
                    agent: "a".into(),
                    content: format!("On '{}': it depends", trigger.question),
                    confidence: self.confidence,
                    emotional_tone: None,
                }],
                vec![Critique {
                    from: "b".into(),
                    to: "a".into(),
                    content: "consider otherwise".into(),
                    offers_alternative: Some(self.alternative),
                }],
                SafetyAudit { passed: true, ..Default::default() },
            ))
        }
    }

    struct Broken;

    #[async_trait]
    impl Deliberator for Broken {
        async fn deliberate(&self, _: &Trigger, _: &CancellationToken) -> Result<Deliberation> {
            Err(Error::deliberation("nobody home"))
        }
    }

    fn offline_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.scoring.mode = crate::config::ScoringMode::HeuristicOnly;
        config.trigger.evolved_probability = 0.0;
        config
    }

    fn mind(config: EngineConfig, deliberator: Arc<dyn Deliberator>) -> (Mind, Arc<InMemoryRepository>) {
        let repo = Arc::new(InMemoryRepository::new());
        let mind = Mind::new(
            config,
            repo.clone(),
            Arc::new(ScriptedEvaluator::failing()),
            deliberator,
            Arc::new(NullSink),
            Entropy::seeded(5),
        )
        .unwrap();
        (mind, repo)
    }

    #[tokio::test]
    async fn invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.weights.min_weight = 0.5;
        let result = Mind::new(
            config,
            Arc::new(InMemoryRepository::new()),
            Arc::new(ScriptedEvaluator::failing()),
            Arc::new(Broken),
            Arc::new(NullSink),
            Entropy::seeded(1),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_mind_idles() {
        let (mind, _) = mind(offline_config(), Arc::new(Fixed { confidence: 0.9, alternative: false }));
        assert!(matches!(mind.tick(0.0, &CancellationToken::new()).await, TickOutcome::Idle));
    }

    #[tokio::test]
    async fn manual_cycle_completes_and_persists() {
        let (mind, repo) = mind(offline_config(), Arc::new(Fixed { confidence: 0.9, alternative: false }));
        mind.enqueue("What is a good life?", Category::Philosophical, 0.7).await;

        let outcome = mind.tick(0.0, &CancellationToken::new()).await;
        let report = match outcome {
            TickOutcome::Completed { report } => report,
            other => panic!("expected completed cycle, got {:?}", other),
        };
        assert_eq!(report.trigger.question, "What is a good life?");
        assert_eq!(report.thoughts_kept, 1);
        assert!(!report.weights_reset);
        assert!((report.weights.values.sum() - 1.0).abs() < 1e-6);

        let snap = repo.snapshot().await;
        assert_eq!(snap.score_history.len(), 1);
        assert_eq!(snap.weight_history.len(), 1);
        assert_eq!(snap.weight_history[0].trigger_type, "manual");

        let energy = mind.energy().await;
        assert!(energy.available < energy.maximum);
    }

    #[tokio::test]
    async fn second_attempt_within_global_cooldown_denied() {
        let (mind, _) = mind(offline_config(), Arc::new(Fixed { confidence: 0.9, alternative: false }));
        mind.enqueue("first", Category::Social, 0.5).await;
        mind.enqueue("second", Category::Emotional, 0.5).await;
        let cancel = CancellationToken::new();

        assert!(matches!(mind.tick(0.0, &cancel).await, TickOutcome::Completed { .. }));
        match mind.tick(0.0, &cancel).await {
            TickOutcome::Denied { denial: GateDenial::GlobalCooldown { .. } } => {}
            other => panic!("expected global cooldown, got {:?}", other),
        }
        assert_eq!(mind.status().await.pending_manual, 1);
    }

    #[tokio::test]
    async fn failed_deliberation_reported() {
        let (mind, _) = mind(offline_config(), Arc::new(Broken));
        mind.enqueue("q", Category::Ethical, 0.5).await;
        match mind.tick(0.0, &CancellationToken::new()).await {
            TickOutcome::Failed { trigger, reason } => {
                assert_eq!(trigger.question, "q");
                assert!(reason.contains("nobody home"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_deliberation_keeps_backlog_idea() {
        let (mind, repo) = mind(offline_config(), Arc::new(Broken));
        mind.store()
            .insert(UnresolvedIdea::new("Can a promise expire?", Category::Ethical, 0.6))
            .await;

        match mind.tick(0.0, &CancellationToken::new()).await {
            TickOutcome::Failed { trigger, .. } => {
                assert_eq!(trigger.source, reverie_core::TriggerSource::Backlog);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        let ideas = repo.snapshot().await.list(reverie_core::MemoryKind::UnresolvedIdea, 10);
        assert_eq!(ideas.len(), 1);
        assert_eq!(ideas[0].text(), "Can a promise expire?");
    }

    #[tokio::test]
    async fn completed_backlog_cycle_consumes_idea() {
        let (mind, repo) = mind(offline_config(), Arc::new(Fixed { confidence: 0.9, alternative: false }));
        mind.store()
            .insert(UnresolvedIdea::new("Can a promise expire?", Category::Ethical, 0.6))
            .await;

        let report = match mind.tick(0.0, &CancellationToken::new()).await {
            TickOutcome::Completed { report } => report,
            other => panic!("expected completed cycle, got {:?}", other),
        };
        assert!(!report.unresolved);
        assert_eq!(repo.snapshot().await.count(reverie_core::MemoryKind::UnresolvedIdea), 0);
    }

    #[tokio::test]
    async fn tense_cycle_returns_to_backlog() {
        let mut config = offline_config();
        config.cycle.unresolved_dissonance = 0.3;
        let (mind, repo) = mind(config, Arc::new(Fixed { confidence: 0.2, alternative: true }));
        mind.enqueue("Is free will real?", Category::Existential, 0.8).await;

        let report = match mind.tick(0.0, &CancellationToken::new()).await {
            TickOutcome::Completed { report } => report,
            other => panic!("expected completed cycle, got {:?}", other),
        };
        assert!(report.unresolved);
        assert_eq!(report.thoughts_kept, 0);
        assert_eq!(repo.snapshot().await.count(reverie_core::MemoryKind::UnresolvedIdea), 1);
    }

    #[tokio::test]
    async fn critical_energy_triggers_consolidation() {
        let (mind, _) = mind(offline_config(), Arc::new(Fixed { confidence: 0.9, alternative: false }));
        mind.energy.lock().await.available = 1.0;
        match mind.tick(0.0, &CancellationToken::new()).await {
            TickOutcome::Consolidated { log } => assert!(log.reason.contains("energy_critical")),
            other => panic!("expected consolidation, got {:?}", other),
        }
        assert_eq!(mind.energy().await.available, mind.energy().await.maximum);
    }

    #[tokio::test]
    async fn run_respects_tick_budget() {
        let mut config = offline_config();
        config.cycle.tick_interval_ms = 1;
        let (mind, _) = mind(config, Arc::new(Fixed { confidence: 0.9, alternative: false }));
        let summary = mind.run(CancellationToken::new(), Some(3)).await;
        assert_eq!(summary.ticks, 3);
        assert_eq!(summary.idle, 3);
    }
}

//! Memory consolidation ("sleep")
//!
//! An exclusive maintenance pass with four ordered phases:
//!   1. pattern extraction   thoughts -> dream patterns
//!   2. belief consolidation aged thoughts -> core beliefs, near-duplicate beliefs merged
//!   3. pruning              evaluator-picked redundant records, then the age failsafe
//!   4. tension resolution   high-dissonance cycles -> low-confidence insights
//!
//! Each phase is bounded by a timeout and isolated from panics; a failed phase
//! is logged and the next one still runs. While a pass is running the shared
//! dormancy flag is held, so the generation gate refuses new triggers.

use crate::config::{ConsolidationConfig, EnergyConfig};
use crate::dormancy::Dormancy;
use crate::reply;
use crate::similarity::jaccard;
use crate::store::Store;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reverie_core::{
    ConsolidationPhase, CoreBelief, DreamPattern, EnergyState, Event, EventSink, MemoryKind,
    MemoryRecord, PhaseOutcome, PhaseStatus, Result, SignificantThought, SleepLog, SleepStats,
};
use reverie_llm::{execute_bounded, CancellationToken, Evaluator};
use std::collections::BTreeSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const CONSOLIDATION_SYSTEM_PROMPT: &str = "You are the sleeping mind, quietly organizing memories. \
    Answer in exactly the requested format.";

const NEVER: i64 = i64::MIN;
const BELIEF_SCAN_LIMIT: usize = 1000;
const TENSION_SCAN_LIMIT: usize = 50;
const PRUNE_BELIEF_CONTEXT: usize = 20;
const NEW_BELIEF_DISCOUNT: f64 = 0.8;
const EVIDENCE_GAIN: f64 = 0.05;

/// Phrases that mark a line as an echo of the request rather than a pattern.
const INSTRUCTION_ECHOES: &[&str] = &["abstract pattern", "here are", "list up to", "recurring pattern", "patterns:"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsolidationReason {
    EnergyCritical,
    Scheduled,
    Manual(String),
}

impl fmt::Display for ConsolidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsolidationReason::EnergyCritical => f.write_str("energy_critical"),
            ConsolidationReason::Scheduled => f.write_str("scheduled"),
            ConsolidationReason::Manual(why) => write!(f, "manual: {}", why),
        }
    }
}

/// What a phase did, before timing is attached.
struct Effect {
    status: PhaseStatus,
    affected: usize,
    detail: String,
}

impl Effect {
    fn done(affected: usize, detail: impl Into<String>) -> Self {
        Self { status: PhaseStatus::Completed, affected, detail: detail.into() }
    }

    fn skipped(detail: impl Into<String>) -> Self {
        Self { status: PhaseStatus::Skipped, affected: 0, detail: detail.into() }
    }
}

pub struct ConsolidationScheduler {
    config: ConsolidationConfig,
    critical_ratio: f64,
    store: Store,
    evaluator: Arc<dyn Evaluator>,
    evaluator_timeout: Duration,
    dormancy: Dormancy,
    energy: Arc<Mutex<EnergyState>>,
    sink: Arc<dyn EventSink>,
    /// Baseline for the schedule: the last completed run, or construction time.
    schedule_from: AtomicI64,
    last_completed: AtomicI64,
}

impl ConsolidationScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ConsolidationConfig,
        energy_config: &EnergyConfig,
        store: Store,
        evaluator: Arc<dyn Evaluator>,
        evaluator_timeout: Duration,
        dormancy: Dormancy,
        energy: Arc<Mutex<EnergyState>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            critical_ratio: energy_config.critical_ratio,
            store,
            evaluator,
            evaluator_timeout,
            dormancy,
            energy,
            sink,
            schedule_from: AtomicI64::new(Utc::now().timestamp_millis()),
            last_completed: AtomicI64::new(NEVER),
        }
    }

    pub fn is_running(&self) -> bool {
        self.dormancy.is_dormant()
    }

    pub fn last_completed(&self) -> Option<DateTime<Utc>> {
        from_millis(self.last_completed.load(Ordering::SeqCst))
    }

    /// Why a pass should start now, if it should.
    pub fn should_consolidate(&self, energy: &EnergyState, now: DateTime<Utc>) -> Option<ConsolidationReason> {
        if self.dormancy.is_dormant() {
            return None;
        }
        if energy.ratio() < self.critical_ratio {
            return Some(ConsolidationReason::EnergyCritical);
        }
        let since = from_millis(self.schedule_from.load(Ordering::SeqCst))?;
        let interval = ChronoDuration::minutes(self.config.interval_minutes as i64);
        (now - since >= interval).then_some(ConsolidationReason::Scheduled)
    }

    /// Run a full pass. Returns `None` when a pass is already running.
    pub async fn run(&self, reason: ConsolidationReason, cancel: &CancellationToken) -> Option<SleepLog> {
        let _guard = match self.dormancy.try_enter() {
            Some(g) => g,
            None => {
                debug!("Consolidation already running — ignoring request ({})", reason);
                return None;
            }
        };

        let started_at = Utc::now();
        let clock = Instant::now();
        info!("Consolidation started ({})", reason);
        self.sink.emit(Event::ConsolidationStarted { reason: reason.to_string() });

        let mut stats = SleepStats { energy_before: self.energy.lock().await.available, ..Default::default() };
        let mut phases = Vec::with_capacity(ConsolidationPhase::ORDER.len());
        for phase in ConsolidationPhase::ORDER {
            let outcome = self.run_phase(phase, &mut stats, cancel).await;
            self.sink.emit(Event::ConsolidationPhase { outcome: outcome.clone() });
            phases.push(outcome);
        }

        let finished_at = Utc::now();
        let energy = {
            let mut energy = self.energy.lock().await;
            energy.reset(finished_at);
            energy.clone()
        };
        stats.energy_after = energy.available;
        self.sink.emit(Event::EnergyRecovered { energy });

        let log = SleepLog {
            id: uuid::Uuid::new_v4().to_string(),
            reason: reason.to_string(),
            started_at,
            finished_at,
            phases,
            stats: stats.clone(),
        };
        if !self.store.insert(log.clone()).await {
            warn!("Sleep log {} was not persisted", log.id);
        }

        let duration_ms = clock.elapsed().as_millis() as u64;
        self.sink.emit(Event::ConsolidationCompleted { stats, duration_ms });
        let millis = finished_at.timestamp_millis();
        self.schedule_from.store(millis, Ordering::SeqCst);
        self.last_completed.store(millis, Ordering::SeqCst);
        info!("Consolidation finished in {}ms", duration_ms);

        Some(log)
    }

    async fn run_phase(
        &self,
        phase: ConsolidationPhase,
        stats: &mut SleepStats,
        cancel: &CancellationToken,
    ) -> PhaseOutcome {
        let clock = Instant::now();
        let timeout = Duration::from_millis(self.config.phase_timeout_ms);

        let guarded = {
            let work = async {
                match phase {
                    ConsolidationPhase::PatternExtraction => self.extract_patterns(stats, cancel).await,
                    ConsolidationPhase::BeliefConsolidation => self.consolidate_beliefs(stats).await,
                    ConsolidationPhase::Pruning => self.prune_redundant(stats, cancel).await,
                    ConsolidationPhase::TensionResolution => self.resolve_tension(stats, cancel).await,
                }
            };
            tokio::time::timeout(timeout, AssertUnwindSafe(work).catch_unwind()).await
        };

        let mut effect = match guarded {
            Ok(Ok(Ok(effect))) => effect,
            Ok(Ok(Err(e))) => {
                warn!("Consolidation phase {} failed: {}", phase.as_str(), e);
                Effect { status: PhaseStatus::Failed, affected: 0, detail: e.to_string() }
            }
            Ok(Err(_)) => {
                error!("Consolidation phase {} panicked", phase.as_str());
                Effect { status: PhaseStatus::Failed, affected: 0, detail: "panicked".into() }
            }
            Err(_) => {
                warn!("Consolidation phase {} timed out after {}ms", phase.as_str(), timeout.as_millis());
                Effect {
                    status: PhaseStatus::Failed,
                    affected: 0,
                    detail: format!("timed out after {}ms", timeout.as_millis()),
                }
            }
        };

        // Age-based pruning runs whatever happened above.
        if phase == ConsolidationPhase::Pruning {
            let removed = self.failsafe_prune(stats).await;
            effect.affected += removed;
            effect.detail = format!("{}; failsafe removed {}", effect.detail, removed);
            if removed > 0 && effect.status == PhaseStatus::Skipped {
                effect.status = PhaseStatus::Completed;
            }
        }

        debug!("Phase {}: {:?} ({})", phase.as_str(), effect.status, effect.detail);
        PhaseOutcome {
            phase,
            status: effect.status,
            affected: effect.affected,
            detail: effect.detail,
            duration_ms: clock.elapsed().as_millis() as u64,
        }
    }

    async fn ask(&self, prompt: &str, cancel: &CancellationToken) -> Option<String> {
        let output = execute_bounded(
            self.evaluator.as_ref(),
            prompt,
            CONSOLIDATION_SYSTEM_PROMPT,
            self.evaluator_timeout,
            cancel,
        )
        .await;
        if output.success {
            Some(output.content)
        } else {
            debug!("Consolidation request failed: {}", output.content);
            None
        }
    }

    // ============================================================
    // Phase 1: pattern extraction
    // ============================================================

    async fn extract_patterns(&self, stats: &mut SleepStats, cancel: &CancellationToken) -> Result<Effect> {
        let thoughts: Vec<SignificantThought> = self
            .store
            .thoughts(self.config.pattern_sample)
            .await
            .into_iter()
            .filter(|t| t.confidence >= self.config.pattern_min_confidence)
            .collect();
        if thoughts.is_empty() {
            return Ok(Effect::skipped("no confident thoughts"));
        }

        let mut prompt = String::from("Recent thoughts:\n");
        for (i, t) in thoughts.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, t.content));
        }
        prompt.push_str(&format!(
            "\nName up to {} abstract patterns that recur across these thoughts, one per line.",
            self.config.max_patterns
        ));

        let Some(reply) = self.ask(&prompt, cancel).await else {
            return Ok(Effect::skipped("evaluator unavailable"));
        };
        let patterns = parse_pattern_list(&reply, self.config.min_pattern_chars, self.config.max_patterns);
        if patterns.is_empty() {
            return Ok(Effect::skipped("no usable patterns"));
        }

        let confidence = thoughts.iter().map(|t| t.confidence).sum::<f64>() / thoughts.len() as f64;
        let mut stored = 0;
        for p in patterns {
            if self.store.insert(DreamPattern::new(p, confidence)).await {
                stored += 1;
            }
        }
        stats.patterns_extracted = stored;
        Ok(Effect::done(stored, format!("{} patterns from {} thoughts", stored, thoughts.len())))
    }

    // ============================================================
    // Phase 2: belief consolidation
    // ============================================================

    async fn consolidate_beliefs(&self, stats: &mut SleepStats) -> Result<Effect> {
        let cutoff = Utc::now() - ChronoDuration::hours(self.config.belief_min_age_hours);
        let thoughts: Vec<SignificantThought> = self
            .store
            .oldest(
                MemoryKind::SignificantThought,
                cutoff,
                self.config.belief_min_confidence,
                self.config.belief_batch,
            )
            .await
            .into_iter()
            .filter_map(|r| match r {
                MemoryRecord::SignificantThought(t) => Some(t),
                _ => None,
            })
            .collect();

        let mut beliefs = self.store.beliefs(BELIEF_SCAN_LIMIT).await;
        let mut touched: BTreeSet<String> = BTreeSet::new();
        let (mut created, mut updated) = (0, 0);

        for thought in &thoughts {
            let best = beliefs
                .iter_mut()
                .map(|b| (jaccard(&thought.content, &b.statement), b))
                .filter(|(sim, _)| *sim >= self.config.belief_match_similarity)
                .max_by(|a, b| a.0.total_cmp(&b.0));
            match best {
                Some((_, belief)) => {
                    belief.strength = (belief.strength + EVIDENCE_GAIN * thought.confidence).min(1.0);
                    belief.evidence_count += 1;
                    belief.updated_at = Utc::now();
                    touched.insert(belief.id.clone());
                    updated += 1;
                }
                None => {
                    let belief = CoreBelief::new(thought.content.clone(), thought.confidence * NEW_BELIEF_DISCOUNT);
                    touched.insert(belief.id.clone());
                    beliefs.push(belief);
                    created += 1;
                }
            }
        }

        let mut persisted = 0;
        for b in beliefs.iter().filter(|b| touched.contains(&b.id)) {
            if self.store.insert(b.clone()).await {
                persisted += 1;
            }
        }

        // Sources are only dropped once their content lives on in a belief.
        let consolidated = if persisted > 0 {
            let ids: Vec<String> = thoughts.iter().map(|t| t.id.clone()).collect();
            self.store.delete(MemoryKind::SignificantThought, &ids).await
        } else {
            0
        };

        let merged = self.merge_beliefs(beliefs).await;

        stats.beliefs_created = created;
        stats.beliefs_updated = updated;
        stats.beliefs_merged = merged;
        stats.thoughts_consolidated = consolidated;

        if thoughts.is_empty() && merged == 0 {
            return Ok(Effect::skipped("no aged thoughts"));
        }
        Ok(Effect::done(
            created + updated + merged + consolidated,
            format!("{} created, {} strengthened, {} merged, {} thoughts absorbed", created, updated, merged, consolidated),
        ))
    }

    /// Fold near-duplicate beliefs into the stronger one.
    async fn merge_beliefs(&self, mut beliefs: Vec<CoreBelief>) -> usize {
        beliefs.sort_by(|a, b| b.strength.total_cmp(&a.strength).then(a.created_at.cmp(&b.created_at)));
        let mut kept: Vec<CoreBelief> = Vec::new();
        let mut absorbed: Vec<String> = Vec::new();
        let mut changed: BTreeSet<String> = BTreeSet::new();

        for belief in beliefs {
            match kept
                .iter_mut()
                .find(|k| jaccard(&k.statement, &belief.statement) >= self.config.belief_merge_similarity)
            {
                Some(keeper) => {
                    keeper.evidence_count += belief.evidence_count;
                    keeper.updated_at = Utc::now();
                    changed.insert(keeper.id.clone());
                    absorbed.push(belief.id);
                }
                None => kept.push(belief),
            }
        }

        if absorbed.is_empty() {
            return 0;
        }
        for keeper in kept.iter().filter(|k| changed.contains(&k.id)) {
            self.store.insert(keeper.clone()).await;
        }
        self.store.delete(MemoryKind::CoreBelief, &absorbed).await
    }

    // ============================================================
    // Phase 3: pruning
    // ============================================================

    async fn prune_redundant(&self, stats: &mut SleepStats, cancel: &CancellationToken) -> Result<Effect> {
        let mut records: Vec<MemoryRecord> = Vec::new();
        for kind in MemoryKind::TRANSIENT {
            records.extend(self.store.list(kind, self.config.prune_sample).await);
        }
        records.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        records.truncate(self.config.prune_sample);
        if records.is_empty() {
            return Ok(Effect::skipped("nothing to review"));
        }

        let beliefs = self.store.beliefs(PRUNE_BELIEF_CONTEXT).await;
        let mut prompt = String::from("BELIEFS:\n");
        for b in &beliefs {
            prompt.push_str(&format!("- {}\n", b.statement));
        }
        prompt.push_str("\nRECORDS:\n");
        for (i, r) in records.iter().enumerate() {
            prompt.push_str(&format!("[{}] ({}) {}\n", i, kind_name(r.kind()), r.text()));
        }
        prompt.push_str(
            "\nWhich records are redundant given the beliefs and each other? Reply with a JSON list \
             like [{\"index\": 0, \"reason\": \"...\"}], or [] if none.",
        );

        let Some(reply) = self.ask(&prompt, cancel).await else {
            return Ok(Effect::skipped("evaluator unavailable"));
        };
        let indices = parse_prune_indices(&reply, records.len());
        if indices.is_empty() {
            return Ok(Effect::skipped("nothing redundant"));
        }

        let mut removed = 0;
        for kind in MemoryKind::TRANSIENT {
            let ids: Vec<String> = indices
                .iter()
                .map(|i| &records[*i])
                .filter(|r| r.kind() == kind)
                .map(|r| r.id().to_string())
                .collect();
            removed += self.store.delete(kind, &ids).await;
        }
        stats.records_pruned = removed;
        Ok(Effect::done(removed, format!("{} redundant records removed", removed)))
    }

    async fn failsafe_prune(&self, stats: &mut SleepStats) -> usize {
        let cutoff = Utc::now() - ChronoDuration::hours(self.config.failsafe_age_hours);
        let mut removed = 0;
        for kind in MemoryKind::TRANSIENT {
            removed += self.store.delete_older_than(kind, cutoff).await;
        }
        if removed > 0 {
            info!("Failsafe pruning removed {} records older than {}h", removed, self.config.failsafe_age_hours);
        }
        stats.failsafe_pruned = removed;
        removed
    }

    // ============================================================
    // Phase 4: tension resolution
    // ============================================================

    async fn resolve_tension(&self, stats: &mut SleepStats, cancel: &CancellationToken) -> Result<Effect> {
        let since = self.last_completed();
        let tense: Vec<_> = self
            .store
            .score_history(TENSION_SCAN_LIMIT)
            .await
            .into_iter()
            .filter(|s| since.map_or(true, |t| s.created_at > t))
            .filter(|s| s.values.dissonance >= self.config.tension_min_dissonance)
            .take(self.config.tension_sample)
            .collect();
        if tense.is_empty() {
            return Ok(Effect::skipped("no unresolved tension"));
        }

        let mut insights = 0;
        for scores in &tense {
            let prompt = format!(
                "This question left strong unresolved tension (dissonance {:.2}):\n{}\n\n\
                 Propose a resolution in one or two sentences.\nRESOLUTION: <your resolution>",
                scores.values.dissonance, scores.context.question
            );
            let Some(reply) = self.ask(&prompt, cancel).await else {
                continue;
            };
            let Some(resolution) = parse_resolution(&reply) else {
                continue;
            };
            if self
                .store
                .insert(SignificantThought::insight(resolution, self.config.insight_confidence))
                .await
            {
                insights += 1;
            }
        }
        stats.insights_created = insights;
        if insights == 0 {
            return Ok(Effect::skipped("no resolutions produced"));
        }
        Ok(Effect::done(insights, format!("{} insights from {} tense cycles", insights, tense.len())))
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    if ms == NEVER {
        return None;
    }
    Utc.timestamp_millis_opt(ms).single()
}

fn kind_name(kind: MemoryKind) -> &'static str {
    match kind {
        MemoryKind::UnresolvedIdea => "idea",
        MemoryKind::SignificantThought => "thought",
        MemoryKind::CoreBelief => "belief",
        MemoryKind::DreamPattern => "pattern",
        MemoryKind::SleepLog => "sleep log",
    }
}

// ============================================================
// Reply parsing
// ============================================================

static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+\s*[.):-]|[-*•+]|#+)\s*").expect("list-marker regex"));

static INDEX_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)"?index"?\s*[:=]\s*(\d+)"#).expect("index-field regex"));

/// Accepts numbered, bulleted or plain lines. Drops short lines, echoes of the
/// request and duplicates; keeps at most `max` entries.
pub fn parse_pattern_list(text: &str, min_chars: usize, max: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in text.lines() {
        let entry = LIST_MARKER.replace(line, "").replace("**", "").trim().trim_matches('"').trim().to_string();
        if entry.chars().count() < min_chars {
            continue;
        }
        let lower = entry.to_lowercase();
        if INSTRUCTION_ECHOES.iter().any(|e| lower.contains(e)) {
            continue;
        }
        if out.iter().any(|o| o.eq_ignore_ascii_case(&entry)) {
            continue;
        }
        out.push(entry);
        if out.len() >= max {
            break;
        }
    }
    out
}

/// Indices from a `[{"index": n, "reason": "..."}]` reply, deduplicated and
/// bounded by `len`. Malformed entries are skipped. Falls back to scanning for
/// `index: n` when the reply is not valid JSON.
pub fn parse_prune_indices(text: &str, len: usize) -> Vec<usize> {
    let mut found: BTreeSet<usize> = BTreeSet::new();

    let json = match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if end > start => serde_json::from_str::<Vec<serde_json::Value>>(&text[start..=end]).ok(),
        _ => None,
    };

    match json {
        Some(entries) => {
            for entry in entries {
                if let Some(i) = entry.get("index").and_then(|v| v.as_u64()) {
                    found.insert(i as usize);
                }
            }
        }
        None => {
            for cap in INDEX_FIELD.captures_iter(text) {
                if let Some(i) = cap.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
                    found.insert(i);
                }
            }
        }
    }

    found.into_iter().filter(|i| *i < len).collect()
}

fn parse_resolution(text: &str) -> Option<String> {
    let resolution = reply::labeled(text, "RESOLUTION").unwrap_or_else(|| text.trim()).to_string();
    (!resolution.is_empty()).then_some(resolution)
}

//! Three-axis scoring of a completed deliberation
//!
//! Each axis is asked of the evaluator first (unless scoring is heuristic-only).
//! A reply is accepted only when it carries a `LABEL: <number>` line with the
//! number inside [0, 1]. Anything else falls back to a deterministic heuristic
//! over the deliberation's statements, critiques and audit.

use crate::config::{ScoringConfig, ScoringMode};
use crate::reply;
use chrono::Utc;
use reverie_core::{
    Axis, AxisScores, AxisTriple, AxisWeights, Deliberation, ScoreContext, Trigger, TriggerSource,
};
use reverie_llm::{execute_bounded, CancellationToken, Evaluator};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const SCORING_SYSTEM_PROMPT: &str = "You are a careful evaluator of reasoning. \
    Answer in exactly the requested format and nothing else.";

const ETHICAL_TERMS: &[&str] = &[
    "harm", "care", "fair", "rights", "dignity", "compassion", "wellbeing", "well-being",
    "justice", "suffering", "respect", "empathy", "kindness", "consent", "duty",
];

const ALTERNATIVE_TERMS: &[&str] = &[
    "alternatively", "another perspective", "another view", "instead", "on the other hand",
    "what if", "reframe", "consider that", "a different",
];

const DISAGREEMENT_TERMS: &[&str] = &[
    "disagree", "wrong", "flawed", "contradict", "reject", "mistaken", "unconvincing",
    "overlooks", "fails to", "not persuaded", "incorrect",
];

const LOW_CONFIDENCE: f64 = 0.4;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    Evaluator,
    Heuristic,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AxisVerdict {
    pub axis: Axis,
    pub score: f64,
    pub source: ScoreSource,
    pub rationale: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ImpactAssessment {
    pub dissonance_rise: f64,
    pub controversy: f64,
    pub controversy_source: ScoreSource,
    pub is_paradigm_shift: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ScoredCycle {
    pub scores: AxisScores,
    pub verdicts: Vec<AxisVerdict>,
    /// Only assessed for manually requested triggers.
    pub impact: Option<ImpactAssessment>,
}

impl ScoredCycle {
    pub fn is_paradigm_shift(&self) -> bool {
        self.impact.as_ref().map_or(false, |i| i.is_paradigm_shift)
    }

    pub fn source(&self, axis: Axis) -> Option<ScoreSource> {
        self.verdicts.iter().find(|v| v.axis == axis).map(|v| v.source)
    }
}

/// System state captured alongside scores.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemState {
    pub energy_ratio: f64,
    pub system_load: f64,
}

pub struct ScoreEngine {
    config: ScoringConfig,
    evaluator: Arc<dyn Evaluator>,
    timeout: Duration,
    previous: Option<AxisTriple>,
}

impl ScoreEngine {
    pub fn new(config: ScoringConfig, evaluator: Arc<dyn Evaluator>, timeout: Duration) -> Self {
        Self { config, evaluator, timeout, previous: None }
    }

    /// Scores of the most recent cycle, used for dissonance-rise detection.
    pub fn previous(&self) -> Option<AxisTriple> {
        self.previous
    }

    /// Seed the prior scores, e.g. from persisted history at startup.
    pub fn set_previous(&mut self, previous: Option<AxisTriple>) {
        self.previous = previous;
    }

    pub async fn score(
        &mut self,
        trigger: &Trigger,
        deliberation: &Deliberation,
        weights: &AxisWeights,
        system: SystemState,
        cancel: &CancellationToken,
    ) -> ScoredCycle {
        let signals = Signals::from_deliberation(deliberation);
        let transcript = render_transcript(trigger, deliberation);

        let mut verdicts = Vec::with_capacity(3);
        let mut values = AxisTriple::default();
        for axis in Axis::ALL {
            let verdict = match self.ask_axis(axis, &transcript, cancel).await {
                Some((score, rationale)) => AxisVerdict {
                    axis,
                    score,
                    source: ScoreSource::Evaluator,
                    rationale,
                },
                None => AxisVerdict {
                    axis,
                    score: signals.heuristic(axis),
                    source: ScoreSource::Heuristic,
                    rationale: None,
                },
            };
            values.set(axis, verdict.score);
            verdicts.push(verdict);
        }

        let impact = if trigger.source == TriggerSource::Manual {
            Some(self.assess_impact(&values, deliberation, &transcript, cancel).await)
        } else {
            None
        };

        let scores = AxisScores {
            values,
            weighted_total: values.dot(&weights.values),
            context: ScoreContext {
                deliberation_id: deliberation.id.clone(),
                trigger_id: trigger.id.clone(),
                question: trigger.question.clone(),
                source: Some(trigger.source),
                prior: self.previous,
                emotional_state: dominant_tone(deliberation),
                energy_ratio: Some(system.energy_ratio),
                system_load: Some(system.system_load),
            },
            created_at: Utc::now(),
        };

        debug!(
            "Scored {}: {:.2}/{:.2}/{:.2} total {:.3}",
            trigger.id, values.empathy, values.coherence, values.dissonance, scores.weighted_total
        );
        self.previous = Some(values);

        ScoredCycle { scores, verdicts, impact }
    }

    async fn ask_axis(
        &self,
        axis: Axis,
        transcript: &str,
        cancel: &CancellationToken,
    ) -> Option<(f64, Option<String>)> {
        if self.config.mode == ScoringMode::HeuristicOnly {
            return None;
        }
        let prompt = axis_prompt(axis, transcript);
        let output =
            execute_bounded(self.evaluator.as_ref(), &prompt, SCORING_SYSTEM_PROMPT, self.timeout, cancel).await;
        if !output.success {
            debug!("{} scoring fell back to heuristic: {}", axis, output.content);
            return None;
        }
        let parsed = parse_labeled_score(axis.label(), &output.content);
        if parsed.is_none() {
            debug!("{} score rejected, falling back to heuristic", axis);
        }
        parsed
    }

    async fn assess_impact(
        &self,
        current: &AxisTriple,
        deliberation: &Deliberation,
        transcript: &str,
        cancel: &CancellationToken,
    ) -> ImpactAssessment {
        let dissonance_rise = match self.previous {
            Some(prev) => current.dissonance - prev.dissonance,
            None => 0.0,
        };

        let ai = if self.config.mode == ScoringMode::AiFirst {
            let prompt = controversy_prompt(transcript);
            let output = execute_bounded(
                self.evaluator.as_ref(),
                &prompt,
                SCORING_SYSTEM_PROMPT,
                self.timeout,
                cancel,
            )
            .await;
            if output.success {
                parse_labeled_score("CONTROVERSY", &output.content).map(|(v, _)| v)
            } else {
                None
            }
        } else {
            None
        };
        let (controversy, controversy_source) = match ai {
            Some(v) => (v, ScoreSource::Evaluator),
            None => (disagreement_level(deliberation), ScoreSource::Heuristic),
        };

        let c = &self.config;
        let is_paradigm_shift = dissonance_rise > c.shift_rise
            || controversy > c.shift_controversy
            || current.dissonance > c.shift_dissonance
            || (dissonance_rise > c.combined_rise && controversy > c.combined_controversy);

        if is_paradigm_shift {
            info!(
                "Paradigm shift: dissonance {:.2} (rise {:+.2}), controversy {:.2}",
                current.dissonance, dissonance_rise, controversy
            );
        }

        ImpactAssessment { dissonance_rise, controversy, controversy_source, is_paradigm_shift }
    }
}

// ============================================================
// Evaluator requests and parsing
// ============================================================

fn axis_prompt(axis: Axis, transcript: &str) -> String {
    let focus = match axis {
        Axis::Empathy => "how much the reasoning attends to the feelings, needs and wellbeing of others",
        Axis::Coherence => "how internally consistent, well-supported and convergent the reasoning is",
        Axis::Dissonance => "how much productive tension, disagreement and unresolved contradiction it contains",
    };
    format!(
        "Rate the following deliberation for {label}: {focus}.\n\n{transcript}\n\n\
         Reply with exactly two lines:\n{label}: <number between 0 and 1>\nRATIONALE: <one sentence>",
        label = axis.label(),
        focus = focus,
        transcript = transcript
    )
}

fn controversy_prompt(transcript: &str) -> String {
    format!(
        "How controversial is the conclusion of this deliberation, i.e. how strongly would \
         reasonable minds disagree with it?\n\n{}\n\n\
         Reply with exactly two lines:\nCONTROVERSY: <number between 0 and 1>\nRATIONALE: <one sentence>",
        transcript
    )
}

fn render_transcript(trigger: &Trigger, deliberation: &Deliberation) -> String {
    let mut out = format!("QUESTION ({}): {}\n", trigger.category, trigger.question);
    for s in &deliberation.statements {
        out.push_str(&format!("\n[{} | confidence {:.2}] {}", s.agent, s.confidence, s.content));
    }
    for c in &deliberation.critiques {
        out.push_str(&format!("\n[critique {} -> {}] {}", c.from, c.to, c.content));
    }
    out.push_str(&format!(
        "\n\nSAFETY AUDIT: {}{}",
        if deliberation.audit.passed { "passed" } else { "failed" },
        if deliberation.audit.concerns.is_empty() {
            String::new()
        } else {
            format!(" ({})", deliberation.audit.concerns.join("; "))
        }
    ));
    out
}

/// Find a `LABEL: <number>` line and an optional `RATIONALE:` line. Returns
/// `None` when the label is missing, the number does not parse, or it lies
/// outside [0, 1]. Out-of-range values are rejected, never clamped, and so
/// is a number cut short by a comma decimal, an exponent or a fraction.
pub fn parse_labeled_score(label: &str, text: &str) -> Option<(f64, Option<String>)> {
    let value = reply::labeled_number(text, label)?;
    if !(0.0..=1.0).contains(&value) {
        return None;
    }
    let rationale = reply::labeled(text, "RATIONALE").map(str::to_string);
    Some((value, rationale))
}

// ============================================================
// Heuristic fallback
// ============================================================

/// Syntactic and statistical sub-signals of a deliberation, each in [0, 1].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Signals {
    pub emotional_fraction: f64,
    pub alternative_fraction: f64,
    pub average_confidence: f64,
    /// Confidence variance scaled by its maximum (0.25).
    pub confidence_spread: f64,
    pub ethical_fraction: f64,
    pub low_confidence_fraction: f64,
    pub audit: f64,
}

impl Signals {
    pub fn from_deliberation(d: &Deliberation) -> Self {
        let n = d.statements.len();
        let fraction = |count: usize, of: usize| if of == 0 { 0.0 } else { count as f64 / of as f64 };

        let emotional = d
            .statements
            .iter()
            .filter(|s| s.emotional_tone.as_deref().map_or(false, |t| !t.trim().is_empty()))
            .count();
        let alternatives = d
            .critiques
            .iter()
            .filter(|c| c.offers_alternative.unwrap_or_else(|| contains_any(&c.content, ALTERNATIVE_TERMS)))
            .count();
        let ethical = d.statements.iter().filter(|s| contains_any(&s.content, ETHICAL_TERMS)).count();

        let confidences: Vec<f64> = d.statements.iter().map(|s| s.confidence.clamp(0.0, 1.0)).collect();
        let (average_confidence, variance) = if confidences.is_empty() {
            (0.0, 0.0)
        } else {
            let mean = confidences.iter().sum::<f64>() / n as f64;
            let var = confidences.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n as f64;
            (mean, var)
        };
        let low = confidences.iter().filter(|c| **c < LOW_CONFIDENCE).count();

        let audit = match (d.audit.passed, d.audit.ethics_score) {
            (_, Some(score)) if score.is_finite() => score.clamp(0.0, 1.0),
            (true, _) => 1.0,
            (false, _) => 0.0,
        };

        Self {
            emotional_fraction: fraction(emotional, n),
            alternative_fraction: fraction(alternatives, d.critiques.len()),
            average_confidence,
            confidence_spread: (variance / 0.25).clamp(0.0, 1.0),
            ethical_fraction: fraction(ethical, n),
            low_confidence_fraction: fraction(low, n),
            audit,
        }
    }

    pub fn heuristic(&self, axis: Axis) -> f64 {
        let score = match axis {
            Axis::Empathy => 0.4 * self.emotional_fraction + 0.3 * self.ethical_fraction + 0.3 * self.audit,
            Axis::Coherence => {
                0.5 * self.average_confidence
                    + 0.3 * (1.0 - self.confidence_spread)
                    + 0.2 * (1.0 - self.alternative_fraction)
            }
            Axis::Dissonance => {
                0.4 * self.alternative_fraction + 0.3 * self.low_confidence_fraction + 0.3 * self.confidence_spread
            }
        };
        if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Share of critiques that voice disagreement, as a controversy stand-in.
pub fn disagreement_level(d: &Deliberation) -> f64 {
    if d.critiques.is_empty() {
        return 0.0;
    }
    let disagreeing = d.critiques.iter().filter(|c| contains_any(&c.content, DISAGREEMENT_TERMS)).count();
    (disagreeing as f64 / d.critiques.len() as f64).clamp(0.0, 1.0)
}

fn contains_any(text: &str, terms: &[&str]) -> bool {
    let lower = text.to_lowercase();
    terms.iter().any(|t| lower.contains(t))
}

fn dominant_tone(d: &Deliberation) -> Option<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for tone in d.statements.iter().filter_map(|s| s.emotional_tone.as_deref()) {
        let tone = tone.trim().to_lowercase();
        if !tone.is_empty() {
            *counts.entry(tone).or_default() += 1;
        }
    }
    counts.into_iter().max_by_key(|(_, n)| *n).map(|(t, _)| t)
}

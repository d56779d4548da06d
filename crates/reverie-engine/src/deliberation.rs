//! Deliberation: several perspectives answer, then critique each other
//!
//! The loop only needs something that turns a trigger into a `Deliberation`.
//! `EvaluatorDeliberator` does it with plain evaluator calls: one position per
//! perspective, one critique of the neighbouring perspective, and a keyword
//! safety audit over the result.

use crate::reply;
use async_trait::async_trait;
use reverie_core::{Critique, Deliberation, Error, Result, SafetyAudit, Statement, Trigger};
use reverie_llm::{execute_bounded, CancellationToken, Evaluator};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait Deliberator: Send + Sync {
    async fn deliberate(&self, trigger: &Trigger, cancel: &CancellationToken) -> Result<Deliberation>;
}

#[async_trait]
impl<T: Deliberator + ?Sized> Deliberator for Arc<T> {
    async fn deliberate(&self, trigger: &Trigger, cancel: &CancellationToken) -> Result<Deliberation> {
        (**self).deliberate(trigger, cancel).await
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Perspective {
    pub name: String,
    pub stance: String,
}

impl Perspective {
    pub fn new(name: impl Into<String>, stance: impl Into<String>) -> Self {
        Self { name: name.into(), stance: stance.into() }
    }

    pub fn defaults() -> Vec<Perspective> {
        vec![
            Perspective::new("analyst", "You reason carefully from evidence and first principles."),
            Perspective::new("empath", "You attend to feelings, relationships and the wellbeing of everyone involved."),
            Perspective::new("skeptic", "You look for hidden assumptions, contradictions and overlooked alternatives."),
        ]
    }
}

const CONCERN_TERMS: &[(&str, &str)] = &[
    ("self-harm", "mentions self-harm"),
    ("suicide", "mentions suicide"),
    ("weapon", "discusses weapons"),
    ("violence", "endorses or discusses violence"),
    ("manipulat", "discusses manipulating others"),
    ("deceive", "discusses deception"),
    ("exploit", "discusses exploitation"),
];

const DEFAULT_CONFIDENCE: f64 = 0.5;

pub struct EvaluatorDeliberator {
    evaluator: Arc<dyn Evaluator>,
    perspectives: Vec<Perspective>,
    timeout: Duration,
}

impl EvaluatorDeliberator {
    pub fn new(evaluator: Arc<dyn Evaluator>, timeout: Duration) -> Self {
        Self { evaluator, perspectives: Perspective::defaults(), timeout }
    }

    pub fn with_perspectives(mut self, perspectives: Vec<Perspective>) -> Self {
        self.perspectives = perspectives;
        self
    }

    async fn position(&self, p: &Perspective, trigger: &Trigger, cancel: &CancellationToken) -> Option<Statement> {
        let prompt = format!(
            "QUESTION ({}): {}\n\nGive your position in a few sentences.\n\
             Reply with three lines:\nPOSITION: <your answer>\nCONFIDENCE: <number between 0 and 1>\nTONE: <one word for the feeling behind it>",
            trigger.category, trigger.question
        );
        let output = execute_bounded(self.evaluator.as_ref(), &prompt, &p.stance, self.timeout, cancel).await;
        if !output.success {
            debug!("Perspective {} produced nothing: {}", p.name, output.content);
            return None;
        }
        parse_statement(&p.name, &output.content)
    }

    async fn critique(
        &self,
        from: &Perspective,
        target: &Statement,
        trigger: &Trigger,
        cancel: &CancellationToken,
    ) -> Option<Critique> {
        let prompt = format!(
            "QUESTION: {}\n\nThe {} argues:\n{}\n\nCritique this position.\n\
             Reply with two lines:\nCRITIQUE: <your critique>\nALTERNATIVE: <yes if you propose a different view, otherwise no>",
            trigger.question, target.agent, target.content
        );
        let output = execute_bounded(self.evaluator.as_ref(), &prompt, &from.stance, self.timeout, cancel).await;
        if !output.success {
            return None;
        }
        parse_critique(&from.name, &target.agent, &output.content)
    }
}

#[async_trait]
impl Deliberator for EvaluatorDeliberator {
    async fn deliberate(&self, trigger: &Trigger, cancel: &CancellationToken) -> Result<Deliberation> {
        let mut statements = Vec::new();
        let mut speakers = Vec::new();
        for p in &self.perspectives {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(s) = self.position(p, trigger, cancel).await {
                statements.push(s);
                speakers.push(p);
            }
        }
        if statements.is_empty() {
            warn!("No perspective responded to trigger {}", trigger.id);
            return Err(Error::deliberation("no perspective responded"));
        }

        let mut critiques = Vec::new();
        if statements.len() > 1 {
            for (i, from) in speakers.iter().enumerate() {
                let target = &statements[(i + 1) % statements.len()];
                if let Some(c) = self.critique(from, target, trigger, cancel).await {
                    critiques.push(c);
                }
            }
        }

        let audit = audit(&statements);
        Ok(Deliberation::new(trigger.id.clone(), statements, critiques, audit))
    }
}

fn labeled(text: &str, label: &str) -> Option<String> {
    reply::labeled(text, label).map(str::to_string)
}

/// A reply without a `POSITION:` line is taken whole as the position.
pub fn parse_statement(agent: &str, text: &str) -> Option<Statement> {
    let content = labeled(text, "POSITION").unwrap_or_else(|| text.trim().to_string());
    if content.is_empty() {
        return None;
    }
    let confidence = labeled(text, "CONFIDENCE")
        .and_then(|c| c.trim_end_matches(|ch: char| !ch.is_ascii_digit()).parse::<f64>().ok())
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
        .unwrap_or(DEFAULT_CONFIDENCE);
    let emotional_tone = labeled(text, "TONE")
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|t| !t.is_empty() && t != "none" && t != "neutral");
    Some(Statement { agent: agent.to_string(), content, confidence, emotional_tone })
}

pub fn parse_critique(from: &str, to: &str, text: &str) -> Option<Critique> {
    let content = labeled(text, "CRITIQUE").unwrap_or_else(|| text.trim().to_string());
    if content.is_empty() {
        return None;
    }
    let offers_alternative = labeled(text, "ALTERNATIVE").map(|a| a.to_lowercase().starts_with('y'));
    Some(Critique { from: from.to_string(), to: to.to_string(), content, offers_alternative })
}

pub fn audit(statements: &[Statement]) -> SafetyAudit {
    let mut concerns: Vec<String> = Vec::new();
    for s in statements {
        let lower = s.content.to_lowercase();
        for (term, concern) in CONCERN_TERMS {
            if lower.contains(term) && !concerns.iter().any(|c| c == concern) {
                concerns.push(concern.to_string());
            }
        }
    }
    let ethics_score = (1.0 - 0.25 * concerns.len() as f64).max(0.0);
    SafetyAudit { passed: concerns.is_empty(), concerns, ethics_score: Some(ethics_score) }
}

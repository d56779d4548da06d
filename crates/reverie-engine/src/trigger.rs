//! Trigger selection
//!
//! Priority, each step short-circuiting the next:
//!   1. queued manual requests, FIFO
//!   2. an evolved question synthesized from backlog, thoughts and beliefs
//!   3. a weighted pick from the unresolved-idea backlog
//!   4. the configured seed-question bank
//!
//! Backlog weights favour categories that have been generated less often
//! recently and categories whose affinity axis currently carries more weight.

use crate::config::{SeedQuestion, TriggerConfig};
use crate::entropy::Entropy;
use crate::reply;
use crate::store::Store;
use chrono::{DateTime, Utc};
use reverie_core::{
    AxisWeights, Category, CoreBelief, MemoryKind, SignificantThought, Trigger, TriggerSource,
    UnresolvedIdea,
};
use reverie_llm::{execute_bounded, CancellationToken, Evaluator};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const EVOLUTION_SYSTEM_PROMPT: &str = "You are the curiosity of a reflective mind. \
    Pose one new question and answer in exactly the requested format.";

const DEFAULT_EVOLVED_IMPORTANCE: f64 = 0.6;

/// A past selection, kept for category balance.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Selection {
    pub question: String,
    pub category: Category,
    pub importance: f64,
    pub source: TriggerSource,
    pub at: DateTime<Utc>,
}

pub struct TriggerScheduler {
    config: TriggerConfig,
    store: Store,
    evaluator: Arc<dyn Evaluator>,
    timeout: Duration,
    entropy: Entropy,
    manual: VecDeque<Trigger>,
    recent: VecDeque<Selection>,
}

impl TriggerScheduler {
    pub fn new(
        config: TriggerConfig,
        store: Store,
        evaluator: Arc<dyn Evaluator>,
        timeout: Duration,
        entropy: Entropy,
    ) -> Self {
        Self {
            config,
            store,
            evaluator,
            timeout,
            entropy,
            manual: VecDeque::new(),
            recent: VecDeque::new(),
        }
    }

    /// Queue an explicit request. It is returned by the next call to
    /// `next_trigger`, ahead of everything else.
    pub fn enqueue(&mut self, question: impl Into<String>, category: Category, importance: f64) -> Trigger {
        let trigger = Trigger::new(
            question,
            category,
            importance,
            TriggerSource::Manual,
            json!({ "strategy": "manual" }),
        );
        info!("Queued manual trigger {} ({})", trigger.id, trigger.category);
        self.manual.push_back(trigger.clone());
        trigger
    }

    pub fn pending_manual(&self) -> usize {
        self.manual.len()
    }

    pub fn recent(&self) -> impl Iterator<Item = &Selection> {
        self.recent.iter()
    }

    /// Share of each category among recent selections. Empty when nothing
    /// has been selected yet.
    pub fn category_distribution(&self) -> BTreeMap<Category, f64> {
        distribution(self.recent.iter().map(|s| s.category))
    }

    /// Produce the next trigger, or `None` when nothing is available.
    /// `ready` reports whether a category is off its own cooldown.
    pub async fn next_trigger(
        &mut self,
        ready: impl Fn(Category) -> bool,
        weights: &AxisWeights,
        cancel: &CancellationToken,
    ) -> Option<Trigger> {
        let trigger = match self.manual.pop_front() {
            Some(t) => Some(t),
            None => self.generate(&ready, weights, cancel).await,
        };
        if let Some(t) = &trigger {
            self.record(t);
        }
        trigger
    }

    /// Remove the backlog idea `trigger` was drawn from. Runs once the
    /// deliberation succeeded; until then the idea stays queued.
    pub async fn consume(&self, trigger: &Trigger) -> bool {
        match backlog_idea_id(trigger) {
            Some(id) => self.store.delete(MemoryKind::UnresolvedIdea, &[id.to_string()]).await > 0,
            None => false,
        }
    }

    async fn generate(
        &mut self,
        ready: &impl Fn(Category) -> bool,
        weights: &AxisWeights,
        cancel: &CancellationToken,
    ) -> Option<Trigger> {
        let ideas = self.store.ideas(self.config.backlog_scan_limit).await;
        let thoughts = self.store.thoughts(self.config.backlog_scan_limit).await;

        let has_history = !ideas.is_empty() || !thoughts.is_empty();
        if has_history && self.entropy.chance(self.config.evolved_probability) {
            let beliefs = self.store.beliefs(self.config.evolved_context_items).await;
            return Some(self.evolve(&ideas, &thoughts, &beliefs, cancel).await);
        }

        if let Some(trigger) = self.from_backlog(&ideas, ready, weights).await {
            return Some(trigger);
        }

        self.from_seed_bank()
    }

    // ============================================================
    // Evolution
    // ============================================================

    async fn evolve(
        &mut self,
        ideas: &[UnresolvedIdea],
        thoughts: &[SignificantThought],
        beliefs: &[CoreBelief],
        cancel: &CancellationToken,
    ) -> Trigger {
        let n = self.config.evolved_context_items;

        let mut top_ideas: Vec<&UnresolvedIdea> = ideas.iter().collect();
        top_ideas.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        top_ideas.truncate(n);

        let mut top_thoughts: Vec<&SignificantThought> = thoughts.iter().collect();
        top_thoughts.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        top_thoughts.truncate(n);

        let importance = if top_ideas.is_empty() {
            DEFAULT_EVOLVED_IMPORTANCE
        } else {
            top_ideas.iter().map(|i| i.importance).sum::<f64>() / top_ideas.len() as f64
        };
        let sources: Vec<&str> = top_ideas
            .iter()
            .map(|i| i.id.as_str())
            .chain(top_thoughts.iter().map(|t| t.id.as_str()))
            .collect();

        let prompt = evolution_prompt(&top_ideas, &top_thoughts, beliefs);
        let output =
            execute_bounded(self.evaluator.as_ref(), &prompt, EVOLUTION_SYSTEM_PROMPT, self.timeout, cancel).await;

        if output.success {
            if let Some((question, category)) = parse_evolved(&output.content) {
                debug!("Evolved question ({}): {}", category, question);
                return Trigger::new(
                    question,
                    category,
                    importance,
                    TriggerSource::Evolved,
                    json!({ "strategy": "evolved", "sources": sources }),
                );
            }
            debug!("Evolved question did not parse — using template");
        } else {
            debug!("Evolution request failed: {} — using template", output.content);
        }

        let (question, category) = self.template_question(&top_ideas, &top_thoughts);
        Trigger::new(
            question,
            category,
            importance,
            TriggerSource::Evolved,
            json!({ "strategy": "evolved_template", "sources": sources }),
        )
    }

    fn template_question(
        &self,
        ideas: &[&UnresolvedIdea],
        thoughts: &[&SignificantThought],
    ) -> (String, Category) {
        match (ideas, thoughts) {
            ([a, b, ..], _) => (format!("How does '{}' relate to '{}'?", a.question, b.question), a.category),
            ([a], _) => (format!("What remains unresolved about '{}'?", a.question), a.category),
            ([], [t, ..]) => (
                format!("What follows from the thought that '{}'?", t.content),
                t.category.unwrap_or_else(|| self.least_used_category()),
            ),
            ([], []) => (
                "What is worth wondering about next?".to_string(),
                self.least_used_category(),
            ),
        }
    }

    fn least_used_category(&self) -> Category {
        let dist = self.category_distribution();
        Category::ALL
            .iter()
            .copied()
            .min_by(|a, b| {
                let sa = dist.get(a).copied().unwrap_or(0.0);
                let sb = dist.get(b).copied().unwrap_or(0.0);
                sa.total_cmp(&sb)
            })
            .unwrap_or(Category::Philosophical)
    }

    // ============================================================
    // Backlog
    // ============================================================

    async fn from_backlog(
        &mut self,
        ideas: &[UnresolvedIdea],
        ready: &impl Fn(Category) -> bool,
        weights: &AxisWeights,
    ) -> Option<Trigger> {
        if ideas.is_empty() {
            return None;
        }

        let ready_ideas: Vec<&UnresolvedIdea> = ideas.iter().filter(|i| ready(i.category)).collect();
        let candidates: Vec<&UnresolvedIdea> = if ready_ideas.is_empty() {
            ideas.iter().collect()
        } else {
            ready_ideas
        };

        let dist = self.category_distribution();
        let config = &self.config;
        let balance = |c: Category| balance_multiplier(config, &dist, c);
        let index = choose_backlog(&candidates, balance, weights, &mut self.entropy)?;
        let idea = candidates[index];

        debug!("Selected backlog idea {} ({})", idea.id, idea.category);

        Some(Trigger::new(
            idea.question.clone(),
            idea.category,
            idea.importance,
            TriggerSource::Backlog,
            json!({ "strategy": "backlog", "idea_id": idea.id, "backlog_size": ideas.len() }),
        ))
    }

    fn from_seed_bank(&mut self) -> Option<Trigger> {
        if self.config.seed_questions.is_empty() {
            return None;
        }
        let dist = self.category_distribution();
        let weights: Vec<f64> = self
            .config
            .seed_questions
            .iter()
            .map(|s| s.importance.max(0.0) * balance_multiplier(&self.config, &dist, s.category))
            .collect();
        let index = self.entropy.weighted_index(&weights)?;
        let SeedQuestion { question, category, importance } = self.config.seed_questions[index].clone();
        Some(Trigger::new(
            question,
            category,
            importance,
            TriggerSource::Random,
            json!({ "strategy": "seed_bank", "index": index }),
        ))
    }

    fn record(&mut self, trigger: &Trigger) {
        self.recent.push_back(Selection {
            question: trigger.question.clone(),
            category: trigger.category,
            importance: trigger.importance,
            source: trigger.source,
            at: trigger.created_at,
        });
        while self.recent.len() > self.config.distribution_window.max(1) {
            self.recent.pop_front();
        }
    }
}

// ============================================================
// Weighting
// ============================================================

pub fn distribution(categories: impl Iterator<Item = Category>) -> BTreeMap<Category, f64> {
    let mut counts: BTreeMap<Category, usize> = BTreeMap::new();
    let mut total = 0usize;
    for c in categories {
        *counts.entry(c).or_default() += 1;
        total += 1;
    }
    counts
        .into_iter()
        .map(|(c, n)| (c, n as f64 / total as f64))
        .collect()
}

/// Selection multiplier for a category given the recent distribution.
/// Neutral while there is no history.
pub fn balance_multiplier(config: &TriggerConfig, dist: &BTreeMap<Category, f64>, category: Category) -> f64 {
    if dist.is_empty() {
        return 1.0;
    }
    let expected = 1.0 / Category::ALL.len() as f64;
    let share = dist.get(&category).copied().unwrap_or(0.0);
    if share < expected * config.underused_share {
        config.underused_multiplier
    } else if share > expected * config.overused_share {
        config.overused_multiplier
    } else {
        1.0
    }
}

/// importance × balance × (0.5 + weight of the category's affinity axis)
pub fn backlog_weight(idea: &UnresolvedIdea, balance: f64, weights: &AxisWeights) -> f64 {
    idea.importance.clamp(0.0, 1.0) * balance * (0.5 + weights.get(idea.category.affinity()))
}

/// Weighted random pick over backlog candidates.
pub fn choose_backlog(
    candidates: &[&UnresolvedIdea],
    balance: impl Fn(Category) -> f64,
    weights: &AxisWeights,
    entropy: &mut Entropy,
) -> Option<usize> {
    let w: Vec<f64> = candidates
        .iter()
        .map(|i| backlog_weight(i, balance(i.category), weights))
        .collect();
    entropy.weighted_index(&w)
}

fn evolution_prompt(
    ideas: &[&UnresolvedIdea],
    thoughts: &[&SignificantThought],
    beliefs: &[CoreBelief],
) -> String {
    let mut out = String::from(
        "Reflect on the material below and pose one new question that grows out of it.\n",
    );
    if !ideas.is_empty() {
        out.push_str("\nOPEN QUESTIONS:\n");
        for i in ideas {
            out.push_str(&format!("- ({}, {:.2}) {}\n", i.category, i.importance, i.question));
        }
    }
    if !thoughts.is_empty() {
        out.push_str("\nRECENT THOUGHTS:\n");
        for t in thoughts {
            out.push_str(&format!("- ({:.2}) {}\n", t.confidence, t.content));
        }
    }
    if !beliefs.is_empty() {
        out.push_str("\nBELIEFS:\n");
        for b in beliefs {
            out.push_str(&format!("- ({:.2}) {}\n", b.strength, b.statement));
        }
    }
    let names: Vec<&str> = Category::ALL.iter().map(|c| c.as_str()).collect();
    out.push_str(&format!(
        "\nReply with exactly two lines:\nQUESTION: <the new question>\nCATEGORY: <one of {}>",
        names.join(", ")
    ));
    out
}

pub fn backlog_idea_id(trigger: &Trigger) -> Option<&str> {
    if trigger.source != TriggerSource::Backlog {
        return None;
    }
    trigger.context.get("idea_id")?.as_str()
}

/// Both lines are required; a missing question or unknown category fails the parse.
pub fn parse_evolved(text: &str) -> Option<(String, Category)> {
    let line = |label: &str| -> Option<String> {
        let value = reply::labeled(text, label)?;
        let value = value.trim_matches(|c: char| c == '*' || c == '"' || c == '_').trim();
        (!value.is_empty()).then(|| value.to_string())
    };
    let question = line("QUESTION")?;
    let category = Category::parse(&line("CATEGORY")?)?;
    Some((question, category))
}

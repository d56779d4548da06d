//! Engine configuration
//!
//! All tunable parameters in one place. Loaded from TOML at startup,
//! falls back to defaults if no config file exists.

use reverie_core::{AxisTriple, Category, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Loop cadence and what a finished cycle leaves behind in memory.
    pub cycle: CycleConfig,
    /// Generation gate timers and burst limits.
    pub cooldown: CooldownConfig,
    /// Energy pool spent by cycles and refilled by consolidation.
    pub energy: EnergyConfig,
    /// Trigger selection strategy.
    pub trigger: TriggerConfig,
    /// Axis scoring.
    pub scoring: ScoringConfig,
    /// Axis weight adaptation.
    pub weights: WeightConfig,
    /// Memory consolidation sweep.
    pub consolidation: ConsolidationConfig,
    /// Language-model evaluator.
    pub evaluator: EvaluatorConfig,
    /// Persistence.
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// How often the loop attempts a cycle.
    pub tick_interval_ms: u64,
    /// Upper bound on one deliberation.
    pub deliberation_timeout_ms: u64,
    /// Statements at or above this confidence are kept as significant thoughts.
    pub thought_min_confidence: f64,
    /// A cycle whose dissonance reaches this goes back to the backlog as unresolved.
    pub unresolved_dissonance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// Minimum spacing between any two generations.
    pub global_cooldown_ms: u64,
    /// Per-category cooldown for the shallowest categories.
    pub category_base_ms: u64,
    /// Added to the category cooldown per depth level above 1.
    pub depth_step_ms: u64,
    /// Per-category overrides, keyed by category name.
    pub category_overrides_ms: BTreeMap<String, u64>,
    /// Burst counter window.
    pub burst_window_ms: u64,
    /// Generations allowed inside one burst window.
    pub max_burst_count: u32,
    /// Lookback for the adaptive multiplier.
    pub adaptive_window_ms: u64,
    /// Generation history entries kept for the adaptive multiplier.
    pub history_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    pub maximum: f64,
    pub recovery_per_minute: f64,
    /// Below this ratio consolidation is launched as energy-critical.
    pub critical_ratio: f64,
}

/// A fixed question the scheduler can fall back to when nothing else is available.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeedQuestion {
    pub question: String,
    pub category: Category,
    #[serde(default = "default_seed_importance")]
    pub importance: f64,
}

fn default_seed_importance() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Chance of synthesizing an evolved question when history exists.
    pub evolved_probability: f64,
    /// Selection multiplier for categories well below their expected share.
    pub underused_multiplier: f64,
    /// Selection multiplier for categories well above their expected share.
    pub overused_multiplier: f64,
    /// A category is underused below this fraction of its expected share.
    pub underused_share: f64,
    /// A category is overused above this multiple of its expected share.
    pub overused_share: f64,
    /// Recent selections used for the category distribution.
    pub distribution_window: usize,
    /// Backlog items, thoughts and beliefs each given to evolution.
    pub evolved_context_items: usize,
    /// Backlog items considered per selection.
    pub backlog_scan_limit: usize,
    pub seed_questions: Vec<SeedQuestion>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Ask the evaluator first, fall back to heuristics per axis.
    #[default]
    AiFirst,
    /// Never call the evaluator.
    HeuristicOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub mode: ScoringMode,
    /// Dissonance rise alone that marks a paradigm shift.
    pub shift_rise: f64,
    /// Controversy alone that marks a paradigm shift.
    pub shift_controversy: f64,
    /// Absolute dissonance that marks a paradigm shift.
    pub shift_dissonance: f64,
    /// Combined rule: rise above this together with controversy above `combined_controversy`.
    pub combined_rise: f64,
    pub combined_controversy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub min_weight: f64,
    pub max_weight: f64,
    pub learning_rate: f64,
    /// Multiplied into the learning rate after every update.
    pub learning_rate_decay: f64,
    pub min_learning_rate: f64,
    /// Explicit per-axis target scores. When unset, a running expectation is used.
    pub targets: Option<AxisTriple>,
    /// Starting value of the running expectation.
    pub default_target: f64,
    /// How fast the running expectation follows observed scores.
    pub baseline_rate: f64,
    pub perturbation_enabled: bool,
    /// Perturb every N updates.
    pub perturbation_interval: u64,
    pub perturbation_strength: f64,
    /// Update magnitudes kept for the convergence metric.
    pub convergence_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Scheduled run spacing.
    pub interval_minutes: u64,
    /// Upper bound on each phase.
    pub phase_timeout_ms: u64,

    pub pattern_sample: usize,
    pub pattern_min_confidence: f64,
    /// Extracted patterns shorter than this are discarded.
    pub min_pattern_chars: usize,
    pub max_patterns: usize,

    pub belief_batch: usize,
    pub belief_min_age_hours: i64,
    pub belief_min_confidence: f64,
    /// A thought at least this similar to a belief strengthens it instead of creating one.
    pub belief_match_similarity: f64,
    /// Beliefs at least this similar are merged.
    pub belief_merge_similarity: f64,

    pub prune_sample: usize,
    /// Transient records older than this are always deleted.
    pub failsafe_age_hours: i64,

    pub tension_sample: usize,
    pub tension_min_dissonance: f64,
    pub insight_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub model: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub temperature: Option<f32>,
    /// Messages endpoint override, e.g. a local proxy.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot file. Relative paths resolve against the workspace. Unset keeps memory in-process.
    pub path: Option<String>,
    /// Upper bound on each repository call.
    pub timeout_ms: u64,
}

// ============================================================
// Defaults
// ============================================================

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            deliberation_timeout_ms: 120_000,
            thought_min_confidence: 0.6,
            unresolved_dissonance: 0.6,
        }
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            global_cooldown_ms: 30_000,
            category_base_ms: 60_000,
            depth_step_ms: 30_000,
            category_overrides_ms: BTreeMap::new(),
            burst_window_ms: 60_000,
            max_burst_count: 5,
            adaptive_window_ms: 300_000,
            history_limit: 50,
        }
    }
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self { maximum: 100.0, recovery_per_minute: 1.0, critical_ratio: 0.15 }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            evolved_probability: 0.7,
            underused_multiplier: 3.0,
            overused_multiplier: 0.3,
            underused_share: 0.5,
            overused_share: 1.5,
            distribution_window: 40,
            evolved_context_items: 5,
            backlog_scan_limit: 200,
            seed_questions: Vec::new(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            mode: ScoringMode::AiFirst,
            shift_rise: 0.25,
            shift_controversy: 0.6,
            shift_dissonance: 0.8,
            combined_rise: 0.15,
            combined_controversy: 0.4,
        }
    }
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            min_weight: 0.1,
            max_weight: 0.6,
            learning_rate: 0.1,
            learning_rate_decay: 0.995,
            min_learning_rate: 0.01,
            targets: None,
            default_target: 0.7,
            baseline_rate: 0.2,
            perturbation_enabled: true,
            perturbation_interval: 10,
            perturbation_strength: 0.02,
            convergence_window: 20,
        }
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 240,
            phase_timeout_ms: 180_000,
            pattern_sample: 20,
            pattern_min_confidence: 0.6,
            min_pattern_chars: 12,
            max_patterns: 5,
            belief_batch: 10,
            belief_min_age_hours: 6,
            belief_min_confidence: 0.7,
            belief_match_similarity: 0.5,
            belief_merge_similarity: 0.9,
            prune_sample: 30,
            failsafe_age_hours: 48,
            tension_sample: 3,
            tension_min_dissonance: 0.7,
            insight_confidence: 0.3,
        }
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            model: reverie_llm::DEFAULT_MODEL.into(),
            max_tokens: reverie_llm::DEFAULT_MAX_TOKENS,
            timeout_ms: 30_000,
            temperature: None,
            base_url: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: Some("memory.json".into()), timeout_ms: 5_000 }
    }
}

// ============================================================
// Loading
// ============================================================

impl EngineConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {} — using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!("No config at {} — using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the current config as TOML (for generating a default config file).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        if !(w.min_weight >= 0.0 && w.min_weight <= w.max_weight) {
            return Err(Error::config(format!(
                "weights.min_weight {} must be in [0, max_weight {}]",
                w.min_weight, w.max_weight
            )));
        }
        if 3.0 * w.min_weight > 1.0 {
            return Err(Error::config(format!(
                "3 × weights.min_weight ({}) exceeds 1",
                w.min_weight
            )));
        }
        if 3.0 * w.max_weight < 1.0 {
            return Err(Error::config(format!(
                "3 × weights.max_weight ({}) is below 1",
                w.max_weight
            )));
        }
        if !(w.learning_rate > 0.0 && w.min_learning_rate >= 0.0) {
            return Err(Error::config("weights.learning_rate must be positive"));
        }
        if !(w.learning_rate_decay > 0.0 && w.learning_rate_decay <= 1.0) {
            return Err(Error::config("weights.learning_rate_decay must be in (0, 1]"));
        }
        check_unit("weights.baseline_rate", w.baseline_rate)?;
        check_unit("weights.default_target", w.default_target)?;
        if let Some(t) = &w.targets {
            for (name, v) in [("empathy", t.empathy), ("coherence", t.coherence), ("dissonance", t.dissonance)] {
                check_unit(&format!("weights.targets.{}", name), v)?;
            }
        }
        if w.perturbation_strength < 0.0 {
            return Err(Error::config("weights.perturbation_strength must be non-negative"));
        }

        let t = &self.trigger;
        check_unit("trigger.evolved_probability", t.evolved_probability)?;
        if t.underused_multiplier < 0.0 || t.overused_multiplier < 0.0 {
            return Err(Error::config("trigger multipliers must be non-negative"));
        }
        if t.distribution_window == 0 {
            return Err(Error::config("trigger.distribution_window must be at least 1"));
        }
        for seed in &t.seed_questions {
            if seed.question.trim().is_empty() {
                return Err(Error::config("trigger.seed_questions contains an empty question"));
            }
        }

        let c = &self.cooldown;
        if c.max_burst_count == 0 {
            return Err(Error::config("cooldown.max_burst_count must be at least 1"));
        }
        if c.history_limit == 0 {
            return Err(Error::config("cooldown.history_limit must be at least 1"));
        }
        for name in c.category_overrides_ms.keys() {
            if Category::parse(name).is_none() {
                return Err(Error::config(format!(
                    "cooldown.category_overrides_ms: unknown category '{}'",
                    name
                )));
            }
        }

        if self.energy.maximum <= 0.0 {
            return Err(Error::config("energy.maximum must be positive"));
        }
        check_unit("energy.critical_ratio", self.energy.critical_ratio)?;

        let k = &self.consolidation;
        for (name, v) in [
            ("consolidation.pattern_min_confidence", k.pattern_min_confidence),
            ("consolidation.belief_min_confidence", k.belief_min_confidence),
            ("consolidation.belief_match_similarity", k.belief_match_similarity),
            ("consolidation.belief_merge_similarity", k.belief_merge_similarity),
            ("consolidation.tension_min_dissonance", k.tension_min_dissonance),
            ("consolidation.insight_confidence", k.insight_confidence),
            ("cycle.thought_min_confidence", self.cycle.thought_min_confidence),
            ("cycle.unresolved_dissonance", self.cycle.unresolved_dissonance),
        ] {
            check_unit(name, v)?;
        }
        if k.failsafe_age_hours <= 0 {
            return Err(Error::config("consolidation.failsafe_age_hours must be positive"));
        }

        if self.evaluator.timeout_ms == 0 || self.store.timeout_ms == 0 {
            return Err(Error::config("timeouts must be non-zero"));
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::config(format!("{} = {} is outside [0, 1]", name, value)))
    }
}

impl CooldownConfig {
    /// Base cooldown for a category before the adaptive multiplier.
    pub fn category_base(&self, category: Category) -> Duration {
        let ms = self
            .category_overrides_ms
            .iter()
            .find(|(name, _)| Category::parse(name) == Some(category))
            .map(|(_, ms)| *ms)
            .unwrap_or_else(|| {
                self.category_base_ms + self.depth_step_ms * (category.depth() as u64 - 1)
            });
        Duration::from_millis(ms)
    }
}

impl EvaluatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn toml_roundtrip_keeps_sections() {
        let mut config = EngineConfig::default();
        config.trigger.seed_questions.push(SeedQuestion {
            question: "What is a good life?".into(),
            category: Category::Existential,
            importance: 0.9,
        });
        config.weights.targets = Some(AxisTriple::new(0.8, 0.7, 0.4));
        let text = config.to_toml();
        assert!(text.contains("[weights]"));
        assert!(text.contains("[[trigger.seed_questions]]"));
        let back: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.trigger.seed_questions, config.trigger.seed_questions);
        assert_eq!(back.weights.targets, config.weights.targets);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str("[cooldown]\nglobal_cooldown_ms = 10\n").unwrap();
        assert_eq!(config.cooldown.global_cooldown_ms, 10);
        assert_eq!(config.cooldown.max_burst_count, 5);
        assert_eq!(config.trigger.evolved_probability, 0.7);
    }

    #[test]
    fn infeasible_weight_bounds_rejected() {
        let mut config = EngineConfig::default();
        config.weights.min_weight = 0.4;
        config.weights.max_weight = 0.6;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("min_weight"));

        let mut config = EngineConfig::default();
        config.weights.max_weight = 0.3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn probability_out_of_range_rejected() {
        let mut config = EngineConfig::default();
        config.trigger.evolved_probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_override_category_rejected() {
        let mut config = EngineConfig::default();
        config.cooldown.category_overrides_ms.insert("astrology".into(), 5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn deeper_categories_have_longer_base() {
        let c = CooldownConfig::default();
        assert!(c.category_base(Category::Existential) > c.category_base(Category::Social));

        let mut c = CooldownConfig::default();
        c.category_overrides_ms.insert("Social".into(), 1_000);
        assert_eq!(c.category_base(Category::Social), Duration::from_millis(1_000));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let config = EngineConfig::load(Path::new("/nonexistent/reverie.toml"));
        assert_eq!(config.cooldown.global_cooldown_ms, 30_000);
    }
}

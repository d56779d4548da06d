//! Core types for Reverie

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// Fixed set of question categories a trigger can belong to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Philosophical,
    Ethical,
    Existential,
    Creative,
    Scientific,
    Social,
    Emotional,
    Metacognitive,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Philosophical,
        Category::Ethical,
        Category::Existential,
        Category::Creative,
        Category::Scientific,
        Category::Social,
        Category::Emotional,
        Category::Metacognitive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Philosophical => "philosophical",
            Category::Ethical => "ethical",
            Category::Existential => "existential",
            Category::Creative => "creative",
            Category::Scientific => "scientific",
            Category::Social => "social",
            Category::Emotional => "emotional",
            Category::Metacognitive => "metacognitive",
        }
    }

    /// Lenient parse: case-insensitive, ignores surrounding punctuation and markdown.
    pub fn parse(s: &str) -> Option<Self> {
        let cleaned = s
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        Self::ALL.iter().copied().find(|c| c.as_str() == cleaned)
    }

    /// The value axis this category mostly exercises. Used to let the current
    /// axis weights bias backlog selection.
    pub fn affinity(&self) -> Axis {
        match self {
            Category::Ethical | Category::Social | Category::Emotional => Axis::Empathy,
            Category::Philosophical | Category::Scientific | Category::Metacognitive => {
                Axis::Coherence
            }
            Category::Existential | Category::Creative => Axis::Dissonance,
        }
    }

    /// Abstraction depth, 1 (concrete) to 4 (most abstract).
    pub fn depth(&self) -> u8 {
        match self {
            Category::Existential | Category::Metacognitive => 4,
            Category::Philosophical | Category::Ethical => 3,
            Category::Creative | Category::Scientific => 2,
            Category::Social | Category::Emotional => 1,
        }
    }

    /// Energy spent deliberating on a question of this category.
    pub fn energy_cost(&self) -> f64 {
        4.0 + 2.0 * self.depth() as f64
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Axes
// ---------------------------------------------------------------------------

/// One of the three tracked value dimensions.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Empathy,
    Coherence,
    Dissonance,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Empathy, Axis::Coherence, Axis::Dissonance];

    /// Label used in evaluator requests and parsed back from responses.
    pub fn label(&self) -> &'static str {
        match self {
            Axis::Empathy => "EMPATHY",
            Axis::Coherence => "COHERENCE",
            Axis::Dissonance => "DISSONANCE",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A value per axis.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AxisTriple {
    pub empathy: f64,
    pub coherence: f64,
    pub dissonance: f64,
}

impl AxisTriple {
    pub fn new(empathy: f64, coherence: f64, dissonance: f64) -> Self {
        Self {
            empathy,
            coherence,
            dissonance,
        }
    }

    pub fn uniform(value: f64) -> Self {
        Self::new(value, value, value)
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Empathy => self.empathy,
            Axis::Coherence => self.coherence,
            Axis::Dissonance => self.dissonance,
        }
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::Empathy => self.empathy = value,
            Axis::Coherence => self.coherence = value,
            Axis::Dissonance => self.dissonance = value,
        }
    }

    pub fn sum(&self) -> f64 {
        self.empathy + self.coherence + self.dissonance
    }

    pub fn dot(&self, other: &AxisTriple) -> f64 {
        self.empathy * other.empathy
            + self.coherence * other.coherence
            + self.dissonance * other.dissonance
    }

    pub fn is_finite(&self) -> bool {
        self.empathy.is_finite() && self.coherence.is_finite() && self.dissonance.is_finite()
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self::new(f(self.empathy), f(self.coherence), f(self.dissonance))
    }
}

// ---------------------------------------------------------------------------
// Weights & scores
// ---------------------------------------------------------------------------

/// The default even split used at start and after numeric corruption.
pub const DEFAULT_WEIGHT_SPLIT: AxisTriple = AxisTriple {
    empathy: 0.33,
    coherence: 0.33,
    dissonance: 0.34,
};

/// Current axis weights. Sum is 1.0 and every weight stays within the adapter's bounds.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AxisWeights {
    #[serde(flatten)]
    pub values: AxisTriple,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl AxisWeights {
    pub fn default_split() -> Self {
        Self {
            values: DEFAULT_WEIGHT_SPLIT,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        self.values.get(axis)
    }

    pub fn is_valid(&self, min_weight: f64, max_weight: f64) -> bool {
        self.values.is_finite()
            && (self.values.sum() - 1.0).abs() <= 1e-6
            && Axis::ALL.iter().all(|a| {
                let w = self.get(*a);
                w >= min_weight - 1e-9 && w <= max_weight + 1e-9
            })
    }
}

impl Default for AxisWeights {
    fn default() -> Self {
        Self::default_split()
    }
}

/// Context captured alongside a cycle's scores.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ScoreContext {
    pub deliberation_id: String,
    pub trigger_id: String,
    pub question: String,
    pub source: Option<TriggerSource>,
    pub prior: Option<AxisTriple>,
    /// Dominant emotional tone across statements, if any were tagged.
    pub emotional_state: Option<String>,
    pub energy_ratio: Option<f64>,
    pub system_load: Option<f64>,
}

/// Scores for one completed deliberation cycle. Never mutated after creation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AxisScores {
    #[serde(flatten)]
    pub values: AxisTriple,
    pub weighted_total: f64,
    pub context: ScoreContext,
    pub created_at: DateTime<Utc>,
}

impl AxisScores {
    pub fn get(&self, axis: Axis) -> f64 {
        self.values.get(axis)
    }
}

/// Append-only weight history row.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WeightHistoryRow {
    pub timestamp: DateTime<Utc>,
    pub empathy: f64,
    pub coherence: f64,
    pub dissonance: f64,
    pub version: u64,
    pub trigger_type: String,
    #[serde(default)]
    pub context: serde_json::Value,
}

impl WeightHistoryRow {
    pub fn from_weights(
        weights: &AxisWeights,
        trigger_type: impl Into<String>,
        context: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: weights.updated_at,
            empathy: weights.values.empathy,
            coherence: weights.values.coherence,
            dissonance: weights.values.dissonance,
            version: weights.version,
            trigger_type: trigger_type.into(),
            context,
        }
    }

    pub fn to_weights(&self) -> AxisWeights {
        AxisWeights {
            values: AxisTriple::new(self.empathy, self.coherence, self.dissonance),
            version: self.version,
            updated_at: self.timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// Where a trigger came from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Manual,
    Evolved,
    Backlog,
    Random,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Evolved => "evolved",
            TriggerSource::Backlog => "backlog",
            TriggerSource::Random => "random",
        }
    }
}

/// A self-generated question that seeds one deliberation cycle.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    pub id: String,
    pub question: String,
    pub category: Category,
    pub importance: f64,
    /// 1 (low) to 4 (urgent).
    pub priority: u8,
    pub energy_cost: f64,
    pub source: TriggerSource,
    #[serde(default)]
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Trigger {
    pub fn new(
        question: impl Into<String>,
        category: Category,
        importance: f64,
        source: TriggerSource,
        context: serde_json::Value,
    ) -> Self {
        let importance = if importance.is_finite() {
            importance.clamp(0.0, 1.0)
        } else {
            0.5
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            question: question.into(),
            category,
            importance,
            priority: priority_for(importance),
            energy_cost: category.energy_cost(),
            source,
            context,
            created_at: Utc::now(),
        }
    }
}

/// Map importance in [0,1] onto priority 1..=4.
pub fn priority_for(importance: f64) -> u8 {
    (1.0 + (importance.clamp(0.0, 1.0) * 3.0).round()) as u8
}

// ---------------------------------------------------------------------------
// Energy
// ---------------------------------------------------------------------------

/// Available cognitive energy. Spent by cycles, recovered over time, refilled by consolidation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EnergyState {
    pub available: f64,
    pub maximum: f64,
    /// Energy recovered per minute of wall-clock time.
    pub recovery_per_minute: f64,
    pub updated_at: DateTime<Utc>,
}

impl EnergyState {
    pub fn full(maximum: f64, recovery_per_minute: f64) -> Self {
        Self {
            available: maximum,
            maximum,
            recovery_per_minute,
            updated_at: Utc::now(),
        }
    }

    /// Available energy as a fraction of maximum, in [0,1].
    pub fn ratio(&self) -> f64 {
        if self.maximum <= 0.0 {
            return 0.0;
        }
        (self.available / self.maximum).clamp(0.0, 1.0)
    }

    pub fn consume(&mut self, amount: f64) {
        self.available = (self.available - amount.max(0.0)).max(0.0);
    }

    /// Apply passive recovery for the time elapsed since the last update.
    pub fn recover(&mut self, now: DateTime<Utc>) {
        let elapsed_ms = (now - self.updated_at).num_milliseconds();
        if elapsed_ms > 0 {
            let gained = self.recovery_per_minute * elapsed_ms as f64 / 60_000.0;
            self.available = (self.available + gained).min(self.maximum);
            self.updated_at = now;
        }
    }

    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.available = self.maximum;
        self.updated_at = now;
    }
}

// ---------------------------------------------------------------------------
// Gate decisions
// ---------------------------------------------------------------------------

/// Why the cooldown gate refused a generation attempt.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum GateDenial {
    Dormant,
    GlobalCooldown { remaining_ms: i64 },
    LowEnergy { energy_ratio: f64, required_ms: i64, elapsed_ms: i64 },
    HighLoad { system_load: f64, required_ms: i64, elapsed_ms: i64 },
    Burst { count: u32, limit: u32, resets_in_ms: i64 },
}

impl fmt::Display for GateDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateDenial::Dormant => write!(f, "dormant (consolidation running)"),
            GateDenial::GlobalCooldown { remaining_ms } => {
                write!(f, "global cooldown, {}ms remaining", remaining_ms)
            }
            GateDenial::LowEnergy {
                energy_ratio,
                required_ms,
                elapsed_ms,
            } => write!(
                f,
                "low energy ({:.0}%), {}ms of {}ms elapsed",
                energy_ratio * 100.0,
                elapsed_ms,
                required_ms
            ),
            GateDenial::HighLoad {
                system_load,
                required_ms,
                elapsed_ms,
            } => write!(
                f,
                "high load ({:.2}), {}ms of {}ms elapsed",
                system_load, elapsed_ms, required_ms
            ),
            GateDenial::Burst {
                count,
                limit,
                resets_in_ms,
            } => write!(
                f,
                "burst limit {}/{}, resets in {}ms",
                count, limit, resets_in_ms
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Deliberation artifacts
// ---------------------------------------------------------------------------

/// One contributor's position in a deliberation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Statement {
    pub agent: String,
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub emotional_tone: Option<String>,
}

/// One contributor's critique of another's statement.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Critique {
    pub from: String,
    pub to: String,
    pub content: String,
    /// Explicit flag when the producer knows the critique proposes an alternative view.
    #[serde(default)]
    pub offers_alternative: Option<bool>,
}

/// Outcome of the safety/ethics audit over a deliberation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SafetyAudit {
    pub passed: bool,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub ethics_score: Option<f64>,
}

/// The artifacts of one completed deliberation cycle.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Deliberation {
    pub id: String,
    pub trigger_id: String,
    pub statements: Vec<Statement>,
    pub critiques: Vec<Critique>,
    pub audit: SafetyAudit,
    pub completed_at: DateTime<Utc>,
}

impl Deliberation {
    pub fn new(
        trigger_id: impl Into<String>,
        statements: Vec<Statement>,
        critiques: Vec<Critique>,
        audit: SafetyAudit,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            trigger_id: trigger_id.into(),
            statements,
            critiques,
            audit,
            completed_at: Utc::now(),
        }
    }
}

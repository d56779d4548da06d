//! Persisted memory records
//!
//! Ideas and thoughts are produced by deliberation; beliefs, patterns and sleep
//! logs by consolidation. Only consolidation deletes or merges records.

use crate::types::Category;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    UnresolvedIdea,
    SignificantThought,
    CoreBelief,
    DreamPattern,
    SleepLog,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 5] = [
        MemoryKind::UnresolvedIdea,
        MemoryKind::SignificantThought,
        MemoryKind::CoreBelief,
        MemoryKind::DreamPattern,
        MemoryKind::SleepLog,
    ];

    /// Kinds that are subject to age-based pruning. Beliefs and sleep logs are long-lived.
    pub const TRANSIENT: [MemoryKind; 3] = [
        MemoryKind::UnresolvedIdea,
        MemoryKind::SignificantThought,
        MemoryKind::DreamPattern,
    ];
}

/// An open question waiting in the backlog.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UnresolvedIdea {
    pub id: String,
    pub question: String,
    pub category: Category,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
}

impl UnresolvedIdea {
    pub fn new(question: impl Into<String>, category: Category, importance: f64) -> Self {
        Self {
            id: new_id(),
            question: question.into(),
            category,
            importance: importance.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtOrigin {
    #[default]
    Deliberation,
    /// Synthesized resolution of a high-tension cycle.
    Insight,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SignificantThought {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub category: Option<Category>,
    pub confidence: f64,
    #[serde(default)]
    pub origin: ThoughtOrigin,
    pub created_at: DateTime<Utc>,
}

impl SignificantThought {
    pub fn new(content: impl Into<String>, category: Option<Category>, confidence: f64) -> Self {
        Self {
            id: new_id(),
            content: content.into(),
            category,
            confidence: confidence.clamp(0.0, 1.0),
            origin: ThoughtOrigin::Deliberation,
            created_at: Utc::now(),
        }
    }

    pub fn insight(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            origin: ThoughtOrigin::Insight,
            ..Self::new(content, None, confidence)
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CoreBelief {
    pub id: String,
    pub statement: String,
    pub strength: f64,
    pub evidence_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CoreBelief {
    pub fn new(statement: impl Into<String>, strength: f64) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            statement: statement.into(),
            strength: strength.clamp(0.0, 1.0),
            evidence_count: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DreamPattern {
    pub id: String,
    pub pattern: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl DreamPattern {
    pub fn new(pattern: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: new_id(),
            pattern: pattern.into(),
            confidence: confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Consolidation log
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationPhase {
    PatternExtraction,
    BeliefConsolidation,
    Pruning,
    TensionResolution,
}

impl ConsolidationPhase {
    pub const ORDER: [ConsolidationPhase; 4] = [
        ConsolidationPhase::PatternExtraction,
        ConsolidationPhase::BeliefConsolidation,
        ConsolidationPhase::Pruning,
        ConsolidationPhase::TensionResolution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsolidationPhase::PatternExtraction => "pattern_extraction",
            ConsolidationPhase::BeliefConsolidation => "belief_consolidation",
            ConsolidationPhase::Pruning => "pruning",
            ConsolidationPhase::TensionResolution => "tension_resolution",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed,
    /// Nothing to do (no candidates, evaluator produced nothing usable).
    Skipped,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PhaseOutcome {
    pub phase: ConsolidationPhase,
    pub status: PhaseStatus,
    /// Records created, merged or deleted by the phase.
    pub affected: usize,
    pub detail: String,
    pub duration_ms: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SleepStats {
    pub patterns_extracted: usize,
    pub beliefs_created: usize,
    pub beliefs_updated: usize,
    pub beliefs_merged: usize,
    pub thoughts_consolidated: usize,
    pub records_pruned: usize,
    pub failsafe_pruned: usize,
    pub insights_created: usize,
    pub energy_before: f64,
    pub energy_after: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SleepLog {
    pub id: String,
    pub reason: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub phases: Vec<PhaseOutcome>,
    pub stats: SleepStats,
}

// ---------------------------------------------------------------------------
// Tagged union
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryRecord {
    UnresolvedIdea(UnresolvedIdea),
    SignificantThought(SignificantThought),
    CoreBelief(CoreBelief),
    DreamPattern(DreamPattern),
    SleepLog(SleepLog),
}

impl MemoryRecord {
    pub fn id(&self) -> &str {
        match self {
            MemoryRecord::UnresolvedIdea(r) => &r.id,
            MemoryRecord::SignificantThought(r) => &r.id,
            MemoryRecord::CoreBelief(r) => &r.id,
            MemoryRecord::DreamPattern(r) => &r.id,
            MemoryRecord::SleepLog(r) => &r.id,
        }
    }

    pub fn kind(&self) -> MemoryKind {
        match self {
            MemoryRecord::UnresolvedIdea(_) => MemoryKind::UnresolvedIdea,
            MemoryRecord::SignificantThought(_) => MemoryKind::SignificantThought,
            MemoryRecord::CoreBelief(_) => MemoryKind::CoreBelief,
            MemoryRecord::DreamPattern(_) => MemoryKind::DreamPattern,
            MemoryRecord::SleepLog(_) => MemoryKind::SleepLog,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            MemoryRecord::UnresolvedIdea(r) => r.created_at,
            MemoryRecord::SignificantThought(r) => r.created_at,
            MemoryRecord::CoreBelief(r) => r.created_at,
            MemoryRecord::DreamPattern(r) => r.created_at,
            MemoryRecord::SleepLog(r) => r.started_at,
        }
    }

    /// Importance, confidence or strength, depending on the variant.
    pub fn weight(&self) -> f64 {
        match self {
            MemoryRecord::UnresolvedIdea(r) => r.importance,
            MemoryRecord::SignificantThought(r) => r.confidence,
            MemoryRecord::CoreBelief(r) => r.strength,
            MemoryRecord::DreamPattern(r) => r.confidence,
            MemoryRecord::SleepLog(_) => 0.0,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            MemoryRecord::UnresolvedIdea(r) => &r.question,
            MemoryRecord::SignificantThought(r) => &r.content,
            MemoryRecord::CoreBelief(r) => &r.statement,
            MemoryRecord::DreamPattern(r) => &r.pattern,
            MemoryRecord::SleepLog(r) => &r.reason,
        }
    }
}

impl From<UnresolvedIdea> for MemoryRecord {
    fn from(r: UnresolvedIdea) -> Self {
        MemoryRecord::UnresolvedIdea(r)
    }
}

impl From<SignificantThought> for MemoryRecord {
    fn from(r: SignificantThought) -> Self {
        MemoryRecord::SignificantThought(r)
    }
}

impl From<CoreBelief> for MemoryRecord {
    fn from(r: CoreBelief) -> Self {
        MemoryRecord::CoreBelief(r)
    }
}

impl From<DreamPattern> for MemoryRecord {
    fn from(r: DreamPattern) -> Self {
        MemoryRecord::DreamPattern(r)
    }
}

impl From<SleepLog> for MemoryRecord {
    fn from(r: SleepLog) -> Self {
        MemoryRecord::SleepLog(r)
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

//! Reverie Engine — adaptive scoring and scheduling for an autonomous thinking loop
//!
//! Architecture:
//! - CooldownGate: decides whether a new question may be generated now
//! - TriggerScheduler: manual > evolved > backlog > seed bank, balanced by category
//! - ScoreEngine: empathy / coherence / dissonance, evaluator first, heuristic fallback
//! - WeightAdapter: bounded online update of the axis weights
//! - ConsolidationScheduler: exclusive "sleep" pass over memory, refills energy
//!
//! `Mind` wires them together around an injected repository, evaluator,
//! deliberator and event sink.

pub mod config;
pub mod consolidation;
pub mod cooldown;
pub mod deliberation;
pub mod dormancy;
pub mod entropy;
pub mod mind;
pub mod reply;
pub mod repository;
pub mod score;
pub mod similarity;
pub mod sink;
pub mod snapshot;
pub mod store;
pub mod trigger;
pub mod weights;

pub use config::EngineConfig;
pub use consolidation::{ConsolidationReason, ConsolidationScheduler};
pub use cooldown::{CooldownGate, CooldownStatus, GateDecision};
pub use deliberation::{Deliberator, EvaluatorDeliberator, Perspective};
pub use dormancy::{Dormancy, DormancyGuard};
pub use entropy::Entropy;
pub use mind::{CycleReport, Mind, MindStatus, RunSummary, TickOutcome};
pub use repository::{InMemoryRepository, MemorySnapshot, Repository};
pub use score::{ScoreEngine, ScoreSource, ScoredCycle};
pub use sink::{BroadcastSink, LogSink, Tee};
pub use snapshot::JsonFileRepository;
pub use store::Store;
pub use trigger::TriggerScheduler;
pub use weights::{WeightAdapter, WeightOutcome, WeightUpdate};

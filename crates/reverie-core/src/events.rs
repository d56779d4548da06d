//! Observational events emitted by the thinking loop
//!
//! Components never depend on delivery: a sink that drops everything is valid.
//!
//! Wire format (JSON, one object per event):
//!   { "event": "trigger_generated", "trigger": { ... } }
//!   { "event": "weights_updated", "weights": { ... }, "magnitude": 0.012, "perturbed": false }

use crate::memory::{PhaseOutcome, SleepStats};
use crate::types::{AxisScores, AxisWeights, EnergyState, GateDenial, Trigger};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    TriggerGenerated {
        trigger: Trigger,
    },
    GenerationDenied {
        denial: GateDenial,
    },
    /// Cooldown/burst snapshot after a successful generation.
    CooldownState {
        global_remaining_ms: i64,
        burst_count: u32,
        burst_limit: u32,
    },
    ScoresComputed {
        scores: AxisScores,
        paradigm_shift: bool,
    },
    WeightsUpdated {
        weights: AxisWeights,
        magnitude: f64,
        perturbed: bool,
    },
    WeightsReset {
        weights: AxisWeights,
        reason: String,
    },
    ConsolidationStarted {
        reason: String,
    },
    ConsolidationPhase {
        outcome: PhaseOutcome,
    },
    ConsolidationCompleted {
        stats: SleepStats,
        duration_ms: u64,
    },
    EnergyRecovered {
        energy: EnergyState,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::TriggerGenerated { .. } => "trigger_generated",
            Event::GenerationDenied { .. } => "generation_denied",
            Event::CooldownState { .. } => "cooldown_state",
            Event::ScoresComputed { .. } => "scores_computed",
            Event::WeightsUpdated { .. } => "weights_updated",
            Event::WeightsReset { .. } => "weights_reset",
            Event::ConsolidationStarted { .. } => "consolidation_started",
            Event::ConsolidationPhase { .. } => "consolidation_phase",
            Event::ConsolidationCompleted { .. } => "consolidation_completed",
            Event::EnergyRecovered { .. } => "energy_recovered",
        }
    }
}

/// Receives events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

impl<F> EventSink for F
where
    F: Fn(Event) + Send + Sync,
{
    fn emit(&self, event: Event) {
        self(event)
    }
}

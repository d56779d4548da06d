//! Generation gate: elapsed time, energy, load and burst activity
//!
//! The gate only decides. Recording a generation is a separate call made once a
//! trigger actually exists.

use crate::config::CooldownConfig;
use crate::dormancy::Dormancy;
use chrono::{DateTime, Duration, Utc};
use reverie_core::{Category, GateDenial};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

const LOW_ENERGY: f64 = 0.2;
const MEDIUM_ENERGY: f64 = 0.5;
const HIGH_LOAD: f64 = 0.8;
const MEDIUM_LOAD: f64 = 0.6;

/// One past generation, kept for the adaptive multiplier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GenerationRecord {
    pub category: Category,
    pub energy_ratio: f64,
    pub system_load: f64,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CooldownState {
    pub category_next: BTreeMap<Category, DateTime<Utc>>,
    pub global_next: Option<DateTime<Utc>>,
    pub last_generation: Option<DateTime<Utc>>,
    pub burst_count: u32,
    pub burst_window_start: Option<DateTime<Utc>>,
    pub history: VecDeque<GenerationRecord>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GateDecision {
    Allowed,
    Denied(GateDenial),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }
}

/// Remaining waits, for monitoring.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CooldownStatus {
    pub dormant: bool,
    pub global_remaining_ms: i64,
    pub category_remaining_ms: BTreeMap<Category, i64>,
    pub burst_count: u32,
    pub burst_limit: u32,
    pub burst_resets_in_ms: i64,
}

pub struct CooldownGate {
    config: CooldownConfig,
    dormancy: Dormancy,
    state: CooldownState,
}

impl CooldownGate {
    pub fn new(config: CooldownConfig, dormancy: Dormancy) -> Self {
        Self { config, dormancy, state: CooldownState::default() }
    }

    pub fn state(&self) -> &CooldownState {
        &self.state
    }

    pub fn can_generate(&self, energy_ratio: f64, system_load: f64, now: DateTime<Utc>) -> GateDecision {
        if self.dormancy.is_dormant() {
            return GateDecision::Denied(GateDenial::Dormant);
        }

        if let Some(next) = self.state.global_next {
            if now < next {
                return GateDecision::Denied(GateDenial::GlobalCooldown {
                    remaining_ms: (next - now).num_milliseconds(),
                });
            }
        }

        let base = self.config.global_cooldown_ms as f64;
        if let Some(last) = self.state.last_generation {
            let elapsed_ms = (now - last).num_milliseconds();

            let energy_factor = if energy_ratio < LOW_ENERGY {
                3.0
            } else if energy_ratio < MEDIUM_ENERGY {
                2.0
            } else {
                1.0
            };
            let required_ms = (base * energy_factor) as i64;
            if energy_factor > 1.0 && elapsed_ms < required_ms {
                return GateDecision::Denied(GateDenial::LowEnergy { energy_ratio, required_ms, elapsed_ms });
            }

            let load_factor = if system_load > HIGH_LOAD {
                2.5
            } else if system_load > MEDIUM_LOAD {
                1.5
            } else {
                1.0
            };
            let required_ms = (base * load_factor) as i64;
            if load_factor > 1.0 && elapsed_ms < required_ms {
                return GateDecision::Denied(GateDenial::HighLoad { system_load, required_ms, elapsed_ms });
            }
        }

        if let Some(start) = self.state.burst_window_start {
            let window = Duration::milliseconds(self.config.burst_window_ms as i64);
            let age = now - start;
            if age <= window && self.state.burst_count >= self.config.max_burst_count {
                return GateDecision::Denied(GateDenial::Burst {
                    count: self.state.burst_count,
                    limit: self.config.max_burst_count,
                    resets_in_ms: (window - age).num_milliseconds(),
                });
            }
        }

        GateDecision::Allowed
    }

    /// Category cooldown: configured base times the adaptive multiplier.
    pub fn calculate_cooldown(&self, category: Category, now: DateTime<Utc>) -> Duration {
        let base = self.config.category_base(category).as_millis() as f64;
        let ms = base * self.adaptive_multiplier(category, now);
        Duration::milliseconds(ms.round() as i64)
    }

    fn adaptive_multiplier(&self, category: Category, now: DateTime<Utc>) -> f64 {
        let window_start = now - Duration::milliseconds(self.config.adaptive_window_ms as i64);
        let recent: Vec<&GenerationRecord> = self
            .state
            .history
            .iter()
            .filter(|r| r.category == category && r.at >= window_start)
            .collect();

        let mut multiplier = 1.0;
        if !recent.is_empty() {
            let n = recent.len() as f64;
            let avg_load = recent.iter().map(|r| r.system_load).sum::<f64>() / n;
            let avg_energy = recent.iter().map(|r| r.energy_ratio).sum::<f64>() / n;

            if avg_load > 0.7 {
                multiplier *= 1.5;
            } else if avg_load > 0.5 {
                multiplier *= 1.2;
            }
            if avg_energy > 0.8 {
                multiplier *= 0.8;
            } else if avg_energy < 0.3 {
                multiplier *= 1.4;
            }
        }

        let last_minute = now - Duration::minutes(1);
        let recent_any = self.state.history.iter().filter(|r| r.at >= last_minute).count();
        if recent_any > 3 {
            multiplier *= 1.3;
        }
        multiplier
    }

    pub fn record_generation(&mut self, category: Category, energy_ratio: f64, system_load: f64, now: DateTime<Utc>) {
        let cooldown = self.calculate_cooldown(category, now);
        self.state.category_next.insert(category, now + cooldown);
        self.state.global_next = Some(now + Duration::milliseconds(self.config.global_cooldown_ms as i64));
        self.state.last_generation = Some(now);

        let window = Duration::milliseconds(self.config.burst_window_ms as i64);
        let expired = match self.state.burst_window_start {
            Some(start) => now - start > window,
            None => true,
        };
        if expired {
            self.state.burst_window_start = Some(now);
            self.state.burst_count = 0;
        }
        self.state.burst_count += 1;

        self.state.history.push_back(GenerationRecord { category, energy_ratio, system_load, at: now });
        while self.state.history.len() > self.config.history_limit {
            self.state.history.pop_front();
        }

        debug!(
            "Recorded {} generation, category cooldown {}ms, burst {}/{}",
            category,
            cooldown.num_milliseconds(),
            self.state.burst_count,
            self.config.max_burst_count
        );
    }

    /// Whether the category's own cooldown has elapsed.
    pub fn category_ready(&self, category: Category, now: DateTime<Utc>) -> bool {
        self.state.category_next.get(&category).map_or(true, |next| *next <= now)
    }

    pub fn status(&self, now: DateTime<Utc>) -> CooldownStatus {
        let remaining = |t: &DateTime<Utc>| (*t - now).num_milliseconds().max(0);
        let burst_resets_in_ms = self
            .state
            .burst_window_start
            .map(|start| {
                let end = start + Duration::milliseconds(self.config.burst_window_ms as i64);
                remaining(&end)
            })
            .unwrap_or(0);
        CooldownStatus {
            dormant: self.dormancy.is_dormant(),
            global_remaining_ms: self.state.global_next.as_ref().map(remaining).unwrap_or(0),
            category_remaining_ms: self
                .state
                .category_next
                .iter()
                .map(|(c, t)| (*c, remaining(t)))
                .filter(|(_, ms)| *ms > 0)
                .collect(),
            burst_count: self.state.burst_count,
            burst_limit: self.config.max_burst_count,
            burst_resets_in_ms,
        }
    }
}

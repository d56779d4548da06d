//! Online axis-weight adaptation
//!
//! Each update moves a weight by `(observed − expected) × learning_rate`, where
//! the expectation is either a configured target or a running average of past
//! scores. The result is clamped to bounds, optionally perturbed, and projected
//! back onto the simplex {sum = 1, min ≤ w ≤ max}.

use crate::config::WeightConfig;
use crate::entropy::Entropy;
use crate::store::Store;
use chrono::Utc;
use reverie_core::{Axis, AxisTriple, AxisWeights, DEFAULT_WEIGHT_SPLIT};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

const PROJECTION_ITERATIONS: usize = 100;

#[derive(Clone, Debug, PartialEq)]
pub struct WeightUpdate {
    pub previous: AxisWeights,
    pub weights: AxisWeights,
    /// Sum of absolute learning adjustments, before bounds and perturbation.
    pub magnitude: f64,
    pub perturbed: bool,
    /// Learning rate used for this update.
    pub learning_rate: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WeightOutcome {
    Updated(WeightUpdate),
    /// Update skipped and weights restored to the default split.
    Reset { weights: AxisWeights, reason: String },
}

pub struct WeightAdapter {
    config: WeightConfig,
    weights: AxisWeights,
    baseline: AxisTriple,
    learning_rate: f64,
    updates: u64,
    magnitudes: VecDeque<f64>,
    entropy: Entropy,
}

impl WeightAdapter {
    pub fn new(config: WeightConfig, entropy: Entropy) -> Self {
        let baseline = AxisTriple::uniform(config.default_target);
        let learning_rate = config.learning_rate;
        Self {
            config,
            weights: AxisWeights::default_split(),
            baseline,
            learning_rate,
            updates: 0,
            magnitudes: VecDeque::new(),
            entropy,
        }
    }

    pub fn weights(&self) -> &AxisWeights {
        &self.weights
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn baseline(&self) -> AxisTriple {
        self.baseline
    }

    pub fn last_magnitude(&self) -> Option<f64> {
        self.magnitudes.back().copied()
    }

    /// Adopt the latest persisted weights. Keeps the default split when
    /// nothing valid is stored.
    pub async fn restore(&mut self, store: &Store) {
        match store.latest_weights().await {
            Some(row) => {
                let restored = row.to_weights();
                if restored.is_valid(self.config.min_weight, self.config.max_weight) {
                    info!(
                        "Restored weights v{} ({:.3}/{:.3}/{:.3})",
                        restored.version,
                        restored.values.empathy,
                        restored.values.coherence,
                        restored.values.dissonance
                    );
                    self.weights = restored;
                } else {
                    warn!("Stored weights v{} are invalid — using default split", restored.version);
                }
            }
            None => debug!("No stored weights — using default split"),
        }
    }

    pub fn update(&mut self, observed: &AxisTriple) -> WeightOutcome {
        if !observed.is_finite() {
            return self.reset("non-finite scores");
        }
        if !self.weights.is_valid(self.config.min_weight, self.config.max_weight) {
            return self.reset("corrupt weights");
        }

        let (min, max) = (self.config.min_weight, self.config.max_weight);
        let lr = self.learning_rate;
        let mut next = self.weights.values;
        let mut magnitude = 0.0;
        for axis in Axis::ALL {
            let expected = match &self.config.targets {
                Some(t) => t.get(axis),
                None => self.baseline.get(axis),
            };
            let adjustment = (observed.get(axis).clamp(0.0, 1.0) - expected) * lr;
            magnitude += adjustment.abs();
            next.set(axis, (next.get(axis) + adjustment).clamp(min, max));
        }

        self.updates += 1;
        let perturbed = self.config.perturbation_enabled
            && self.config.perturbation_interval > 0
            && self.updates % self.config.perturbation_interval == 0;
        if perturbed {
            let strength = self.config.perturbation_strength;
            for axis in Axis::ALL {
                let offset = self.entropy.symmetric(strength);
                next.set(axis, next.get(axis) + offset);
            }
        }

        let next = project(next, min, max);
        if !next.is_finite() {
            return self.reset("non-finite weights after update");
        }

        let rate = self.config.baseline_rate;
        self.baseline = AxisTriple::new(
            self.baseline.empathy + rate * (observed.empathy.clamp(0.0, 1.0) - self.baseline.empathy),
            self.baseline.coherence + rate * (observed.coherence.clamp(0.0, 1.0) - self.baseline.coherence),
            self.baseline.dissonance + rate * (observed.dissonance.clamp(0.0, 1.0) - self.baseline.dissonance),
        );
        self.learning_rate = (lr * self.config.learning_rate_decay).max(self.config.min_learning_rate);

        self.magnitudes.push_back(magnitude);
        while self.magnitudes.len() > self.config.convergence_window.max(2) {
            self.magnitudes.pop_front();
        }

        let previous = self.weights.clone();
        self.weights = AxisWeights { values: next, version: previous.version + 1, updated_at: Utc::now() };
        debug!(
            "Weights v{}: {:.3}/{:.3}/{:.3} (magnitude {:.4}{})",
            self.weights.version,
            next.empathy,
            next.coherence,
            next.dissonance,
            magnitude,
            if perturbed { ", perturbed" } else { "" }
        );

        WeightOutcome::Updated(WeightUpdate {
            previous,
            weights: self.weights.clone(),
            magnitude,
            perturbed,
            learning_rate: lr,
        })
    }

    /// Restore the default split. The version still advances.
    pub fn reset(&mut self, reason: &str) -> WeightOutcome {
        warn!("Resetting weights: {}", reason);
        let version = self.weights.version + 1;
        self.weights = AxisWeights { values: DEFAULT_WEIGHT_SPLIT, version, updated_at: Utc::now() };
        if !self.baseline.is_finite() {
            self.baseline = AxisTriple::uniform(self.config.default_target);
        }
        WeightOutcome::Reset { weights: self.weights.clone(), reason: reason.to_string() }
    }

    /// Variance of recent update magnitudes scaled to [0, 1]. Near zero means
    /// updates have settled. `None` until two updates exist.
    pub fn convergence_metric(&self) -> Option<f64> {
        if self.magnitudes.len() < 2 {
            return None;
        }
        let n = self.magnitudes.len() as f64;
        let mean = self.magnitudes.iter().sum::<f64>() / n;
        let variance = self.magnitudes.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
        // Magnitudes lie in [0, 3 × lr]; the variance of such values is at most (3 × lr)² / 4.
        let span = 3.0 * self.config.learning_rate;
        let max_variance = span * span / 4.0;
        if max_variance <= 0.0 {
            return Some(0.0);
        }
        Some((variance / max_variance).clamp(0.0, 1.0))
    }
}

/// Project onto {sum = 1, min ≤ w ≤ max}: normalize, then if any weight left
/// its bounds, find the shift λ with Σ clamp(w + λ) = 1 by bisection.
pub fn project(values: AxisTriple, min: f64, max: f64) -> AxisTriple {
    let values = values.map(|v| if v.is_finite() { v.max(0.0) } else { f64::NAN });
    if !values.is_finite() {
        return values;
    }
    let sum = values.sum();
    let normalized = if sum > 0.0 { values.map(|v| v / sum) } else { DEFAULT_WEIGHT_SPLIT };

    let in_bounds = Axis::ALL
        .iter()
        .all(|a| normalized.get(*a) >= min && normalized.get(*a) <= max);
    if in_bounds {
        return normalized;
    }

    let shifted = |lambda: f64| normalized.map(|v| (v + lambda).clamp(min, max));
    let (mut lo, mut hi) = (-1.0, 1.0);
    for _ in 0..PROJECTION_ITERATIONS {
        let mid = (lo + hi) / 2.0;
        if shifted(mid).sum() < 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    shifted((lo + hi) / 2.0)
}

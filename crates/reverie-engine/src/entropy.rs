//! Injectable randomness
//!
//! Every random decision in the engine (evolution coin flip, weighted backlog
//! pick, weight perturbation) draws from an `Entropy`. Seeding it makes a whole
//! run reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone)]
pub struct Entropy {
    rng: StdRng,
}

impl Entropy {
    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    pub fn from_os() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    /// Seeded when `seed` is given, OS entropy otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(s) => Self::seeded(s),
            None => Self::from_os(),
        }
    }

    /// An independent stream derived from this one.
    pub fn fork(&mut self) -> Self {
        Self::seeded(self.rng.gen())
    }

    /// Uniform in [0, 1).
    pub fn unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// True with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        self.unit() < p
    }

    /// Uniform in [-strength, strength].
    pub fn symmetric(&mut self, strength: f64) -> f64 {
        if strength <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-strength..=strength)
    }

    pub fn index(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            None
        } else {
            Some(self.rng.gen_range(0..len))
        }
    }

    /// Pick an index with probability proportional to its weight.
    /// Non-finite and negative weights count as zero; all-zero weights pick uniformly.
    pub fn weighted_index(&mut self, weights: &[f64]) -> Option<usize> {
        if weights.is_empty() {
            return None;
        }
        let clean: Vec<f64> = weights
            .iter()
            .map(|w| if w.is_finite() && *w > 0.0 { *w } else { 0.0 })
            .collect();
        let total: f64 = clean.iter().sum();
        if total <= 0.0 {
            return self.index(weights.len());
        }
        let mut roll = self.unit() * total;
        for (i, w) in clean.iter().enumerate() {
            if roll < *w {
                return Some(i);
            }
            roll -= w;
        }
        clean.iter().rposition(|w| *w > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = Entropy::seeded(7);
        let mut b = Entropy::seeded(7);
        for _ in 0..10 {
            assert_eq!(a.unit(), b.unit());
        }
    }

    #[test]
    fn chance_extremes() {
        let mut e = Entropy::seeded(1);
        assert!(!e.chance(0.0));
        assert!(e.chance(1.0));
    }

    #[test]
    fn symmetric_stays_in_range() {
        let mut e = Entropy::seeded(3);
        for _ in 0..200 {
            let v = e.symmetric(0.02);
            assert!((-0.02..=0.02).contains(&v));
        }
        assert_eq!(e.symmetric(0.0), 0.0);
    }

    #[test]
    fn weighted_index_skips_zero_weights() {
        let mut e = Entropy::seeded(11);
        for _ in 0..100 {
            assert_eq!(e.weighted_index(&[0.0, 2.0, f64::NAN]), Some(1));
        }
        assert_eq!(e.weighted_index(&[]), None);
        assert!(e.weighted_index(&[0.0, 0.0]).is_some());
    }
}

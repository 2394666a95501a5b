//! Low-probability audit sampling of confident local answers.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Bernoulli sampler with a fixed probability.
#[derive(Debug)]
pub struct AuditSampler {
    probability: f64,
    rng: Mutex<StdRng>,
}

impl AuditSampler {
    /// Sampler seeded from OS entropy.
    pub fn new(probability: f64) -> Self {
        Self {
            probability,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sampler for reproducible runs.
    pub fn with_seed(probability: f64, seed: u64) -> Self {
        Self {
            probability,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Configured probability.
    pub const fn probability(&self) -> f64 {
        self.probability
    }

    /// Draw once. True means the answer should be forwarded for auditing.
    pub fn sample(&self) -> bool {
        if self.probability.is_nan() || self.probability <= 0.0 {
            return false;
        }
        if self.probability >= 1.0 {
            return true;
        }
        self.rng.lock().gen_bool(self.probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_probability_never_samples() {
        let sampler = AuditSampler::with_seed(0.0, 7);
        assert!((0..10_000).all(|_| !sampler.sample()));
    }

    #[test]
    fn test_full_probability_always_samples() {
        let sampler = AuditSampler::with_seed(1.0, 7);
        assert!((0..10_000).all(|_| sampler.sample()));
    }

    #[test]
    fn test_default_rate_over_a_million_draws() {
        let sampler = AuditSampler::with_seed(1e-5, 42);
        let hits = (0..1_000_000).filter(|_| sampler.sample()).count();
        // Expected 10, standard deviation ~3.2.
        assert!((1..=25).contains(&hits), "got {hits} audit samples");
    }
}

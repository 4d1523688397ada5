//! Seeded randomness for reproducible backoff.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::BackoffRange;

/// Deterministic random number generator for reproducible runs.
///
/// Uses ChaCha8 so two runs with the same seed draw the same backoff
/// sequence, independent of platform.
#[derive(Debug)]
pub struct DeterministicRng {
    rng: ChaCha8Rng,
}

impl DeterministicRng {
    /// Creates deterministic RNG from seed value.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Draws a delay uniformly from `range`, both bounds inclusive.
    pub fn random_duration(&mut self, range: BackoffRange) -> Duration {
        let min = range.min.as_micros() as u64;
        let max = range.max.as_micros() as u64;
        if min >= max {
            return range.min;
        }
        Duration::from_micros(self.rng.random_range(min..=max))
    }
}

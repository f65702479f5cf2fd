//! Simulated time and seeded randomness.

use std::time::Duration;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::SimulationError;

/// Simulated time since the start of a run.
///
/// Independent of wall-clock time, so two runs with the same seed see the
/// same timestamps. Time only moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeterministicClock {
    elapsed: Duration,
}

impl DeterministicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.elapsed
    }

    pub fn now_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// Moves simulated time to `target`.
    ///
    /// # Errors
    ///
    /// - `SimulationError::TimeWentBackwards` - `target` lies before the current time
    pub fn advance_to(&mut self, target: Duration) -> Result<(), SimulationError> {
        if target < self.elapsed {
            return Err(SimulationError::TimeWentBackwards {
                now: self.elapsed,
                target,
            });
        }
        self.elapsed = target;
        Ok(())
    }
}

/// Seeded random source for simulated network and quality decisions.
#[derive(Debug)]
pub struct DeterministicRng {
    rng: ChaCha8Rng,
    seed: u64,
}

impl DeterministicRng {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform value in `[0, 1)`.
    pub fn random_f64(&mut self) -> f64 {
        (self.rng.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform value in `[min, max)`, or `min` for an empty range.
    pub fn random_range(&mut self, min: u64, max: u64) -> u64 {
        if min >= max {
            return min;
        }
        min + self.rng.next_u64() % (max - min)
    }

    pub fn random_bool(&mut self, probability: f64) -> bool {
        self.random_f64() < probability
    }

    /// Scales `value` by a factor drawn from `[1 - spread, 1 + spread)`.
    pub fn jitter(&mut self, value: f64, spread: f64) -> f64 {
        value * (1.0 - spread + 2.0 * spread * self.random_f64())
    }
}

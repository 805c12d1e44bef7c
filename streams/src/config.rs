use std::ops::RangeInclusive;
use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{ConfigError, lock::lock};

/// Timing and value range for the timer-driven producers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitterConfig {
    /// Delay before each emission (demand-gated) or the tick interval (push-only)
    pub period: Duration,
    /// Closed range that emitted values are drawn from
    pub range: RangeInclusive<i64>,
    /// Fixed seed for reproducible values. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl EmitterConfig {
    /// One value per second in `0..=100`
    pub fn demand_gated() -> Self { Self { period: Duration::from_secs(1), range: 0..=100, seed: None } }

    /// A tick every 500ms with values in `0..=99`
    pub fn interval() -> Self { Self { period: Duration::from_millis(500), range: 0..=99, seed: None } }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_range(mut self, range: RangeInclusive<i64>) -> Self {
        self.range = range;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period.is_zero() {
            return Err(ConfigError::ZeroPeriod);
        }
        if self.range.is_empty() {
            return Err(ConfigError::EmptyRange { start: *self.range.start(), end: *self.range.end() });
        }
        Ok(())
    }
}

impl Default for EmitterConfig {
    fn default() -> Self { Self::demand_gated() }
}

/// Configuration for [`crate::ReplaySubject`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayConfig {
    /// How many of the most recent values are replayed to late subscribers. Zero disables replay.
    pub capacity: usize,
}

impl ReplayConfig {
    pub fn new(capacity: usize) -> Self { Self { capacity } }
}

/// Shared pseudo-random value generator for a producer and all of its subscriptions
pub(crate) struct ValueSource {
    rng: Mutex<StdRng>,
    range: RangeInclusive<i64>,
}

impl ValueSource {
    pub fn new(config: &EmitterConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng: Mutex::new(rng), range: config.range.clone() }
    }

    pub fn next_value(&self) -> i64 { lock(&self.rng).gen_range(self.range.clone()) }
}

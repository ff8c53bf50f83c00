//! Exponential backoff with additive jitter.

use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::config::StreamConfig;

/// Tracks consecutive failed attempts and produces retry delays.
///
/// `delay(n) = min(base * 2^n, max) + U[0, max_jitter)`. The jitter is added,
/// not multiplied, so a delay never exceeds `max + max_jitter`.
#[derive(Debug)]
pub struct RetryState {
    base: Duration,
    max: Duration,
    max_jitter: Duration,
    attempt: u32,
    last_delay: Option<Duration>,
    rng: StdRng,
}

impl RetryState {
    pub fn new(config: &StreamConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic jitter for tests.
    pub fn with_seed(config: &StreamConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &StreamConfig, rng: StdRng) -> Self {
        Self {
            base: config.base_delay(),
            max: config.max_delay(),
            max_jitter: config.max_jitter(),
            attempt: 0,
            last_delay: None,
            rng,
        }
    }

    /// Exponential term for `attempt`, before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Full delay for `attempt` including jitter. Remembered as the last delay.
    pub fn next_delay(&mut self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.rng.gen_range(0..jitter_ms))
        };
        let delay = self.base_delay(attempt) + jitter;
        self.last_delay = Some(delay);
        delay
    }

    /// Count one failed attempt and return the new total.
    pub fn record_failure(&mut self) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt
    }

    /// Back to a fresh schedule after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_delay(&self) -> Option<Duration> {
        self.last_delay
    }
}

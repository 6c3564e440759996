//! Reconnect backoff calculation.
//!
//! - [`BackoffConfig`]: base delay, multiplier, ceiling
//! - [`Jitter`]: source of the randomization factor, injectable for tests
//! - [`BackoffScheduler`]: combines the two into per-attempt delays
//! - [`calculate_backoff_delay`]: the pure formula

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds (30x base).
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default growth factor between attempts.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;
/// Lower bound of the jitter factor.
pub const JITTER_MIN: f64 = 0.85;
/// Upper bound of the jitter factor.
pub const JITTER_MAX: f64 = 1.15;

/// Parameters for the backoff formula.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// Delay before the first retry, in ms.
    pub base_delay_ms: u64,
    /// Ceiling for any single delay, in ms.
    pub max_delay_ms: u64,
    /// Growth factor per attempt.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Jitter
// ─────────────────────────────────────────────────────────────────────────────

/// Source of the multiplicative jitter factor.
///
/// Implementations must return values in `[JITTER_MIN, JITTER_MAX]`.
pub trait Jitter: Send {
    /// Next jitter factor.
    fn factor(&mut self) -> f64;
}

/// Thread-local RNG jitter for production use.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn factor(&mut self) -> f64 {
        rand::rng().random_range(JITTER_MIN..=JITTER_MAX)
    }
}

/// Deterministic jitter from a fixed seed.
#[derive(Clone, Debug)]
pub struct SeededJitter {
    rng: StdRng,
}

impl SeededJitter {
    /// Create a jitter source that yields the same sequence for the same seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Jitter for SeededJitter {
    fn factor(&mut self) -> f64 {
        self.rng.random_range(JITTER_MIN..=JITTER_MAX)
    }
}

/// Constant jitter factor, clamped into the allowed range.
#[derive(Clone, Copy, Debug)]
pub struct FixedJitter(pub f64);

impl Jitter for FixedJitter {
    fn factor(&mut self) -> f64 {
        self.0.clamp(JITTER_MIN, JITTER_MAX)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Backoff delay in ms for a 1-based `attempt`.
///
/// Formula: `min(base * multiplier^(attempt - 1) * jitter, max)`
///
/// The jitter is applied before the cap, so the result never exceeds
/// `max_delay_ms`. Attempt 0 is treated as attempt 1.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
pub fn calculate_backoff_delay(attempt: u32, config: &BackoffConfig, jitter: f64) -> u64 {
    let exponent = attempt.saturating_sub(1).min(1024) as i32;
    let exponential = (config.base_delay_ms as f64) * config.multiplier.powi(exponent);
    let jittered = exponential * jitter;
    let capped = jittered.min(config.max_delay_ms as f64);
    capped.round().max(0.0) as u64
}

/// Produces reconnect delays from a config and a jitter source.
///
/// Within one retry sequence the delays never shrink: each delay is at
/// least the previous one, so a multiplier below `JITTER_MAX / JITTER_MIN`
/// cannot let jitter pull a later attempt ahead of an earlier one. Attempt
/// 1 or [`BackoffScheduler::reset`] starts a new sequence.
pub struct BackoffScheduler {
    config: BackoffConfig,
    jitter: Box<dyn Jitter>,
    floor: Duration,
}

impl BackoffScheduler {
    /// Scheduler with thread-RNG jitter.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self::with_jitter(config, Box::new(RandomJitter))
    }

    /// Scheduler with a caller-supplied jitter source.
    #[must_use]
    pub fn with_jitter(config: BackoffConfig, jitter: Box<dyn Jitter>) -> Self {
        Self {
            config,
            jitter,
            floor: Duration::ZERO,
        }
    }

    /// Delay before retry `attempt` (1-based).
    pub fn delay(&mut self, attempt: u32) -> Duration {
        if attempt <= 1 {
            self.reset();
        }
        let factor = self.jitter.factor();
        let computed = Duration::from_millis(calculate_backoff_delay(attempt, &self.config, factor));
        let delay = computed
            .max(self.floor)
            .min(Duration::from_millis(self.config.max_delay_ms));
        self.floor = delay;
        delay
    }

    /// Forget the current sequence, typically after a successful connect.
    pub fn reset(&mut self) {
        self.floor = Duration::ZERO;
    }

    /// The config in use.
    #[must_use]
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl std::fmt::Debug for BackoffScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffScheduler")
            .field("config", &self.config)
            .field("floor", &self.floor)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Exponential backoff for delivery retries and worker error pauses

use std::time::Duration;

use rand::Rng;

use crate::config::DispatchConfig;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 300_000, // 5 minutes
            multiplier: 2.0,
            jitter_factor: 0.1, // 10% jitter
        }
    }
}

impl From<&DispatchConfig> for BackoffConfig {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            initial_delay_ms: config.initial_delay_ms,
            max_delay_ms: config.max_delay_ms,
            multiplier: config.multiplier,
            jitter_factor: config.jitter_factor,
        }
    }
}

impl BackoffConfig {
    /// Delay after the `attempt`-th failed attempt (1-based):
    /// `initial * multiplier^(attempt - 1)`, capped, with jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay_ms as f64);
        Duration::from_millis(self.jittered(capped))
    }

    fn jittered(&self, delay: f64) -> u64 {
        if self.jitter_factor > 0.0 && delay > 0.0 {
            let jitter_range = delay * self.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (delay + jitter).max(1.0) as u64
        } else {
            delay.max(0.0) as u64
        }
    }
}

/// Stateful backoff for consecutive failures, e.g. a worker whose store is down
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Get the next delay duration
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.config.delay_for(self.attempt)
    }

    /// Reset the backoff to initial state
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Get the current attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

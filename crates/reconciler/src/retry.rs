//! Retry schedule with exponential backoff.
//!
//! [`RetryConfig::next_delay`] is a pure function of the attempt count and the
//! time elapsed since the first failure of a streak. The counters themselves
//! live in the scheduler's per-resource state.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default number of executions per failure streak.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(2000);

/// Default growth factor between consecutive delays.
pub const DEFAULT_INTERVAL_MULTIPLIER: f64 = 1.5;

/// Configuration for retry behavior.
///
/// `max_attempts` counts executions, including the first one: a value of 3
/// allows the initial attempt plus two retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of executions in one failure streak.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Multiplier applied per prior failure.
    pub interval_multiplier: f64,
    /// Upper bound for a single delay.
    pub max_interval: Duration,
    /// Give up once this much time has passed since the first failure.
    pub max_elapsed_time: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            interval_multiplier: DEFAULT_INTERVAL_MULTIPLIER,
            max_interval: scaled_interval(
                DEFAULT_INITIAL_INTERVAL,
                DEFAULT_INTERVAL_MULTIPLIER,
                DEFAULT_MAX_ATTEMPTS,
            ),
            max_elapsed_time: Duration::MAX,
        }
    }
}

impl RetryConfig {
    /// Single execution, never retry.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the maximum number of executions.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the initial interval.
    #[must_use]
    pub const fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the interval multiplier.
    #[must_use]
    pub const fn with_interval_multiplier(mut self, multiplier: f64) -> Self {
        self.interval_multiplier = multiplier;
        self
    }

    /// Set the maximum interval.
    #[must_use]
    pub const fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the maximum elapsed time.
    #[must_use]
    pub const fn with_max_elapsed_time(mut self, elapsed: Duration) -> Self {
        self.max_elapsed_time = elapsed;
        self
    }

    /// Check the configuration for values that would never produce a sane
    /// schedule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when `max_attempts` is zero, the
    /// multiplier is below 1 or not finite, or `max_interval` is shorter than
    /// `initial_interval`.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_config("retry max_attempts must be at least 1"));
        }
        if !self.interval_multiplier.is_finite() || self.interval_multiplier < 1.0 {
            return Err(Error::invalid_config(format!(
                "retry interval_multiplier must be a finite value >= 1.0, got {}",
                self.interval_multiplier
            )));
        }
        if self.max_interval < self.initial_interval {
            return Err(Error::invalid_config(format!(
                "retry max_interval ({}ms) is shorter than initial_interval ({}ms)",
                self.max_interval.as_millis(),
                self.initial_interval.as_millis()
            )));
        }
        Ok(())
    }

    /// Delay before the next execution, or `None` when retries are exhausted.
    ///
    /// `attempt` is the zero-based number of failures that preceded the one
    /// being handled, so the first retry waits exactly `initial_interval`.
    #[must_use]
    pub fn next_delay(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        if self.is_last_attempt(attempt) || elapsed >= self.max_elapsed_time {
            return None;
        }
        Some(
            scaled_interval(self.initial_interval, self.interval_multiplier, attempt)
                .min(self.max_interval),
        )
    }

    /// Whether the execution following `attempt` prior failures is the last
    /// one allowed.
    #[must_use]
    pub const fn is_last_attempt(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) >= self.max_attempts
    }
}

fn scaled_interval(initial: Duration, multiplier: f64, exponent: u32) -> Duration {
    let factor = multiplier.powi(i32::try_from(exponent).unwrap_or(i32::MAX));
    Duration::try_from_secs_f64(initial.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

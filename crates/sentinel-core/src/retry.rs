//! Backoff between failing sync ticks.
//!
//! A failed tick never drops data, it only delays the next attempt. The
//! delay grows exponentially with the number of consecutive failures and is
//! capped, with optional jitter so a fleet of edge devices coming back
//! online does not hit the endpoint in lockstep.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sentinel_core::Backoff;
//!
//! let backoff = Backoff::default()
//!     .initial_delay(Duration::from_secs(5))
//!     .max_delay(Duration::from_secs(60))
//!     .jitter(false);
//!
//! assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(5));
//! assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(10));
//! assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(60));
//! ```

use std::time::Duration;

use rand::Rng;

use crate::error::Error;

/// Exponential backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for the computed delay (before jitter).
    pub max_delay: Duration,
    /// Growth per consecutive failure (1.0 = constant delay).
    pub multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Backoff {
    /// Constant delay, no growth and no jitter.
    pub fn constant(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Set initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Delay after `attempt` previous consecutive failures (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            let jitter_factor = 1.0 + (rand::rng().random::<f64>() * 0.25);
            capped_delay * jitter_factor
        } else {
            capped_delay
        };

        Duration::try_from_secs_f64(final_delay).unwrap_or(self.max_delay)
    }
}

/// Whether an error may succeed if the same operation is tried again later.
///
/// Transport problems are retryable and end a sync tick quietly. Storage
/// and configuration problems are not: the sync agent returns them to its
/// caller instead.
pub fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Publish { .. } => true,
        Error::Timeout { .. } => true,
        Error::Storage(_) => false,
        Error::InvalidConfig(_) => false,
    }
}

//! Retry pacing.
//!
//! Fetch and control paths share one policy shape: exponential growth
//! from a base delay up to a cap, with full jitter so a fleet of
//! workers does not hammer a recovering endpoint in lockstep.

use std::time::Duration;

use rand::Rng;


/// Exponential backoff policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay for the first retry.
    pub base: Duration,
    /// Upper bound on any delay.
    pub cap: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// The undithered delay for a 1-based attempt number.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1).min(32)).unwrap_or(32);
        let scaled = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = scaled.min(self.cap.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Full-jitter delay: uniform over `(0, delay_for_attempt]`.
    #[must_use]
    pub fn jittered_delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling = self.delay_for_attempt(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        let millis = ceiling.as_millis().max(1);
        let picked = rand::thread_rng().gen_range(1..=millis);
        Duration::from_millis(u64::try_from(picked).unwrap_or(u64::MAX))
    }
}

/// The sleep a worker thread takes when its category has no work:
/// uniform over 1-10 seconds.
#[must_use]
pub fn idle_jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(1_000..=10_000))
}

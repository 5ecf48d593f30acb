//! Reconnect backoff.

use std::time::Duration;

/// Exponential reconnect delay, capped, without jitter.
///
/// `delay(n)` is monotone non-decreasing in `n` and never exceeds `max`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial: Duration,

    /// Upper bound for any delay.
    pub max: Duration,

    /// Growth per consecutive failure. Values below 1.0 are treated as 1.0.
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let factor = multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.initial.as_secs_f64() * factor;
        let cap = self.max.as_secs_f64();

        if !secs.is_finite() || secs >= cap {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

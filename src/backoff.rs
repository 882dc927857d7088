//! Reconnect delay schedule.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffPolicy;

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter:
    /// `initial * multiplier^(attempt - 1)`, capped at `max`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(scaled)
    }

    /// Jittered delay: the base delay scaled by a uniform factor in
    /// `[1 - jitter, 1 + jitter]`, never above `max`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter.is_nan() || jitter <= 0.0 {
            return base;
        }
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor).min(self.max)
    }
}

#[cfg(test)]
#[path = "backoff_test.rs"]
mod tests;

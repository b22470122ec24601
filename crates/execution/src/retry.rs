// In crates/execution/src/retry.rs

use app_config::RetrySettings;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter for venue calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Jitter factor for randomization (0.2 = +/-20%).
    pub jitter: f64,
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            multiplier: settings.multiplier,
            jitter: settings.jitter,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` counts completed tries from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_backoff.as_millis() as f64;
        let max_ms = self.max_backoff.as_millis() as f64;
        let base = (initial_ms * self.multiplier.powi(attempt.saturating_sub(1) as i32)).min(max_ms);

        let spread = base * self.jitter;
        let jittered = if spread > 0.0 {
            rand::rng().random_range((base - spread).max(0.0)..=base + spread)
        } else {
            base
        };
        Duration::from_millis(jittered.min(max_ms) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1_000),
            multiplier: 2.0,
            jitter,
        }
    }

    #[test]
    fn backoff_grows_exponentially_until_capped() {
        let p = policy(0.0);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(6), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_band() {
        let p = policy(0.2);
        for _ in 0..100 {
            let d = p.backoff(2).as_millis();
            assert!((160..=240).contains(&d), "backoff {d}ms outside band");
        }
    }
}

//! Retry policy for direct outline generation.
//!
//! Only the single-call direct paths retry. Chunk outlines degrade to
//! placeholders and merges fall back structurally, so neither needs it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total model calls allowed, first try included (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait after the first rejected attempt (default: 1000ms)
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound on any single wait (default: 30000ms)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Also retry outlines that came back but fail structural checks
    /// (default: true). Empty outlines are always retried.
    #[serde(default = "default_retry_weak")]
    pub retry_weak_outlines: bool,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_retry_weak() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            retry_weak_outlines: default_retry_weak(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Up to `max_attempts` calls with no wait in between
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            ..Default::default()
        }
    }

    /// Wait after the given rejected attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.base_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);

        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }

    /// Whether another call is allowed after `attempt` calls
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_capped() {
        let policy = RetryPolicy {
            base_delay_ms: 500,
            max_delay_ms: 3000,
            ..Default::default()
        };

        let delays: Vec<u128> = (1..=5)
            .map(|attempt| policy.delay_for_attempt(attempt).as_millis())
            .collect();
        assert_eq!(delays, vec![500, 1000, 2000, 3000, 3000]);
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::none().should_retry(1));
    }

    #[test]
    fn test_immediate_policy_never_waits() {
        let policy = RetryPolicy::immediate(4);
        assert_eq!(policy.delay_for_attempt(3), Duration::ZERO);
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
        assert!(policy.retry_weak_outlines);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let policy: RetryPolicy =
            serde_yaml::from_str("max_attempts: 5\nretry_weak_outlines: false\n").unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_ms, 1000);
        assert!(!policy.retry_weak_outlines);
    }
}

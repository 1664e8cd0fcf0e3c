//! Reconnect backoff.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff with an upper bound and a bounded number of
/// attempts. With jitter on, each delay is drawn from the upper half of the
/// exponential step so simultaneous clients spread out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 30_000,
            max_attempts: 10,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// A policy without jitter, for deterministic tests.
    pub fn fixed(base_ms: u64, cap_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_ms,
            cap_ms,
            max_attempts,
            jitter: false,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let step = self.base_ms.saturating_mul(1u64 << exp).min(self.cap_ms);
        if !self.jitter || step < 2 {
            return Duration::from_millis(step);
        }
        Duration::from_millis(rand::thread_rng().gen_range(step / 2..=step))
    }

    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

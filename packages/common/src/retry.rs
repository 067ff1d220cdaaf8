use std::time::Duration;

use rand::Rng;
use tracing::info;

/// Delay before redial number `attempt`: `base_ms * 2^(attempt-1)` plus up to
/// 25% jitter, capped at `max_ms`. Attempt 0 dials immediately.
pub fn calculate_backoff(attempt: u8, base_ms: u64, max_ms: u64) -> Duration {
    let Some(doublings) = attempt.checked_sub(1) else {
        return Duration::ZERO;
    };

    let delay_ms = base_ms.saturating_mul(1u64.checked_shl(doublings.into()).unwrap_or(u64::MAX));
    let jitter_ms = match delay_ms / 4 {
        0 => 0,
        spread => rand::rng().random_range(0..=spread),
    };
    Duration::from_millis(delay_ms.saturating_add(jitter_ms).min(max_ms))
}

/// Tracks consecutive failed dial attempts for a long-lived connection.
#[derive(Debug, Clone)]
pub struct Reconnect {
    attempt: u8,
    base_ms: u64,
    max_ms: u64,
}

impl Reconnect {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            attempt: 0,
            base_ms,
            max_ms,
        }
    }

    /// Record a failed attempt and return how long to wait before the next one.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        calculate_backoff(self.attempt, self.base_ms, self.max_ms)
    }

    /// Forget previous failures once a connection has been established.
    pub fn reset(&mut self) {
        if self.attempt > 0 {
            info!(failed_attempts = self.attempt, "Connection re-established");
        }
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u8 {
        self.attempt
    }
}

// Reconnection backoff strategies

use rand::Rng;
use std::time::Duration;

/// Retry strategy trait for calculating reconnection delays
pub trait RetryStrategy: Send + Sync {
    /// Delay before attempt `attempt` (1-based).
    /// Returns None once the attempt budget is spent.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Get the maximum number of attempts
    fn max_attempts(&self) -> u32;

    /// Check if another attempt is allowed
    fn should_retry(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_attempts()
    }
}

/// Linear backoff: attempt `n` waits `min(n * base_delay, max_delay)`,
/// with optional jitter to avoid reconnect stampedes.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
    /// Jitter factor (0.0 to 1.0); 0.0 keeps the delay exact
    jitter_factor: f64,
}

impl LinearBackoff {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_attempts,
            jitter_factor: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    fn base_delay_for(&self, attempt: u32) -> u64 {
        (u64::from(attempt) * self.base_delay_ms).min(self.max_delay_ms)
    }

    fn add_jitter_ms(&self, delay_ms: u64) -> u64 {
        if self.jitter_factor == 0.0 {
            return delay_ms;
        }

        let jitter_range_ms = (delay_ms as f64 * self.jitter_factor) as u64;
        if jitter_range_ms == 0 {
            return delay_ms;
        }

        let mut rng = rand::thread_rng();
        delay_ms + rng.gen_range(0..=jitter_range_ms)
    }
}

impl RetryStrategy for LinearBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }

        let delay_ms = self.add_jitter_ms(self.base_delay_for(attempt));
        Some(Duration::from_millis(delay_ms))
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Fixed delay strategy (for tests or simple cases)
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: u32,
}

impl FixedDelay {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts,
        }
    }
}

impl RetryStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.delay)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

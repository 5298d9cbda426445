//! Re-join backoff
//!
//! Exponential delay between failed JOIN attempts, with jitter so a
//! restarted discovery service is not hit by every node at once.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with 0.5x-1.5x jitter
#[derive(Debug, Clone)]
pub struct RejoinBackoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
    jitter: bool,
}

impl RejoinBackoff {
    /// Create a backoff starting at `initial` and capped at `max`
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
            jitter: true,
        }
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Failed attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(16) as i32;
        self.attempt = self.attempt.saturating_add(1);

        let base = self.initial.as_secs_f64() * 2f64.powi(exponent);
        let capped = base.min(self.max.as_secs_f64());

        let delay = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..1.5)
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }

    /// Start over after a successful join
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

//! Reconnect schedule for the session channel.

use std::time::Duration;

use rand::Rng;

/// Jittered exponential backoff with a ceiling and an optional give-up
/// threshold. Each delay is drawn uniformly from `[d/2, d]` where
/// `d = min(base * 2^attempt, max_delay)`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            base,
            max_delay: max_delay.max(base),
            max_attempts,
            attempt: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Upper bound of the delay for the given attempt, before jitter.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.max_delay)
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        self.next_delay_with(&mut rand::thread_rng())
    }

    /// `None` once the give-up threshold is reached.
    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| self.attempt >= max) {
            return None;
        }
        let ceiling = self.ceiling(self.attempt);
        self.attempt += 1;

        let high = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        let low = high / 2;
        if high == 0 {
            return Some(Duration::ZERO);
        }
        Some(Duration::from_millis(rng.gen_range(low..=high)))
    }
}

#[cfg(test)]
#[path = "tests/backoff_tests.rs"]
mod tests;

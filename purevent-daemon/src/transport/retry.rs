//! Bounded reconnect policy for the receive loop.

use std::time::Duration;

/// Fixed pause between reconnect attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Abstracts `thread::sleep` so the retry path can be exercised without waiting.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// sleep the backoff, then reconnect; `attempt` is 1-based
    Reconnect { attempt: u32 },
    /// budget spent: halt the loop for good
    GiveUp,
}

/// Counts consecutive liveness failures. Each failure within the budget buys one
/// reconnect attempt; the first failure after `max_retry` attempts gives up.
/// Only a successfully received frame refills the budget.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max_retry: u32,
    failures: u32,
}

impl RetryBudget {
    pub fn new(max_retry: u32) -> Self {
        Self { max_retry, failures: 0 }
    }

    pub fn on_failure(&mut self) -> RetryDecision {
        if self.failures < self.max_retry {
            self.failures += 1;
            RetryDecision::Reconnect { attempt: self.failures }
        } else {
            RetryDecision::GiveUp
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn max_retry(&self) -> u32 {
        self.max_retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_allows_max_retry_attempts() {
        let mut budget = RetryBudget::new(3);
        assert_eq!(budget.on_failure(), RetryDecision::Reconnect { attempt: 1 });
        assert_eq!(budget.on_failure(), RetryDecision::Reconnect { attempt: 2 });
        assert_eq!(budget.on_failure(), RetryDecision::Reconnect { attempt: 3 });
        assert_eq!(budget.on_failure(), RetryDecision::GiveUp);
        assert_eq!(budget.on_failure(), RetryDecision::GiveUp);
    }

    #[test]
    fn test_reset_refills_budget() {
        let mut budget = RetryBudget::new(2);
        budget.on_failure();
        budget.on_failure();
        budget.reset();
        assert_eq!(budget.failures(), 0);
        assert_eq!(budget.on_failure(), RetryDecision::Reconnect { attempt: 1 });
    }

    #[test]
    fn test_zero_budget_gives_up_immediately() {
        let mut budget = RetryBudget::new(0);
        assert_eq!(budget.on_failure(), RetryDecision::GiveUp);
    }
}

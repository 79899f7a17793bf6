//! Bounded retry with exponential backoff, modelled as a per-task state machine.

use crate::api::ApiError;
use std::time::Duration;

/// How many times a transient failure is retried and how long to wait in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without sleeping.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after the `attempt`-th failed attempt (1-based): base * 2^(attempt-1), capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// State of one fetch task under the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Attempt number in flight (1-based).
    Attempting(u32),
    Succeeded,
    FailedTransientExhausted,
    FailedPermanent,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskState::Attempting(_))
    }
}

/// Drives `TaskState` for one call: report each outcome, get back whether (and when) to retry.
#[derive(Debug)]
pub struct RetryTracker<'p> {
    policy: &'p RetryPolicy,
    state: TaskState,
    attempts: u32,
}

impl<'p> RetryTracker<'p> {
    pub fn new(policy: &'p RetryPolicy) -> Self {
        Self {
            policy,
            state: TaskState::Attempting(1),
            attempts: 1,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Attempts made so far, including the one in flight.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn succeeded(&mut self) {
        if !self.state.is_terminal() {
            self.state = TaskState::Succeeded;
        }
    }

    /// Record a failed attempt. Returns the delay before the next attempt, or None once the
    /// task is terminal (permanent error or retries exhausted).
    pub fn failed(&mut self, err: &ApiError) -> Option<Duration> {
        let TaskState::Attempting(n) = self.state else {
            return None;
        };
        if !err.is_transient() {
            self.state = TaskState::FailedPermanent;
            return None;
        }
        if n > self.policy.max_retries {
            self.state = TaskState::FailedTransientExhausted;
            return None;
        }
        let delay = err
            .retry_after()
            .map(|d| d.min(self.policy.max_delay))
            .unwrap_or_else(|| self.policy.backoff_delay(n));
        self.state = TaskState::Attempting(n + 1);
        self.attempts = n + 1;
        Some(delay)
    }
}

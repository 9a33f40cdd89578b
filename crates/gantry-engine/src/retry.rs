//! Retry scheduling for the flaky simulation levels.
//!
//! Retry is expressed as a small state machine per retryable level
//! (`Attempting(n) → Waiting(backoff(n)) → Attempting(n+1) → Final`) rather
//! than a loop with sleeps scattered through orchestration logic. The
//! executor drives the machine; this module owns the transitions and delays.

use std::time::Duration;

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis = base.as_millis() as u64 * 2u64.saturating_pow(attempt as u32);
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(4),
        }
    }
}

/// Where a retryable level currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Running attempt `n` (1-based).
    Attempting(u32),
    /// Backing off before the next attempt.
    Waiting { next_attempt: u32, delay: Duration },
    /// No further attempts will be made.
    Final { attempts: u32, succeeded: bool },
}

/// The per-level retry budget: up to `max_attempts` total attempts with
/// policy-driven delays between them.
#[derive(Debug, Clone)]
pub struct RetrySchedule {
    max_attempts: u32,
    policy: BackoffPolicy,
}

impl RetrySchedule {
    pub fn new(max_attempts: u32, policy: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            policy,
        }
    }

    /// The budget granted to the simulation levels under full mode: 3 total
    /// attempts, delays of 1s then 2s between them.
    pub fn simulation() -> Self {
        Self::new(3, BackoffPolicy::default())
    }

    /// A budget of one attempt: no retries.
    pub fn single() -> Self {
        Self::new(1, BackoffPolicy::None)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn start(&self) -> RetryState {
        RetryState::Attempting(1)
    }

    /// Transition after attempt `attempt` finished with `succeeded`.
    pub fn after_attempt(&self, attempt: u32, succeeded: bool) -> RetryState {
        if succeeded || attempt >= self.max_attempts {
            RetryState::Final {
                attempts: attempt,
                succeeded,
            }
        } else {
            RetryState::Waiting {
                next_attempt: attempt + 1,
                delay: self.policy.delay_for_attempt((attempt - 1) as usize),
            }
        }
    }
}

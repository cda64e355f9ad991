//! Retry budget and backoff schedule

use std::time::Duration;

use crate::error::Error;

/// Limits applied to every logical call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(120),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Sleep after failed attempt number `attempt` (1-based):
    /// `min(base * 2^(attempt-1), cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }
}

/// State of one logical call's retry sequence.
#[derive(Debug)]
pub struct RetryContext {
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_error: Option<Error>,
}

impl RetryContext {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
        }
    }

    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Convert into the terminal error, naming the last failure.
    pub fn into_exhausted(self) -> Error {
        Error::RetriesExhausted {
            attempts: self.attempt,
            last: Box::new(
                self.last_error
                    .unwrap_or_else(|| Error::InvalidRequest("no attempt was made".into())),
            ),
        }
    }
}

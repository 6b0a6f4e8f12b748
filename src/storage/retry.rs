//! Bounded retry with random backoff for contended storage writes.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::error::{Result, StoreError};

/// Retry behaviour for operations that can hit transient contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Upper bound of the uniformly random delay between attempts.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 25,
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            max_backoff,
        }
    }

    /// Pick a delay uniformly in `[0, max_backoff]`.
    pub fn backoff(&self) -> Duration {
        let max = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }

    /// Run `operation` until it succeeds, fails non-transiently, or the
    /// attempt budget is spent.
    pub fn run<T, F>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..=attempts {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if attempt == attempts {
                        error!(
                            operation = operation_name,
                            attempts,
                            error = %err,
                            "giving up after repeated contention"
                        );
                        break;
                    }
                    let delay = self.backoff();
                    warn!(
                        operation = operation_name,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient storage failure, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::RetriesExhausted {
            operation: operation_name.to_string(),
            attempts,
        })
    }
}

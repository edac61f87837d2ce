//! Retry policy for contended store files
//!
//! Many independent producers may hold handles on the same store file. SQLite
//! serializes them with file locks; a handle that cannot get the lock within
//! its busy timeout fails with `SQLITE_BUSY`. The policy here decides how
//! often such an operation is re-attempted and how long to wait in between,
//! so that callers get a `LockTimeout` instead of blocking forever.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Wait between failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately (tests).
    None,
    Fixed(Duration),
    /// `step * attempt`
    Linear(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => d,
            Backoff::Linear(step) => step.saturating_mul(attempt),
            Backoff::Exponential { base, max } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(max)
            }
        }
    }
}

/// Bounded retry budget for acquiring a store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// How long SQLite itself waits for a lock within one attempt.
    pub busy_timeout: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, busy_timeout: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            busy_timeout,
            backoff,
        }
    }

    /// Single attempt, no SQLite-level waiting, no sleeping.
    pub fn immediate() -> Self {
        Self::new(1, Duration::ZERO, Backoff::None)
    }

    /// Run `operation` until it succeeds, fails with a non-transient error, or
    /// the attempt budget is spent.
    pub fn run<T, F>(&self, path: &Path, operation: &str, mut f: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Result<T, StorageError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut waited = Duration::ZERO;
        for attempt in 1..=attempts {
            match f() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(path = %path.display(), operation, attempt, "Lock acquired after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() => {
                    waited += self.busy_timeout;
                    if attempt == attempts {
                        break;
                    }
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        path = %path.display(),
                        operation,
                        attempt,
                        waited_ms = waited.as_millis() as u64,
                        "Store file locked, retrying"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                        waited += delay;
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(StorageError::LockTimeout {
            path: path.to_path_buf(),
            operation: operation.to_string(),
            attempts,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            5,
            Duration::from_secs(5),
            Backoff::Fixed(Duration::from_millis(200)),
        )
    }
}

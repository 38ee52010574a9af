use crate::backup::result_error::result::Result;
use bon::Builder;
use getset::CopyGetters;
use std::time::Duration;

/// Upper bound for a single backoff sleep
static MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Bounded retry with exponential backoff, applied to the network stages.
///
/// Only transient failures are retried, see
/// [`Error::is_transient`](crate::backup::result_error::error::Error::is_transient).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    #[builder(default = 3)]
    attempts: u32,
    #[builder(default = Duration::from_secs(1))]
    initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    pub fn once() -> Self {
        Self::builder().attempts(1).build()
    }

    pub fn run<T, F>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut(u32) -> Result<T>,
    {
        let attempts = self.attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match f(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if attempt < attempts && e.is_transient() => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempt,
                        attempts,
                        backoff,
                        e
                    );
                    std::thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

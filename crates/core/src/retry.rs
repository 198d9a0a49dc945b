use std::time::Duration;

use color_eyre::eyre::{self, eyre};
use tracing::debug;

/// Bounded retry with a fixed delay between attempts.
///
/// Replaces ad hoc sleep loops at the block-fetch and submission
/// boundaries: an operation either produces a value within the attempt
/// budget or the caller sees a single error for the whole boundary.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Runs `op` until it yields `Ok(Some(_))` or the attempt budget is
    /// exhausted. `Ok(None)` means "not yet available" and transient errors
    /// are absorbed the same way; both are logged, never escalated
    /// per attempt.
    pub async fn run_until_some<T, F, Fut>(&self, what: &str, mut op: F) -> eyre::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = eyre::Result<Option<T>>>,
    {
        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => debug!(what, attempt, "not yet available"),
                Err(error) => debug!(what, attempt, %error, "transient failure"),
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.delay).await;
            }
        }
        Err(eyre!("{what}: gave up after {} attempts", self.max_attempts))
    }
}

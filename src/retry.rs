//! Bounded retries with optional exponential backoff for async operations.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::error::NotificationError;

/// Invoked before each retry with the 1-based number of the failed attempt
/// and the error it produced.
pub type RetryHook = Arc<dyn Fn(u32, &str) + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub use_backoff: bool,
    pub on_retry: Option<RetryHook>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, use_backoff: bool) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            use_backoff,
            on_retry: None,
        }
    }

    /// Delay before retrying after the failure at `attempt_index` (0-based).
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        let millis = if self.use_backoff {
            2u64.checked_pow(attempt_index)
                .and_then(|factor| self.base_delay_ms.checked_mul(factor))
                .unwrap_or(u64::MAX)
        } else {
            self.base_delay_ms
        };
        Duration::from_millis(millis)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("use_backoff", &self.use_backoff)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Runs `operation` up to `max_retries + 1` times, sleeping between failed
/// attempts. The last failure is surfaced as a `NotificationError::Network`.
pub async fn execute<T, E, F, Fut>(
    mut operation: F,
    policy: &RetryPolicy,
) -> Result<T, NotificationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let message = err.to_string();

                if attempt >= policy.max_retries {
                    let attempts = attempt + 1;
                    error!(attempts, error = %message, "Operation failed, retries exhausted.");
                    return Err(NotificationError::Network(format!(
                        "{message} (after {attempts} attempts)"
                    )));
                }

                let delay = policy.delay_for(attempt);
                if let Some(hook) = &policy.on_retry {
                    hook(attempt + 1, &message);
                }
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Operation failed, retrying."
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

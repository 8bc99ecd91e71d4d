use std::future::Future;
use std::time::Duration;

use crate::error::NotificationError;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Races `operation` against a deadline. Whatever settles first wins; an
/// expired deadline drops the operation without cancelling remote work.
pub async fn with_deadline<T, F>(operation: F, timeout_ms: Option<u64>) -> Result<T, NotificationError>
where
    F: Future<Output = Result<T, NotificationError>>,
{
    let timeout_ms = timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);

    match tokio::time::timeout(Duration::from_millis(timeout_ms), operation).await {
        Ok(outcome) => outcome,
        Err(_) => Err(NotificationError::Network(format!(
            "Operation timed out after {timeout_ms}ms"
        ))),
    }
}

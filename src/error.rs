use thiserror::Error;
use uuid::Uuid;

/// Failure delivering a single notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// Transient transport failure: connection errors, non-2xx responses,
    /// timeouts and exhausted retries.
    #[error("{0}")]
    Network(String),

    /// Missing or malformed data. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Booking not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid booking record {id}: {reason}")]
    InvalidRecord { id: Uuid, reason: String },
}

/// A booking change was persisted but one or more of its notifications
/// could not be delivered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "Booking {booking_id} saved, but notification may not have been delivered: {}",
    .failures.join("; ")
)]
pub struct NotificationWarning {
    pub booking_id: Uuid,
    pub failures: Vec<String>,
}

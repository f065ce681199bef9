use thiserror::Error;

/// Failures raised by a [`crate::store::SubscriptionStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Insert hit an id that already exists, tombstoned rows included.
    #[error("subscription id already exists: {id}")]
    Duplicate { id: String },

    /// A stored row could not be mapped back to a `Subscription`.
    #[error("corrupt subscription row: {0}")]
    Corrupt(String),

    /// The backend cannot serve requests (e.g. a poisoned connection lock).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the subscription registry.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Bad caller input, e.g. an empty identifier field.
    #[error("validation error: {0}")]
    Validation(String),

    /// A subscription id that is not a valid UUID.
    #[error("invalid subscription id: {0}")]
    InvalidId(String),

    /// Frequency text outside the supported classes.
    #[error("invalid frequency: {0}")]
    InvalidFrequency(String),

    /// Advancing the schedule left the representable calendar range.
    #[error("next due date for {frequency} after {from} is out of range")]
    ScheduleOverflow { frequency: String, from: String },

    /// The subscription is claimed by an in-flight fulfillment.
    #[error("subscription {id} is being fulfilled; retry after the claim is released")]
    Claimed { id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SubscriptionError {
    /// True for errors caused by the caller's input rather than the system.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SubscriptionError::Validation(_)
                | SubscriptionError::InvalidId(_)
                | SubscriptionError::InvalidFrequency(_)
                | SubscriptionError::ScheduleOverflow { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SubscriptionError>;

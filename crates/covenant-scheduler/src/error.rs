use covenant_subscriptions::SubscriptionError;
use thiserror::Error;

/// Errors that abort a whole tick. Per-subscription failures never do;
/// they are collected in the tick report instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The due-selection query itself failed, so nothing was claimed.
    #[error("due selection failed: {0}")]
    Registry(#[from] SubscriptionError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Failure reported by an [`crate::sink::EventSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    /// Bounded delivery queue is full.
    #[error("event queue full")]
    Full,

    /// The consumer side has gone away.
    #[error("event consumer closed")]
    Closed,

    /// The sink did not accept the event within the tick deadline.
    #[error("event delivery timed out")]
    Timeout,

    /// Downstream refused the event.
    #[error("event rejected: {0}")]
    Rejected(String),
}

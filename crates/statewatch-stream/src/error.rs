//! Error types for event delivery.

/// Errors returned by the event broker and by subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The subscription was unsubscribed, closed by another holder, or the
    /// broker shut down. Terminal.
    #[error("subscription closed")]
    Closed,

    /// A blocking wait was interrupted by its cancellation signal. The
    /// subscription cursor is unchanged and the call may be retried.
    #[error("subscription wait cancelled")]
    Cancelled,

    /// The consumer fell behind and the oldest queued batches were dropped.
    /// The subscription stays open and resumes at the oldest retained batch.
    #[error("subscriber lagged behind the event stream; {missed} batches were dropped")]
    Lagged {
        /// Number of batches dropped from this subscriber's queue.
        missed: u64,
    },

    /// `start_exactly_at_index` was requested but that history has already
    /// been evicted from the replay buffer.
    #[error("requested index {requested} is no longer buffered; oldest available index is {oldest}")]
    IndexUnavailable {
        /// The index the subscriber asked for.
        requested: u64,
        /// The oldest index that can still be replayed.
        oldest: u64,
    },

    /// The broker task is not running.
    #[error("event broker is not running")]
    BrokerStopped,
}

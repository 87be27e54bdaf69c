//! Matcher error types

use thiserror::Error;

/// Errors from subscription consumers
#[derive(Debug, Error)]
pub enum MatchError {
    /// The subscription no longer exists in the store
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// Broker failure binding or draining the consumer
    #[error(transparent)]
    Bus(#[from] langhook_stream::BusError),

    /// Registry store failure
    #[error(transparent)]
    Store(#[from] langhook_store::StoreError),
}

//! Mapping error types

use langhook_llm::LlmError;
use thiserror::Error;

/// Errors from canonicalization and the map worker
#[derive(Debug, Error)]
pub enum MapError {
    /// The transform ran but produced an invalid canonical record
    #[error("mapping-yielded-invalid-canonical: {0}")]
    InvalidCanonical(String),

    /// The model could not produce a usable transform
    #[error("llm-synthesis-failed: {0}")]
    Synthesis(String),

    /// The daily LLM budget is exhausted; retried naturally after rollover
    #[error("budget-exhausted")]
    BudgetExhausted,

    /// A raw message did not carry a parseable raw event
    #[error("invalid raw event: {0}")]
    BadRawEvent(String),

    /// Registry store failure (transient)
    #[error(transparent)]
    Store(#[from] langhook_store::StoreError),

    /// Broker failure (transient)
    #[error(transparent)]
    Bus(#[from] langhook_stream::BusError),
}

impl MapError {
    /// Transient errors are nak'd for redelivery; everything else goes to
    /// the DLQ and is acked
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Bus(_))
    }
}

impl From<LlmError> for MapError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::BudgetExhausted => Self::BudgetExhausted,
            other => Self::Synthesis(other.to_string()),
        }
    }
}

//! Bus error types

use thiserror::Error;

/// Errors from the event bus
///
/// Everything here is transient from the pipeline's point of view: ingest
/// answers 503, workers nak for redelivery, and the process keeps running.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker cannot be reached
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The broker rejected an operation
    #[error("broker error: {0}")]
    Broker(String),

    /// A stream or consumer the operation needs does not exist
    #[error("unknown {kind} '{name}'")]
    Unknown { kind: &'static str, name: String },
}

impl BusError {
    /// Create an unknown-entity error
    pub fn unknown(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Unknown {
            kind,
            name: name.into(),
        }
    }
}

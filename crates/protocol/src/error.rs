//! Protocol error types

use thiserror::Error;

/// Errors raised by event construction and subject handling
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A canonical field was empty after sanitization
    #[error("empty {field} token")]
    EmptyToken { field: &'static str },

    /// A subject filter is malformed
    #[error("invalid filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Create an invalid filter error
    pub fn invalid_filter(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            filter: filter.into(),
            reason: reason.into(),
        }
    }
}

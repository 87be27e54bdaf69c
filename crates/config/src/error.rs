//! Configuration error types

use thiserror::Error;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable holds a value that cannot be used
    #[error("invalid {key}: {message}")]
    Invalid { key: &'static str, message: String },

    /// A rate limit spec could not be parsed
    #[error("invalid rate limit '{spec}': expected '<count>/<second|minute|hour>'")]
    InvalidRateLimit { spec: String },
}

impl ConfigError {
    /// Create an invalid-value error
    pub fn invalid(key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            message: message.into(),
        }
    }
}

//! Store error types

use thiserror::Error;

/// Registry store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database connection or query failure
    #[error("store unavailable: {0}")]
    Database(#[from] turso::Error),

    /// Row not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The database schema is newer than this binary supports
    #[error("store schema version {found} is newer than supported version {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },

    /// A stored JSON column failed to parse
    #[error("corrupt {column} column: {source}")]
    CorruptColumn {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Create a not found error
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

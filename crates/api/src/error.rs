//! API error types
//!
//! Structured error responses: machine-readable code plus a human message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use langhook_llm::LlmError;
use langhook_store::StoreError;
use serde::Serialize;
use thiserror::Error;

/// API errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request parameters
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("validation error: {field} - {message}")]
    Validation { field: &'static str, message: String },

    /// The synthesized pattern references tokens the schema registry does
    /// not know; the caller should consult GET /schema
    #[error("subscription pattern references unknown schema: {0}")]
    UnknownSchema(String),

    /// The model backing synthesis cannot be reached
    #[error("llm unavailable: {0}")]
    LlmUnavailable(String),

    /// Registry store failure
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UnknownSchema(_) => StatusCode::BAD_REQUEST,
            Self::LlmUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad-request",
            Self::NotFound(_) => "not-found",
            Self::Validation { .. } => "validation-error",
            Self::UnknownSchema(_) => "subscription-pattern-unknown-schema",
            Self::LlmUnavailable(_) => "llm-unavailable",
            Self::StoreUnavailable(_) => "store-unavailable",
            Self::Internal(_) => "internal-error",
        }
    }

    /// Create a not found error
    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::NotFound(format!("{} '{}' not found", entity, id))
    }

    /// Create a validation error
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::not_found(entity, &id),
            StoreError::Database(e) => Self::StoreUnavailable(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::UnknownSchema(tokens) => Self::UnknownSchema(tokens),
            LlmError::Unavailable(reason) => Self::LlmUnavailable(reason),
            LlmError::BudgetExhausted => Self::LlmUnavailable("budget-exhausted".into()),
            LlmError::BadResponse(reason) => Self::Internal(reason),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    /// Where to look next, when the error has an obvious remedy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let hint = match &self {
            ApiError::UnknownSchema(_) => {
                Some("consult GET /schema for the discovered publishers, resource types and actions")
            }
            _ => None,
        };
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            hint,
        };

        tracing::warn!(
            error_code = body.error,
            error_message = %body.message,
            status = %status,
            "API error"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type Result<T> = std::result::Result<T, ApiError>;

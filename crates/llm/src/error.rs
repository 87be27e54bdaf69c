//! LLM broker error types

use thiserror::Error;

/// Errors from the LLM broker
///
/// `Unavailable` and `BudgetExhausted` are the two kinds the gate failover
/// path reacts to; everything else fails the containing operation.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No model configured, or the provider cannot be reached
    #[error("llm unavailable: {0}")]
    Unavailable(String),

    /// The daily spend cap has been reached; resets at UTC midnight
    #[error("budget-exhausted: daily LLM spend cap reached")]
    BudgetExhausted,

    /// The model answered with something the caller cannot use
    #[error("unusable llm response: {0}")]
    BadResponse(String),

    /// A synthesized subject filter references tokens absent from the
    /// schema registry; callers should consult `/schema`
    #[error("subject filter references unknown schema: {0}")]
    UnknownSchema(String),
}

impl LlmError {
    /// True for conditions the gate failover policy applies to
    pub fn is_failover(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::BudgetExhausted)
    }
}

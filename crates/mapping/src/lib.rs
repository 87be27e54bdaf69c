//! LangHook - Mapping Engine
//!
//! Turns webhook payloads into canonical events deterministically.
//!
//! # Pipeline
//!
//! 1. [`fingerprint`] computes a structural fingerprint: a stable SHA-256
//!    over the payload's type skeleton (paths and leaf types, no values).
//! 2. [`MappingEngine`] looks the fingerprint up in the registry store,
//!    optionally refines it with event-field expressions, and evaluates the
//!    stored [`TransformExpr`] against the payload.
//! 3. When no mapping exists, the engine asks the LLM broker to synthesize
//!    one - at most one synthesis per fingerprint is in flight process-wide,
//!    and the result is round-trip validated before it is persisted.
//! 4. [`MapWorker`] drives the engine from the `raw.>` stream, publishing
//!    canonical events, registering schema triples and dead-lettering
//!    failures.

mod engine;
mod error;
pub mod expr;
pub mod fingerprint;
mod worker;

pub use engine::MappingEngine;
pub use error::MapError;
pub use expr::{CanonicalFields, TransformExpr};
pub use fingerprint::{extended_fingerprint, structural_fingerprint};
pub use worker::MapWorker;

/// Result type for mapping operations
pub type Result<T> = std::result::Result<T, MapError>;

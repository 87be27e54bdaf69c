//! LangHook - Protocol
//!
//! Shared event types and the broker subject grammar.
//!
//! Every other crate speaks in terms of these types:
//!
//! - [`RawEvent`] - a webhook payload as accepted by the ingest gateway,
//!   published on `raw.{source}`.
//! - [`CanonicalEvent`] - the normalized five-tuple emitted by the map
//!   worker, published on `langhook.events.{publisher}.{resource_type}.{resource_id}.{action}`.
//! - [`subject`] - subject derivation and filter matching (`*` / `>`).
//!
//! # Subject grammar
//!
//! Subjects are dot-separated token strings. Tokens are lowercased and inner
//! dots are replaced with underscores before a subject is derived, so a
//! derived subject never contains empty segments. Filters may use `*` to
//! match exactly one token and `>` (final token only) to match one or more
//! remaining tokens.

mod error;
mod events;
mod schema;
pub mod subject;

pub use error::ProtocolError;
pub use events::{CanonicalEvent, DlqMessage, RawEvent, Resource, ResourceId};
pub use schema::SchemaSummary;
pub use subject::{
    canonical_subject, dlq_ingest_subject, dlq_map_subject, raw_subject, sanitize_token,
    subject_matches, validate_filter, CANONICAL_PREFIX, DLQ_STREAM, EVENTS_STREAM, RAW_STREAM,
};

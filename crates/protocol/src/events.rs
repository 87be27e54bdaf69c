//! Event types carried across the broker
//!
//! `RawEvent` is what the ingest gateway accepts; `CanonicalEvent` is the
//! normalized five-tuple the map worker emits. `DlqMessage` wraps anything
//! that failed an earlier stage.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A webhook payload accepted by the ingest gateway
///
/// Published on `raw.{source}` and owned by the map worker until acked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEvent {
    /// Request id assigned at ingest; inherited by the canonical event
    pub id: Uuid,
    /// Time the gateway received the request
    pub received_at: DateTime<Utc>,
    /// Path segment identifying the publisher (e.g. `github`)
    pub source: String,
    /// Request headers, lowercased keys
    pub headers: BTreeMap<String, String>,
    /// True when verification passed or no secret is configured
    pub signature_valid: bool,
    /// Decoded JSON body
    pub payload: Value,
}

impl RawEvent {
    /// Create a raw event with a fresh id and the current time
    pub fn new(
        source: impl Into<String>,
        headers: BTreeMap<String, String>,
        signature_valid: bool,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            received_at: Utc::now(),
            source: source.into(),
            headers,
            signature_valid,
            payload,
        }
    }
}

/// Atomic resource identifier: integer or string
///
/// Webhook payloads carry numeric ids (GitHub PR numbers) as well as opaque
/// string ids (Stripe object ids), so the canonical shape keeps both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ResourceId {
    Number(i64),
    String(String),
}

impl ResourceId {
    /// Render the id as a subject token (no sanitization applied)
    pub fn as_token(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::String(s) => s.clone(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for ResourceId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// The resource a canonical event refers to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    /// Singular noun, e.g. `pull_request`
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Atomic identifier
    pub id: ResourceId,
}

/// The normalized five-tuple emitted after mapping
///
/// Invariant: `publisher`, `resource.type` and `action` are non-empty
/// lowercase tokens free of the subject separator. The map worker enforces
/// this through [`crate::sanitize_token`] before deriving the publish
/// subject.
///
/// `timestamp` is copied from [`RawEvent::received_at`], so re-processing a
/// redelivered raw event emits a byte-identical canonical event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalEvent {
    /// Inherited from the raw event
    pub id: Uuid,
    /// Inherited from the raw event's receive time
    pub timestamp: DateTime<Utc>,
    /// Upstream system, e.g. `github`
    pub publisher: String,
    pub resource: Resource,
    /// Verb, e.g. `create`
    pub action: String,
    /// Optional human-readable one-liner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// The original webhook payload
    pub payload: Value,
}

impl CanonicalEvent {
    /// The (publisher, resource_type, action) triple for schema registration
    pub fn schema_triple(&self) -> (&str, &str, &str) {
        (
            &self.publisher,
            &self.resource.resource_type,
            &self.action,
        )
    }
}

/// Message published on a dead-letter subject
///
/// `payload` holds the original JSON when it parsed, or the raw body as a
/// string when it did not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqMessage {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    pub payload: Value,
}

impl DlqMessage {
    /// Wrap a raw event that failed mapping
    pub fn from_raw(raw: &RawEvent, error: impl Into<String>) -> Self {
        Self {
            id: raw.id,
            timestamp: Utc::now(),
            source: raw.source.clone(),
            error: error.into(),
            headers: None,
            payload: raw.payload.clone(),
        }
    }
}

//! Persisted row shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Notification channel kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// POST the canonical event to a configured URL
    Webhook,
    /// No push channel; consumers poll the subscription event log
    None,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::None => "none",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "webhook" => Self::Webhook,
            _ => Self::None,
        }
    }
}

/// What to do when the gate's model cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverPolicy {
    /// Treat the event as passing
    FailOpen,
    /// Treat the event as blocked
    FailClosed,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self::FailOpen
    }
}

impl FailoverPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailOpen => "fail_open",
            Self::FailClosed => "fail_closed",
        }
    }
}

/// Optional LLM gate attached to a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Custom evaluation prompt; the default template is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Minimum model confidence for a pass
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Log gate reasoning at info level
    #[serde(default)]
    pub audit: bool,
    #[serde(default)]
    pub failover_policy: FailoverPolicy,
}

fn default_threshold() -> f64 {
    0.8
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            prompt: None,
            threshold: default_threshold(),
            audit: false,
            failover_policy: FailoverPolicy::default(),
        }
    }
}

/// A natural-language subscription bound to a broker subject filter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription {
    pub id: String,
    pub subscriber_id: String,
    pub description: String,
    /// Broker subject filter derived from the description
    pub pattern: String,
    pub channel_type: ChannelType,
    /// Channel settings, e.g. `{"url": "..."}` for webhooks
    pub channel_config: Option<Value>,
    pub gate: Option<GateConfig>,
    /// Auto-deactivate after the first dispatch
    pub disposable: bool,
    pub active: bool,
    pub used: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Create an active, unused subscription with a fresh id
    pub fn new(
        subscriber_id: impl Into<String>,
        description: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            subscriber_id: subscriber_id.into(),
            description: description.into(),
            pattern: pattern.into(),
            channel_type: ChannelType::None,
            channel_config: None,
            gate: None,
            disposable: false,
            active: true,
            used: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Durable consumer name for this subscription
    pub fn durable_name(&self) -> String {
        format!("sub-{}", self.id)
    }
}

/// Partial update over a subscription
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    pub description: Option<String>,
    pub pattern: Option<String>,
    pub channel_type: Option<ChannelType>,
    pub channel_config: Option<Option<Value>>,
    pub gate: Option<Option<GateConfig>>,
    pub disposable: Option<bool>,
    pub active: Option<bool>,
}

/// Where an ingest mapping came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingSource {
    Builtin,
    Synthesized,
}

impl MappingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::Synthesized => "synthesized",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "builtin" => Self::Builtin,
            _ => Self::Synthesized,
        }
    }
}

/// A fingerprint-keyed payload transform
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestMapping {
    /// Structural (or extended) fingerprint; unique
    pub fingerprint: String,
    pub publisher: String,
    /// Transform expression evaluated against the payload
    pub expression: String,
    /// JSON-pointer expressions whose values extend the fingerprint
    pub event_field_expressions: Vec<String>,
    pub source: MappingSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestMapping {
    pub fn new(
        fingerprint: impl Into<String>,
        publisher: impl Into<String>,
        expression: impl Into<String>,
        source: MappingSource,
    ) -> Self {
        let now = Utc::now();
        Self {
            fingerprint: fingerprint.into(),
            publisher: publisher.into(),
            expression: expression.into(),
            event_field_expressions: Vec::new(),
            source,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One row per canonical event (optional, `EVENT_LOGGING_ENABLED`)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLogRow {
    pub id: String,
    pub subject: String,
    pub publisher: String,
    pub resource_type: String,
    pub resource_id: String,
    pub action: String,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
    pub logged_at: DateTime<Utc>,
}

/// One row per (subscription, event) observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionEventLogRow {
    pub id: String,
    pub subscription_id: String,
    pub event_id: String,
    pub subject: String,
    pub payload: Value,
    /// None when the subscription has no gate
    pub gate_passed: Option<bool>,
    pub gate_reason: Option<String>,
    pub webhook_sent: bool,
    pub webhook_response_status: Option<u16>,
    pub emitted_at: DateTime<Utc>,
    pub logged_at: DateTime<Utc>,
}

impl SubscriptionEventLogRow {
    /// Create a log row with a fresh id, logged now
    pub fn new(
        subscription_id: impl Into<String>,
        event_id: impl Into<String>,
        subject: impl Into<String>,
        payload: Value,
        emitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subscription_id: subscription_id.into(),
            event_id: event_id.into(),
            subject: subject.into(),
            payload,
            gate_passed: None,
            gate_reason: None,
            webhook_sent: false,
            webhook_response_status: None,
            emitted_at,
            logged_at: Utc::now(),
        }
    }
}

/// Gate filter for subscription event log queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateFilter {
    All,
    /// Gate passed or absent
    Allowed,
    Blocked,
}

/// One page of query results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub size: u32,
}

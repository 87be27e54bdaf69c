//! LangHook - Stream Client
//!
//! Typed publish/subscribe over a durable subject-addressed broker.
//!
//! The [`EventBus`] trait is the narrow seam every pipeline component talks
//! through. Two implementations ship with the crate:
//!
//! - [`JetStreamBus`] - NATS JetStream with durable pull consumers and
//!   explicit ack/nak. This is what `langhook serve` runs against.
//! - [`MemoryBus`] - an in-process bus with the same durable-consumer and
//!   wildcard semantics, used by tests and local development.
//!
//! # Delivery guarantees
//!
//! At-least-once: a message stays outstanding until acked; a nak (or a
//! crashed consumer) causes redelivery. Durable consumer names are stable
//! per subscription so redelivery resumes across restarts. Consumers must be
//! idempotent on the event id.
//!
//! # Example
//!
//! ```ignore
//! use langhook_stream::{EventBus, MemoryBus, StreamSpec};
//!
//! let bus = MemoryBus::new();
//! bus.ensure_stream(StreamSpec::new("raw", ["raw.>"])).await?;
//! bus.publish("raw.github", payload, None).await?;
//!
//! let mut messages = bus.subscribe("raw", "raw.*", "map-worker").await?;
//! while let Some(msg) = messages.next().await {
//!     // ... process ...
//!     msg.ack().await?;
//! }
//! ```

mod error;
mod jetstream;
mod memory;

use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

pub use error::BusError;
pub use jetstream::JetStreamBus;
pub use memory::MemoryBus;

/// Result type for bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Stream retention policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Keep messages up to stream limits regardless of consumption
    Limits,
    /// Remove messages once acknowledged by a consumer
    WorkQueue,
}

/// Declarative description of a stream
#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub name: String,
    pub subjects: Vec<String>,
    pub retention: Retention,
    pub replicas: usize,
}

impl StreamSpec {
    /// Create a spec with `Limits` retention and a single replica
    pub fn new<I, S>(name: impl Into<String>, subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            subjects: subjects.into_iter().map(Into::into).collect(),
            retention: Retention::Limits,
            replicas: 1,
        }
    }

    /// Override the retention policy
    #[must_use]
    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Override the replica count
    #[must_use]
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }
}

/// Acknowledgement backend for a delivered message
#[async_trait]
pub trait MessageAck: Send {
    async fn ack(&mut self) -> Result<()>;
    async fn nak(&mut self, delay: Option<Duration>) -> Result<()>;
}

/// A message delivered to a consumer, with explicit ack/nak
pub struct BusMessage {
    pub subject: String,
    pub payload: Bytes,
    acker: Box<dyn MessageAck>,
}

impl BusMessage {
    /// Assemble a message around an acknowledgement backend
    pub fn new(subject: String, payload: Bytes, acker: Box<dyn MessageAck>) -> Self {
        Self {
            subject,
            payload,
            acker,
        }
    }

    /// Acknowledge successful processing
    pub async fn ack(mut self) -> Result<()> {
        self.acker.ack().await
    }

    /// Negative-acknowledge for redelivery, optionally after a delay
    pub async fn nak(mut self, delay: Option<Duration>) -> Result<()> {
        self.acker.nak(delay).await
    }
}

impl std::fmt::Debug for BusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusMessage")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Stream of delivered messages
pub type MessageStream = Pin<Box<dyn Stream<Item = BusMessage> + Send>>;

/// The narrow interface to the durable broker
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Create the stream if it does not exist
    async fn ensure_stream(&self, spec: StreamSpec) -> Result<()>;

    /// Publish a message, awaiting broker acknowledgement
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<()>;

    /// Bind (or resume) a durable consumer with a subject filter
    async fn subscribe(&self, stream: &str, filter: &str, durable: &str)
        -> Result<MessageStream>;

    /// Remove a durable consumer so no further deliveries occur
    async fn delete_consumer(&self, stream: &str, durable: &str) -> Result<()>;

    /// Cheap reachability probe
    async fn ping(&self) -> Result<()>;
}

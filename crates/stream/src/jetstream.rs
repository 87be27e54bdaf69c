//! NATS JetStream implementation of the event bus

use std::collections::BTreeMap;
use std::time::Duration;

use async_nats::jetstream::{self, consumer, stream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::error::BusError;
use crate::{BusMessage, EventBus, MessageAck, MessageStream, Result, Retention, StreamSpec};

/// JetStream-backed event bus
///
/// Durable pull consumers with explicit ack give at-least-once delivery;
/// redelivery resumes across process restarts because consumer state lives
/// on the broker.
pub struct JetStreamBus {
    client: async_nats::Client,
    context: jetstream::Context,
}

impl JetStreamBus {
    /// Connect to the broker at `url`
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        let context = jetstream::new(client.clone());

        tracing::info!(url = %url, "connected to broker");

        Ok(Self { client, context })
    }
}

#[async_trait]
impl EventBus for JetStreamBus {
    async fn ensure_stream(&self, spec: StreamSpec) -> Result<()> {
        let retention = match spec.retention {
            Retention::Limits => stream::RetentionPolicy::Limits,
            Retention::WorkQueue => stream::RetentionPolicy::WorkQueue,
        };

        self.context
            .get_or_create_stream(stream::Config {
                name: spec.name.clone(),
                subjects: spec.subjects.clone(),
                retention,
                num_replicas: spec.replicas,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Broker(e.to_string()))?;

        tracing::debug!(stream = %spec.name, subjects = ?spec.subjects, "stream ensured");
        Ok(())
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Option<BTreeMap<String, String>>,
    ) -> Result<()> {
        let ack = match headers {
            Some(map) => {
                let mut hdrs = async_nats::HeaderMap::new();
                for (name, value) in &map {
                    hdrs.insert(name.as_str(), value.as_str());
                }
                self.context
                    .publish_with_headers(subject.to_string(), hdrs, payload)
                    .await
            }
            None => self.context.publish(subject.to_string(), payload).await,
        }
        .map_err(|e| BusError::Unavailable(e.to_string()))?;

        // await the broker-side ack so back-pressure surfaces to the caller
        ack.await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(
        &self,
        stream: &str,
        filter: &str,
        durable: &str,
    ) -> Result<MessageStream> {
        let js_stream = self
            .context
            .get_stream(stream)
            .await
            .map_err(|e| BusError::Broker(e.to_string()))?;

        let config = consumer::pull::Config {
            durable_name: Some(durable.to_string()),
            filter_subject: filter.to_string(),
            ack_policy: consumer::AckPolicy::Explicit,
            ..Default::default()
        };

        let consumer = js_stream
            .get_or_create_consumer(durable, config)
            .await
            .map_err(|e| BusError::Broker(e.to_string()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::Broker(e.to_string()))?;

        tracing::debug!(stream = %stream, filter = %filter, durable = %durable, "consumer bound");

        let durable_name = durable.to_string();
        let mapped = messages.filter_map(move |result| {
            let durable_name = durable_name.clone();
            async move {
                match result {
                    Ok(msg) => {
                        let subject = msg.subject.to_string();
                        let payload = msg.payload.clone();
                        Some(BusMessage::new(subject, payload, Box::new(JetAck { msg })))
                    }
                    Err(e) => {
                        tracing::warn!(durable = %durable_name, error = %e, "message stream error");
                        None
                    }
                }
            }
        });

        Ok(Box::pin(mapped))
    }

    async fn delete_consumer(&self, stream: &str, durable: &str) -> Result<()> {
        let js_stream = self
            .context
            .get_stream(stream)
            .await
            .map_err(|e| BusError::Broker(e.to_string()))?;

        js_stream
            .delete_consumer(durable)
            .await
            .map_err(|e| BusError::Broker(e.to_string()))?;

        tracing::debug!(stream = %stream, durable = %durable, "consumer deleted");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))
    }
}

/// Ack backend wrapping a JetStream message
struct JetAck {
    msg: jetstream::Message,
}

#[async_trait]
impl MessageAck for JetAck {
    async fn ack(&mut self) -> Result<()> {
        self.msg
            .ack()
            .await
            .map_err(|e| BusError::Broker(e.to_string()))
    }

    async fn nak(&mut self, delay: Option<Duration>) -> Result<()> {
        self.msg
            .ack_with(jetstream::AckKind::Nak(delay))
            .await
            .map_err(|e| BusError::Broker(e.to_string()))
    }
}

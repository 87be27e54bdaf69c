//! Map worker
//!
//! Consumes the durable `map-worker` subscription on `raw.>`, canonicalizes
//! each raw event, publishes the result on its derived subject, registers
//! the schema triple and optionally appends an event log row. Mapping
//! failures are dead-lettered to `dlq.map.{source}`; transient broker or
//! store errors nak for redelivery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use langhook_metrics::PipelineMetrics;
use langhook_protocol::{
    canonical_subject, dlq_map_subject, DlqMessage, RawEvent, RAW_STREAM,
};
use langhook_store::{EventLogRow, Store};
use langhook_stream::{BusMessage, EventBus};
use tokio_util::sync::CancellationToken;

use crate::engine::MappingEngine;
use crate::error::MapError;
use crate::Result;

/// Durable consumer name shared by the worker pool
pub const DURABLE_NAME: &str = "map-worker";

/// Redelivery delay for transient failures
const NAK_DELAY: Duration = Duration::from_secs(1);

/// Worker turning raw events into canonical events
pub struct MapWorker {
    bus: Arc<dyn EventBus>,
    store: Store,
    engine: Arc<MappingEngine>,
    metrics: Arc<PipelineMetrics>,
    event_logging: bool,
}

impl MapWorker {
    pub fn new(
        bus: Arc<dyn EventBus>,
        store: Store,
        engine: Arc<MappingEngine>,
        metrics: Arc<PipelineMetrics>,
        event_logging: bool,
    ) -> Self {
        Self {
            bus,
            store,
            engine,
            metrics,
            event_logging,
        }
    }

    /// Consume until cancelled
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut messages = self
            .bus
            .subscribe(RAW_STREAM, "raw.>", DURABLE_NAME)
            .await?;

        tracing::info!("map worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = messages.next() => {
                    match message {
                        Some(message) => self.process(message).await,
                        None => break,
                    }
                }
            }
        }

        tracing::info!("map worker stopped");
        Ok(())
    }

    async fn process(&self, message: BusMessage) {
        let raw: RawEvent = match serde_json::from_slice(&message.payload) {
            Ok(raw) => raw,
            Err(e) => {
                // a message that never parses would redeliver forever
                tracing::error!(subject = %message.subject, error = %e, "unreadable raw event, dropping");
                let _ = message.ack().await;
                return;
            }
        };

        let source = raw.source.clone();
        self.metrics
            .events_processed
            .with_label_values(&[source.as_str()])
            .inc();

        let started = Instant::now();
        match self.handle(&raw).await {
            Ok(subject) => {
                self.metrics
                    .events_mapped
                    .with_label_values(&[source.as_str()])
                    .inc();
                self.metrics
                    .map_duration
                    .observe(started.elapsed().as_secs_f64());

                tracing::info!(
                    event_id = %raw.id,
                    source = %source,
                    subject = %subject,
                    "event mapped"
                );

                if let Err(e) = message.ack().await {
                    tracing::warn!(event_id = %raw.id, error = %e, "ack failed");
                }
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    event_id = %raw.id,
                    source = %source,
                    error = %e,
                    "transient failure, requesting redelivery"
                );
                if let Err(nak_err) = message.nak(Some(NAK_DELAY)).await {
                    tracing::warn!(event_id = %raw.id, error = %nak_err, "nak failed");
                }
            }
            Err(e) => {
                self.metrics
                    .events_failed
                    .with_label_values(&[source.as_str()])
                    .inc();
                tracing::warn!(
                    event_id = %raw.id,
                    source = %source,
                    error = %e,
                    "mapping failed, dead-lettering"
                );

                match self.dead_letter(&raw, &e).await {
                    Ok(()) => {
                        let _ = message.ack().await;
                    }
                    Err(dlq_err) => {
                        // keep the event; redelivery retries the DLQ write
                        tracing::warn!(event_id = %raw.id, error = %dlq_err, "dlq publish failed");
                        let _ = message.nak(Some(NAK_DELAY)).await;
                    }
                }
            }
        }
    }

    /// Canonicalize, publish, register schema, optionally log
    async fn handle(&self, raw: &RawEvent) -> Result<String> {
        let event = self.engine.canonicalize(raw).await?;

        let subject = canonical_subject(
            &event.publisher,
            &event.resource.resource_type,
            &event.resource.id,
            &event.action,
        )
        .map_err(|e| MapError::InvalidCanonical(e.to_string()))?;

        let payload = serde_json::to_vec(&event)
            .map_err(|e| MapError::InvalidCanonical(e.to_string()))?;
        self.bus
            .publish(&subject, Bytes::from(payload), None)
            .await?;

        // registered after publish so schema lag is bounded to one hop; a
        // registry failure must not fail the message
        let (publisher, resource_type, action) = event.schema_triple();
        if let Err(e) = self
            .store
            .schema()
            .register(publisher, resource_type, action)
            .await
        {
            tracing::warn!(
                event_id = %event.id,
                error = %e,
                "schema registration failed"
            );
        }

        if self.event_logging {
            let row = EventLogRow {
                id: event.id.to_string(),
                subject: subject.clone(),
                publisher: event.publisher.clone(),
                resource_type: event.resource.resource_type.clone(),
                resource_id: event.resource.id.as_token(),
                action: event.action.clone(),
                payload: event.payload.clone(),
                emitted_at: event.timestamp,
                logged_at: Utc::now(),
            };
            if let Err(e) = self.store.event_logs().append(&row).await {
                tracing::warn!(event_id = %event.id, error = %e, "event log append failed");
            }
        }

        Ok(subject)
    }

    async fn dead_letter(&self, raw: &RawEvent, error: &MapError) -> Result<()> {
        let message = DlqMessage::from_raw(raw, error.to_string());
        let payload = serde_json::to_vec(&message)
            .map_err(|e| MapError::BadRawEvent(e.to_string()))?;

        self.bus
            .publish(&dlq_map_subject(&raw.source), Bytes::from(payload), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "worker_test.rs"]
mod worker_test;

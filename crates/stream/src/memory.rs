//! In-process event bus with durable-consumer semantics
//!
//! Mirrors the broker behavior the pipeline relies on - subject wildcards,
//! durable consumers that resume their backlog, nak redelivery - without a
//! running broker. Used by tests and local development.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use langhook_protocol::subject_matches;
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::{BusMessage, EventBus, MessageAck, MessageStream, Result, StreamSpec};

#[derive(Clone)]
struct Stored {
    subject: String,
    payload: Bytes,
}

struct ConsumerState {
    filter: String,
    /// Messages waiting for a live subscriber
    backlog: VecDeque<Stored>,
    /// Live delivery channel, when a subscriber is attached
    tx: Option<mpsc::UnboundedSender<Stored>>,
}

struct StreamState {
    subjects: Vec<String>,
    consumers: HashMap<String, ConsumerState>,
}

struct Inner {
    streams: Mutex<HashMap<String, StreamState>>,
}

/// In-memory implementation of [`EventBus`]
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                streams: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a durable consumer without attaching a subscriber
    ///
    /// Messages published afterwards accumulate in the consumer's backlog
    /// until `subscribe` is called, mirroring a broker-side durable.
    pub fn register_consumer(&self, stream: &str, filter: &str, durable: &str) -> Result<()> {
        let mut streams = self.inner.streams.lock().unwrap();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| BusError::unknown("stream", stream))?;

        state
            .consumers
            .entry(durable.to_string())
            .or_insert_with(|| ConsumerState {
                filter: filter.to_string(),
                backlog: VecDeque::new(),
                tx: None,
            });
        Ok(())
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn redeliver(&self, stream: &str, durable: &str, stored: Stored) {
        let mut streams = self.streams.lock().unwrap();
        if let Some(state) = streams.get_mut(stream) {
            if let Some(consumer) = state.consumers.get_mut(durable) {
                deliver(consumer, stored);
            }
        }
    }
}

fn deliver(consumer: &mut ConsumerState, stored: Stored) {
    if let Some(tx) = &consumer.tx {
        if tx.send(stored.clone()).is_ok() {
            return;
        }
        // subscriber went away; fall back to the backlog
        consumer.tx = None;
    }
    consumer.backlog.push_back(stored);
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn ensure_stream(&self, spec: StreamSpec) -> Result<()> {
        let mut streams = self.inner.streams.lock().unwrap();
        streams.entry(spec.name.clone()).or_insert_with(|| StreamState {
            subjects: spec.subjects.clone(),
            consumers: HashMap::new(),
        });
        Ok(())
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        _headers: Option<BTreeMap<String, String>>,
    ) -> Result<()> {
        let stored = Stored {
            subject: subject.to_string(),
            payload,
        };

        let mut streams = self.inner.streams.lock().unwrap();
        let mut matched = false;
        for state in streams.values_mut() {
            let in_stream = state
                .subjects
                .iter()
                .any(|pattern| subject_matches(pattern, subject));
            if !in_stream {
                continue;
            }
            matched = true;
            for consumer in state.consumers.values_mut() {
                if subject_matches(&consumer.filter, subject) {
                    deliver(consumer, stored.clone());
                }
            }
        }

        // like a real broker, publishing to a subject no stream covers is
        // an error rather than a silent drop
        if !matched {
            return Err(BusError::unknown("subject", subject));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        stream: &str,
        filter: &str,
        durable: &str,
    ) -> Result<MessageStream> {
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut streams = self.inner.streams.lock().unwrap();
            let state = streams
                .get_mut(stream)
                .ok_or_else(|| BusError::unknown("stream", stream))?;

            let consumer = state
                .consumers
                .entry(durable.to_string())
                .or_insert_with(|| ConsumerState {
                    filter: filter.to_string(),
                    backlog: VecDeque::new(),
                    tx: None,
                });

            consumer.filter = filter.to_string();
            while let Some(stored) = consumer.backlog.pop_front() {
                let _ = tx.send(stored);
            }
            consumer.tx = Some(tx);
        }

        Ok(Box::pin(MemoryStream {
            rx,
            inner: Arc::clone(&self.inner),
            stream: stream.to_string(),
            durable: durable.to_string(),
        }))
    }

    async fn delete_consumer(&self, stream: &str, durable: &str) -> Result<()> {
        let mut streams = self.inner.streams.lock().unwrap();
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| BusError::unknown("stream", stream))?;
        state.consumers.remove(durable);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<Stored>,
    inner: Arc<Inner>,
    stream: String,
    durable: String,
}

impl Stream for MemoryStream {
    type Item = BusMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(stored)) => {
                let acker = MemAck {
                    inner: Arc::clone(&this.inner),
                    stream: this.stream.clone(),
                    durable: this.durable.clone(),
                    stored: Some(stored.clone()),
                };
                Poll::Ready(Some(BusMessage::new(
                    stored.subject,
                    stored.payload,
                    Box::new(acker),
                )))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct MemAck {
    inner: Arc<Inner>,
    stream: String,
    durable: String,
    stored: Option<Stored>,
}

#[async_trait]
impl MessageAck for MemAck {
    async fn ack(&mut self) -> Result<()> {
        self.stored = None;
        Ok(())
    }

    async fn nak(&mut self, delay: Option<Duration>) -> Result<()> {
        let Some(stored) = self.stored.take() else {
            return Ok(());
        };

        match delay {
            Some(delay) => {
                let inner = Arc::clone(&self.inner);
                let stream = self.stream.clone();
                let durable = self.durable.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.redeliver(&stream, &durable, stored);
                });
            }
            None => self.inner.redeliver(&self.stream, &self.durable, stored),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn payload(text: &str) -> Bytes {
        Bytes::from(text.to_string())
    }

    #[tokio::test]
    async fn test_publish_subscribe_with_filter() {
        let bus = MemoryBus::new();
        bus.ensure_stream(StreamSpec::new("raw", ["raw.>"]))
            .await
            .unwrap();

        let mut messages = bus.subscribe("raw", "raw.github", "worker").await.unwrap();

        bus.publish("raw.github", payload("a"), None).await.unwrap();
        bus.publish("raw.stripe", payload("b"), None).await.unwrap();
        bus.publish("raw.github", payload("c"), None).await.unwrap();

        let first = messages.next().await.unwrap();
        assert_eq!(first.subject, "raw.github");
        assert_eq!(first.payload, payload("a"));
        first.ack().await.unwrap();

        let second = messages.next().await.unwrap();
        assert_eq!(second.payload, payload("c"));
        second.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_durable_backlog_resumes() {
        let bus = MemoryBus::new();
        bus.ensure_stream(StreamSpec::new("events", ["langhook.events.>"]))
            .await
            .unwrap();
        bus.register_consumer("events", "langhook.events.>", "sub-1")
            .unwrap();

        bus.publish("langhook.events.github.issue.1.create", payload("x"), None)
            .await
            .unwrap();

        // subscriber attaches later and still receives the backlog
        let mut messages = bus
            .subscribe("events", "langhook.events.>", "sub-1")
            .await
            .unwrap();
        let msg = messages.next().await.unwrap();
        assert_eq!(msg.payload, payload("x"));
        msg.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_nak_redelivers() {
        let bus = MemoryBus::new();
        bus.ensure_stream(StreamSpec::new("raw", ["raw.>"]))
            .await
            .unwrap();

        let mut messages = bus.subscribe("raw", "raw.*", "worker").await.unwrap();
        bus.publish("raw.github", payload("retry-me"), None)
            .await
            .unwrap();

        let msg = messages.next().await.unwrap();
        msg.nak(None).await.unwrap();

        let redelivered = messages.next().await.unwrap();
        assert_eq!(redelivered.payload, payload("retry-me"));
        redelivered.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_consumer_stops_delivery() {
        let bus = MemoryBus::new();
        bus.ensure_stream(StreamSpec::new("raw", ["raw.>"]))
            .await
            .unwrap();

        let mut messages = bus.subscribe("raw", "raw.*", "worker").await.unwrap();
        bus.delete_consumer("raw", "worker").await.unwrap();

        bus.publish("raw.github", payload("late"), None).await.unwrap();

        // channel closed: stream terminates without delivering
        assert!(messages.next().await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_unknown_stream() {
        let bus = MemoryBus::new();
        let err = bus.subscribe("missing", "x.*", "d").await.err().unwrap();
        assert!(matches!(err, BusError::Unknown { .. }));
    }

    #[tokio::test]
    async fn test_two_consumers_both_receive() {
        let bus = MemoryBus::new();
        bus.ensure_stream(StreamSpec::new("events", ["langhook.events.>"]))
            .await
            .unwrap();

        let mut a = bus
            .subscribe("events", "langhook.events.github.>", "sub-a")
            .await
            .unwrap();
        let mut b = bus
            .subscribe("events", "langhook.events.*.issue.*.*", "sub-b")
            .await
            .unwrap();

        bus.publish("langhook.events.github.issue.7.update", payload("both"), None)
            .await
            .unwrap();

        assert_eq!(a.next().await.unwrap().payload, payload("both"));
        assert_eq!(b.next().await.unwrap().payload, payload("both"));
    }
}

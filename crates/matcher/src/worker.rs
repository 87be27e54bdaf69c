//! Per-subscription consumer
//!
//! One worker per active subscription: binds a durable consumer on the
//! subscription's pattern, runs the optional gate, dispatches the channel,
//! logs the observation and acks. Messages are processed serially.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use langhook_protocol::{CanonicalEvent, EVENTS_STREAM};
use langhook_store::{
    ChannelType, FailoverPolicy, GateConfig, Subscription, SubscriptionEventLogRow,
};
use langhook_stream::BusMessage;
use tokio_util::sync::CancellationToken;

use crate::error::MatchError;
use crate::MatcherContext;
use crate::Result;

/// What the worker should do after one message
enum Step {
    Continue,
    /// Disposable subscription consumed its event
    Unbind,
}

/// Long-lived consumer for one subscription
pub struct SubscriptionWorker {
    ctx: Arc<MatcherContext>,
    subscription_id: String,
}

impl SubscriptionWorker {
    pub fn new(ctx: Arc<MatcherContext>, subscription_id: impl Into<String>) -> Self {
        Self {
            ctx,
            subscription_id: subscription_id.into(),
        }
    }

    /// Consume until cancelled or unbound
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let subscription = self
            .ctx
            .store
            .subscriptions()
            .get(&self.subscription_id)
            .await?
            .ok_or_else(|| MatchError::SubscriptionNotFound(self.subscription_id.clone()))?;

        if !subscription.active {
            tracing::debug!(subscription_id = %subscription.id, "subscription inactive, not binding");
            return Ok(());
        }

        let durable = subscription.durable_name();
        let mut messages = self
            .ctx
            .bus
            .subscribe(EVENTS_STREAM, &subscription.pattern, &durable)
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            pattern = %subscription.pattern,
            "subscription consumer bound"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = messages.next() => {
                    match message {
                        None => break,
                        Some(message) => {
                            match self.process(&subscription, message).await {
                                Step::Continue => {}
                                Step::Unbind => {
                                    self.unbind(&subscription, &durable).await;
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }

        tracing::info!(subscription_id = %subscription.id, "subscription consumer stopped");
        Ok(())
    }

    /// Disposable transition: persist used/inactive, then drop the consumer
    async fn unbind(&self, subscription: &Subscription, durable: &str) {
        if let Err(e) = self
            .ctx
            .store
            .subscriptions()
            .mark_used(&subscription.id)
            .await
        {
            tracing::warn!(subscription_id = %subscription.id, error = %e, "mark_used failed");
        }
        if let Err(e) = self.ctx.bus.delete_consumer(EVENTS_STREAM, durable).await {
            tracing::warn!(subscription_id = %subscription.id, error = %e, "consumer delete failed");
        }
        tracing::info!(subscription_id = %subscription.id, "disposable subscription unbound");
    }

    async fn process(&self, subscription: &Subscription, message: BusMessage) -> Step {
        let event: CanonicalEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(
                    subscription_id = %subscription.id,
                    subject = %message.subject,
                    error = %e,
                    "unreadable canonical event, dropping"
                );
                let _ = message.ack().await;
                return Step::Continue;
            }
        };

        let mut row = SubscriptionEventLogRow::new(
            &subscription.id,
            event.id.to_string(),
            &message.subject,
            serde_json::to_value(&event).unwrap_or_default(),
            event.timestamp,
        );

        let passed = match &subscription.gate {
            None => true,
            Some(gate) => {
                let (passed, reason) = self.evaluate_gate(subscription, gate, &event).await;
                row.gate_passed = Some(passed);
                row.gate_reason = Some(reason);
                passed
            }
        };

        if passed && subscription.channel_type == ChannelType::Webhook {
            let url = subscription
                .channel_config
                .as_ref()
                .and_then(|config| config.get("url"))
                .and_then(|url| url.as_str());

            match url {
                Some(url) => {
                    let outcome = self.ctx.dispatcher.dispatch(url, &event).await;
                    row.webhook_sent = outcome.sent;
                    row.webhook_response_status = outcome.status;

                    let label = if outcome.sent { "sent" } else { "failed" };
                    self.ctx
                        .metrics
                        .webhook_deliveries
                        .with_label_values(&[label])
                        .inc();

                    if !outcome.sent {
                        tracing::warn!(
                            subscription_id = %subscription.id,
                            event_id = %event.id,
                            status = ?outcome.status,
                            "channel-delivery-failed"
                        );
                    }
                }
                None => {
                    tracing::warn!(
                        subscription_id = %subscription.id,
                        "webhook channel without a url, skipping dispatch"
                    );
                }
            }
        }

        // the log row is the durable record of this observation; only ack
        // once it is persisted
        if let Err(e) = self.ctx.store.subscription_event_logs().append(&row).await {
            tracing::warn!(
                subscription_id = %subscription.id,
                event_id = %event.id,
                error = %e,
                "event log write failed, requesting redelivery"
            );
            let _ = message.nak(Some(std::time::Duration::from_secs(1))).await;
            return Step::Continue;
        }

        if let Err(e) = message.ack().await {
            tracing::warn!(subscription_id = %subscription.id, error = %e, "ack failed");
        }

        if subscription.disposable && passed {
            Step::Unbind
        } else {
            Step::Continue
        }
    }

    /// Run the gate, applying threshold and failover policy
    async fn evaluate_gate(
        &self,
        subscription: &Subscription,
        gate: &GateConfig,
        event: &CanonicalEvent,
    ) -> (bool, String) {
        let event_value = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(_) => serde_json::Value::Null,
        };

        let started = Instant::now();
        let result = self
            .ctx
            .broker
            .evaluate_gate(gate.prompt.as_deref(), &subscription.description, &event_value)
            .await;
        self.ctx
            .metrics
            .gate_duration
            .observe(started.elapsed().as_secs_f64());

        let (passed, reason) = match result {
            Ok(decision) => {
                let passed = decision.decision && decision.confidence >= gate.threshold;
                let reason = if decision.decision && decision.confidence < gate.threshold {
                    format!(
                        "confidence {:.2} below threshold {:.2}",
                        decision.confidence, gate.threshold
                    )
                } else {
                    decision.reasoning
                };

                if gate.audit {
                    tracing::info!(
                        subscription_id = %subscription.id,
                        event_id = %event.id,
                        decision = passed,
                        confidence = decision.confidence,
                        reason = %reason,
                        "gate evaluated"
                    );
                }
                (passed, reason)
            }
            Err(e) => {
                let passed = gate.failover_policy == FailoverPolicy::FailOpen;
                let reason = if e.is_failover() {
                    format!("llm-unavailable:{}", gate.failover_policy.as_str())
                } else {
                    format!("gate-error:{}", e)
                };
                tracing::warn!(
                    subscription_id = %subscription.id,
                    event_id = %event.id,
                    error = %e,
                    decision = passed,
                    "gate failover applied"
                );
                (passed, reason)
            }
        };

        let label = if passed { "pass" } else { "block" };
        self.ctx
            .metrics
            .gate_decisions
            .with_label_values(&[label])
            .inc();

        (passed, reason)
    }
}

#[cfg(test)]
#[path = "worker_test.rs"]
mod worker_test;

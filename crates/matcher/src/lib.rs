//! LangHook - Subscription Matcher
//!
//! Binds one durable consumer per active subscription to the canonical
//! event stream and drives matched events through the optional LLM gate and
//! the subscription's channel.
//!
//! # Concurrency
//!
//! Each subscription runs its own worker task, so subscriptions process in
//! parallel; within one subscription messages are handled serially to
//! preserve broker order. Workers hold subscription ids only and look state
//! up in the registry store, which breaks the subscription-owns-consumer /
//! consumer-references-subscription cycle.
//!
//! # Delivery
//!
//! Webhook dispatches retry on 5xx, connect errors, 408 and 429 with
//! exponential backoff (1s, 4s, 16s). Exhausted retries are recorded as
//! `channel-delivery-failed` in the subscription event log; the event is
//! never re-processed just to retry delivery.

mod dispatch;
mod error;
mod registry;
mod worker;

use std::sync::Arc;

use langhook_llm::LlmBroker;
use langhook_metrics::PipelineMetrics;
use langhook_store::Store;
use langhook_stream::EventBus;

pub use dispatch::{DispatchConfig, DispatchOutcome, WebhookDispatcher};
pub use error::MatchError;
pub use registry::ConsumerRegistry;
pub use worker::SubscriptionWorker;

/// Shared dependencies for subscription workers
pub struct MatcherContext {
    pub bus: Arc<dyn EventBus>,
    pub store: Store,
    pub broker: Arc<LlmBroker>,
    pub metrics: Arc<PipelineMetrics>,
    pub dispatcher: WebhookDispatcher,
}

/// Result type for matcher operations
pub type Result<T> = std::result::Result<T, MatchError>;

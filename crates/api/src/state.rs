//! Application state
//!
//! Shared state for API handlers: store, bus, LLM broker, the consumer
//! registry and the health probes wired in by the control plane.

use std::sync::Arc;

use futures::future::BoxFuture;
use langhook_llm::LlmBroker;
use langhook_matcher::ConsumerRegistry;
use langhook_metrics::PipelineMetrics;
use langhook_store::Store;
use langhook_stream::EventBus;

/// A reachability probe for one external service
pub type Probe = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// Probes over the three external services
#[derive(Clone)]
pub struct HealthProbes {
    pub broker: Probe,
    pub store: Probe,
    pub cache: Probe,
}

impl HealthProbes {
    /// Probes that always succeed, for tests and embedded setups
    pub fn always_up() -> Self {
        let up: Probe = Arc::new(|| Box::pin(async { true }));
        Self {
            broker: Arc::clone(&up),
            store: Arc::clone(&up),
            cache: up,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub bus: Arc<dyn EventBus>,
    pub broker: Arc<LlmBroker>,
    pub registry: Arc<ConsumerRegistry>,
    pub metrics: Arc<PipelineMetrics>,
    pub probes: HealthProbes,
}

impl AppState {
    pub fn new(
        store: Store,
        bus: Arc<dyn EventBus>,
        broker: Arc<LlmBroker>,
        registry: Arc<ConsumerRegistry>,
        metrics: Arc<PipelineMetrics>,
        probes: HealthProbes,
    ) -> Self {
        Self {
            store,
            bus,
            broker,
            registry,
            metrics,
            probes,
        }
    }
}

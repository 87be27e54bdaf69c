//! Consumer registry
//!
//! Tracks the running worker task per subscription id. The registry is the
//! indirection between subscriptions and their broker consumers: workers
//! hold ids, the registry holds task handles, and bind/unbind/rebind keep
//! the two in step with the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use langhook_protocol::EVENTS_STREAM;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::worker::SubscriptionWorker;
use crate::MatcherContext;
use crate::Result;

struct Handle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Registry of running subscription consumers, keyed by subscription id
pub struct ConsumerRegistry {
    ctx: Arc<MatcherContext>,
    shutdown: CancellationToken,
    handles: Mutex<HashMap<String, Handle>>,
}

impl ConsumerRegistry {
    pub fn new(ctx: Arc<MatcherContext>, shutdown: CancellationToken) -> Self {
        Self {
            ctx,
            shutdown,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Start a worker for a subscription, replacing any previous one
    pub async fn bind(&self, subscription_id: &str) {
        self.stop_task(subscription_id).await;

        let cancel = self.shutdown.child_token();
        let worker = SubscriptionWorker::new(Arc::clone(&self.ctx), subscription_id);
        let id = subscription_id.to_string();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = worker.run(token).await {
                tracing::error!(subscription_id = %id, error = %e, "subscription worker failed");
            }
        });

        self.handles
            .lock()
            .unwrap()
            .insert(subscription_id.to_string(), Handle { cancel, task });
    }

    /// Stop the worker and delete the durable consumer
    pub async fn unbind(&self, subscription_id: &str) {
        self.stop_task(subscription_id).await;

        let durable = format!("sub-{}", subscription_id);
        if let Err(e) = self.ctx.bus.delete_consumer(EVENTS_STREAM, &durable).await {
            tracing::debug!(
                subscription_id = %subscription_id,
                error = %e,
                "consumer delete failed (may already be gone)"
            );
        }
    }

    /// Atomically swap the consumer after a pattern or state change
    pub async fn rebind(&self, subscription_id: &str) {
        self.unbind(subscription_id).await;
        self.bind(subscription_id).await;
    }

    /// Bind every active subscription, at startup
    pub async fn bind_active(&self) -> Result<usize> {
        let active = self.ctx.store.subscriptions().list_active().await?;
        let count = active.len();
        for subscription in active {
            self.bind(&subscription.id).await;
        }
        tracing::info!(count, "bound consumers for active subscriptions");
        Ok(count)
    }

    /// Cancel all workers and wait for them to settle
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<Handle> = {
            let mut map = self.handles.lock().unwrap();
            map.drain().map(|(_, handle)| handle).collect()
        };

        for handle in &handles {
            handle.cancel.cancel();
        }
        for handle in handles {
            let _ = tokio::time::timeout(grace, handle.task).await;
        }
    }

    async fn stop_task(&self, subscription_id: &str) {
        let handle = self.handles.lock().unwrap().remove(subscription_id);

        if let Some(handle) = handle {
            handle.cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), handle.task).await;
        }
    }
}

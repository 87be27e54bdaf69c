use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use langhook_config::GateBudgetSettings;
use langhook_llm::{Budget, ChatModel, ChatOutcome, LlmBroker, LlmError, SystemClock};
use langhook_metrics::PipelineMetrics;
use langhook_protocol::{CanonicalEvent, Resource, ResourceId, EVENTS_STREAM};
use langhook_store::{
    ChannelType, FailoverPolicy, GateConfig, GateFilter, Store, Subscription,
};
use langhook_stream::{EventBus, MemoryBus, StreamSpec};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dispatch::{DispatchConfig, WebhookDispatcher};
use crate::registry::ConsumerRegistry;
use crate::MatcherContext;

// =============================================================================
// Test fixtures
// =============================================================================

struct StaticChat(String);

#[async_trait]
impl ChatModel for StaticChat {
    async fn chat(&self, _system: &str, _user: &str) -> langhook_llm::Result<ChatOutcome> {
        Ok(ChatOutcome {
            content: self.0.clone(),
            prompt_tokens: 10,
            completion_tokens: 10,
        })
    }

    fn model(&self) -> &str {
        "gpt-4o-mini"
    }
}

struct FailingChat;

#[async_trait]
impl ChatModel for FailingChat {
    async fn chat(&self, _system: &str, _user: &str) -> langhook_llm::Result<ChatOutcome> {
        Err(LlmError::Unavailable("connection refused".into()))
    }

    fn model(&self) -> &str {
        "gpt-4o-mini"
    }
}

fn broker(chat: Option<Arc<dyn ChatModel>>) -> Arc<LlmBroker> {
    Arc::new(LlmBroker::new(
        chat,
        Arc::new(Budget::new(
            &GateBudgetSettings {
                daily_cost_limit_usd: 10.0,
                cost_alert_threshold: 0.8,
            },
            Arc::new(SystemClock),
        )),
        Arc::new(PipelineMetrics::new().unwrap()),
    ))
}

async fn context(chat: Option<Arc<dyn ChatModel>>) -> (Arc<MatcherContext>, Arc<MemoryBus>, Store)
{
    let bus = Arc::new(MemoryBus::new());
    bus.ensure_stream(StreamSpec::new(EVENTS_STREAM, ["langhook.events.>"]))
        .await
        .unwrap();

    let store = Store::in_memory().await.unwrap();
    let ctx = Arc::new(MatcherContext {
        bus: Arc::clone(&bus) as Arc<dyn EventBus>,
        store: store.clone(),
        broker: broker(chat),
        metrics: Arc::new(PipelineMetrics::new().unwrap()),
        dispatcher: WebhookDispatcher::new(DispatchConfig::immediate()),
    });

    (ctx, bus, store)
}

/// Spawn a capture endpoint answering with a fixed status
async fn capture_server(status: StatusCode) -> (String, Arc<Mutex<Vec<Value>>>) {
    let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));

    let app = Router::new()
        .route(
            "/hook",
            post(
                move |State(state): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
                    state.lock().unwrap().push(body);
                    status
                },
            ),
        )
        .with_state(Arc::clone(&received));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/hook", addr), received)
}

fn pr_event(id: Uuid) -> CanonicalEvent {
    CanonicalEvent {
        id,
        timestamp: Utc::now(),
        publisher: "github".into(),
        resource: Resource {
            resource_type: "pull_request".into(),
            id: ResourceId::Number(1374),
        },
        action: "update".into(),
        summary: None,
        payload: json!({"action": "edited"}),
    }
}

async fn publish_event(bus: &MemoryBus, event: &CanonicalEvent) {
    bus.publish(
        "langhook.events.github.pull_request.1374.update",
        serde_json::to_vec(event).unwrap().into(),
        None,
    )
    .await
    .unwrap();
}

/// Poll until the condition holds or the deadline passes
async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

/// Pre-register the durable so events published while the worker is still
/// binding are retained
fn register_durable(bus: &MemoryBus, sub: &Subscription) {
    bus.register_consumer(EVENTS_STREAM, &sub.pattern, &sub.durable_name())
        .unwrap();
}

fn webhook_subscription(url: &str, gate: Option<GateConfig>) -> Subscription {
    let mut sub = Subscription::new(
        "alice",
        "Notify me when PR 1374 is approved",
        "langhook.events.github.pull_request.1374.update",
    );
    sub.channel_type = ChannelType::Webhook;
    sub.channel_config = Some(json!({"url": url}));
    sub.gate = gate;
    sub
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_gated_event_dispatches_webhook() {
    let chat = StaticChat(
        r#"{"decision": true, "confidence": 0.95, "reasoning": "approval detected"}"#.to_string(),
    );
    let (ctx, bus, store) = context(Some(Arc::new(chat))).await;
    let (url, received) = capture_server(StatusCode::OK).await;

    let sub = webhook_subscription(&url, Some(GateConfig::default()));
    store.subscriptions().create(&sub).await.unwrap();

    register_durable(&bus, &sub);
    let registry = ConsumerRegistry::new(Arc::clone(&ctx), CancellationToken::new());
    registry.bind(&sub.id).await;

    let event = pr_event(Uuid::new_v4());
    publish_event(&bus, &event).await;

    wait_for(|| {
        let received = Arc::clone(&received);
        async move { !received.lock().unwrap().is_empty() }
    })
    .await;

    let delivered = received.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["id"], json!(event.id.to_string()));
    assert_eq!(delivered[0]["resource"]["id"], json!(1374));
    drop(delivered);

    let logs = store
        .subscription_event_logs()
        .list(&sub.id, 1, 10, GateFilter::All)
        .await
        .unwrap();
    assert_eq!(logs.total, 1);
    let row = &logs.items[0];
    assert_eq!(row.gate_passed, Some(true));
    assert!(row.webhook_sent);
    assert_eq!(row.webhook_response_status, Some(200));

    registry.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_low_confidence_blocks_dispatch() {
    let chat = StaticChat(
        r#"{"decision": true, "confidence": 0.4, "reasoning": "weak match"}"#.to_string(),
    );
    let (ctx, bus, store) = context(Some(Arc::new(chat))).await;
    let (url, received) = capture_server(StatusCode::OK).await;

    let sub = webhook_subscription(&url, Some(GateConfig::default()));
    store.subscriptions().create(&sub).await.unwrap();

    register_durable(&bus, &sub);
    let registry = ConsumerRegistry::new(Arc::clone(&ctx), CancellationToken::new());
    registry.bind(&sub.id).await;
    publish_event(&bus, &pr_event(Uuid::new_v4())).await;

    wait_for(|| {
        let store = store.clone();
        let id = sub.id.clone();
        async move {
            store
                .subscription_event_logs()
                .list(&id, 1, 10, GateFilter::All)
                .await
                .unwrap()
                .total
                == 1
        }
    })
    .await;

    let logs = store
        .subscription_event_logs()
        .list(&sub.id, 1, 10, GateFilter::Blocked)
        .await
        .unwrap();
    assert_eq!(logs.total, 1);
    assert_eq!(logs.items[0].gate_passed, Some(false));
    assert!(logs.items[0]
        .gate_reason
        .as_deref()
        .unwrap()
        .contains("below threshold"));
    assert!(!logs.items[0].webhook_sent);
    assert!(received.lock().unwrap().is_empty());

    registry.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_failover_policies_are_deterministic() {
    for (policy, expect_pass) in [
        (FailoverPolicy::FailOpen, true),
        (FailoverPolicy::FailClosed, false),
    ] {
        let (ctx, bus, store) = context(Some(Arc::new(FailingChat))).await;
        let (url, received) = capture_server(StatusCode::OK).await;

        let gate = GateConfig {
            failover_policy: policy,
            ..Default::default()
        };
        let sub = webhook_subscription(&url, Some(gate));
        store.subscriptions().create(&sub).await.unwrap();

        register_durable(&bus, &sub);
        let registry = ConsumerRegistry::new(Arc::clone(&ctx), CancellationToken::new());
        registry.bind(&sub.id).await;
        publish_event(&bus, &pr_event(Uuid::new_v4())).await;

        wait_for(|| {
            let store = store.clone();
            let id = sub.id.clone();
            async move {
                store
                    .subscription_event_logs()
                    .list(&id, 1, 10, GateFilter::All)
                    .await
                    .unwrap()
                    .total
                    == 1
            }
        })
        .await;

        let logs = store
            .subscription_event_logs()
            .list(&sub.id, 1, 10, GateFilter::All)
            .await
            .unwrap();
        let row = &logs.items[0];
        assert_eq!(row.gate_passed, Some(expect_pass));
        assert_eq!(
            row.gate_reason.as_deref().unwrap(),
            format!("llm-unavailable:{}", policy.as_str())
        );
        assert_eq!(row.webhook_sent, expect_pass);
        assert_eq!(received.lock().unwrap().len(), usize::from(expect_pass));

        registry.shutdown(Duration::from_secs(1)).await;
    }
}

#[tokio::test]
async fn test_disposable_dispatches_exactly_once() {
    let (ctx, bus, store) = context(None).await;
    let (url, received) = capture_server(StatusCode::OK).await;

    let mut sub = webhook_subscription(&url, None);
    sub.disposable = true;
    store.subscriptions().create(&sub).await.unwrap();

    register_durable(&bus, &sub);
    let registry = ConsumerRegistry::new(Arc::clone(&ctx), CancellationToken::new());
    registry.bind(&sub.id).await;

    publish_event(&bus, &pr_event(Uuid::new_v4())).await;
    publish_event(&bus, &pr_event(Uuid::new_v4())).await;

    wait_for(|| {
        let store = store.clone();
        let id = sub.id.clone();
        async move {
            store
                .subscriptions()
                .get(&id)
                .await
                .unwrap()
                .map(|s| s.used)
                .unwrap_or(false)
        }
    })
    .await;

    let fetched = store.subscriptions().get(&sub.id).await.unwrap().unwrap();
    assert!(fetched.used);
    assert!(!fetched.active);

    // exactly one dispatch; the second event produced no observation
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(received.lock().unwrap().len(), 1);
    let logs = store
        .subscription_event_logs()
        .list(&sub.id, 1, 10, GateFilter::All)
        .await
        .unwrap();
    assert_eq!(logs.total, 1);

    registry.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_polling_channel_only_logs() {
    let (ctx, bus, store) = context(None).await;

    let sub = Subscription::new(
        "alice",
        "any PR update",
        "langhook.events.github.pull_request.1374.update",
    );
    store.subscriptions().create(&sub).await.unwrap();

    register_durable(&bus, &sub);
    let registry = ConsumerRegistry::new(Arc::clone(&ctx), CancellationToken::new());
    registry.bind(&sub.id).await;
    publish_event(&bus, &pr_event(Uuid::new_v4())).await;

    wait_for(|| {
        let store = store.clone();
        let id = sub.id.clone();
        async move {
            store
                .subscription_event_logs()
                .list(&id, 1, 10, GateFilter::All)
                .await
                .unwrap()
                .total
                == 1
        }
    })
    .await;

    let logs = store
        .subscription_event_logs()
        .list(&sub.id, 1, 10, GateFilter::Allowed)
        .await
        .unwrap();
    assert_eq!(logs.total, 1);
    // polling channel: observation recorded, nothing pushed
    assert!(!logs.items[0].webhook_sent);
    assert_eq!(logs.items[0].gate_passed, None);

    registry.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_dispatch_retries_transient_failures() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    let app = Router::new().route(
        "/flaky",
        post(move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    StatusCode::BAD_GATEWAY
                } else {
                    StatusCode::OK
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let dispatcher = WebhookDispatcher::new(DispatchConfig::immediate());
    let outcome = dispatcher
        .dispatch(&format!("http://{}/flaky", addr), &pr_event(Uuid::new_v4()))
        .await;

    assert!(outcome.sent);
    assert_eq!(outcome.status, Some(200));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_dispatch_does_not_retry_client_errors() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    let app = Router::new().route(
        "/gone",
        post(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                StatusCode::NOT_FOUND
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let dispatcher = WebhookDispatcher::new(DispatchConfig::immediate());
    let outcome = dispatcher
        .dispatch(&format!("http://{}/gone", addr), &pr_event(Uuid::new_v4()))
        .await;

    assert!(!outcome.sent);
    assert_eq!(outcome.status, Some(404));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exhausted_retries_record_failure() {
    let (ctx, bus, store) = context(None).await;

    // closed port: connect errors on every attempt
    let sub = webhook_subscription("http://127.0.0.1:1/hook", None);
    store.subscriptions().create(&sub).await.unwrap();

    register_durable(&bus, &sub);
    let registry = ConsumerRegistry::new(Arc::clone(&ctx), CancellationToken::new());
    registry.bind(&sub.id).await;
    publish_event(&bus, &pr_event(Uuid::new_v4())).await;

    wait_for(|| {
        let store = store.clone();
        let id = sub.id.clone();
        async move {
            store
                .subscription_event_logs()
                .list(&id, 1, 10, GateFilter::All)
                .await
                .unwrap()
                .total
                == 1
        }
    })
    .await;

    let logs = store
        .subscription_event_logs()
        .list(&sub.id, 1, 10, GateFilter::All)
        .await
        .unwrap();
    assert!(!logs.items[0].webhook_sent);
    assert_eq!(logs.items[0].webhook_response_status, None);

    registry.shutdown(Duration::from_secs(1)).await;
}

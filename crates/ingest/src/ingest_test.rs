use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::StreamExt;
use hmac::{Hmac, Mac};
use langhook_config::RateLimitSpec;
use langhook_metrics::PipelineMetrics;
use langhook_protocol::{DlqMessage, RawEvent, DLQ_STREAM, RAW_STREAM};
use langhook_stream::{EventBus, MemoryBus, StreamSpec};
use serde_json::Value;
use sha2::Sha256;
use tower::ServiceExt;

use super::{router, IngestState};
use crate::ratelimit::{MemoryRateStore, RateLimiter};
use crate::signature::SignatureVerifier;

const GITHUB_BODY: &str = r#"{"action":"opened","pull_request":{"number":1374,"user":{"login":"alice"}},"repository":{"name":"r","id":1}}"#;

async fn memory_bus() -> Arc<MemoryBus> {
    let bus = Arc::new(MemoryBus::new());
    bus.ensure_stream(StreamSpec::new(RAW_STREAM, ["raw.>"]))
        .await
        .unwrap();
    bus.ensure_stream(StreamSpec::new(DLQ_STREAM, ["dlq.>"]))
        .await
        .unwrap();
    bus
}

fn state(
    bus: Arc<MemoryBus>,
    secrets: &[(&str, &str)],
    limit: u32,
    max_body: usize,
) -> Arc<IngestState> {
    let secrets: BTreeMap<String, String> = secrets
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Arc::new(IngestState::new(
        bus,
        RateLimiter::new(
            Arc::new(MemoryRateStore::new()),
            RateLimitSpec {
                limit,
                window: Duration::from_secs(60),
            },
        ),
        SignatureVerifier::new(secrets),
        max_body,
        Arc::new(PipelineMetrics::new().unwrap()),
    ))
}

fn post(uri: &str, body: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn sign_github(secret: &str, body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[tokio::test]
async fn test_accepts_and_publishes_raw_event() {
    let bus = memory_bus().await;
    let mut raw = bus.subscribe(RAW_STREAM, "raw.*", "observer").await.unwrap();

    let app = router(state(Arc::clone(&bus), &[], 100, 1024 * 1024));
    let response = app
        .oneshot(post(
            "/ingest/github",
            GITHUB_BODY,
            &[("x-github-event", "pull_request")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(response.headers().contains_key("x-request-id"));
    let body = body_json(response).await;
    let request_id = body["request_id"].as_str().unwrap().to_string();

    let message = tokio::time::timeout(Duration::from_secs(2), raw.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.subject, "raw.github");

    let event: RawEvent = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(event.id.to_string(), request_id);
    assert_eq!(event.source, "github");
    // no secret configured: marked valid
    assert!(event.signature_valid);
    assert_eq!(
        event.headers.get("x-github-event").map(String::as_str),
        Some("pull_request")
    );
    assert_eq!(event.payload["action"], "opened");
    message.ack().await.unwrap();
}

#[tokio::test]
async fn test_invalid_json_goes_to_dlq() {
    let bus = memory_bus().await;
    let mut raw = bus.subscribe(RAW_STREAM, "raw.*", "raw-obs").await.unwrap();
    let mut dlq = bus
        .subscribe(DLQ_STREAM, "dlq.ingest.*", "dlq-obs")
        .await
        .unwrap();

    let app = router(state(Arc::clone(&bus), &[], 100, 1024 * 1024));
    let response = app
        .oneshot(post("/ingest/github", "not json", &[]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid-json");

    let message = tokio::time::timeout(Duration::from_secs(2), dlq.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.subject, "dlq.ingest.github");
    let dead: DlqMessage = serde_json::from_slice(&message.payload).unwrap();
    assert!(dead.error.contains("invalid-json"));
    assert_eq!(dead.payload, Value::String("not json".into()));
    message.ack().await.unwrap();

    // nothing published on the raw stream
    assert!(
        tokio::time::timeout(Duration::from_millis(100), raw.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_signature_mismatch_is_unauthorized() {
    let bus = memory_bus().await;
    let mut raw = bus.subscribe(RAW_STREAM, "raw.*", "observer").await.unwrap();

    let app = router(state(Arc::clone(&bus), &[("github", "s")], 100, 1024 * 1024));
    let response = app
        .oneshot(post(
            "/ingest/github",
            GITHUB_BODY,
            &[("x-hub-signature-256", "sha256=0000")],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid-signature");
    // the reason is not leaked
    assert_eq!(body["message"], "invalid signature");

    assert!(
        tokio::time::timeout(Duration::from_millis(100), raw.next())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_valid_signature_accepted() {
    let bus = memory_bus().await;
    let mut raw = bus.subscribe(RAW_STREAM, "raw.*", "observer").await.unwrap();

    let app = router(state(Arc::clone(&bus), &[("github", "s")], 100, 1024 * 1024));
    let signature = sign_github("s", GITHUB_BODY);
    let response = app
        .oneshot(post(
            "/ingest/github",
            GITHUB_BODY,
            &[("x-hub-signature-256", signature.as_str())],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let message = tokio::time::timeout(Duration::from_secs(2), raw.next())
        .await
        .unwrap()
        .unwrap();
    let event: RawEvent = serde_json::from_slice(&message.payload).unwrap();
    assert!(event.signature_valid);
    message.ack().await.unwrap();
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let bus = memory_bus().await;
    let app = router(state(bus, &[], 100, 64));

    let big = format!(r#"{{"data":"{}"}}"#, "x".repeat(256));
    let response = app.oneshot(post("/ingest/github", &big, &[])).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["error"], "body-too-large");
}

#[tokio::test]
async fn test_rate_limit_returns_retry_after() {
    let bus = memory_bus().await;
    let app = router(state(bus, &[], 1, 1024 * 1024));

    let first = app
        .clone()
        .oneshot(post(
            "/ingest/github",
            "{}",
            &[("x-forwarded-for", "198.51.100.7")],
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = app
        .clone()
        .oneshot(post(
            "/ingest/github",
            "{}",
            &[("x-forwarded-for", "198.51.100.7")],
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));

    // a different client is unaffected
    let other = app
        .oneshot(post(
            "/ingest/github",
            "{}",
            &[("x-forwarded-for", "198.51.100.8")],
        ))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_broker_outage_returns_503() {
    // a bus with no raw stream rejects publishes
    let bus = Arc::new(MemoryBus::new());
    let app = router(state(bus, &[], 100, 1024 * 1024));

    let response = app
        .oneshot(post("/ingest/github", "{}", &[]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"], "broker-unavailable");
}

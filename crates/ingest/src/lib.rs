//! LangHook - Ingest Gateway
//!
//! HTTP front end of the pipeline: `POST /ingest/{source}` accepts an
//! arbitrary JSON webhook, authenticates it, and enqueues it as a
//! [`RawEvent`] on `raw.{source}`.
//!
//! # Request handling
//!
//! 1. Body size cap (413)
//! 2. Per-source-IP sliding-window rate limit (429 with `Retry-After`)
//! 3. JSON parse; failures are published to `dlq.ingest.{source}` (400)
//! 4. Per-publisher HMAC verification (401, no detail leaked)
//! 5. Publish to the broker; failures return 503 - nothing is buffered in
//!    memory beyond the request
//! 6. 202 with `{request_id}`
//!
//! # Example
//!
//! ```ignore
//! use langhook_ingest::{IngestState, router};
//!
//! let state = Arc::new(IngestState::new(bus, limiter, verifier, 1024 * 1024, metrics));
//! let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
//! axum::serve(listener, app).await?;
//! ```

pub mod ratelimit;
pub mod signature;

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use langhook_metrics::PipelineMetrics;
use langhook_protocol::{dlq_ingest_subject, raw_subject, DlqMessage, RawEvent};
use langhook_stream::EventBus;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

pub use ratelimit::{
    MemoryRateStore, RateDecision, RateLimiter, RateStore, RateStoreError, RedisRateStore,
};
pub use signature::{SignatureVerifier, Verification};

/// Shared state for the ingest handler
pub struct IngestState {
    pub bus: Arc<dyn EventBus>,
    pub limiter: RateLimiter,
    pub verifier: SignatureVerifier,
    pub max_body_bytes: usize,
    pub metrics: Arc<PipelineMetrics>,
}

impl IngestState {
    pub fn new(
        bus: Arc<dyn EventBus>,
        limiter: RateLimiter,
        verifier: SignatureVerifier,
        max_body_bytes: usize,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            bus,
            limiter,
            verifier,
            max_body_bytes,
            metrics,
        }
    }
}

/// Build the ingest router
pub fn router(state: Arc<IngestState>) -> Router {
    Router::new()
        .route("/ingest/{source}", post(ingest_webhook))
        .with_state(state)
}

/// 202 response body
#[derive(Debug, Serialize)]
struct IngestAccepted {
    message: &'static str,
    request_id: String,
}

/// POST /ingest/{source}
async fn ingest_webhook(
    State(state): State<Arc<IngestState>>,
    Path(source): Path<String>,
    request: Request,
) -> Response {
    let headers = request.headers().clone();
    let ip = extract_client_ip(&request);
    let request_id = Uuid::new_v4();

    let record = |outcome: &str| {
        state
            .metrics
            .events_ingested
            .with_label_values(&[source.as_str(), outcome])
            .inc();
    };

    // 1. body size cap
    let body = match axum::body::to_bytes(request.into_body(), state.max_body_bytes).await {
        Ok(body) => body,
        Err(_) => {
            record("too_large");
            tracing::warn!(source = %source, request_id = %request_id, "request body too large");
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "body-too-large",
                "request body exceeds the configured maximum",
            );
        }
    };

    // 2. per-IP rate limit
    let decision = state.limiter.check(ip).await;
    if !decision.allowed {
        record("rate_limited");
        tracing::warn!(source = %source, ip = %ip, request_id = %request_id, "rate limited");
        return rate_limited_response(decision);
    }

    let header_map = lowercase_headers(&headers);

    // 3. JSON parse; originals of unparseable bodies go to the DLQ
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(parse_err) => {
            record("invalid_json");
            tracing::warn!(
                source = %source,
                request_id = %request_id,
                error = %parse_err,
                "invalid JSON payload"
            );
            dead_letter_invalid_json(&state, &source, request_id, &body, &header_map, &parse_err)
                .await;
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid-json",
                "request body is not valid JSON",
            );
        }
    };

    // 4. signature verification
    let verification = state.verifier.verify(&source, &body, &header_map);
    if state.verifier.has_secret(&source) && !verification.valid {
        record("unauthorized");
        tracing::warn!(
            source = %source,
            request_id = %request_id,
            reason = verification.reason,
            "signature verification failed"
        );
        // the reason stays in the logs; the response leaks nothing
        return error_response(
            StatusCode::UNAUTHORIZED,
            "invalid-signature",
            "invalid signature",
        );
    }

    // 5. enqueue the raw event
    let event = RawEvent {
        id: request_id,
        received_at: Utc::now(),
        source: source.clone(),
        headers: header_map,
        signature_valid: verification.valid,
        payload,
    };

    let bytes = match serde_json::to_vec(&event) {
        Ok(bytes) => bytes,
        Err(e) => {
            record("error");
            tracing::error!(request_id = %request_id, error = %e, "raw event serialization failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "internal server error",
            );
        }
    };

    if let Err(e) = state
        .bus
        .publish(&raw_subject(&source), Bytes::from(bytes), None)
        .await
    {
        record("unavailable");
        tracing::error!(
            source = %source,
            request_id = %request_id,
            error = %e,
            "broker publish failed"
        );
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "broker-unavailable",
            "event broker unavailable",
        );
    }

    record("accepted");
    tracing::info!(
        source = %source,
        request_id = %request_id,
        signature_valid = event.signature_valid,
        "event ingested"
    );

    let mut response = (
        StatusCode::ACCEPTED,
        Json(IngestAccepted {
            message: "event accepted",
            request_id: request_id.to_string(),
        }),
    )
        .into_response();
    if let Ok(value) = request_id.to_string().parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

async fn dead_letter_invalid_json(
    state: &IngestState,
    source: &str,
    request_id: Uuid,
    body: &[u8],
    headers: &BTreeMap<String, String>,
    parse_err: &serde_json::Error,
) {
    let message = DlqMessage {
        id: request_id,
        timestamp: Utc::now(),
        source: source.to_string(),
        error: format!("invalid-json: {}", parse_err),
        headers: Some(headers.clone()),
        payload: Value::String(String::from_utf8_lossy(body).into_owned()),
    };

    match serde_json::to_vec(&message) {
        Ok(bytes) => {
            if let Err(e) = state
                .bus
                .publish(&dlq_ingest_subject(source), Bytes::from(bytes), None)
                .await
            {
                tracing::warn!(request_id = %request_id, error = %e, "dlq publish failed");
            }
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "dlq serialization failed");
        }
    }
}

/// Extract the client IP, honoring reverse-proxy headers
fn extract_client_ip(request: &Request) -> IpAddr {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse() {
                    return ip;
                }
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse() {
                return ip;
            }
        }
    }

    if let Some(connect_info) = request
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
    {
        return connect_info.0.ip();
    }

    IpAddr::from([127, 0, 0, 1])
}

fn lowercase_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

fn error_response(status: StatusCode, code: &'static str, message: &str) -> Response {
    let body = serde_json::json!({
        "error": code,
        "message": message,
    });
    (status, Json(body)).into_response()
}

fn rate_limited_response(decision: RateDecision) -> Response {
    let retry_secs = decision
        .retry_after
        .map(|d| d.as_secs().max(1))
        .unwrap_or(60);

    let body = serde_json::json!({
        "error": "rate-limited",
        "message": "too many requests",
        "retry_after": retry_secs,
    });

    Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header("content-type", "application/json")
        .header("retry-after", retry_secs.to_string())
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| StatusCode::TOO_MANY_REQUESTS.into_response())
}

#[cfg(test)]
#[path = "ingest_test.rs"]
mod ingest_test;

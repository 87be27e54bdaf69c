//! Operations routes
//!
//! Health and metrics. Neither requires authentication.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Operations routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    services: ServiceStatuses,
}

#[derive(Debug, Serialize)]
struct ServiceStatuses {
    broker: &'static str,
    store: &'static str,
    cache: &'static str,
}

fn up_or_down(up: bool) -> &'static str {
    if up {
        "up"
    } else {
        "down"
    }
}

/// GET /health
///
/// Probes broker, store and cache on demand. A cache outage degrades (rate
/// limiting fails open); a broker or store outage is down.
async fn health(State(state): State<AppState>) -> Response {
    let broker = (state.probes.broker)().await;
    let store = (state.probes.store)().await;
    let cache = (state.probes.cache)().await;

    let status = if broker && store && cache {
        "up"
    } else if broker && store {
        "degraded"
    } else {
        "down"
    };

    let code = if status == "down" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(HealthResponse {
            status,
            services: ServiceStatuses {
                broker: up_or_down(broker),
                store: up_or_down(store),
                cache: up_or_down(cache),
            },
        }),
    )
        .into_response()
}

/// GET /metrics
///
/// Prometheus text exposition.
async fn metrics(State(state): State<AppState>) -> Response {
    // surface the live budget gauge even between model calls
    state
        .metrics
        .llm_cost_today
        .set(state.broker.budget().spent_today_usd());

    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "metrics rendering failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

//! LangHook - Operator API
//!
//! The HTTP surface operators and subscribers talk to:
//!
//! - `POST|GET|PATCH|DELETE /subscriptions[/{id}]` - natural-language
//!   subscriptions with LLM-synthesized subject filters
//! - `GET /subscriptions/{id}/events` - per-subscription delivery log
//! - `GET /schema`, `DELETE /schema/publishers/...` - the auto-discovered
//!   schema registry
//! - `GET /event-logs` - canonical event log
//! - `GET /health`, `GET /metrics` - operations
//!
//! Subscriber identity is taken from the `x-subscriber-id` header; requests
//! without one share the `default` subscriber.

pub mod error;
pub mod routes;
pub mod state;

use axum::Router;

pub use error::{ApiError, ErrorResponse, Result};
pub use state::{AppState, HealthProbes, Probe};

/// Build the full API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::subscriptions::routes())
        .merge(routes::schema::routes())
        .merge(routes::event_logs::routes())
        .merge(routes::ops::routes())
        .with_state(state)
}

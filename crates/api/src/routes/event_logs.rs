//! Canonical event log routes
//!
//! Offset/size pagination, newest first, optional resource-type filter.
//! Retention of rows is an operator concern; nothing here deletes.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use langhook_store::{EventLogRow, Page};

use crate::error::Result;
use crate::state::AppState;

/// Event log routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/event-logs", get(list))
}

#[derive(Debug, Deserialize)]
struct EventLogParams {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_size")]
    size: u32,
    /// Comma-separated resource types
    #[serde(default)]
    resource_types: Option<String>,
}

fn default_page() -> u32 {
    1
}

fn default_size() -> u32 {
    50
}

/// GET /event-logs
async fn list(
    State(state): State<AppState>,
    Query(params): Query<EventLogParams>,
) -> Result<Json<Page<EventLogRow>>> {
    let resource_types: Vec<String> = params
        .resource_types
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let page = state
        .store
        .event_logs()
        .list(params.page, params.size, &resource_types)
        .await?;

    Ok(Json(page))
}

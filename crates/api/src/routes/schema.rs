//! Schema registry routes
//!
//! Read and hierarchical delete over the auto-discovered registry. Deletes
//! cascade over the registry only; stored events are untouched.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use langhook_protocol::SchemaSummary;

use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Schema routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/schema", get(summary))
        .route("/schema/publishers/{publisher}", delete(delete_publisher))
        .route(
            "/schema/publishers/{publisher}/resource-types/{resource_type}",
            delete(delete_resource_type),
        )
        .route(
            "/schema/publishers/{publisher}/resource-types/{resource_type}/actions/{action}",
            delete(delete_action),
        )
}

/// GET /schema
async fn summary(State(state): State<AppState>) -> Result<Json<SchemaSummary>> {
    Ok(Json(state.store.schema().summary().await?))
}

/// DELETE /schema/publishers/{publisher}
async fn delete_publisher(
    State(state): State<AppState>,
    Path(publisher): Path<String>,
) -> Result<StatusCode> {
    let deleted = state.store.schema().delete_publisher(&publisher).await?;
    if deleted == 0 {
        return Err(ApiError::not_found("publisher", &publisher));
    }
    tracing::info!(publisher = %publisher, deleted, "schema publisher removed");
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /schema/publishers/{publisher}/resource-types/{resource_type}
async fn delete_resource_type(
    State(state): State<AppState>,
    Path((publisher, resource_type)): Path<(String, String)>,
) -> Result<StatusCode> {
    let deleted = state
        .store
        .schema()
        .delete_resource_type(&publisher, &resource_type)
        .await?;
    if deleted == 0 {
        return Err(ApiError::not_found("resource type", &resource_type));
    }
    tracing::info!(
        publisher = %publisher,
        resource_type = %resource_type,
        deleted,
        "schema resource type removed"
    );
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /schema/publishers/{p}/resource-types/{t}/actions/{a}
async fn delete_action(
    State(state): State<AppState>,
    Path((publisher, resource_type, action)): Path<(String, String, String)>,
) -> Result<StatusCode> {
    let deleted = state
        .store
        .schema()
        .delete_action(&publisher, &resource_type, &action)
        .await?;
    if deleted == 0 {
        return Err(ApiError::not_found("action", &action));
    }
    tracing::info!(
        publisher = %publisher,
        resource_type = %resource_type,
        action = %action,
        "schema action removed"
    );
    Ok(StatusCode::NO_CONTENT)
}

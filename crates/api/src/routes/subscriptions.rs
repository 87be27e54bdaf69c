//! Subscription routes
//!
//! Creation synthesizes the broker subject filter from the natural-language
//! description against the current schema registry; every non-wildcard
//! token must be a known schema token. Updates that change the pattern
//! rebind the consumer atomically.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use langhook_store::{
    ChannelType, GateConfig, GateFilter, Page, Subscription, SubscriptionEventLogRow,
    SubscriptionUpdate,
};

use crate::error::{ApiError, Result};
use crate::routes::{subscriber_id, PageParams};
use crate::state::AppState;

/// Subscription routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/subscriptions", post(create).get(list))
        .route(
            "/subscriptions/{id}",
            get(get_one).patch(update).delete(delete),
        )
        .route("/subscriptions/{id}/events", get(events))
}

// =============================================================================
// Request / response shapes
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreateRequest {
    description: String,
    #[serde(default)]
    channel_type: Option<ChannelType>,
    #[serde(default)]
    channel_config: Option<Value>,
    #[serde(default)]
    gate: Option<GateConfig>,
    #[serde(default)]
    disposable: bool,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateRequest {
    description: Option<String>,
    channel_type: Option<ChannelType>,
    #[serde(default, deserialize_with = "double_option")]
    channel_config: Option<Option<Value>>,
    #[serde(default, deserialize_with = "double_option")]
    gate: Option<Option<GateConfig>>,
    disposable: Option<bool>,
    active: Option<bool>,
}

/// Distinguish an absent field from an explicit `null`
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize)]
struct ListResponse {
    subscriptions: Vec<Subscription>,
    total: u64,
    page: u32,
    size: u32,
}

#[derive(Debug, Deserialize)]
struct EventsParams {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_size")]
    size: u32,
    #[serde(default)]
    gate: Option<String>,
}

fn default_page() -> u32 {
    1
}

fn default_size() -> u32 {
    50
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /subscriptions
async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRequest>,
) -> Result<(StatusCode, Json<Subscription>)> {
    if request.description.trim().is_empty() {
        return Err(ApiError::validation("description", "must not be empty"));
    }

    let channel_type = request.channel_type.unwrap_or(ChannelType::None);
    validate_channel(channel_type, request.channel_config.as_ref())?;

    let schema = state.store.schema().summary().await?;
    let pattern = state
        .broker
        .synthesize_pattern(&request.description, &schema)
        .await?;

    let subscriber = subscriber_id(&headers);
    let mut subscription = Subscription::new(subscriber, request.description, pattern);
    subscription.channel_type = channel_type;
    subscription.channel_config = request.channel_config;
    subscription.gate = request.gate;
    subscription.disposable = request.disposable;

    state.store.subscriptions().create(&subscription).await?;
    state.registry.bind(&subscription.id).await;

    tracing::info!(
        subscription_id = %subscription.id,
        subscriber_id = %subscription.subscriber_id,
        pattern = %subscription.pattern,
        "subscription created"
    );

    Ok((StatusCode::CREATED, Json(subscription)))
}

/// GET /subscriptions
async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Result<Json<ListResponse>> {
    let subscriber = subscriber_id(&headers);
    let (subscriptions, total) = state
        .store
        .subscriptions()
        .list(&subscriber, params.page, params.size)
        .await?;

    Ok(Json(ListResponse {
        subscriptions,
        total,
        page: params.page.max(1),
        size: params.size.clamp(1, 200),
    }))
}

/// GET /subscriptions/{id}
async fn get_one(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Subscription>> {
    let subscriber = subscriber_id(&headers);
    let subscription = state
        .store
        .subscriptions()
        .get_for_subscriber(&id, &subscriber)
        .await?
        .ok_or_else(|| ApiError::not_found("subscription", &id))?;

    Ok(Json(subscription))
}

/// PATCH /subscriptions/{id}
async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<UpdateRequest>,
) -> Result<Json<Subscription>> {
    let subscriber = subscriber_id(&headers);
    let existing = state
        .store
        .subscriptions()
        .get_for_subscriber(&id, &subscriber)
        .await?
        .ok_or_else(|| ApiError::not_found("subscription", &id))?;

    let channel_type = request.channel_type.unwrap_or(existing.channel_type);
    let channel_config = match &request.channel_config {
        Some(config) => config.as_ref(),
        None => existing.channel_config.as_ref(),
    };
    validate_channel(channel_type, channel_config)?;

    // a changed description re-derives the pattern against the current schema
    let mut pattern = None;
    if let Some(description) = &request.description {
        let schema = state.store.schema().summary().await?;
        pattern = Some(state.broker.synthesize_pattern(description, &schema).await?);
    }

    let update = SubscriptionUpdate {
        description: request.description,
        pattern: pattern.clone(),
        channel_type: request.channel_type,
        channel_config: request.channel_config,
        gate: request.gate,
        disposable: request.disposable,
        active: request.active,
    };

    let updated = state
        .store
        .subscriptions()
        .update(&id, &update)
        .await?
        .ok_or_else(|| ApiError::not_found("subscription", &id))?;

    // keep the broker consumer in step with the stored state
    let pattern_changed = pattern.is_some() && updated.pattern != existing.pattern;
    let activation_changed = updated.active != existing.active;
    if activation_changed && !updated.active {
        state.registry.unbind(&id).await;
    } else if pattern_changed || (activation_changed && updated.active) {
        state.registry.rebind(&id).await;
    }

    tracing::info!(subscription_id = %id, "subscription updated");
    Ok(Json(updated))
}

/// DELETE /subscriptions/{id}
async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let subscriber = subscriber_id(&headers);
    let existing = state
        .store
        .subscriptions()
        .get_for_subscriber(&id, &subscriber)
        .await?;
    if existing.is_none() {
        return Err(ApiError::not_found("subscription", &id));
    }

    state.registry.unbind(&id).await;
    state.store.subscriptions().delete(&id).await?;

    tracing::info!(subscription_id = %id, "subscription deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /subscriptions/{id}/events
async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<EventsParams>,
) -> Result<Json<Page<SubscriptionEventLogRow>>> {
    let subscriber = subscriber_id(&headers);
    state
        .store
        .subscriptions()
        .get_for_subscriber(&id, &subscriber)
        .await?
        .ok_or_else(|| ApiError::not_found("subscription", &id))?;

    let gate = match params.gate.as_deref() {
        None | Some("all") => GateFilter::All,
        Some("allowed") => GateFilter::Allowed,
        Some("blocked") => GateFilter::Blocked,
        Some(other) => {
            return Err(ApiError::BadRequest(format!(
                "unknown gate filter '{}': expected allowed, blocked or all",
                other
            )))
        }
    };

    let page = state
        .store
        .subscription_event_logs()
        .list(&id, params.page, params.size, gate)
        .await?;

    Ok(Json(page))
}

fn validate_channel(channel_type: ChannelType, config: Option<&Value>) -> Result<()> {
    if channel_type == ChannelType::Webhook {
        let has_url = config
            .and_then(|config| config.get("url"))
            .and_then(Value::as_str)
            .map(|url| !url.trim().is_empty())
            .unwrap_or(false);
        if !has_url {
            return Err(ApiError::validation(
                "channel_config",
                "webhook channel requires a url",
            ));
        }
    }
    Ok(())
}

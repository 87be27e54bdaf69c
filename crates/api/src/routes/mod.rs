//! Route modules

pub mod event_logs;
pub mod ops;
pub mod schema;
pub mod subscriptions;

use axum::http::HeaderMap;
use serde::Deserialize;

/// Subscriber identity header; absent means the shared default subscriber
const SUBSCRIBER_HEADER: &str = "x-subscriber-id";

/// Resolve the calling subscriber
pub(crate) fn subscriber_id(headers: &HeaderMap) -> String {
    headers
        .get(SUBSCRIBER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("default")
        .to_string()
}

/// Common pagination query parameters
#[derive(Debug, Deserialize)]
pub(crate) struct PageParams {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_size")]
    pub size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_size() -> u32 {
    50
}

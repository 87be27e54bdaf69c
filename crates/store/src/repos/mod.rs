//! Repositories over the registry store

mod event_logs;
mod mappings;
mod schema;
mod subscriptions;

pub use event_logs::{EventLogRepo, SubscriptionEventLogRepo};
pub use mappings::MappingRepo;
pub use schema::SchemaRepo;
pub use subscriptions::SubscriptionRepo;

use chrono::{DateTime, Utc};

/// Parse an RFC 3339 column, tolerating missing values
pub(crate) fn parse_timestamp(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Read a TEXT column as an owned string
pub(crate) fn text_at(row: &turso::Row, index: usize) -> crate::Result<String> {
    Ok(row.get_value(index)?.as_text().cloned().unwrap_or_default())
}

/// Boolean columns are stored as '0' / '1' text
pub(crate) fn bool_at(row: &turso::Row, index: usize) -> crate::Result<bool> {
    Ok(text_at(row, index)? == "1")
}

pub(crate) fn bool_text(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Clamp a page size to the API ceiling
pub(crate) fn clamp_page(page: u32, size: u32) -> (u32, u32, u64) {
    let page = page.max(1);
    let size = size.clamp(1, 200);
    let offset = u64::from(page - 1) * u64::from(size);
    (page, size, offset)
}

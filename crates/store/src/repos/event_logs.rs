//! Event log repositories
//!
//! `event_logs` holds one row per canonical event (optional, enabled by
//! `EVENT_LOGGING_ENABLED`). `subscription_event_logs` holds one row per
//! (subscription, event) observation including gate and delivery outcomes.
//! Both are paged newest-first; retention is left to external tooling.

use turso::Database;

use crate::error::Result;
use crate::models::{EventLogRow, GateFilter, Page, SubscriptionEventLogRow};
use crate::repos::{bool_text, clamp_page, parse_timestamp, text_at};

/// Canonical event log repository
pub struct EventLogRepo<'a> {
    db: &'a Database,
}

impl<'a> EventLogRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append one canonical event row
    pub async fn append(&self, row: &EventLogRow) -> Result<()> {
        let conn = self.db.connect()?;
        let payload = serde_json::to_string(&row.payload)?;

        conn.execute(
            r#"
            INSERT INTO event_logs
                (id, subject, publisher, resource_type, resource_id, action,
                 payload, emitted_at, logged_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            [
                row.id.as_str(),
                row.subject.as_str(),
                row.publisher.as_str(),
                row.resource_type.as_str(),
                row.resource_id.as_str(),
                row.action.as_str(),
                payload.as_str(),
                &row.emitted_at.to_rfc3339(),
                &row.logged_at.to_rfc3339(),
            ],
        )
        .await?;

        Ok(())
    }

    /// Page canonical events newest-first, optionally filtered by resource type
    pub async fn list(
        &self,
        page: u32,
        size: u32,
        resource_types: &[String],
    ) -> Result<Page<EventLogRow>> {
        let (page, size, offset) = clamp_page(page, size);
        let conn = self.db.connect()?;

        // resource types are subject tokens; anything else cannot match a row
        let filter = in_clause("resource_type", resource_types);

        let count_sql = format!(
            "SELECT CAST(COUNT(*) AS TEXT) FROM event_logs{}",
            filter
        );
        let mut rows = conn.query(&count_sql, ()).await?;
        let total: u64 = match rows.next().await? {
            Some(row) => text_at(&row, 0)?.parse().unwrap_or(0),
            None => 0,
        };

        let sql = format!(
            "SELECT * FROM event_logs{} ORDER BY emitted_at DESC LIMIT {} OFFSET {}",
            filter, size, offset
        );
        let mut rows = conn.query(&sql, ()).await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_event_log(&row)?);
        }

        Ok(Page {
            items,
            total,
            page,
            size,
        })
    }
}

/// Per-subscription event log repository
pub struct SubscriptionEventLogRepo<'a> {
    db: &'a Database,
}

impl<'a> SubscriptionEventLogRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Append one (subscription, event) observation
    pub async fn append(&self, row: &SubscriptionEventLogRow) -> Result<()> {
        let conn = self.db.connect()?;
        let payload = serde_json::to_string(&row.payload)?;

        let gate_passed = match row.gate_passed {
            None => "",
            Some(true) => "1",
            Some(false) => "0",
        };
        let status = row
            .webhook_response_status
            .map(|s| s.to_string())
            .unwrap_or_default();

        conn.execute(
            r#"
            INSERT INTO subscription_event_logs
                (id, subscription_id, event_id, subject, payload, gate_passed,
                 gate_reason, webhook_sent, webhook_response_status, emitted_at, logged_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            [
                row.id.as_str(),
                row.subscription_id.as_str(),
                row.event_id.as_str(),
                row.subject.as_str(),
                payload.as_str(),
                gate_passed,
                row.gate_reason.as_deref().unwrap_or(""),
                bool_text(row.webhook_sent),
                status.as_str(),
                &row.emitted_at.to_rfc3339(),
                &row.logged_at.to_rfc3339(),
            ],
        )
        .await?;

        Ok(())
    }

    /// Page a subscription's observations newest-first
    pub async fn list(
        &self,
        subscription_id: &str,
        page: u32,
        size: u32,
        gate: GateFilter,
    ) -> Result<Page<SubscriptionEventLogRow>> {
        let (page, size, offset) = clamp_page(page, size);
        let conn = self.db.connect()?;

        let gate_clause = match gate {
            GateFilter::All => "",
            GateFilter::Allowed => " AND (gate_passed = '' OR gate_passed = '1')",
            GateFilter::Blocked => " AND gate_passed = '0'",
        };

        let count_sql = format!(
            "SELECT CAST(COUNT(*) AS TEXT) FROM subscription_event_logs \
             WHERE subscription_id = ?1{}",
            gate_clause
        );
        let mut rows = conn.query(&count_sql, [subscription_id]).await?;
        let total: u64 = match rows.next().await? {
            Some(row) => text_at(&row, 0)?.parse().unwrap_or(0),
            None => 0,
        };

        let sql = format!(
            "SELECT * FROM subscription_event_logs WHERE subscription_id = ?1{} \
             ORDER BY emitted_at DESC LIMIT {} OFFSET {}",
            gate_clause, size, offset
        );
        let mut rows = conn.query(&sql, [subscription_id]).await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_subscription_log(&row)?);
        }

        Ok(Page {
            items,
            total,
            page,
            size,
        })
    }

    /// Count rows where a dispatch occurred
    pub async fn count_dispatched(&self, subscription_id: &str) -> Result<u64> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT CAST(COUNT(*) AS TEXT) FROM subscription_event_logs \
                 WHERE subscription_id = ?1 AND webhook_sent = '1'",
                [subscription_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(text_at(&row, 0)?.parse().unwrap_or(0)),
            None => Ok(0),
        }
    }
}

/// Build a safe `WHERE x IN (...)` clause from token values
///
/// Values are subject tokens; anything containing non-token characters is
/// dropped since it can never match a stored row.
fn in_clause(column: &str, values: &[String]) -> String {
    let safe: Vec<String> = values
        .iter()
        .filter(|v| {
            !v.is_empty()
                && v.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
        .map(|v| format!("'{}'", v))
        .collect();

    if safe.is_empty() {
        String::new()
    } else {
        format!(" WHERE {} IN ({})", column, safe.join(", "))
    }
}

fn row_to_event_log(row: &turso::Row) -> Result<EventLogRow> {
    Ok(EventLogRow {
        id: text_at(row, 0)?,
        subject: text_at(row, 1)?,
        publisher: text_at(row, 2)?,
        resource_type: text_at(row, 3)?,
        resource_id: text_at(row, 4)?,
        action: text_at(row, 5)?,
        payload: serde_json::from_str(&text_at(row, 6)?).unwrap_or(serde_json::Value::Null),
        emitted_at: parse_timestamp(&text_at(row, 7)?),
        logged_at: parse_timestamp(&text_at(row, 8)?),
    })
}

fn row_to_subscription_log(row: &turso::Row) -> Result<SubscriptionEventLogRow> {
    let gate_passed = match text_at(row, 5)?.as_str() {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    };
    let gate_reason = {
        let text = text_at(row, 6)?;
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    };
    let webhook_response_status = text_at(row, 8)?.parse().ok();

    Ok(SubscriptionEventLogRow {
        id: text_at(row, 0)?,
        subscription_id: text_at(row, 1)?,
        event_id: text_at(row, 2)?,
        subject: text_at(row, 3)?,
        payload: serde_json::from_str(&text_at(row, 4)?).unwrap_or(serde_json::Value::Null),
        gate_passed,
        gate_reason,
        webhook_sent: text_at(row, 7)? == "1",
        webhook_response_status,
        emitted_at: parse_timestamp(&text_at(row, 9)?),
        logged_at: parse_timestamp(&text_at(row, 10)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn event_row(i: i64, resource_type: &str) -> EventLogRow {
        EventLogRow {
            id: format!("evt-{}", i),
            subject: format!("langhook.events.github.{}.{}.create", resource_type, i),
            publisher: "github".into(),
            resource_type: resource_type.into(),
            resource_id: i.to_string(),
            action: "create".into(),
            payload: json!({"n": i}),
            emitted_at: Utc::now() + Duration::seconds(i),
            logged_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_log_pagination_desc() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.event_logs();

        for i in 0..5 {
            repo.append(&event_row(i, "issue")).await.unwrap();
        }

        let page = repo.list(1, 2, &[]).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        // newest first
        assert_eq!(page.items[0].id, "evt-4");
        assert_eq!(page.items[1].id, "evt-3");

        let last = repo.list(3, 2, &[]).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].id, "evt-0");
    }

    #[tokio::test]
    async fn test_event_log_resource_type_filter() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.event_logs();

        repo.append(&event_row(1, "issue")).await.unwrap();
        repo.append(&event_row(2, "pull_request")).await.unwrap();
        repo.append(&event_row(3, "issue")).await.unwrap();

        let page = repo
            .list(1, 50, &["issue".to_string()])
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert!(page.items.iter().all(|r| r.resource_type == "issue"));

        // hostile filter values are dropped rather than interpolated
        let page = repo
            .list(1, 50, &["'; DROP TABLE event_logs; --".to_string()])
            .await
            .unwrap();
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn test_subscription_log_gate_filter() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.subscription_event_logs();

        let mut passed = SubscriptionEventLogRow::new(
            "sub-1",
            "evt-1",
            "langhook.events.github.issue.1.create",
            json!({}),
            Utc::now(),
        );
        passed.gate_passed = Some(true);
        passed.webhook_sent = true;
        passed.webhook_response_status = Some(200);
        repo.append(&passed).await.unwrap();

        let mut blocked = SubscriptionEventLogRow::new(
            "sub-1",
            "evt-2",
            "langhook.events.github.issue.2.create",
            json!({}),
            Utc::now(),
        );
        blocked.gate_passed = Some(false);
        blocked.gate_reason = Some("not an approval".into());
        repo.append(&blocked).await.unwrap();

        // ungated observation on another subscription
        let other = SubscriptionEventLogRow::new(
            "sub-2",
            "evt-3",
            "langhook.events.github.issue.3.create",
            json!({}),
            Utc::now(),
        );
        repo.append(&other).await.unwrap();

        let all = repo.list("sub-1", 1, 50, GateFilter::All).await.unwrap();
        assert_eq!(all.total, 2);

        let allowed = repo.list("sub-1", 1, 50, GateFilter::Allowed).await.unwrap();
        assert_eq!(allowed.total, 1);
        assert_eq!(allowed.items[0].gate_passed, Some(true));
        assert_eq!(allowed.items[0].webhook_response_status, Some(200));

        let blocked_page = repo.list("sub-1", 1, 50, GateFilter::Blocked).await.unwrap();
        assert_eq!(blocked_page.total, 1);
        assert_eq!(
            blocked_page.items[0].gate_reason.as_deref(),
            Some("not an approval")
        );

        // ungated rows count as allowed
        let other_allowed = repo.list("sub-2", 1, 50, GateFilter::Allowed).await.unwrap();
        assert_eq!(other_allowed.total, 1);
        assert_eq!(other_allowed.items[0].gate_passed, None);

        assert_eq!(repo.count_dispatched("sub-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_page_size_ceiling() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.event_logs();
        let page = repo.list(1, 10_000, &[]).await.unwrap();
        assert_eq!(page.size, 200);
    }
}

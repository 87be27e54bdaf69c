//! Subscription repository
//!
//! CRUD plus the `mark_used` transition disposable subscriptions take after
//! their first dispatch.

use chrono::Utc;
use turso::Database;

use crate::error::{Result, StoreError};
use crate::models::{ChannelType, GateConfig, Subscription, SubscriptionUpdate};
use crate::repos::{bool_at, bool_text, clamp_page, parse_timestamp, text_at};

/// Subscription repository
pub struct SubscriptionRepo<'a> {
    db: &'a Database,
}

impl<'a> SubscriptionRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a new subscription
    pub async fn create(&self, subscription: &Subscription) -> Result<()> {
        let conn = self.db.connect()?;

        let channel_config = match &subscription.channel_config {
            Some(value) => serde_json::to_string(value)?,
            None => String::new(),
        };
        let gate = match &subscription.gate {
            Some(gate) => serde_json::to_string(gate)?,
            None => String::new(),
        };

        conn.execute(
            r#"
            INSERT INTO subscriptions
                (id, subscriber_id, description, pattern, channel_type, channel_config,
                 gate, disposable, active, used, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            [
                subscription.id.as_str(),
                subscription.subscriber_id.as_str(),
                subscription.description.as_str(),
                subscription.pattern.as_str(),
                subscription.channel_type.as_str(),
                channel_config.as_str(),
                gate.as_str(),
                bool_text(subscription.disposable),
                bool_text(subscription.active),
                bool_text(subscription.used),
                &subscription.created_at.to_rfc3339(),
                &subscription.updated_at.to_rfc3339(),
            ],
        )
        .await?;

        Ok(())
    }

    /// Fetch a subscription by id
    pub async fn get(&self, id: &str) -> Result<Option<Subscription>> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query("SELECT * FROM subscriptions WHERE id = ?1", [id])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row_to_subscription(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Fetch a subscription owned by a specific subscriber
    pub async fn get_for_subscriber(
        &self,
        id: &str,
        subscriber_id: &str,
    ) -> Result<Option<Subscription>> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT * FROM subscriptions WHERE id = ?1 AND subscriber_id = ?2",
                [id, subscriber_id],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row_to_subscription(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Page through a subscriber's subscriptions, newest first
    pub async fn list(
        &self,
        subscriber_id: &str,
        page: u32,
        size: u32,
    ) -> Result<(Vec<Subscription>, u64)> {
        let (_, size, offset) = clamp_page(page, size);
        let conn = self.db.connect()?;

        let mut rows = conn
            .query(
                "SELECT CAST(COUNT(*) AS TEXT) FROM subscriptions WHERE subscriber_id = ?1",
                [subscriber_id],
            )
            .await?;
        let total: u64 = match rows.next().await? {
            Some(row) => text_at(&row, 0)?.parse().unwrap_or(0),
            None => 0,
        };

        let sql = format!(
            "SELECT * FROM subscriptions WHERE subscriber_id = ?1 \
             ORDER BY created_at DESC LIMIT {} OFFSET {}",
            size, offset
        );
        let mut rows = conn.query(&sql, [subscriber_id]).await?;

        let mut subscriptions = Vec::new();
        while let Some(row) = rows.next().await? {
            subscriptions.push(row_to_subscription(&row)?);
        }

        Ok((subscriptions, total))
    }

    /// All active subscriptions, for consumer binding at startup
    pub async fn list_active(&self) -> Result<Vec<Subscription>> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query("SELECT * FROM subscriptions WHERE active = '1'", ())
            .await?;

        let mut subscriptions = Vec::new();
        while let Some(row) = rows.next().await? {
            subscriptions.push(row_to_subscription(&row)?);
        }
        Ok(subscriptions)
    }

    /// Apply a partial update, returning the new row
    pub async fn update(
        &self,
        id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<Option<Subscription>> {
        let Some(mut subscription) = self.get(id).await? else {
            return Ok(None);
        };

        if let Some(description) = &update.description {
            subscription.description = description.clone();
        }
        if let Some(pattern) = &update.pattern {
            subscription.pattern = pattern.clone();
        }
        if let Some(channel_type) = update.channel_type {
            subscription.channel_type = channel_type;
        }
        if let Some(channel_config) = &update.channel_config {
            subscription.channel_config = channel_config.clone();
        }
        if let Some(gate) = &update.gate {
            subscription.gate = gate.clone();
        }
        if let Some(disposable) = update.disposable {
            subscription.disposable = disposable;
        }
        if let Some(active) = update.active {
            subscription.active = active;
        }
        subscription.updated_at = Utc::now();

        let conn = self.db.connect()?;
        let channel_config = match &subscription.channel_config {
            Some(value) => serde_json::to_string(value)?,
            None => String::new(),
        };
        let gate = match &subscription.gate {
            Some(gate) => serde_json::to_string(gate)?,
            None => String::new(),
        };

        let affected = conn
            .execute(
                r#"
                UPDATE subscriptions SET
                    description = ?1, pattern = ?2, channel_type = ?3, channel_config = ?4,
                    gate = ?5, disposable = ?6, active = ?7, updated_at = ?8
                WHERE id = ?9
                "#,
                [
                    subscription.description.as_str(),
                    subscription.pattern.as_str(),
                    subscription.channel_type.as_str(),
                    channel_config.as_str(),
                    gate.as_str(),
                    bool_text(subscription.disposable),
                    bool_text(subscription.active),
                    &subscription.updated_at.to_rfc3339(),
                    id,
                ],
            )
            .await?;

        if affected == 0 {
            return Ok(None);
        }
        Ok(Some(subscription))
    }

    /// Disposable transition: used, inactive
    pub async fn mark_used(&self, id: &str) -> Result<()> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute(
                "UPDATE subscriptions SET used = '1', active = '0', updated_at = ?1 WHERE id = ?2",
                [Utc::now().to_rfc3339().as_str(), id],
            )
            .await?;

        if affected == 0 {
            return Err(StoreError::not_found("subscription", id));
        }
        Ok(())
    }

    /// Delete a subscription, returning whether a row existed
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute("DELETE FROM subscriptions WHERE id = ?1", [id])
            .await?;
        Ok(affected > 0)
    }
}

fn row_to_subscription(row: &turso::Row) -> Result<Subscription> {
    let channel_config_text = text_at(row, 5)?;
    let channel_config = if channel_config_text.is_empty() {
        None
    } else {
        Some(serde_json::from_str(&channel_config_text).map_err(|source| {
            StoreError::CorruptColumn {
                column: "channel_config",
                source,
            }
        })?)
    };

    let gate_text = text_at(row, 6)?;
    let gate: Option<GateConfig> = if gate_text.is_empty() {
        None
    } else {
        Some(
            serde_json::from_str(&gate_text).map_err(|source| StoreError::CorruptColumn {
                column: "gate",
                source,
            })?,
        )
    };

    Ok(Subscription {
        id: text_at(row, 0)?,
        subscriber_id: text_at(row, 1)?,
        description: text_at(row, 2)?,
        pattern: text_at(row, 3)?,
        channel_type: ChannelType::parse(&text_at(row, 4)?),
        channel_config,
        gate,
        disposable: bool_at(row, 7)?,
        active: bool_at(row, 8)?,
        used: bool_at(row, 9)?,
        created_at: parse_timestamp(&text_at(row, 10)?),
        updated_at: parse_timestamp(&text_at(row, 11)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailoverPolicy;
    use crate::Store;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscription_crud() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.subscriptions();

        let mut sub = Subscription::new(
            "alice",
            "Notify me when PR 1374 is approved",
            "langhook.events.github.pull_request.1374.update",
        );
        sub.channel_type = ChannelType::Webhook;
        sub.channel_config = Some(json!({"url": "https://example.com/hook"}));
        sub.gate = Some(GateConfig {
            prompt: None,
            threshold: 0.9,
            audit: false,
            failover_policy: FailoverPolicy::FailClosed,
        });

        repo.create(&sub).await.unwrap();

        let fetched = repo.get(&sub.id).await.unwrap().unwrap();
        assert_eq!(fetched.pattern, sub.pattern);
        assert_eq!(fetched.channel_type, ChannelType::Webhook);
        assert_eq!(
            fetched.gate.as_ref().unwrap().failover_policy,
            FailoverPolicy::FailClosed
        );
        assert!(fetched.active);
        assert!(!fetched.used);

        // ownership scoping
        assert!(repo
            .get_for_subscriber(&sub.id, "bob")
            .await
            .unwrap()
            .is_none());
        assert!(repo
            .get_for_subscriber(&sub.id, "alice")
            .await
            .unwrap()
            .is_some());

        // partial update: deactivate and drop the gate
        let update = SubscriptionUpdate {
            active: Some(false),
            gate: Some(None),
            ..Default::default()
        };
        let updated = repo.update(&sub.id, &update).await.unwrap().unwrap();
        assert!(!updated.active);
        assert!(updated.gate.is_none());
        assert_eq!(updated.description, sub.description);

        assert!(repo.delete(&sub.id).await.unwrap());
        assert!(!repo.delete(&sub.id).await.unwrap());
        assert!(repo.get(&sub.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_used() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.subscriptions();

        let mut sub = Subscription::new("alice", "one shot", "langhook.events.>");
        sub.disposable = true;
        repo.create(&sub).await.unwrap();

        repo.mark_used(&sub.id).await.unwrap();
        let fetched = repo.get(&sub.id).await.unwrap().unwrap();
        assert!(fetched.used);
        assert!(!fetched.active);

        assert!(repo.mark_used("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_list_pagination_and_active() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.subscriptions();

        for i in 0..5 {
            let mut sub =
                Subscription::new("alice", format!("sub {}", i), "langhook.events.>");
            sub.active = i % 2 == 0;
            repo.create(&sub).await.unwrap();
        }
        repo.create(&Subscription::new("bob", "other", "langhook.events.>"))
            .await
            .unwrap();

        let (page, total) = repo.list("alice", 1, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);

        let (rest, _) = repo.list("alice", 3, 2).await.unwrap();
        assert_eq!(rest.len(), 1);

        // active across all subscribers: 3 of alice's + bob's
        let active = repo.list_active().await.unwrap();
        assert_eq!(active.len(), 4);
    }
}

//! Schema registry repository
//!
//! The registry is the discovered set of (publisher, resource_type, action)
//! triples. Registration is insert-if-absent with a `last_seen_at` touch, so
//! the map worker can call it on every canonical event.

use chrono::Utc;
use turso::Database;

use langhook_protocol::SchemaSummary;

use crate::error::Result;
use crate::repos::text_at;

/// Schema registry repository
pub struct SchemaRepo<'a> {
    db: &'a Database,
}

impl<'a> SchemaRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Upsert a triple: insert if absent, touch `last_seen_at` otherwise
    pub async fn register(
        &self,
        publisher: &str,
        resource_type: &str,
        action: &str,
    ) -> Result<()> {
        let conn = self.db.connect()?;
        let now = Utc::now().to_rfc3339();

        let affected = conn
            .execute(
                r#"
                UPDATE event_schema_registry SET last_seen_at = ?1
                WHERE publisher = ?2 AND resource_type = ?3 AND action = ?4
                "#,
                [now.as_str(), publisher, resource_type, action],
            )
            .await?;

        if affected > 0 {
            return Ok(());
        }

        let inserted = conn
            .execute(
                r#"
                INSERT INTO event_schema_registry
                    (publisher, resource_type, action, first_seen_at, last_seen_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                [publisher, resource_type, action, now.as_str(), now.as_str()],
            )
            .await;

        // a concurrent writer may have inserted the same triple; fall back to
        // the touch path instead of surfacing the constraint violation
        if inserted.is_err() {
            conn.execute(
                r#"
                UPDATE event_schema_registry SET last_seen_at = ?1
                WHERE publisher = ?2 AND resource_type = ?3 AND action = ?4
                "#,
                [now.as_str(), publisher, resource_type, action],
            )
            .await?;
        }

        Ok(())
    }

    /// Structured summary of every registered triple
    pub async fn summary(&self) -> Result<SchemaSummary> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT publisher, resource_type, action FROM event_schema_registry \
                 ORDER BY publisher, resource_type, action",
                (),
            )
            .await?;

        let mut summary = SchemaSummary::default();
        while let Some(row) = rows.next().await? {
            let publisher = text_at(&row, 0)?;
            let resource_type = text_at(&row, 1)?;
            let action = text_at(&row, 2)?;

            if !summary.publishers.contains(&publisher) {
                summary.publishers.push(publisher.clone());
            }
            let types = summary.resource_types.entry(publisher).or_default();
            if !types.contains(&resource_type) {
                types.push(resource_type);
            }
            if !summary.actions.contains(&action) {
                summary.actions.push(action);
            }
        }

        summary.actions.sort();
        Ok(summary)
    }

    /// Remove every triple for a publisher; returns rows deleted
    pub async fn delete_publisher(&self, publisher: &str) -> Result<u64> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute(
                "DELETE FROM event_schema_registry WHERE publisher = ?1",
                [publisher],
            )
            .await?;
        Ok(affected)
    }

    /// Remove every triple for a (publisher, resource_type) pair
    pub async fn delete_resource_type(
        &self,
        publisher: &str,
        resource_type: &str,
    ) -> Result<u64> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute(
                "DELETE FROM event_schema_registry WHERE publisher = ?1 AND resource_type = ?2",
                [publisher, resource_type],
            )
            .await?;
        Ok(affected)
    }

    /// Remove a single triple
    pub async fn delete_action(
        &self,
        publisher: &str,
        resource_type: &str,
        action: &str,
    ) -> Result<u64> {
        let conn = self.db.connect()?;
        let affected = conn
            .execute(
                "DELETE FROM event_schema_registry \
                 WHERE publisher = ?1 AND resource_type = ?2 AND action = ?3",
                [publisher, resource_type, action],
            )
            .await?;
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[tokio::test]
    async fn test_register_and_summary() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.schema();

        repo.register("github", "pull_request", "create").await.unwrap();
        repo.register("github", "pull_request", "update").await.unwrap();
        repo.register("github", "issue", "create").await.unwrap();
        repo.register("stripe", "payment_intent", "create").await.unwrap();

        // re-registration is an upsert, not a duplicate
        repo.register("github", "pull_request", "create").await.unwrap();

        let summary = repo.summary().await.unwrap();
        assert_eq!(summary.publishers, vec!["github", "stripe"]);
        assert_eq!(
            summary.resource_types.get("github").unwrap(),
            &vec!["issue".to_string(), "pull_request".to_string()]
        );
        assert_eq!(summary.actions, vec!["create", "update"]);
    }

    #[tokio::test]
    async fn test_cascading_deletes() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.schema();

        repo.register("github", "pull_request", "create").await.unwrap();
        repo.register("github", "pull_request", "update").await.unwrap();
        repo.register("github", "issue", "create").await.unwrap();

        assert_eq!(
            repo.delete_action("github", "pull_request", "update")
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            repo.delete_resource_type("github", "pull_request").await.unwrap(),
            1
        );
        assert_eq!(repo.delete_publisher("github").await.unwrap(), 1);

        assert!(repo.summary().await.unwrap().is_empty());
    }
}

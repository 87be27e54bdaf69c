//! Ingest mapping repository
//!
//! Mappings are keyed by payload fingerprint. `upsert` replaces the stored
//! expression when resynthesis repaired a failing transform.

use chrono::Utc;
use turso::Database;

use crate::error::{Result, StoreError};
use crate::models::{IngestMapping, MappingSource};
use crate::repos::{parse_timestamp, text_at};

/// Ingest mapping repository
pub struct MappingRepo<'a> {
    db: &'a Database,
}

impl<'a> MappingRepo<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Look up a mapping by publisher and fingerprint
    pub async fn get(&self, publisher: &str, fingerprint: &str) -> Result<Option<IngestMapping>> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT * FROM ingest_mappings WHERE fingerprint = ?1 AND publisher = ?2",
                [fingerprint, publisher],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row_to_mapping(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Insert or replace a mapping for its fingerprint
    pub async fn upsert(&self, mapping: &IngestMapping) -> Result<()> {
        let conn = self.db.connect()?;
        let expressions = serde_json::to_string(&mapping.event_field_expressions)?;
        let now = Utc::now().to_rfc3339();

        let affected = conn
            .execute(
                r#"
                UPDATE ingest_mappings
                SET publisher = ?1, expression = ?2, event_field_expressions = ?3,
                    source = ?4, updated_at = ?5
                WHERE fingerprint = ?6
                "#,
                [
                    mapping.publisher.as_str(),
                    mapping.expression.as_str(),
                    expressions.as_str(),
                    mapping.source.as_str(),
                    now.as_str(),
                    mapping.fingerprint.as_str(),
                ],
            )
            .await?;

        if affected > 0 {
            return Ok(());
        }

        conn.execute(
            r#"
            INSERT INTO ingest_mappings
                (fingerprint, publisher, expression, event_field_expressions,
                 source, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            [
                mapping.fingerprint.as_str(),
                mapping.publisher.as_str(),
                mapping.expression.as_str(),
                expressions.as_str(),
                mapping.source.as_str(),
                mapping.created_at.to_rfc3339().as_str(),
                now.as_str(),
            ],
        )
        .await?;

        Ok(())
    }
}

fn row_to_mapping(row: &turso::Row) -> Result<IngestMapping> {
    let expressions_text = text_at(row, 3)?;
    let event_field_expressions: Vec<String> = serde_json::from_str(&expressions_text)
        .map_err(|source| StoreError::CorruptColumn {
            column: "event_field_expressions",
            source,
        })?;

    Ok(IngestMapping {
        fingerprint: text_at(row, 0)?,
        publisher: text_at(row, 1)?,
        expression: text_at(row, 2)?,
        event_field_expressions,
        source: MappingSource::parse(&text_at(row, 4)?),
        created_at: parse_timestamp(&text_at(row, 5)?),
        updated_at: parse_timestamp(&text_at(row, 6)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    #[tokio::test]
    async fn test_mapping_round_trip() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.mappings();

        let mut mapping = IngestMapping::new(
            "fp-abc",
            "github",
            r#"{"publisher":"github"}"#,
            MappingSource::Synthesized,
        );
        mapping.event_field_expressions = vec!["/action".to_string()];

        repo.upsert(&mapping).await.unwrap();

        let fetched = repo.get("github", "fp-abc").await.unwrap().unwrap();
        assert_eq!(fetched.expression, mapping.expression);
        assert_eq!(fetched.event_field_expressions, vec!["/action"]);
        assert_eq!(fetched.source, MappingSource::Synthesized);

        // different publisher does not see the fingerprint
        assert!(repo.get("stripe", "fp-abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_expression() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.mappings();

        let mapping = IngestMapping::new("fp-1", "github", "old", MappingSource::Synthesized);
        repo.upsert(&mapping).await.unwrap();

        let repaired = IngestMapping::new("fp-1", "github", "new", MappingSource::Synthesized);
        repo.upsert(&repaired).await.unwrap();

        let fetched = repo.get("github", "fp-1").await.unwrap().unwrap();
        assert_eq!(fetched.expression, "new");
    }
}

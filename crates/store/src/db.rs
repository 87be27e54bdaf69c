//! Database connection and versioned migrations
//!
//! Uses Turso (async SQLite-compatible) for the registry store. The store
//! carries a `schema_migrations` table with one `version` row per applied
//! migration; startup is fatal when the database is ahead of the binary.

use chrono::Utc;
use tracing::info;
use turso::{Builder, Database};

use crate::error::{Result, StoreError};

/// Latest schema version this binary understands
const SCHEMA_VERSION: i64 = 1;

/// Ordered migrations: (version, statements)
const MIGRATIONS: &[(i64, &[&str])] = &[(
    1,
    &[
        SCHEMA_SUBSCRIPTIONS,
        SCHEMA_INGEST_MAPPINGS,
        SCHEMA_EVENT_SCHEMA_REGISTRY,
        SCHEMA_EVENT_LOGS,
        SCHEMA_SUBSCRIPTION_EVENT_LOGS,
        INDEX_SUBSCRIPTIONS_SUBSCRIBER,
        INDEX_MAPPINGS_PUBLISHER,
        INDEX_EVENT_LOGS_EMITTED,
        INDEX_SUB_EVENT_LOGS_SUBSCRIPTION,
    ],
)];

/// Registry store handle
///
/// `Database` is internally shared, so the store is cheap to clone.
#[derive(Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Open (or create) a store at the given DSN and apply migrations
    ///
    /// The DSN is a file path or `:memory:`; a `sqlite://` prefix is
    /// tolerated for operator convenience.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let path = dsn.strip_prefix("sqlite://").unwrap_or(dsn);

        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).ok();
                }
            }
        }

        info!(path = %path, "opening registry store");
        let db = Builder::new_local(path).build().await?;

        let store = Self { db };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests
    pub async fn in_memory() -> Result<Self> {
        Self::connect(":memory:").await
    }

    /// Access the underlying database
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Cheap reachability probe
    pub async fn ping(&self) -> Result<()> {
        let conn = self.db.connect()?;
        conn.query("SELECT 1", ()).await?;
        Ok(())
    }

    /// Apply any missing migrations
    async fn migrate(&self) -> Result<()> {
        let conn = self.db.connect()?;

        conn.execute(SCHEMA_MIGRATIONS_TABLE, ()).await?;

        let current = self.current_version().await?;
        if current > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        for (version, statements) in MIGRATIONS {
            if *version <= current {
                continue;
            }
            for statement in *statements {
                conn.execute(statement, ()).await?;
            }
            let version_text = version.to_string();
            let applied_at = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                [version_text.as_str(), applied_at.as_str()],
            )
            .await?;
            info!(version, "applied store migration");
        }

        Ok(())
    }

    /// Highest applied migration version, 0 for a fresh database
    pub async fn current_version(&self) -> Result<i64> {
        let conn = self.db.connect()?;
        let mut rows = conn
            .query(
                "SELECT CAST(COALESCE(MAX(version), 0) AS TEXT) FROM schema_migrations",
                (),
            )
            .await?;

        if let Some(row) = rows.next().await? {
            let text = row.get_value(0)?.as_text().cloned().unwrap_or_default();
            Ok(text.parse().unwrap_or(0))
        } else {
            Ok(0)
        }
    }
}

// =============================================================================
// Schema
// =============================================================================

const SCHEMA_MIGRATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
)
"#;

const SCHEMA_SUBSCRIPTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS subscriptions (
    id TEXT PRIMARY KEY,
    subscriber_id TEXT NOT NULL,
    description TEXT NOT NULL,
    pattern TEXT NOT NULL,
    channel_type TEXT NOT NULL,
    channel_config TEXT NOT NULL DEFAULT '',
    gate TEXT NOT NULL DEFAULT '',
    disposable TEXT NOT NULL DEFAULT '0',
    active TEXT NOT NULL DEFAULT '1',
    used TEXT NOT NULL DEFAULT '0',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

const SCHEMA_INGEST_MAPPINGS: &str = r#"
CREATE TABLE IF NOT EXISTS ingest_mappings (
    fingerprint TEXT PRIMARY KEY,
    publisher TEXT NOT NULL,
    expression TEXT NOT NULL,
    event_field_expressions TEXT NOT NULL DEFAULT '[]',
    source TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

const SCHEMA_EVENT_SCHEMA_REGISTRY: &str = r#"
CREATE TABLE IF NOT EXISTS event_schema_registry (
    publisher TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    action TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    PRIMARY KEY (publisher, resource_type, action)
)
"#;

const SCHEMA_EVENT_LOGS: &str = r#"
CREATE TABLE IF NOT EXISTS event_logs (
    id TEXT NOT NULL,
    subject TEXT NOT NULL,
    publisher TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    action TEXT NOT NULL,
    payload TEXT NOT NULL,
    emitted_at TEXT NOT NULL,
    logged_at TEXT NOT NULL
)
"#;

const SCHEMA_SUBSCRIPTION_EVENT_LOGS: &str = r#"
CREATE TABLE IF NOT EXISTS subscription_event_logs (
    id TEXT PRIMARY KEY,
    subscription_id TEXT NOT NULL,
    event_id TEXT NOT NULL,
    subject TEXT NOT NULL,
    payload TEXT NOT NULL,
    gate_passed TEXT NOT NULL DEFAULT '',
    gate_reason TEXT NOT NULL DEFAULT '',
    webhook_sent TEXT NOT NULL DEFAULT '0',
    webhook_response_status TEXT NOT NULL DEFAULT '',
    emitted_at TEXT NOT NULL,
    logged_at TEXT NOT NULL
)
"#;

const INDEX_SUBSCRIPTIONS_SUBSCRIBER: &str =
    "CREATE INDEX IF NOT EXISTS idx_subscriptions_subscriber ON subscriptions(subscriber_id)";

const INDEX_MAPPINGS_PUBLISHER: &str =
    "CREATE INDEX IF NOT EXISTS idx_mappings_publisher ON ingest_mappings(publisher)";

const INDEX_EVENT_LOGS_EMITTED: &str =
    "CREATE INDEX IF NOT EXISTS idx_event_logs_emitted ON event_logs(emitted_at)";

const INDEX_SUB_EVENT_LOGS_SUBSCRIPTION: &str = "CREATE INDEX IF NOT EXISTS idx_sub_event_logs_subscription ON subscription_event_logs(subscription_id, emitted_at)";

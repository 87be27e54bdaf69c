//! LangHook - Registry Store
//!
//! Turso-backed persistence for subscriptions, ingest mappings, the schema
//! registry, and event logs.
//!
//! # Usage
//!
//! ```ignore
//! use langhook_store::Store;
//!
//! // File-based (production)
//! let store = Store::connect("data/langhook.db").await?;
//!
//! // In-memory (testing)
//! let store = Store::in_memory().await?;
//!
//! // Access repositories
//! let subs = store.subscriptions();
//! let active = subs.list_active().await?;
//! ```
//!
//! # Migrations
//!
//! The store carries a `schema_migrations` table with one row per applied
//! version. `connect` applies any missing migrations and fails fast when the
//! database reports a version newer than this binary understands.
//!
//! All writes are idempotent on natural keys: mapping fingerprint, schema
//! triple, subscription id.

pub mod db;
pub mod error;
pub mod models;
pub mod repos;

pub use db::Store;
pub use error::{Result, StoreError};
pub use models::{
    ChannelType, EventLogRow, FailoverPolicy, GateConfig, GateFilter, IngestMapping,
    MappingSource, Page, Subscription, SubscriptionEventLogRow, SubscriptionUpdate,
};
pub use repos::{
    EventLogRepo, MappingRepo, SchemaRepo, SubscriptionEventLogRepo, SubscriptionRepo,
};

impl Store {
    /// Subscription repository
    pub fn subscriptions(&self) -> SubscriptionRepo<'_> {
        SubscriptionRepo::new(self.db())
    }

    /// Ingest mapping repository
    pub fn mappings(&self) -> MappingRepo<'_> {
        MappingRepo::new(self.db())
    }

    /// Schema registry repository
    pub fn schema(&self) -> SchemaRepo<'_> {
        SchemaRepo::new(self.db())
    }

    /// Canonical event log repository
    pub fn event_logs(&self) -> EventLogRepo<'_> {
        EventLogRepo::new(self.db())
    }

    /// Per-subscription event log repository
    pub fn subscription_event_logs(&self) -> SubscriptionEventLogRepo<'_> {
        SubscriptionEventLogRepo::new(self.db())
    }
}

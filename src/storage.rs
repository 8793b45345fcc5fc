pub mod in_memory;
pub mod sqlite;

use crate::error::Result;
use crate::types::CanonicalRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use in_memory::InMemoryTableStore;
pub use sqlite::SqliteTableStore;

/// What a single keyed upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// A persisted canonical record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record: CanonicalRecord,
    /// Set whenever an existing row is overwritten
    pub updated_at: Option<DateTime<Utc>>,
}

/// Table of canonical records keyed uniquely by `dedup_key`
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Fail with `StorageUnavailable` when the store cannot be reached at all
    async fn check_connection(&self) -> Result<()>;

    /// Insert the record, or overwrite every field of the existing row with the
    /// same key except its original `created_at`.
    async fn upsert(&self, record: &CanonicalRecord) -> Result<UpsertOutcome>;

    async fn get(&self, dedup_key: &str) -> Result<Option<StoredRecord>>;

    async fn count(&self) -> Result<usize>;
}

use super::{StoredRecord, TableStore, UpsertOutcome};
use crate::error::{EtlError, Result};
use crate::types::CanonicalRecord;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// In-memory table store for development/testing
#[derive(Clone, Default)]
pub struct InMemoryTableStore {
    rows: Arc<Mutex<HashMap<String, StoredRecord>>>,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredRecord>>> {
        self.rows
            .lock()
            .map_err(|_| EtlError::StorageUnavailable("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn check_connection(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    async fn upsert(&self, record: &CanonicalRecord) -> Result<UpsertOutcome> {
        let mut rows = self.lock()?;
        match rows.get_mut(&record.dedup_key) {
            Some(existing) => {
                let created_at = existing.record.created_at;
                existing.record = record.clone();
                existing.record.created_at = created_at;
                existing.updated_at = Some(Utc::now());
                debug!("Updated record {}", record.dedup_key);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                rows.insert(
                    record.dedup_key.clone(),
                    StoredRecord {
                        record: record.clone(),
                        updated_at: None,
                    },
                );
                debug!("Inserted record {}", record.dedup_key);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn get(&self, dedup_key: &str) -> Result<Option<StoredRecord>> {
        Ok(self.lock()?.get(dedup_key).cloned())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }
}

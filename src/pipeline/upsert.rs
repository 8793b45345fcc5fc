use crate::error::Result;
use crate::storage::{TableStore, UpsertOutcome};
use crate::types::CanonicalRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Counts from one batch upsert. `new + updated + failed` equals the batch size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertReport {
    pub new: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Writes canonical records into the table store keyed by `dedup_key`
#[derive(Clone)]
pub struct Upserter {
    store: Arc<dyn TableStore>,
}

impl Upserter {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    /// Fails only when the store is unreachable; a record that cannot be
    /// written is counted as failed and the batch continues.
    pub async fn upsert_batch(&self, batch: &[CanonicalRecord]) -> Result<UpsertReport> {
        self.store.check_connection().await?;

        let mut report = UpsertReport::default();
        for record in batch {
            match self.store.upsert(record).await {
                Ok(UpsertOutcome::Inserted) => report.new += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Err(e) => {
                    warn!(dedup_key = %record.dedup_key, "Failed to upsert record: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Upserted batch of {}: {} new, {} updated, {} failed",
            batch.len(),
            report.new,
            report.updated,
            report.failed
        );
        Ok(report)
    }
}

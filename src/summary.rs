use crate::audit::{AuditEntry, AuditLog};
use crate::error::Result;
use crate::types::RunSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Aggregate of the audit log since it was last truncated.
///
/// Row totals cover completed and failed runs alike; a failed run contributes
/// whatever it reached before the error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub generated_at: Option<DateTime<Utc>>,
    /// Completed runs
    pub runs: usize,
    /// Runs that ended in a fatal error
    pub errors: usize,
    /// Error lines per pipeline stage
    pub errors_by_stage: BTreeMap<String, usize>,
    pub fetched: usize,
    pub new: usize,
    pub updated: usize,
    pub failed: usize,
    pub failed_partitions: Vec<String>,
    pub first_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_checksum: Option<String>,
}

impl DailySummary {
    pub fn from_entries(entries: &[AuditEntry]) -> Self {
        let mut summary = DailySummary {
            generated_at: Some(Utc::now()),
            ..Default::default()
        };

        for entry in entries {
            match entry {
                AuditEntry::Run {
                    at,
                    summary: run,
                    checksum,
                } => {
                    summary.runs += 1;
                    summary.add_rows(run);
                    if summary.first_run_at.map_or(true, |first| *at < first) {
                        summary.first_run_at = Some(*at);
                    }
                    if summary.last_run_at.map_or(true, |last| *at >= last) {
                        summary.last_run_at = Some(*at);
                        summary.last_checksum = Some(checksum.clone());
                    }
                }
                AuditEntry::Error {
                    stage,
                    summary: run,
                    ..
                } => {
                    summary.errors += 1;
                    summary.add_rows(run);
                    *summary
                        .errors_by_stage
                        .entry(stage.as_str().to_string())
                        .or_insert(0) += 1;
                }
            }
        }

        summary.failed_partitions.sort();
        summary
    }

    fn add_rows(&mut self, run: &RunSummary) {
        self.fetched += run.fetched;
        self.new += run.new;
        self.updated += run.updated;
        self.failed += run.failed;
        for partition in &run.failed_partitions {
            if !self.failed_partitions.contains(partition) {
                self.failed_partitions.push(partition.clone());
            }
        }
    }
}

/// Drain the audit log into a summary. The log is empty afterwards.
pub fn summarize_and_truncate(log: &AuditLog) -> Result<DailySummary> {
    let entries = log.drain()?;
    let summary = DailySummary::from_entries(&entries);
    info!(
        "Summarized {} runs and {} errors from {}",
        summary.runs,
        summary.errors,
        log.path().display()
    );
    Ok(summary)
}

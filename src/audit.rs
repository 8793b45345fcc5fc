use crate::error::{ErrorKind, EtlError, Result};
use crate::types::{PipelineRun, PipelineState, RunSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    /// Completed run with the checksum of its summary
    Run {
        at: DateTime<Utc>,
        summary: RunSummary,
        checksum: String,
    },
    /// Fatal error that ended a run, with the progress made before it
    Error {
        at: DateTime<Utc>,
        run_id: Uuid,
        stage: PipelineState,
        error_kind: ErrorKind,
        message: String,
        summary: RunSummary,
    },
}

/// Append-only newline-delimited JSON log of runs and errors
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
        debug!("Appended audit line to {}", self.path.display());
        Ok(())
    }

    /// Record a completed run. The checksum is computed here when the run
    /// does not carry one yet.
    pub fn record_run(&self, run: &PipelineRun) -> Result<()> {
        let summary = run.summary();
        let checksum = match &run.checksum {
            Some(checksum) => checksum.clone(),
            None => compute_checksum(&summary)?,
        };
        self.append(&AuditEntry::Run {
            at: Utc::now(),
            summary,
            checksum,
        })
    }

    pub fn record_error(&self, run: &PipelineRun, stage: PipelineState, error: &EtlError) -> Result<()> {
        self.append(&AuditEntry::Error {
            at: Utc::now(),
            run_id: run.run_id,
            stage,
            error_kind: error.kind(),
            message: error.to_string(),
            summary: run.summary(),
        })
    }

    /// All entries currently in the log. Unparseable lines are skipped.
    pub fn read_all(&self) -> Result<Vec<AuditEntry>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    "Skipping malformed audit line {} in {}: {}",
                    line_no + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }

    /// Read every entry and truncate the log.
    pub fn drain(&self) -> Result<Vec<AuditEntry>> {
        let entries = self.read_all()?;
        if self.path.exists() {
            File::create(&self.path)?;
        }
        Ok(entries)
    }
}

/// sha256 hex over the canonical JSON of a run summary.
///
/// `serde_json::Value` objects keep their keys sorted, so the bytes hashed do
/// not depend on struct field order.
pub fn compute_checksum(summary: &RunSummary) -> Result<String> {
    let value = serde_json::to_value(summary)?;
    let canonical = serde_json::to_string(&value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A transaction row as received from the source API. Every field is the raw
/// string; an empty string means the source did not provide it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRecord {
    pub apartment_name: String,
    pub district_code: String,
    pub district_name: String,
    pub dong_name: String,
    pub amount: String,
    pub area: String,
    pub construction_year: String,
    pub floor: String,
    pub transaction_date: String,
    pub registration_date: String,
}

/// The normalized, typed representation persisted by the upsert stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub dedup_key: String,
    pub district_code: String,
    pub district_name: String,
    pub dong_name: String,
    pub apartment_name: String,
    /// Transaction amount in won.
    pub amount_minor_unit: i64,
    pub area_sqm: f64,
    /// Area in pyeong.
    pub area_alt_unit: f64,
    /// Won per square metre; 0 when the area is unknown.
    pub price_per_area: i64,
    pub construction_year: Option<i32>,
    pub floor: Option<i32>,
    pub transaction_date: Option<NaiveDate>,
    pub registration_date: String,
    pub quality_score: u8,
    pub created_at: DateTime<Utc>,
}

/// Why the normalizer excluded a raw record from the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "value")]
pub enum SkipReason {
    /// District code, apartment name and transaction date are all blank.
    Unidentifiable,
    NegativeAmount(String),
    NegativeArea(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unidentifiable => write!(f, "no identifying fields"),
            SkipReason::NegativeAmount(raw) => write!(f, "negative amount '{raw}'"),
            SkipReason::NegativeArea(raw) => write!(f, "negative area '{raw}'"),
        }
    }
}

/// States of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Fetching,
    Normalizing,
    Deduplicating,
    Storing,
    Auditing,
    Notifying,
    Done,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Fetching => "fetching",
            PipelineState::Normalizing => "normalizing",
            PipelineState::Deduplicating => "deduplicating",
            PipelineState::Storing => "storing",
            PipelineState::Auditing => "auditing",
            PipelineState::Notifying => "notifying",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    /// The state that follows a successful completion of this one.
    pub fn next(&self) -> Option<PipelineState> {
        match self {
            PipelineState::Fetching => Some(PipelineState::Normalizing),
            PipelineState::Normalizing => Some(PipelineState::Deduplicating),
            PipelineState::Deduplicating => Some(PipelineState::Storing),
            PipelineState::Storing => Some(PipelineState::Auditing),
            PipelineState::Auditing => Some(PipelineState::Notifying),
            PipelineState::Notifying => Some(PipelineState::Done),
            PipelineState::Done | PipelineState::Failed => None,
        }
    }

    pub fn can_transition_to(&self, to: PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == PipelineState::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one end-to-end execution. Created when the orchestrator starts
/// and finalized once at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub state: PipelineState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub fetched: usize,
    pub normalized: usize,
    pub skipped: usize,
    pub deduplicated: usize,
    pub duplicates: usize,
    pub dedup_rate: f64,
    pub new: usize,
    pub updated: usize,
    pub failed: usize,
    pub failed_partitions: Vec<String>,
    pub checksum: Option<String>,
    pub notified: bool,
}

/// The checksummed part of a run: everything except the checksum itself and
/// the notification outcome that happens after the audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub fetched: usize,
    pub normalized: usize,
    pub skipped: usize,
    pub deduplicated: usize,
    pub duplicates: usize,
    pub new: usize,
    pub updated: usize,
    pub failed: usize,
    pub failed_partitions: Vec<String>,
}

impl PipelineRun {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: PipelineState::Fetching,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: 0,
            fetched: 0,
            normalized: 0,
            skipped: 0,
            deduplicated: 0,
            duplicates: 0,
            dedup_rate: 0.0,
            new: 0,
            updated: 0,
            failed: 0,
            failed_partitions: Vec::new(),
            checksum: None,
            notified: false,
        }
    }

    /// Move to `to`, refusing transitions the state machine does not allow.
    pub fn advance(&mut self, to: PipelineState) -> crate::error::Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(crate::error::EtlError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// Stamp the end time and duration.
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.duration_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
    }

    pub fn summary(&self) -> RunSummary {
        let mut failed_partitions = self.failed_partitions.clone();
        failed_partitions.sort();
        RunSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_ms: self.duration_ms,
            fetched: self.fetched,
            normalized: self.normalized,
            skipped: self.skipped,
            deduplicated: self.deduplicated,
            duplicates: self.duplicates,
            new: self.new,
            updated: self.updated,
            failed: self.failed,
            failed_partitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_order() {
        let mut state = PipelineState::Fetching;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            assert!(state.can_transition_to(next));
            state = next;
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                PipelineState::Fetching,
                PipelineState::Normalizing,
                PipelineState::Deduplicating,
                PipelineState::Storing,
                PipelineState::Auditing,
                PipelineState::Notifying,
                PipelineState::Done,
            ]
        );
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        assert!(PipelineState::Storing.can_transition_to(PipelineState::Failed));
        assert!(PipelineState::Fetching.can_transition_to(PipelineState::Failed));
        assert!(!PipelineState::Done.can_transition_to(PipelineState::Failed));
        assert!(!PipelineState::Failed.can_transition_to(PipelineState::Failed));
        // Stages cannot be skipped.
        assert!(!PipelineState::Fetching.can_transition_to(PipelineState::Storing));
    }

    #[test]
    fn test_run_rejects_out_of_order_transition() {
        let mut run = PipelineRun::start();
        assert!(run.advance(PipelineState::Deduplicating).is_err());
        assert_eq!(run.state, PipelineState::Fetching);
        run.advance(PipelineState::Normalizing).unwrap();
        assert_eq!(run.state, PipelineState::Normalizing);
    }

    #[test]
    fn test_summary_sorts_failed_partitions() {
        let mut run = PipelineRun::start();
        run.failed_partitions = vec!["11680".into(), "11110".into()];
        assert_eq!(run.summary().failed_partitions, vec!["11110", "11680"]);
    }
}

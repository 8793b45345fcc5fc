use crate::apis::{SourceApi, TransactionApiClient};
use crate::audit::{compute_checksum, AuditLog};
use crate::config::Config;
use crate::error::Result;
use crate::notify::{HttpNotifier, Notifier};
use crate::pipeline::dedup::Deduplicator;
use crate::pipeline::fetch::{FetchSettings, Fetcher};
use crate::pipeline::normalize::Normalizer;
use crate::pipeline::upsert::Upserter;
use crate::storage::{SqliteTableStore, TableStore};
use crate::tasks::{RetryPolicy, StagePolicy, TaskRunner};
use crate::types::{PipelineRun, PipelineState};
use chrono::{DateTime, Datelike, Utc};
use metrics::{counter, histogram};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Source of the wall-clock time a run starts at
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Sequences fetch, normalize, dedup, store, audit and notify for one run.
///
/// The query month and the scoring year are taken from the clock at the start
/// of every run, so one long-lived orchestrator follows the calendar.
pub struct PipelineOrchestrator {
    fetcher: Fetcher,
    /// Fixed normalizer; when unset one is built per run from the clock
    normalizer: Option<Normalizer>,
    deduplicator: Deduplicator,
    upserter: Upserter,
    audit: AuditLog,
    notifier: Option<Arc<dyn Notifier>>,
    runner: TaskRunner,
    clock: Clock,
}

impl PipelineOrchestrator {
    pub fn new(fetcher: Fetcher, upserter: Upserter, audit: AuditLog, runner: TaskRunner) -> Self {
        Self {
            fetcher,
            normalizer: None,
            deduplicator: Deduplicator::new(),
            upserter,
            audit,
            notifier: None,
            runner,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Wire the production collaborators: the public transaction API, the
    /// SQLite store and, when configured, the HTTP notifier.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let source: Arc<dyn SourceApi> = Arc::new(TransactionApiClient::from_config(&config.source)?);
        let store: Arc<dyn TableStore> = Arc::new(SqliteTableStore::open(&config.storage.db_path)?);
        let runner = TaskRunner::new(StagePolicy::new(RetryPolicy::from(&config.retry)));

        let mut orchestrator = Self::new(
            Fetcher::new(source, FetchSettings::from_config(&config.source)),
            Upserter::new(store),
            AuditLog::new(&config.audit.log_path),
            runner,
        );
        if let Some(notifier) = HttpNotifier::from_config(&config.notify)? {
            orchestrator = orchestrator.with_notifier(Arc::new(notifier));
        }
        Ok(orchestrator)
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Execute one run. On a fatal error the run is marked failed, an error
    /// line is appended to the audit log and the stage-tagged error returned.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<PipelineRun> {
        let now = (self.clock)();
        let mut run = PipelineRun::start();
        info!(run_id = %run.run_id, "Starting pipeline run");
        counter!("etl_pipeline_runs_total").increment(1);

        match self.execute(&mut run, now).await {
            Ok(()) => {
                histogram!("etl_pipeline_duration_seconds").record(run.duration_ms as f64 / 1000.0);
                info!(
                    run_id = %run.run_id,
                    "Pipeline run done in {} ms: {} fetched, {} new, {} updated, {} failed",
                    run.duration_ms,
                    run.fetched,
                    run.new,
                    run.updated,
                    run.failed
                );
                Ok(run)
            }
            Err(err) => {
                let stage = run.state;
                run.advance(PipelineState::Failed)?;
                run.finish();
                error!(run_id = %run.run_id, stage = %stage, "Pipeline run failed: {}", err);
                counter!("etl_pipeline_failures_total", "stage" => stage.as_str()).increment(1);

                if let Err(audit_err) = self.audit.record_error(&run, stage, &err) {
                    warn!("Failed to append audit error line: {}", audit_err);
                }
                Err(err.in_stage(stage))
            }
        }
    }

    async fn execute(&self, run: &mut PipelineRun, now: DateTime<Utc>) -> Result<()> {
        let year_month = self.fetcher.settings().year_month_at(now);
        let normalizer = self.normalizer.unwrap_or_else(|| Normalizer::new(now.year()));
        debug!(run_id = %run.run_id, year_month = %year_month, "Resolved run period");

        let fetched = self
            .runner
            .run_stage(PipelineState::Fetching, || self.fetcher.fetch_all(&year_month))
            .await?;
        run.fetched = fetched.records.len();
        run.failed_partitions = fetched.failed_partitions;

        run.advance(PipelineState::Normalizing)?;
        let normalized = normalizer.normalize_batch(fetched.records);
        run.normalized = normalized.records.len();
        run.skipped = normalized.skipped_count();

        run.advance(PipelineState::Deduplicating)?;
        let deduped = self.deduplicator.deduplicate(normalized.records);
        run.deduplicated = deduped.records.len();
        run.duplicates = deduped.duplicates;
        run.dedup_rate = deduped.dedup_rate;

        run.advance(PipelineState::Storing)?;
        let batch = deduped.records;
        let stored = self
            .runner
            .run_stage(PipelineState::Storing, || self.upserter.upsert_batch(&batch))
            .await?;
        run.new = stored.new;
        run.updated = stored.updated;
        run.failed = stored.failed;

        run.advance(PipelineState::Auditing)?;
        run.finish();
        run.checksum = Some(compute_checksum(&run.summary())?);
        if let Err(e) = self.audit.record_run(run) {
            // Records are already stored; losing the audit line must not fail the run.
            warn!(run_id = %run.run_id, "Failed to append audit run line: {}", e);
        }

        run.advance(PipelineState::Notifying)?;
        match &self.notifier {
            Some(notifier) => match notifier.notify(run).await {
                Ok(()) => run.notified = true,
                Err(e) => warn!(run_id = %run.run_id, "Downstream notification failed: {}", e),
            },
            None => debug!("No notifier configured"),
        }

        run.advance(PipelineState::Done)?;
        Ok(())
    }
}


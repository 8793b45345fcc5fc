use crate::config::RetryConfig;
use crate::error::Result;
use crate::types::PipelineState;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use metrics::{counter, histogram};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How many times a stage is retried after a transient failure, and how long
/// to wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, Duration::from_secs(config.delay_seconds))
    }
}

/// Per-stage retry assignment: network-bound stages (fetch, store) retry,
/// pure stages never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicy {
    retrying: RetryPolicy,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self::new(RetryPolicy::new(3, Duration::from_secs(300)))
    }
}

impl StagePolicy {
    pub fn new(retrying: RetryPolicy) -> Self {
        Self { retrying }
    }

    pub fn for_stage(&self, stage: PipelineState) -> RetryPolicy {
        match stage {
            PipelineState::Fetching | PipelineState::Storing => self.retrying,
            _ => RetryPolicy::none(),
        }
    }
}

/// Runs pipeline stages under their retry policy
#[derive(Debug, Clone, Default)]
pub struct TaskRunner {
    policy: StagePolicy,
}

impl TaskRunner {
    pub fn new(policy: StagePolicy) -> Self {
        Self { policy }
    }

    /// Run `task` until it succeeds, fails with a fatal error, or exhausts the
    /// stage's retries. The returned error is tagged with the stage.
    pub async fn run_stage<T, F, Fut>(&self, stage: PipelineState, mut task: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self.policy.for_stage(stage);
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            match task().await {
                Ok(value) => {
                    let elapsed = started.elapsed();
                    histogram!("etl_stage_duration_seconds", "stage" => stage.as_str())
                        .record(elapsed.as_secs_f64());
                    if attempt > 0 {
                        info!(stage = %stage, attempt, "Stage succeeded after retry");
                    } else {
                        debug!(stage = %stage, "Stage completed in {:?}", elapsed);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < policy.max_retries => {
                    attempt += 1;
                    warn!(
                        stage = %stage,
                        attempt,
                        max_retries = policy.max_retries,
                        "Transient failure, retrying in {:?}: {}",
                        policy.delay,
                        e
                    );
                    counter!("etl_stage_retries_total", "stage" => stage.as_str()).increment(1);
                    tokio::time::sleep(policy.delay).await;
                }
                Err(e) => return Err(e.in_stage(stage)),
            }
        }
    }
}

/// Next daily run time: the upcoming midnight UTC strictly after `now`.
pub fn next_daily_run(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    tomorrow.and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EtlError, ErrorKind};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_runner(max_retries: u32) -> TaskRunner {
        TaskRunner::new(StagePolicy::new(RetryPolicy::new(max_retries, Duration::ZERO)))
    }

    #[test]
    fn test_default_policy_per_stage() {
        let policy = StagePolicy::default();
        let retrying = RetryPolicy::new(3, Duration::from_secs(300));
        assert_eq!(policy.for_stage(PipelineState::Fetching), retrying);
        assert_eq!(policy.for_stage(PipelineState::Storing), retrying);
        assert_eq!(policy.for_stage(PipelineState::Normalizing), RetryPolicy::none());
        assert_eq!(policy.for_stage(PipelineState::Deduplicating), RetryPolicy::none());
    }

    #[tokio::test]
    async fn test_transient_error_is_retried_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_runner(3)
            .run_stage(PipelineState::Fetching, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(EtlError::Timeout { partition: "11110".into() })
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let err = fast_runner(3)
            .run_stage(PipelineState::Storing, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(EtlError::StorageUnavailable("down".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(err, EtlError::Stage { stage: PipelineState::Storing, .. }));
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast_runner(3)
            .run_stage(PipelineState::Fetching, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(EtlError::NoData)
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn test_non_retrying_stage_runs_once() {
        let calls = AtomicU32::new(0);
        let _ = fast_runner(3)
            .run_stage(PipelineState::Normalizing, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(EtlError::Timeout { partition: "x".into() })
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_next_daily_run() {
        let now = Utc.with_ymd_and_hms(2024, 6, 7, 15, 30, 0).unwrap();
        assert_eq!(next_daily_run(now), Utc.with_ymd_and_hms(2024, 6, 8, 0, 0, 0).unwrap());

        let midnight = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        assert_eq!(next_daily_run(midnight), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }
}

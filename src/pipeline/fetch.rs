use crate::apis::{PageQuery, SourceApi};
use crate::config::SourceConfig;
use crate::constants;
use crate::error::{EtlError, Result};
use crate::types::RawRecord;
use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Fetch parameters shared by every partition task
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub partitions: Vec<String>,
    /// Pinned `YYYYMM`; when unset each run queries the month it starts in
    pub year_month: Option<String>,
    pub page_size: usize,
    pub max_pages: usize,
    pub concurrency: usize,
    /// Deadline for a single page request
    pub page_timeout: Duration,
}

impl FetchSettings {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            partitions: config.partitions.clone(),
            year_month: config.year_month.clone(),
            page_size: config.page_size,
            max_pages: config.max_pages,
            concurrency: config.concurrency,
            page_timeout: config.timeout(),
        }
    }

    /// Month to query for a run starting at `now`
    pub fn year_month_at(&self, now: DateTime<Utc>) -> String {
        self.year_month
            .clone()
            .unwrap_or_else(|| now.format("%Y%m").to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// Rows of every successful partition, in configured partition order
    pub records: Vec<RawRecord>,
    pub failed_partitions: Vec<String>,
}

/// Fans out one task per partition, bounded by a semaphore.
pub struct Fetcher {
    source: Arc<dyn SourceApi>,
    settings: Arc<FetchSettings>,
}

impl Fetcher {
    pub fn new(source: Arc<dyn SourceApi>, settings: FetchSettings) -> Self {
        Self {
            source,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Fetch all partitions for `year_month`. A failed partition is logged and
    /// left out; the call fails only when every partition failed or nothing
    /// came back.
    #[instrument(skip(self), fields(source = self.source.source_name()))]
    pub async fn fetch_all(&self, year_month: &str) -> Result<FetchReport> {
        let partitions = &self.settings.partitions;
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, partition) in partitions.iter().enumerate() {
            let source = Arc::clone(&self.source);
            let settings = Arc::clone(&self.settings);
            let semaphore = Arc::clone(&semaphore);
            let partition = partition.clone();
            let year_month = year_month.to_string();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result =
                    fetch_partition(source.as_ref(), &settings, &year_month, &partition).await;
                (index, partition, result)
            });
        }

        let mut slots: Vec<Option<Vec<RawRecord>>> = vec![None; partitions.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, partition, Ok(records))) => {
                    debug!("Partition {} returned {} records", partition, records.len());
                    slots[index] = Some(records);
                }
                Ok((_, partition, Err(e))) => {
                    warn!(partition = %partition, "Partition fetch failed, continuing without it: {}", e);
                    counter!("etl_partition_failures_total", "partition" => partition).increment(1);
                }
                Err(e) => warn!("Partition task did not complete: {}", e),
            }
        }

        let mut report = FetchReport::default();
        for (partition, slot) in partitions.iter().zip(slots) {
            match slot {
                Some(records) => report.records.extend(records),
                None => report.failed_partitions.push(partition.clone()),
            }
        }

        if !partitions.is_empty() && report.failed_partitions.len() == partitions.len() {
            return Err(EtlError::SourceUnavailable {
                partitions: partitions.len(),
            });
        }
        if report.records.is_empty() {
            return Err(EtlError::NoData);
        }

        counter!("etl_records_fetched_total").increment(report.records.len() as u64);
        info!(
            "Fetched {} records from {} partitions ({} failed) in {:?}",
            report.records.len(),
            partitions.len() - report.failed_partitions.len(),
            report.failed_partitions.len(),
            started.elapsed()
        );
        Ok(report)
    }
}

/// Page through one partition. Any page failure discards the whole partition.
async fn fetch_partition(
    source: &dyn SourceApi,
    settings: &FetchSettings,
    year_month: &str,
    partition: &str,
) -> Result<Vec<RawRecord>> {
    let mut records = Vec::new();

    for page_no in 1..=settings.max_pages {
        let query = PageQuery {
            partition: partition.to_string(),
            year_month: year_month.to_string(),
            page_size: settings.page_size,
            page_no,
        };
        let page = tokio::time::timeout(settings.page_timeout, source.fetch_page(&query))
            .await
            .map_err(|_| EtlError::Timeout {
                partition: partition.to_string(),
            })??;

        let received = page.records.len();
        records.extend(page.records);

        let reached_total = page.total_count.is_some_and(|total| records.len() >= total);
        if received < settings.page_size || reached_total {
            return Ok(fill_district(records, partition));
        }
        if page_no == settings.max_pages {
            warn!(
                partition,
                "Stopped after {} pages; remaining rows were not fetched", settings.max_pages
            );
        }
    }

    Ok(fill_district(records, partition))
}

/// The source omits district fields on some rows; the partition is the district.
fn fill_district(mut records: Vec<RawRecord>, partition: &str) -> Vec<RawRecord> {
    for record in &mut records {
        if record.district_code.trim().is_empty() {
            record.district_code = partition.to_string();
        }
        if record.district_name.trim().is_empty() {
            if let Some(name) = constants::district_name(record.district_code.trim()) {
                record.district_name = name.to_string();
            }
        }
    }
    records
}

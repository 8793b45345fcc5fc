pub mod payload;
pub mod transaction_api;

use crate::error::Result;
use crate::types::RawRecord;
use async_trait::async_trait;

pub use transaction_api::TransactionApiClient;

/// One page request against a single partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub partition: String,
    pub year_month: String,
    pub page_size: usize,
    pub page_no: usize,
}

/// One decoded page of transaction rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePage {
    pub records: Vec<RawRecord>,
    /// Total rows the source reports for the whole query, when it says.
    pub total_count: Option<usize>,
}

/// Upstream source of raw transaction rows
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// Identifier used in logs
    fn source_name(&self) -> &'static str;

    /// Fetch one page for one partition
    async fn fetch_page(&self, query: &PageQuery) -> Result<SourcePage>;
}

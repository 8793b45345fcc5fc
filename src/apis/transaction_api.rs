use crate::apis::{payload, PageQuery, SourceApi, SourcePage};
use crate::config::SourceConfig;
use crate::error::{EtlError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

/// Client for the public apartment trade transaction API
pub struct TransactionApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TransactionApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EtlError::Config(
                "source API key is not set (SOURCE_API_KEY)".to_string(),
            ));
        }
        Self::new(config.base_url.clone(), config.api_key.clone(), config.timeout())
    }

    fn page_request(&self, query: &PageQuery) -> reqwest::RequestBuilder {
        let page_size = query.page_size.to_string();
        let page_no = query.page_no.to_string();
        self.client.get(&self.base_url).query(&[
            ("serviceKey", self.api_key.as_str()),
            ("LAWD_CD", query.partition.as_str()),
            ("DEAL_YMD", query.year_month.as_str()),
            ("numOfRows", page_size.as_str()),
            ("pageNo", page_no.as_str()),
        ])
    }
}

#[async_trait]
impl SourceApi for TransactionApiClient {
    fn source_name(&self) -> &'static str {
        "apt_trade"
    }

    #[instrument(skip(self), fields(partition = %query.partition, page = query.page_no))]
    async fn fetch_page(&self, query: &PageQuery) -> Result<SourcePage> {
        let response = self.page_request(query).send().await.map_err(|e| {
            if e.is_timeout() {
                EtlError::Timeout {
                    partition: query.partition.clone(),
                }
            } else {
                EtlError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EtlError::SourceStatus {
                partition: query.partition.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        debug!("Received {} bytes", body.len());
        payload::decode(&body)
    }
}

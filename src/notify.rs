use crate::config::NotifyConfig;
use crate::error::{EtlError, Result};
use crate::types::PipelineRun;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::info;

/// Downstream side channel told about each successfully stored run
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, run: &PipelineRun) -> Result<()>;
}

/// POSTs the run as JSON to a fixed endpoint
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    /// `None` when no endpoint is configured
    pub fn from_config(config: &NotifyConfig) -> Result<Option<Self>> {
        match config.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => Ok(Some(Self::new(
                endpoint,
                Duration::from_secs(config.timeout_seconds),
            )?)),
            _ => Ok(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, run: &PipelineRun) -> Result<()> {
        let response = self.client.post(&self.endpoint).json(run).send().await?;
        let status = response.status();
        if status == StatusCode::OK {
            info!(run_id = %run.run_id, "Notified {}", self.endpoint);
            Ok(())
        } else {
            Err(EtlError::Api {
                message: format!("notification endpoint {} returned {}", self.endpoint, status),
            })
        }
    }
}

use crate::constants;
use crate::error::{EtlError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "etl.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub storage: StorageConfig,
    pub audit: AuditConfig,
    pub notify: NotifyConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub api_key: String,
    /// District codes fetched as independent partitions
    pub partitions: Vec<String>,
    /// `YYYYMM`; the current UTC month when unset
    pub year_month: Option<String>,
    pub page_size: usize,
    pub max_pages: usize,
    pub concurrency: usize,
    pub timeout_seconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: constants::DEFAULT_SOURCE_BASE_URL.to_string(),
            api_key: String::new(),
            partitions: constants::default_partitions(),
            year_month: None,
            page_size: 1000,
            max_pages: 10,
            concurrency: 4,
            timeout_seconds: 30,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/transactions.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub log_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("data/audit/etl_errors.ndjson"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Alert-evaluation endpoint called after storage; disabled when unset
    pub endpoint: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_seconds: 300,
        }
    }
}

impl Config {
    /// Load from a TOML file (defaults when the file is absent), then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(config_path).map_err(|e| {
                EtlError::Config(format!(
                    "Failed to read config file '{}': {}",
                    config_path.display(),
                    e
                ))
            })?;
            Self::from_toml(&content)?
        } else if path.is_some() {
            return Err(EtlError::Config(format!(
                "Config file '{}' does not exist",
                config_path.display()
            )));
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(key) = var("SOURCE_API_KEY") {
            self.source.api_key = key;
        }
        if let Some(url) = var("SOURCE_BASE_URL") {
            self.source.base_url = url;
        }
        if let Some(ym) = var("ETL_YEAR_MONTH") {
            self.source.year_month = Some(ym);
        }
        if let Some(path) = var("ETL_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(path) = var("ETL_AUDIT_LOG") {
            self.audit.log_path = PathBuf::from(path);
        }
        if let Some(url) = var("ETL_NOTIFY_URL") {
            self.notify.endpoint = Some(url);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.page_size == 0 {
            return Err(EtlError::Config("source.page_size must be > 0".into()));
        }
        if self.source.concurrency == 0 {
            return Err(EtlError::Config("source.concurrency must be > 0".into()));
        }
        if self.source.max_pages == 0 {
            return Err(EtlError::Config("source.max_pages must be > 0".into()));
        }
        if self.source.partitions.is_empty() {
            return Err(EtlError::Config("source.partitions must not be empty".into()));
        }
        if let Some(ym) = &self.source.year_month {
            let valid = ym.len() == 6 && ym.chars().all(|c| c.is_ascii_digit());
            if !valid {
                return Err(EtlError::Config(format!(
                    "source.year_month must be YYYYMM, got '{ym}'"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.delay_seconds, 300);
        assert_eq!(config.source.partitions.len(), 25);
        assert!(config.notify.endpoint.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [source]
            partitions = ["11680", "11650"]
            year_month = "202406"
            concurrency = 2

            [notify]
            endpoint = "http://alerts.internal/evaluate"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.source.partitions, vec!["11680", "11650"]);
        assert_eq!(config.source.year_month.as_deref(), Some("202406"));
        assert_eq!(config.source.page_size, 1000);
        assert_eq!(
            config.notify.endpoint.as_deref(),
            Some("http://alerts.internal/evaluate")
        );
        assert_eq!(config.retry.delay_seconds, 300);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.source.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.source.partitions.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.source.year_month = Some("2024-06".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/etl.toml"))).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }
}

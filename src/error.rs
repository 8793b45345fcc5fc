use crate::types::PipelineState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API error: {message}")]
    Api { message: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Source returned HTTP {status} for partition {partition}")]
    SourceStatus { partition: String, status: u16 },

    #[error("Source request timed out for partition {partition}")]
    Timeout { partition: String },

    #[error("All {partitions} source partitions failed")]
    SourceUnavailable { partitions: usize },

    #[error("No records received from source")]
    NoData,

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid pipeline transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: PipelineState,
        #[source]
        source: Box<EtlError>,
    },
}

/// How the task runner should treat an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, API or storage connectivity; worth another attempt.
    Transient,
    /// Retrying will not help.
    Fatal,
}

impl EtlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::Http(_)
            | EtlError::Api { .. }
            | EtlError::SourceStatus { .. }
            | EtlError::Timeout { .. }
            | EtlError::SourceUnavailable { .. }
            | EtlError::StorageUnavailable(_) => ErrorKind::Transient,
            EtlError::Database { .. } => ErrorKind::Transient,
            EtlError::Stage { source, .. } => source.kind(),
            EtlError::Io(_)
            | EtlError::Json(_)
            | EtlError::Toml(_)
            | EtlError::Config(_)
            | EtlError::InvalidTransition { .. }
            | EtlError::NoData => ErrorKind::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Wrap this error with the pipeline state it occurred in.
    pub fn in_stage(self, stage: PipelineState) -> Self {
        match self {
            already @ EtlError::Stage { .. } => already,
            other => EtlError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn database(message: impl std::fmt::Display) -> Self {
        EtlError::Database {
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

pub mod apis;
pub mod audit;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod storage;
pub mod summary;
pub mod tasks;
pub mod types;

pub use error::{EtlError, Result};

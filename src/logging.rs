use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the logging system with both console and file output.
///
/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process.
pub fn init_logging(log_dir: &Path) -> WorkerGuard {
    // Ensure logs directory exists
    let _ = fs::create_dir_all(log_dir);

    // Create a non-blocking file appender for daily log rotation
    let file_appender = tracing_appender::rolling::daily(log_dir, "etl.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    // JSON for the file, human-readable for the console
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_writer(std::io::stdout);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("apt_etl=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    guard
}

use anyhow::Context;
use apt_etl::audit::AuditLog;
use apt_etl::config::Config;
use apt_etl::logging;
use apt_etl::pipeline::PipelineOrchestrator;
use apt_etl::summary::summarize_and_truncate;
use apt_etl::tasks::next_daily_run;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "apt_etl")]
#[command(about = "Apartment transaction ETL pipeline")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML config file (defaults to ./etl.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for rolling log files
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one pipeline run and print the run record
    Run,
    /// Run the pipeline every day at 00:00 UTC
    Schedule,
    /// Print the summary of the audit log and truncate it
    Summary,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _guard = logging::init_logging(&cli.log_dir);

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run => {
            let orchestrator =
                PipelineOrchestrator::from_config(&config).context("Failed to build pipeline")?;
            let run = orchestrator.run().await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        Commands::Schedule => {
            let orchestrator =
                PipelineOrchestrator::from_config(&config).context("Failed to build pipeline")?;
            loop {
                let next = next_daily_run(Utc::now());
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                info!("Next pipeline run at {} (in {:?})", next, wait);
                tokio::time::sleep(wait).await;

                // Runs are awaited in turn, so they never overlap.
                match orchestrator.run().await {
                    Ok(run) => info!(run_id = %run.run_id, "Scheduled run finished"),
                    Err(e) => error!("Scheduled run failed: {}", e),
                }
            }
        }
        Commands::Summary => {
            let log = AuditLog::new(&config.audit.log_path);
            let summary = summarize_and_truncate(&log)
                .with_context(|| format!("Failed to summarize {}", log.path().display()))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}


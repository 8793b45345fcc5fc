use apt_etl::config::Config;
use apt_etl::storage::{SqliteTableStore, TableStore};
use clap::Parser;
use std::path::PathBuf;

/// Print the stored transaction for a dedup key
#[derive(Parser)]
#[command(name = "check-record")]
struct Args {
    /// Dedup key (64 hex chars)
    dedup_key: String,

    /// SQLite database path; defaults to the configured one
    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let db_path = match args.db {
        Some(path) => path,
        None => Config::load(args.config.as_deref())?.storage.db_path,
    };

    println!("Opening {}...", db_path.display());
    let store = SqliteTableStore::open(&db_path)?;
    println!("{} records stored", store.count().await?);

    match store.get(args.dedup_key.trim()).await? {
        Some(stored) => println!("{}", serde_json::to_string_pretty(&stored)?),
        None => println!("Record {} not found", args.dedup_key),
    }

    Ok(())
}

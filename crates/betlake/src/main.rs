use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use betlake_bucket::{BucketStore, S3BucketStore, S3Config};
use betlake_core::{promote, run, Config};
use betlake_ingest::{IngestConfig, Poller};

#[derive(Parser, Debug)]
#[command(author, version, about = "Bets lakehouse pipeline CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the upstream feed and land day-partitioned objects
    Ingest(IngestArgs),
    /// Consolidate one ingested day into the raw layer
    PromoteRaw(DayArgs),
    /// Merge one raw day into the master and analytics tables
    Merge(DayArgs),
    /// Seed an empty control log with a pending entry for a day
    BootstrapControl(BootstrapArgs),
}

#[derive(Args, Debug, Default)]
struct IngestArgs {
    /// Rowversion tag to start from when the store holds no files yet
    #[arg(long)]
    initial_timestamp: Option<String>,
}

#[derive(Args, Debug, Default)]
struct DayArgs {
    /// Day to process as YYYYMMDD; defaults to yesterday
    #[arg(long)]
    day: Option<String>,
}

#[derive(Args, Debug)]
struct BootstrapArgs {
    /// First day the merge stage should process, as YYYYMMDD
    #[arg(long)]
    day: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Ingest(args) => {
            let store = connect_store().await?;
            let config = IngestConfig::from_env()?;
            let poller = Poller::new(store, config);
            poller.run(args.initial_timestamp.as_deref()).await?;
            Ok(())
        }
        Command::PromoteRaw(args) => {
            let store = connect_store().await?;
            let config = Config::from_env()?;
            let day = resolve_day(&config, args.day);
            let report = promote::promote_day(store.as_ref(), &config, &day).await?;
            info!(
                day = %report.day,
                rows = report.rows,
                batches = report.batches,
                "raw promotion finished"
            );
            Ok(())
        }
        Command::Merge(args) => {
            let store = connect_store().await?;
            let config = Config::from_env()?;
            let day = resolve_day(&config, args.day);
            let report = run::run_day(store.as_ref(), &config, &day).await?;
            info!(
                day = %report.day,
                rows = report.rows,
                relocated = report.relocated,
                stale_dropped = report.stale_dropped,
                "merge finished"
            );
            Ok(())
        }
        Command::BootstrapControl(args) => {
            let store = connect_store().await?;
            let config = Config::from_env()?;
            run::bootstrap_control(store.as_ref(), &config, &args.day).await?;
            info!(day = %args.day, "control log bootstrapped");
            Ok(())
        }
    }
}

fn resolve_day(config: &Config, override_day: Option<String>) -> String {
    match override_day {
        Some(day) => day,
        None => config.resolve_day(),
    }
}

async fn connect_store() -> Result<Arc<dyn BucketStore>> {
    let endpoint = std::env::var("AWS_ENDPOINT_URL").ok().filter(|v| !v.is_empty());
    let config = S3Config {
        region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-2".to_string()),
        force_path_style: endpoint.is_some(),
        endpoint,
        access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
        secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
    };
    let store = S3BucketStore::new(config).await?;
    Ok(Arc::new(store))
}

//! polywatch - prediction-market surveillance pipeline.
//!
//! Ingests public market metadata and trade feeds, runs windowed anomaly
//! detectors over the trade stream, aggregates detections into per-market
//! alerts and dispatches them to subscribers.

use anyhow::Result;
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing::error;

use polywatch::cli::{commands, WorkerKind};
use polywatch::config::Config;

/// Prediction-market surveillance pipeline
#[derive(Parser)]
#[command(name = "polywatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "polywatch.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the pipeline workers
    Run {
        /// Which worker to run
        #[arg(long, value_enum, default_value = "all")]
        worker: WorkerKind,

        /// Log outgoing notifications instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Create the database schema (idempotent)
    InitDb,

    /// Re-run signals and scoring over stored trades after wiping derived state
    Replay {
        /// Start date (YYYY-MM-DD, UTC)
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD, UTC)
        #[arg(long)]
        end: String,

        /// Trades per replay batch
        #[arg(long, default_value = "500")]
        batch_size: usize,
    },

    /// Record per-alert price deltas into backtest_results
    Backtest,

    /// Show current configuration (secrets masked)
    Config,
}

fn parse_day(value: &str) -> Result<chrono::DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid")))
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("polywatch={}", config.log.level))
    });
    if config.log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            std::process::exit(1);
        }
    };

    init_tracing(&config);

    let result = match cli.command {
        Commands::Run { worker, dry_run } => commands::run(&config, worker, dry_run).await,
        Commands::InitDb => commands::init_db(&config),
        Commands::Replay { start, end, batch_size } => {
            let start = parse_day(&start)?;
            let end = parse_day(&end)?;
            commands::replay(&config, start, end, batch_size)
        }
        Commands::Backtest => commands::run_backtest(&config),
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("command failed: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

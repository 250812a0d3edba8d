#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line driver for the charge map pipeline.
//!
//! Exit codes for the `refresh` subcommand follow the scheduler
//! contract: 0 success, 2 cycle-in-progress, 3 upstream-error,
//! 4 promotion-failed, 5 partial completion.

use std::time::{Duration, Instant};

use charge_map_refresh::{RefreshConfig, exit_code, run_cycle};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "charge-map", about = "EV charging infrastructure map toolchain")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one refresh cycle (or resume a yielded one).
    Refresh {
        /// Yield the ZIP sub-pipeline after this many seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// ZIPs per sub-pipeline chunk.
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Download county boundaries from TIGERweb into the topology table.
    IngestBoundaries,

    /// Download the ZIP-to-county crosswalk CSV.
    IngestCrosswalk {
        /// URL of the crosswalk CSV.
        #[arg(long)]
        url: String,
    },

    /// Download VMT figures and replace the per-county table.
    IngestVmt,
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init_custom_env("RUST_LOG");

    let cli = Cli::parse();

    let db = match charge_map_database::db::connect_from_env().await {
        Ok(db) => db,
        Err(e) => {
            log::error!("Failed to connect to database: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = charge_map_database::run_migrations(db.as_ref()).await {
        log::error!("Failed to run migrations: {e}");
        std::process::exit(1);
    }

    let client = reqwest::Client::builder()
        .user_agent("charge-map/0.1")
        .build()
        .expect("Failed to build HTTP client");

    match cli.command {
        Command::Refresh {
            deadline_secs,
            chunk_size,
        } => {
            let mut config = RefreshConfig::from_env();
            if let Some(secs) = deadline_secs {
                config.zip_options.deadline = Some(Instant::now() + Duration::from_secs(secs));
            }
            if let Some(size) = chunk_size {
                config.zip_options.chunk_size = size;
            }

            let result = run_cycle(db.as_ref(), &client, &config).await;
            match &result {
                Ok(report) => log::info!("{}: {}", report.cycle_id, report.message),
                Err(e) => log::error!("Refresh cycle failed: {e}"),
            }
            std::process::exit(exit_code(&result));
        }
        Command::IngestBoundaries => {
            match charge_map_geography::ingest::ingest_all_counties(db.as_ref()).await {
                Ok(count) => log::info!("Ingested {count} county boundaries"),
                Err(e) => {
                    log::error!("Boundary ingestion failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::IngestCrosswalk { url } => {
            match charge_map_geography::ingest::ingest_zip_crosswalk(db.as_ref(), &client, &url)
                .await
            {
                Ok(count) => log::info!("Ingested {count} crosswalk mappings"),
                Err(e) => {
                    log::error!("Crosswalk ingestion failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::IngestVmt => {
            let Some(config) = charge_map_census::vmt::VmtConfig::from_env() else {
                log::error!("VMT_API_URL is not set");
                std::process::exit(1);
            };
            match charge_map_census::vmt::ingest_vmt(db.as_ref(), &client, &config, chrono::Utc::now())
                .await
            {
                Ok(count) => log::info!("Ingested VMT for {count} counties"),
                Err(e) => {
                    log::error!("VMT ingestion failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

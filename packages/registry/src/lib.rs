#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Upstream station registry client and ingestion driver.
//!
//! Raw registry records are normalized into canonical stations at this
//! boundary; per-record validation failures are counted, never fatal.
//! The driver writes to the staging station table only.

pub mod ingest;
pub mod normalize;

use serde::Deserialize;

/// Errors that can occur while talking to the registry or writing
/// staging rows.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Staging write failed.
    #[error("Database error: {0}")]
    Database(#[from] charge_map_database::DbError),
}

/// Registry endpoint configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Registry endpoint URL.
    pub api_url: String,
    /// Credential passed as the `api_key` query parameter.
    pub api_key: String,
}

impl RegistryConfig {
    /// Builds the config from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("STATIONS_API_URL").unwrap_or_else(|_| {
                "https://developer.nrel.gov/api/alt-fuel-stations/v1.json".to_string()
            }),
            api_key: std::env::var("STATIONS_API_KEY").unwrap_or_default(),
        }
    }
}

/// The registry's response envelope.
#[derive(Debug, Deserialize)]
pub struct RegistryResponse {
    /// The station records.
    pub fuel_stations: Vec<charge_map_station_models::RawStation>,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Canonical stations written to staging.
    pub inserted: u64,
    /// Raw records rejected by the normalizer.
    pub rejected: u64,
}

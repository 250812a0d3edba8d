//! Ingestion driver: full registry fetch into the staging station table.
//!
//! The staging table is emptied before the first chunk, so a rerun after
//! a mid-ingest failure starts clean. Chunks insert with a short pause
//! between them for backpressure; any chunk error aborts the run and the
//! cycle surfaces it as an upstream failure.

use std::collections::BTreeMap;
use std::time::Duration;

use charge_map_database::{Tier, stations};
use charge_map_station_models::Station;
use chrono::{DateTime, Utc};
use switchy_database::Database;

use crate::{IngestSummary, RegistryConfig, RegistryError, RegistryResponse, normalize};

/// Rows per staging insert chunk.
pub const CHUNK_SIZE: usize = 1000;

/// Pause between chunks.
pub const CHUNK_PAUSE: Duration = Duration::from_millis(100);

/// Builds the registry request URL: the full set of active US electric
/// stations in one response.
#[must_use]
pub fn request_url(config: &RegistryConfig) -> String {
    format!(
        "{}?api_key={}&fuel_type=ELEC&country=US&limit=all&status=E",
        config.api_url, config.api_key
    )
}

/// Fetches the full station registry.
///
/// # Errors
///
/// Returns [`RegistryError`] on a non-2xx response or a payload that
/// doesn't match the `{ fuel_stations: [...] }` envelope.
pub async fn fetch_registry(
    client: &reqwest::Client,
    config: &RegistryConfig,
) -> Result<RegistryResponse, RegistryError> {
    let url = request_url(config);
    log::info!("Fetching station registry...");

    let response = client.get(&url).send().await?.error_for_status()?;
    let body: RegistryResponse = response.json().await?;

    log::info!("Registry returned {} raw records", body.fuel_stations.len());
    Ok(body)
}

/// Fetches the registry, normalizes every record, and rewrites the
/// staging station table in chunks.
///
/// # Errors
///
/// Returns [`RegistryError`] if the fetch or any chunk insert fails.
/// Per-record normalization failures are counted in the summary, not
/// errors.
pub async fn ingest(
    db: &dyn Database,
    client: &reqwest::Client,
    config: &RegistryConfig,
    now: DateTime<Utc>,
) -> Result<IngestSummary, RegistryError> {
    let response = fetch_registry(client, config).await?;

    let mut canonical: Vec<Station> = Vec::with_capacity(response.fuel_stations.len());
    let mut reject_counts: BTreeMap<&'static str, u64> = BTreeMap::new();

    for raw in &response.fuel_stations {
        match normalize::normalize(raw, now) {
            Ok(station) => canonical.push(station),
            Err(reason) => {
                *reject_counts.entry(reason.as_ref()).or_insert(0) += 1;
            }
        }
    }

    let rejected: u64 = reject_counts.values().sum();
    for (reason, count) in &reject_counts {
        log::warn!("Rejected {count} records: {reason}");
    }

    stations::truncate(db, Tier::Staging).await?;

    let mut inserted = 0u64;
    let total_chunks = canonical.len().div_ceil(CHUNK_SIZE).max(1);

    for (chunk_num, chunk) in canonical.chunks(CHUNK_SIZE).enumerate() {
        inserted += stations::insert_batch(db, Tier::Staging, chunk).await?;
        log::info!(
            "Staging chunk {}/{total_chunks}: inserted {} (running total {inserted})",
            chunk_num + 1,
            chunk.len(),
        );

        if chunk_num + 1 < total_chunks {
            tokio::time::sleep(CHUNK_PAUSE).await;
        }
    }

    log::info!(
        "Ingestion complete: {inserted} inserted, {rejected} rejected from {} raw records",
        response.fuel_stations.len()
    );

    Ok(IngestSummary { inserted, rejected })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_url_carries_required_parameters() {
        let config = RegistryConfig {
            api_url: "https://developer.nrel.gov/api/alt-fuel-stations/v1.json".to_string(),
            api_key: "DEMO_KEY".to_string(),
        };
        let url = request_url(&config);
        assert!(url.contains("api_key=DEMO_KEY"));
        assert!(url.contains("fuel_type=ELEC"));
        assert!(url.contains("country=US"));
        assert!(url.contains("limit=all"));
        assert!(url.contains("status=E"));
    }

    #[test]
    fn response_envelope_deserializes() {
        let body = serde_json::json!({
            "fuel_stations": [
                { "id": 1, "station_name": "A", "latitude": 37.75, "longitude": -122.41 },
                { "id": 2 }
            ]
        });
        let response: RegistryResponse = serde_json::from_value(body).unwrap();
        assert_eq!(response.fuel_stations.len(), 2);
        assert_eq!(response.fuel_stations[0].id, Some(1));
    }
}

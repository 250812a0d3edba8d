//! Population lookups through the 30-day cache.
//!
//! Miss path: census API GET with a 5-second timeout and 3 retries on
//! exponential backoff (1 s, 2 s, 4 s). A terminal failure yields the
//! hard-coded estimate and leaves the cache untouched, so the next cycle
//! retries the live fetch.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use charge_map_region_models::RegionType;
use chrono::{DateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::estimates::fallback_population;
use crate::{CensusError, PopulationFigure, PopulationSource};

/// Cache rows older than this are treated as misses.
pub const CACHE_TTL_DAYS: i64 = 30;

/// Per-request timeout for census API calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Backoff delays between retry attempts.
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Maximum ZCTA codes per batched census request.
pub const MAX_ZIP_BATCH: usize = 50;

/// Maximum concurrent in-flight census requests.
pub const MAX_IN_FLIGHT: usize = 10;

/// Census API configuration.
#[derive(Debug, Clone)]
pub struct PopulationConfig {
    /// Base URL of the decennial census endpoint.
    pub api_url: String,
    /// API key passed as a query parameter.
    pub api_key: String,
}

impl PopulationConfig {
    /// Builds the config from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("POPULATION_API_URL")
                .unwrap_or_else(|_| "https://api.census.gov/data/2020/dec/pl".to_string()),
            api_key: std::env::var("POPULATION_API_KEY").unwrap_or_default(),
        }
    }
}

/// Builds the request URL for one region code.
fn request_url(config: &PopulationConfig, region_type: RegionType, code: &str) -> String {
    match region_type {
        RegionType::State => format!(
            "{}?get=NAME,P1_001N&for=state:{code}&key={}",
            config.api_url, config.api_key
        ),
        // A county code is the 5-digit FIPS: 2-digit state + 3-digit county.
        RegionType::County => {
            let (state, county) = code.split_at(2.min(code.len()));
            format!(
                "{}?get=NAME,P1_001N&for=county:{county}&in=state:{state}&key={}",
                config.api_url, config.api_key
            )
        }
        RegionType::Zip => format!(
            "{}?get=NAME,P1_001N&for=zip%20code%20tabulation%20area:{code}&key={}",
            config.api_url, config.api_key
        ),
    }
}

/// Parses a census response body into `geo code -> (name, population)`.
///
/// The body is a JSON array whose first row is headers; the population
/// column is an integer-as-string, and the geographic identifier is the
/// last column.
///
/// # Errors
///
/// Returns [`CensusError::Conversion`] if the body is not the expected
/// shape or lacks the population column.
pub fn parse_census_rows(
    body: &serde_json::Value,
) -> Result<BTreeMap<String, (String, i64)>, CensusError> {
    let rows = body.as_array().ok_or_else(|| CensusError::Conversion {
        message: "Expected a JSON array response".to_string(),
    })?;

    let Some(header) = rows.first() else {
        return Ok(BTreeMap::new());
    };
    let header: Vec<&str> = header
        .as_array()
        .map(|cells| cells.iter().filter_map(serde_json::Value::as_str).collect())
        .unwrap_or_default();

    let name_idx = header.iter().position(|h| *h == "NAME");
    let population_idx = header
        .iter()
        .position(|h| *h == "P1_001N")
        .ok_or_else(|| CensusError::Conversion {
            message: "Response missing P1_001N column".to_string(),
        })?;

    let mut parsed = BTreeMap::new();
    for row in &rows[1..] {
        let Some(cells) = row.as_array() else {
            continue;
        };
        let Some(code) = cells.last().and_then(serde_json::Value::as_str) else {
            continue;
        };
        let Some(population) = cells
            .get(population_idx)
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse::<i64>().ok())
        else {
            continue;
        };
        let name = name_idx
            .and_then(|i| cells.get(i))
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        parsed.insert(code.to_string(), (name, population));
    }
    Ok(parsed)
}

/// Issues a GET with the 5-second timeout and exponential-backoff retries.
async fn fetch_with_retry(
    client: &reqwest::Client,
    url: &str,
) -> Result<serde_json::Value, CensusError> {
    let mut last_err: Option<CensusError> = None;

    for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
        match client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
        {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(body) => return Ok(body),
                Err(e) => last_err = Some(e.into()),
            },
            Err(e) => last_err = Some(e.into()),
        }

        log::debug!("Census request attempt {} failed, retrying", attempt + 1);
        tokio::time::sleep(*delay).await;
    }

    // Final attempt after the last backoff.
    match client
        .get(url)
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
    {
        Ok(resp) => Ok(resp.json::<serde_json::Value>().await?),
        Err(e) => Err(last_err.unwrap_or_else(|| e.into())),
    }
}

/// Looks up a fresh cache row.
async fn cache_lookup(
    db: &dyn Database,
    region_type: RegionType,
    code: &str,
    now: DateTime<Utc>,
) -> Result<Option<PopulationFigure>, CensusError> {
    let rows = db
        .query_raw_params(
            "SELECT name, population, fetched_at FROM population_cache
             WHERE region_type = $1 AND region_code = $2",
            &[
                DatabaseValue::String(region_type.to_string()),
                DatabaseValue::String(code.to_string()),
            ],
        )
        .await?;

    let Some(row) = rows.first() else {
        return Ok(None);
    };

    let fetched_at_naive: chrono::NaiveDateTime = row.to_value("fetched_at").unwrap_or_default();
    let fetched_at = DateTime::<Utc>::from_naive_utc_and_offset(fetched_at_naive, Utc);
    if now - fetched_at > chrono::Duration::days(CACHE_TTL_DAYS) {
        return Ok(None);
    }

    Ok(Some(PopulationFigure {
        value: row.to_value("population").unwrap_or(0),
        source: PopulationSource::Cached,
        name: row.to_value("name").unwrap_or(None),
    }))
}

/// Upserts a live fetch result into the cache.
async fn cache_upsert(
    db: &dyn Database,
    region_type: RegionType,
    code: &str,
    name: &str,
    population: i64,
    now: DateTime<Utc>,
) -> Result<(), CensusError> {
    db.exec_raw_params(
        "INSERT INTO population_cache (region_type, region_code, name, population, fetched_at)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (region_type, region_code) DO UPDATE SET
             name = EXCLUDED.name,
             population = EXCLUDED.population,
             fetched_at = EXCLUDED.fetched_at",
        &[
            DatabaseValue::String(region_type.to_string()),
            DatabaseValue::String(code.to_string()),
            DatabaseValue::String(name.to_string()),
            DatabaseValue::Int64(population),
            DatabaseValue::DateTime(now.naive_utc()),
        ],
    )
    .await?;
    Ok(())
}

/// Resolves a region's population: cache, then live fetch, then estimate.
///
/// Fetch failures never surface as errors; the caller gets an
/// [`PopulationSource::Estimate`] figure instead, and the cache is left
/// alone so the next cycle retries the live path.
///
/// # Errors
///
/// Returns [`CensusError`] only if a database operation fails.
pub async fn population(
    db: &dyn Database,
    client: &reqwest::Client,
    config: &PopulationConfig,
    region_type: RegionType,
    code: &str,
    now: DateTime<Utc>,
) -> Result<PopulationFigure, CensusError> {
    if let Some(cached) = cache_lookup(db, region_type, code, now).await? {
        return Ok(cached);
    }

    let url = request_url(config, region_type, code);
    match fetch_with_retry(client, &url).await.and_then(|body| parse_census_rows(&body)) {
        Ok(parsed) => {
            // The geo column echoes the requested code; a county answer
            // comes back keyed by its 3-digit county part.
            let hit = parsed
                .get(code)
                .or_else(|| {
                    (region_type == RegionType::County && code.len() == 5)
                        .then(|| parsed.get(&code[2..]))
                        .flatten()
                })
                .or_else(|| (parsed.len() == 1).then(|| parsed.values().next()).flatten());

            if let Some((name, value)) = hit {
                cache_upsert(db, region_type, code, name, *value, now).await?;
                return Ok(PopulationFigure {
                    value: *value,
                    source: PopulationSource::Live,
                    name: Some(name.clone()),
                });
            }

            log::warn!("Census returned no row for {region_type} {code}; using estimate");
        }
        Err(e) => {
            log::warn!("Census fetch failed for {region_type} {code}: {e}; using estimate");
        }
    }

    Ok(PopulationFigure {
        value: fallback_population(region_type, code),
        source: PopulationSource::Estimate,
        name: None,
    })
}

/// Resolves populations for a set of ZIP codes, batching up to
/// [`MAX_ZIP_BATCH`] codes per request and keeping at most
/// [`MAX_IN_FLIGHT`] requests in flight.
///
/// Every requested code appears in the result: codes the census doesn't
/// recognize silently receive the estimate.
///
/// # Errors
///
/// Returns [`CensusError`] only if a database operation fails.
pub async fn populations_for_zips(
    db: &dyn Database,
    client: &reqwest::Client,
    config: &PopulationConfig,
    zips: &[String],
    now: DateTime<Utc>,
) -> Result<BTreeMap<String, PopulationFigure>, CensusError> {
    let mut resolved: BTreeMap<String, PopulationFigure> = BTreeMap::new();
    let mut misses: Vec<String> = Vec::new();

    for zip in zips {
        if let Some(cached) = cache_lookup(db, RegionType::Zip, zip, now).await? {
            resolved.insert(zip.clone(), cached);
        } else {
            misses.push(zip.clone());
        }
    }

    if misses.is_empty() {
        return Ok(resolved);
    }

    let semaphore = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
    let mut tasks: JoinSet<Result<BTreeMap<String, (String, i64)>, CensusError>> = JoinSet::new();

    for chunk in misses.chunks(MAX_ZIP_BATCH) {
        let url = request_url(config, RegionType::Zip, &chunk.join(","));
        let client = client.clone();
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| CensusError::Conversion {
                    message: format!("Semaphore closed: {e}"),
                })?;
            let body = fetch_with_retry(&client, &url).await?;
            parse_census_rows(&body)
        });
    }

    let mut fetched: BTreeMap<String, (String, i64)> = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(parsed)) => fetched.extend(parsed),
            Ok(Err(e)) => log::warn!("Batched ZIP population fetch failed: {e}"),
            Err(e) => log::warn!("Batched ZIP population task panicked: {e}"),
        }
    }

    for zip in &misses {
        if let Some((name, value)) = fetched.get(zip) {
            cache_upsert(db, RegionType::Zip, zip, name, *value, now).await?;
            resolved.insert(
                zip.clone(),
                PopulationFigure {
                    value: *value,
                    source: PopulationSource::Live,
                    name: Some(name.clone()),
                },
            );
        } else {
            resolved.insert(
                zip.clone(),
                PopulationFigure {
                    value: fallback_population(RegionType::Zip, zip),
                    source: PopulationSource::Estimate,
                    name: None,
                },
            );
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PopulationConfig {
        PopulationConfig {
            api_url: "https://api.census.gov/data/2020/dec/pl".to_string(),
            api_key: "test-key".to_string(),
        }
    }

    #[test]
    fn state_request_url() {
        let url = request_url(&config(), RegionType::State, "06");
        assert_eq!(
            url,
            "https://api.census.gov/data/2020/dec/pl?get=NAME,P1_001N&for=state:06&key=test-key"
        );
    }

    #[test]
    fn county_request_splits_fips() {
        let url = request_url(&config(), RegionType::County, "06075");
        assert!(url.contains("for=county:075"));
        assert!(url.contains("in=state:06"));
    }

    #[test]
    fn zip_request_carries_batched_codes() {
        let url = request_url(&config(), RegionType::Zip, "94110,89109");
        assert!(url.contains("zip%20code%20tabulation%20area:94110,89109"));
    }

    #[test]
    fn parses_header_and_rows() {
        let body = serde_json::json!([
            ["NAME", "P1_001N", "state"],
            ["California", "39538223", "06"],
            ["Nevada", "3104614", "32"]
        ]);
        let parsed = parse_census_rows(&body).unwrap();
        assert_eq!(parsed["06"], ("California".to_string(), 39_538_223));
        assert_eq!(parsed["32"], ("Nevada".to_string(), 3_104_614));
    }

    #[test]
    fn parses_zcta_rows_keyed_by_last_column() {
        let body = serde_json::json!([
            ["NAME", "P1_001N", "zip code tabulation area"],
            ["ZCTA5 94110", "74633", "94110"]
        ]);
        let parsed = parse_census_rows(&body).unwrap();
        assert_eq!(parsed["94110"].1, 74_633);
    }

    #[test]
    fn missing_population_column_is_an_error() {
        let body = serde_json::json!([["NAME", "state"], ["California", "06"]]);
        assert!(parse_census_rows(&body).is_err());
    }

    #[test]
    fn unparseable_population_rows_are_skipped() {
        let body = serde_json::json!([
            ["NAME", "P1_001N", "state"],
            ["California", "not-a-number", "06"],
            ["Nevada", "3104614", "32"]
        ]);
        let parsed = parse_census_rows(&body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parsed.contains_key("32"));
    }
}

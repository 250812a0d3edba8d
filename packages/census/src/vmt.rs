//! VMT (vehicle miles traveled) ingestion and lookup.
//!
//! The upstream service pages a feature collection keyed by a 5-character
//! county FIPS with an annual VMT attribute. Rows are replaced wholesale
//! on ingestion; per-capita values are derived at scoring time from the
//! population figure at hand and written back for the read path.

use std::collections::BTreeMap;

use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::CensusError;

/// Page size for the feature query.
const PAGE_SIZE: u64 = 1000;

/// VMT service configuration.
#[derive(Debug, Clone)]
pub struct VmtConfig {
    /// Feature query endpoint.
    pub url: String,
    /// Attribute carrying the 5-character county FIPS.
    pub fips_field: String,
    /// Attribute carrying the annual VMT number.
    pub annual_vmt_field: String,
}

impl VmtConfig {
    /// Builds the config from the environment with the service's default
    /// field names.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        std::env::var("VMT_API_URL").ok().map(|url| Self {
            url,
            fips_field: "GEOID".to_string(),
            annual_vmt_field: "VMT_ANNUAL".to_string(),
        })
    }
}

/// Converts annual VMT to daily VMT.
#[must_use]
pub fn daily_from_annual(annual: f64) -> f64 {
    annual / 365.0
}

/// Daily VMT per capita; `None` for an empty region.
#[must_use]
pub fn per_capita(daily: f64, population: i64) -> Option<f64> {
    if population <= 0 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    Some(daily / population as f64)
}

/// Extracts `(fips, annual_vmt)` pairs from one page of features.
fn parse_features(body: &serde_json::Value, config: &VmtConfig) -> Vec<(String, f64)> {
    body["features"]
        .as_array()
        .map(|features| {
            features
                .iter()
                .filter_map(|feature| {
                    let attrs = feature
                        .get("attributes")
                        .or_else(|| feature.get("properties"))?;
                    let fips = attrs[config.fips_field.as_str()].as_str()?;
                    if fips.len() != 5 {
                        return None;
                    }
                    let annual = attrs[config.annual_vmt_field.as_str()].as_f64()?;
                    Some((fips.to_string(), annual))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Fetches all pages of the VMT feature collection and replaces
/// `vmt_by_county` wholesale.
///
/// # Errors
///
/// Returns [`CensusError`] if any HTTP request or database operation
/// fails.
pub async fn ingest_vmt(
    db: &dyn Database,
    client: &reqwest::Client,
    config: &VmtConfig,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<u64, CensusError> {
    let mut all: Vec<(String, f64)> = Vec::new();
    let mut offset = 0u64;

    loop {
        let url = format!(
            "{}?f=json&outFields={},{}&resultOffset={offset}&resultRecordCount={PAGE_SIZE}",
            config.url, config.fips_field, config.annual_vmt_field
        );
        let body: serde_json::Value = client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let page = parse_features(&body, config);
        let page_len = page.len() as u64;
        all.extend(page);

        if page_len < PAGE_SIZE {
            break;
        }
        offset += page_len;
    }

    if all.is_empty() {
        return Err(CensusError::Conversion {
            message: "VMT service returned no usable features".to_string(),
        });
    }

    db.exec_raw("DELETE FROM vmt_by_county").await?;

    let mut inserted = 0u64;
    for (fips, annual) in &all {
        let result = db
            .exec_raw_params(
                "INSERT INTO vmt_by_county (county_fips, annual_vmt, daily_vmt, updated_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (county_fips) DO UPDATE SET
                     annual_vmt = EXCLUDED.annual_vmt,
                     daily_vmt = EXCLUDED.daily_vmt,
                     updated_at = EXCLUDED.updated_at",
                &[
                    DatabaseValue::String(fips.clone()),
                    DatabaseValue::Real64(*annual),
                    DatabaseValue::Real64(daily_from_annual(*annual)),
                    DatabaseValue::DateTime(now.naive_utc()),
                ],
            )
            .await?;
        inserted += result;
    }

    log::info!("VMT ingestion complete: {inserted} counties");
    Ok(inserted)
}

/// Loads daily VMT for every county into a map. The county aggregation
/// pass joins against this once per cycle rather than per row.
///
/// # Errors
///
/// Returns [`CensusError`] if the database operation fails.
pub async fn daily_vmt_by_county(db: &dyn Database) -> Result<BTreeMap<String, f64>, CensusError> {
    let rows = db
        .query_raw_params("SELECT county_fips, daily_vmt FROM vmt_by_county", &[])
        .await?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let fips: String = row.to_value("county_fips").ok()?;
            let daily: f64 = row.to_value("daily_vmt").ok()?;
            Some((fips, daily))
        })
        .collect())
}

/// Writes the derived per-capita figure back for the read path.
///
/// # Errors
///
/// Returns [`CensusError`] if the database operation fails.
pub async fn update_per_capita(
    db: &dyn Database,
    county_fips: &str,
    vmt_per_capita: f64,
) -> Result<(), CensusError> {
    db.exec_raw_params(
        "UPDATE vmt_by_county SET vmt_per_capita = $2 WHERE county_fips = $1",
        &[
            DatabaseValue::String(county_fips.to_string()),
            DatabaseValue::Real64(vmt_per_capita),
        ],
    )
    .await?;
    Ok(())
}

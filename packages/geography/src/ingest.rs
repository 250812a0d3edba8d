//! County boundary and ZIP crosswalk ingestion.
//!
//! County polygons come from the Census Bureau `TIGERweb` REST API as
//! `GeoJSON`, one request per state. The ZIP-to-county crosswalk is a flat
//! CSV of `zip,county_fips` pairs. Both land in reference tables that the
//! refresh pipeline reads; neither participates in the staging/serving
//! swap.

use switchy_database::{Database, DatabaseValue};

use crate::counties::{parse_multipolygon, polygon_bbox};
use crate::fips::{STATES, state_abbr};
use crate::GeoError;

/// `TIGERweb` query endpoint for the county layer.
const COUNTY_LAYER_URL: &str = "https://tigerweb.geo.census.gov/arcgis/rest/services/TIGERweb/tigerWMS_ACS2023/MapServer/86/query";

/// Downloads and upserts county boundaries for a single state.
///
/// # Errors
///
/// Returns [`GeoError`] if the HTTP request or database operation fails.
async fn ingest_state(
    db: &dyn Database,
    client: &reqwest::Client,
    state_fips: &str,
) -> Result<u64, GeoError> {
    let url = format!(
        "{COUNTY_LAYER_URL}\
         ?where=STATE%3D'{state_fips}'\
         &outFields=GEOID,NAME,STATE,CENTLAT,CENTLON\
         &outSR=4326\
         &f=geojson\
         &returnGeometry=true"
    );

    log::info!("Fetching county boundaries for state FIPS {state_fips}...");

    let resp = client.get(&url).send().await?;
    let body = resp.text().await?;

    let geojson: serde_json::Value =
        serde_json::from_str(&body).map_err(|e| GeoError::Conversion {
            message: format!("Failed to parse county GeoJSON for state {state_fips}: {e}"),
        })?;

    let features = geojson["features"]
        .as_array()
        .ok_or_else(|| GeoError::Conversion {
            message: format!("No features array for state {state_fips}"),
        })?;

    let abbr = state_abbr(state_fips);
    let mut inserted = 0u64;

    for feature in features {
        let props = &feature["properties"];
        let fips = props["GEOID"].as_str().unwrap_or_default().to_string();
        if fips.len() != 5 {
            continue;
        }

        let name = props["NAME"].as_str().unwrap_or("Unknown County").to_string();

        let geom_str = serde_json::to_string(&feature["geometry"]).unwrap_or_default();
        let Some(polygon) = parse_multipolygon(&geom_str) else {
            log::warn!("Skipping county {fips}: unparseable geometry");
            continue;
        };
        let Some(bbox) = polygon_bbox(&polygon) else {
            continue;
        };

        let centlat = props["CENTLAT"]
            .as_str()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .or_else(|| props["CENTLAT"].as_f64());
        let centlon = props["CENTLON"]
            .as_str()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .or_else(|| props["CENTLON"].as_f64());

        let result = db
            .exec_raw_params(
                "INSERT INTO county_boundaries (
                    county_fips, name, state_fips, state, boundary_geojson,
                    min_lng, min_lat, max_lng, max_lat, centroid_lng, centroid_lat
                 ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (county_fips) DO UPDATE SET
                     name = EXCLUDED.name,
                     boundary_geojson = EXCLUDED.boundary_geojson,
                     min_lng = EXCLUDED.min_lng,
                     min_lat = EXCLUDED.min_lat,
                     max_lng = EXCLUDED.max_lng,
                     max_lat = EXCLUDED.max_lat,
                     centroid_lng = EXCLUDED.centroid_lng,
                     centroid_lat = EXCLUDED.centroid_lat",
                &[
                    DatabaseValue::String(fips),
                    DatabaseValue::String(name),
                    DatabaseValue::String(state_fips.to_string()),
                    DatabaseValue::String(abbr.to_string()),
                    DatabaseValue::String(geom_str),
                    DatabaseValue::Real64(bbox.west),
                    DatabaseValue::Real64(bbox.south),
                    DatabaseValue::Real64(bbox.east),
                    DatabaseValue::Real64(bbox.north),
                    centlon.map_or(DatabaseValue::Null, DatabaseValue::Real64),
                    centlat.map_or(DatabaseValue::Null, DatabaseValue::Real64),
                ],
            )
            .await?;

        inserted += result;
    }

    log::info!(
        "State {state_fips} ({abbr}): upserted {inserted} counties from {} features",
        features.len()
    );
    Ok(inserted)
}

/// Ingests county boundaries for all US states, sequentially to avoid
/// hammering the API. A failed state is logged and skipped.
///
/// # Errors
///
/// Returns [`GeoError`] if the HTTP client cannot be built.
pub async fn ingest_all_counties(db: &dyn Database) -> Result<u64, GeoError> {
    let client = reqwest::Client::builder()
        .user_agent("charge-map/0.1")
        .build()?;

    let mut total = 0u64;

    for state in STATES {
        match ingest_state(db, &client, state.fips).await {
            Ok(count) => total += count,
            Err(e) => {
                log::error!("Failed to ingest counties for state {}: {e}", state.fips);
            }
        }
    }

    log::info!("County boundary ingestion complete: {total} counties");
    Ok(total)
}

/// Parses a ZIP-to-county crosswalk CSV body into `(zip, county_fips)`
/// pairs. Expects a header row; column order is `zip,county_fips`. Rows
/// that don't carry a 5-digit ZIP and a 5-digit FIPS are skipped.
#[must_use]
pub fn parse_crosswalk_csv(body: &str) -> Vec<(String, String)> {
    body.lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split(',');
            let zip = parts.next()?.trim().trim_matches('"');
            let fips = parts.next()?.trim().trim_matches('"');
            if zip.len() == 5
                && fips.len() == 5
                && zip.bytes().all(|b| b.is_ascii_digit())
                && fips.bytes().all(|b| b.is_ascii_digit())
            {
                Some((zip.to_string(), fips.to_string()))
            } else {
                None
            }
        })
        .collect()
}

/// Downloads the ZIP-to-county crosswalk CSV and replaces the
/// `zip_counties` table wholesale.
///
/// # Errors
///
/// Returns [`GeoError`] if the HTTP request or any database operation
/// fails.
pub async fn ingest_zip_crosswalk(
    db: &dyn Database,
    client: &reqwest::Client,
    url: &str,
) -> Result<u64, GeoError> {
    log::info!("Fetching ZIP-to-county crosswalk...");

    let body = client.get(url).send().await?.error_for_status()?.text().await?;
    let pairs = parse_crosswalk_csv(&body);

    if pairs.is_empty() {
        return Err(GeoError::Conversion {
            message: "Crosswalk CSV contained no usable rows".to_string(),
        });
    }

    db.exec_raw("DELETE FROM zip_counties").await?;

    let mut inserted = 0u64;
    for (zip, fips) in &pairs {
        let result = db
            .exec_raw_params(
                "INSERT INTO zip_counties (zip, county_fips) VALUES ($1, $2)
                 ON CONFLICT (zip, county_fips) DO NOTHING",
                &[
                    DatabaseValue::String(zip.clone()),
                    DatabaseValue::String(fips.clone()),
                ],
            )
            .await?;
        inserted += result;
    }

    log::info!("ZIP crosswalk ingestion complete: {inserted} mappings");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crosswalk_parses_clean_rows() {
        let csv = "zip,county\n94110,06075\n89109,32003\n";
        let pairs = parse_crosswalk_csv(csv);
        assert_eq!(
            pairs,
            vec![
                ("94110".to_string(), "06075".to_string()),
                ("89109".to_string(), "32003".to_string()),
            ]
        );
    }

    #[test]
    fn crosswalk_skips_malformed_rows() {
        let csv = "zip,county\nABCDE,06075\n9411,06075\n94110,6075\n\"94110\",\"06075\"\n";
        let pairs = parse_crosswalk_csv(csv);
        assert_eq!(pairs, vec![("94110".to_string(), "06075".to_string())]);
    }
}

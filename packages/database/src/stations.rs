//! Station table queries.
//!
//! Stations are keyed by the upstream registry's stable identifier. A
//! refreshed record with the same identifier replaces the old row
//! wholesale; rows are never mutated piecemeal.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use charge_map_region_models::BoundingBox;
use charge_map_station_models::{ChargerLevel, Station};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::{DbError, Tier};

/// Empties the station table for a tier. The ingestion driver calls this
/// before the first chunk so a rerun is idempotent.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn truncate(db: &dyn Database, tier: Tier) -> Result<(), DbError> {
    db.exec_raw(&format!("DELETE FROM {}", tier.stations())).await?;
    Ok(())
}

/// Inserts a batch of canonical stations into a tier's station table,
/// replacing any rows with the same external identifier.
///
/// # Errors
///
/// Returns [`DbError`] if any insert fails.
pub async fn insert_batch(
    db: &dyn Database,
    tier: Tier,
    stations: &[Station],
) -> Result<u64, DbError> {
    let sql = format!(
        "INSERT INTO {} (
            external_id, name, latitude, longitude, street_address, city,
            state, zip, level, num_ports, connector_types, network, created_at
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         ON CONFLICT (external_id) DO UPDATE SET
             name = EXCLUDED.name,
             latitude = EXCLUDED.latitude,
             longitude = EXCLUDED.longitude,
             street_address = EXCLUDED.street_address,
             city = EXCLUDED.city,
             state = EXCLUDED.state,
             zip = EXCLUDED.zip,
             level = EXCLUDED.level,
             num_ports = EXCLUDED.num_ports,
             connector_types = EXCLUDED.connector_types,
             network = EXCLUDED.network,
             created_at = EXCLUDED.created_at",
        tier.stations()
    );

    let mut inserted = 0u64;

    for station in stations {
        let result = db
            .exec_raw_params(
                &sql,
                &[
                    DatabaseValue::Int64(station.external_id),
                    DatabaseValue::String(station.name.clone()),
                    DatabaseValue::Real64(station.latitude),
                    DatabaseValue::Real64(station.longitude),
                    station
                        .street_address
                        .as_ref()
                        .map_or(DatabaseValue::Null, |a| DatabaseValue::String(a.clone())),
                    station
                        .city
                        .as_ref()
                        .map_or(DatabaseValue::Null, |c| DatabaseValue::String(c.clone())),
                    DatabaseValue::String(station.state.clone()),
                    station
                        .zip
                        .as_ref()
                        .map_or(DatabaseValue::Null, |z| DatabaseValue::String(z.clone())),
                    DatabaseValue::String(station.level.to_string()),
                    DatabaseValue::Int32(station.num_ports),
                    DatabaseValue::String(station.connectors_column()),
                    station
                        .network
                        .as_ref()
                        .map_or(DatabaseValue::Null, |n| DatabaseValue::String(n.clone())),
                    DatabaseValue::DateTime(station.created_at.naive_utc()),
                ],
            )
            .await?;
        inserted += result;
    }

    Ok(inserted)
}

/// Counts stations in a tier.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn count(db: &dyn Database, tier: Tier) -> Result<u64, DbError> {
    let rows = db
        .query_raw_params(
            &format!("SELECT COUNT(*) AS station_count FROM {}", tier.stations()),
            &[],
        )
        .await?;

    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: "COUNT(*) returned no rows".to_string(),
    })?;

    let count: i64 = row.to_value("station_count").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse station count: {e}"),
    })?;

    Ok(u64::try_from(count).unwrap_or(0))
}

/// Loads every station in a tier into a map keyed by external identifier.
/// The change detector diffs two of these.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn load_all(db: &dyn Database, tier: Tier) -> Result<BTreeMap<i64, Station>, DbError> {
    let rows = db
        .query_raw_params(&format!("SELECT * FROM {}", tier.stations()), &[])
        .await?;

    let mut stations = BTreeMap::new();
    for row in &rows {
        let station = station_from_row(row)?;
        stations.insert(station.external_id, station);
    }
    Ok(stations)
}

/// Selects stations in a tier belonging to one of the given `(state, zip)`
/// pairs. Used by the ZIP sub-pipeline to fetch a chunk in one query.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn select_by_zips(
    db: &dyn Database,
    tier: Tier,
    zips: &[(String, String)],
) -> Result<Vec<Station>, DbError> {
    if zips.is_empty() {
        return Ok(Vec::new());
    }

    let mut sql = format!("SELECT * FROM {} WHERE ", tier.stations());
    let mut params: Vec<DatabaseValue> = Vec::with_capacity(zips.len() * 2);

    for (i, (state, zip)) in zips.iter().enumerate() {
        if i > 0 {
            sql.push_str(" OR ");
        }
        let base = i * 2;
        write!(sql, "(state = ${} AND zip = ${})", base + 1, base + 2).unwrap();
        params.push(DatabaseValue::String(state.clone()));
        params.push(DatabaseValue::String(zip.clone()));
    }

    let rows = db.query_raw_params(&sql, &params).await?;
    rows.iter().map(station_from_row).collect()
}

/// Selects stations within a bounding box. This is the read path's data
/// contract; it always reads serving.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn select_in_bbox(
    db: &dyn Database,
    tier: Tier,
    bbox: &BoundingBox,
) -> Result<Vec<Station>, DbError> {
    let rows = db
        .query_raw_params(
            &format!(
                "SELECT * FROM {}
                 WHERE longitude >= $1 AND longitude <= $2
                   AND latitude >= $3 AND latitude <= $4",
                tier.stations()
            ),
            &[
                DatabaseValue::Real64(bbox.west),
                DatabaseValue::Real64(bbox.east),
                DatabaseValue::Real64(bbox.south),
                DatabaseValue::Real64(bbox.north),
            ],
        )
        .await?;
    rows.iter().map(station_from_row).collect()
}

/// Decodes a station row.
fn station_from_row(row: &switchy_database::Row) -> Result<Station, DbError> {
    let level_text: String = row.to_value("level").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse station level: {e}"),
    })?;
    let level = level_text
        .parse::<ChargerLevel>()
        .map_err(|e| DbError::Conversion {
            message: format!("Unknown charger level '{level_text}': {e}"),
        })?;

    let connectors_column: String = row.to_value("connector_types").unwrap_or_default();

    let created_at_naive: chrono::NaiveDateTime = row.to_value("created_at").unwrap_or_default();
    let created_at =
        chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(created_at_naive, chrono::Utc);

    Ok(Station {
        external_id: row.to_value("external_id").map_err(|e| DbError::Conversion {
            message: format!("Failed to parse external_id: {e}"),
        })?,
        name: row.to_value("name").unwrap_or_default(),
        latitude: row.to_value("latitude").unwrap_or(0.0),
        longitude: row.to_value("longitude").unwrap_or(0.0),
        street_address: row.to_value("street_address").unwrap_or(None),
        city: row.to_value("city").unwrap_or(None),
        state: row.to_value("state").unwrap_or_default(),
        zip: row.to_value("zip").unwrap_or(None),
        level,
        num_ports: row.to_value("num_ports").unwrap_or(1),
        connectors: Station::parse_connectors_column(&connectors_column),
        network: row.to_value("network").unwrap_or(None),
        created_at,
    })
}

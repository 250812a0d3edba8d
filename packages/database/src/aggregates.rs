//! Region aggregate table queries.
//!
//! All three resolutions share a write pattern: DELETE the rows about to
//! be rewritten, then INSERT the fresh batch. Writes go to staging only;
//! the promote transaction is the single path into serving.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use charge_map_region_models::{
    BoundingBox, ChargerCounts, ConnectorCounts, PortCounts, RegionAggregate, RegionType, ZipKey,
};
use chrono::{DateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::{DbError, Tier};

/// Ensures an aggregate row satisfies the level- and port-totality
/// invariants before it reaches a table.
fn check_row(aggregate: &RegionAggregate) -> Result<(), DbError> {
    if !aggregate.chargers.is_consistent() {
        return Err(DbError::Conversion {
            message: format!(
                "invariant violation in {} {}: level counts {} + {} + {} != total {}",
                aggregate.region_type,
                aggregate.name,
                aggregate.chargers.dcfast,
                aggregate.chargers.level2,
                aggregate.chargers.level1,
                aggregate.chargers.total,
            ),
        });
    }
    if aggregate.ports.total < aggregate.chargers.total {
        return Err(DbError::Conversion {
            message: format!(
                "invariant violation in {} {}: total ports {} < total chargers {}",
                aggregate.region_type,
                aggregate.name,
                aggregate.ports.total,
                aggregate.chargers.total,
            ),
        });
    }
    Ok(())
}

/// The 23 metric columns shared by all three aggregate tables, in insert
/// order.
const METRIC_COLUMNS: &str = "latitude, longitude, population, population_estimated, \
     total_chargers, dcfast_count, level2_count, level1_count, \
     tesla_count, ccs_count, j1772_count, chademo_count, \
     tesla_ports, ccs_ports, j1772_ports, chademo_ports, total_ports, \
     need_score, ev_infrastructure_score, opportunity_score, \
     vmt_per_capita, zoom_range, computed_at";

/// Number of columns in [`METRIC_COLUMNS`].
const METRIC_COLUMN_COUNT: usize = 23;

/// Builds the parameter list for [`METRIC_COLUMNS`].
fn metric_params(aggregate: &RegionAggregate, computed_at: DateTime<Utc>) -> Vec<DatabaseValue> {
    vec![
        DatabaseValue::Real64(aggregate.latitude),
        DatabaseValue::Real64(aggregate.longitude),
        DatabaseValue::Int64(aggregate.population),
        DatabaseValue::Bool(aggregate.population_estimated),
        DatabaseValue::Int32(aggregate.chargers.total),
        DatabaseValue::Int32(aggregate.chargers.dcfast),
        DatabaseValue::Int32(aggregate.chargers.level2),
        DatabaseValue::Int32(aggregate.chargers.level1),
        DatabaseValue::Int32(aggregate.connectors.tesla),
        DatabaseValue::Int32(aggregate.connectors.ccs),
        DatabaseValue::Int32(aggregate.connectors.j1772),
        DatabaseValue::Int32(aggregate.connectors.chademo),
        DatabaseValue::Int32(aggregate.ports.tesla),
        DatabaseValue::Int32(aggregate.ports.ccs),
        DatabaseValue::Int32(aggregate.ports.j1772),
        DatabaseValue::Int32(aggregate.ports.chademo),
        DatabaseValue::Int32(aggregate.ports.total),
        DatabaseValue::Int32(aggregate.need_score),
        DatabaseValue::Int32(aggregate.ev_infrastructure_score),
        DatabaseValue::Int32(aggregate.opportunity_score),
        aggregate
            .vmt_per_capita
            .map_or(DatabaseValue::Null, DatabaseValue::Real64),
        DatabaseValue::String(aggregate.zoom_range.to_string()),
        DatabaseValue::DateTime(computed_at.naive_utc()),
    ]
}

/// Appends `$n, $n+1, ...` placeholders for a metric param list starting
/// after `key_params` positional slots.
fn placeholders(key_params: usize, metric_count: usize) -> String {
    let mut out = String::new();
    for i in 0..metric_count {
        if i > 0 {
            out.push_str(", ");
        }
        write!(out, "${}", key_params + i + 1).unwrap();
    }
    out
}

/// Inserts a batch of state aggregate rows.
///
/// # Errors
///
/// Returns [`DbError`] if a row violates the totality invariants or the
/// insert fails.
pub async fn insert_state_batch(
    db: &dyn Database,
    tier: Tier,
    rows: &[RegionAggregate],
    computed_at: DateTime<Utc>,
) -> Result<u64, DbError> {
    let sql = format!(
        "INSERT INTO {} (state, state_name, {METRIC_COLUMNS}) VALUES ($1, $2, {})",
        tier.state_aggregates(),
        placeholders(2, METRIC_COLUMN_COUNT),
    );

    let mut inserted = 0u64;
    for aggregate in rows {
        check_row(aggregate)?;
        let mut params = vec![
            DatabaseValue::String(aggregate.state.clone()),
            DatabaseValue::String(aggregate.name.clone()),
        ];
        params.extend(metric_params(aggregate, computed_at));
        inserted += db.exec_raw_params(&sql, &params).await?;
    }
    Ok(inserted)
}

/// Inserts a batch of county aggregate rows.
///
/// # Errors
///
/// Returns [`DbError`] if a row violates the totality invariants, lacks a
/// FIPS code, or the insert fails.
pub async fn insert_county_batch(
    db: &dyn Database,
    tier: Tier,
    rows: &[RegionAggregate],
    computed_at: DateTime<Utc>,
) -> Result<u64, DbError> {
    let sql = format!(
        "INSERT INTO {} (county_fips, county_name, state, {METRIC_COLUMNS}) VALUES ($1, $2, $3, {})",
        tier.county_aggregates(),
        placeholders(3, METRIC_COLUMN_COUNT),
    );

    let mut inserted = 0u64;
    for aggregate in rows {
        check_row(aggregate)?;
        let fips = aggregate
            .county_fips
            .as_ref()
            .ok_or_else(|| DbError::Conversion {
                message: format!("county aggregate {} missing FIPS", aggregate.name),
            })?;
        let mut params = vec![
            DatabaseValue::String(fips.clone()),
            DatabaseValue::String(aggregate.name.clone()),
            DatabaseValue::String(aggregate.state.clone()),
        ];
        params.extend(metric_params(aggregate, computed_at));
        inserted += db.exec_raw_params(&sql, &params).await?;
    }
    Ok(inserted)
}

/// Inserts a batch of ZIP aggregate rows.
///
/// # Errors
///
/// Returns [`DbError`] if a row violates the totality invariants or the
/// insert fails.
pub async fn insert_zip_batch(
    db: &dyn Database,
    tier: Tier,
    rows: &[RegionAggregate],
    computed_at: DateTime<Utc>,
) -> Result<u64, DbError> {
    let sql = format!(
        "INSERT INTO {} (zip_code, state, {METRIC_COLUMNS}) VALUES ($1, $2, {})",
        tier.zip_aggregates(),
        placeholders(2, METRIC_COLUMN_COUNT),
    );

    let mut inserted = 0u64;
    for aggregate in rows {
        check_row(aggregate)?;
        let mut params = vec![
            DatabaseValue::String(aggregate.name.clone()),
            DatabaseValue::String(aggregate.state.clone()),
        ];
        params.extend(metric_params(aggregate, computed_at));
        inserted += db.exec_raw_params(&sql, &params).await?;
    }
    Ok(inserted)
}

/// Deletes all state aggregate rows in a tier (the state pass always
/// regenerates every row).
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn delete_all_states(db: &dyn Database, tier: Tier) -> Result<(), DbError> {
    db.exec_raw(&format!("DELETE FROM {}", tier.state_aggregates())).await?;
    Ok(())
}

/// Deletes county aggregate rows by FIPS, or every row when `fips` is
/// `None`.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn delete_counties(
    db: &dyn Database,
    tier: Tier,
    fips: Option<&[String]>,
) -> Result<(), DbError> {
    match fips {
        None => {
            db.exec_raw(&format!("DELETE FROM {}", tier.county_aggregates())).await?;
        }
        Some(codes) if codes.is_empty() => {}
        Some(codes) => {
            let mut sql = format!("DELETE FROM {} WHERE county_fips IN (", tier.county_aggregates());
            for i in 0..codes.len() {
                if i > 0 {
                    sql.push_str(", ");
                }
                write!(sql, "${}", i + 1).unwrap();
            }
            sql.push(')');
            let params: Vec<DatabaseValue> = codes
                .iter()
                .map(|c| DatabaseValue::String(c.clone()))
                .collect();
            db.exec_raw_params(&sql, &params).await?;
        }
    }
    Ok(())
}

/// Deletes ZIP aggregate rows for the given `(state, zip)` keys.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn delete_zips(db: &dyn Database, tier: Tier, keys: &[ZipKey]) -> Result<(), DbError> {
    if keys.is_empty() {
        return Ok(());
    }

    let mut sql = format!("DELETE FROM {} WHERE ", tier.zip_aggregates());
    let mut params: Vec<DatabaseValue> = Vec::with_capacity(keys.len() * 2);
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            sql.push_str(" OR ");
        }
        let base = i * 2;
        write!(sql, "(zip_code = ${} AND state = ${})", base + 1, base + 2).unwrap();
        params.push(DatabaseValue::String(key.zip.clone()));
        params.push(DatabaseValue::String(key.state.clone()));
    }

    db.exec_raw_params(&sql, &params).await?;
    Ok(())
}

/// Counts rows in an aggregate table.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn count_rows(db: &dyn Database, tier: Tier, region_type: RegionType) -> Result<u64, DbError> {
    let table = match region_type {
        RegionType::State => tier.state_aggregates(),
        RegionType::County => tier.county_aggregates(),
        RegionType::Zip => tier.zip_aggregates(),
    };
    let rows = db
        .query_raw_params(&format!("SELECT COUNT(*) AS row_count FROM {table}"), &[])
        .await?;

    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: "COUNT(*) returned no rows".to_string(),
    })?;
    let count: i64 = row.to_value("row_count").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse row count: {e}"),
    })?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Fetches per-level charger counts for the given ZIP keys. The change
/// detector compares these against the fresh staging grouping to drop
/// already-current ZIPs.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn zip_level_counts(
    db: &dyn Database,
    tier: Tier,
    keys: &[ZipKey],
) -> Result<BTreeMap<ZipKey, ChargerCounts>, DbError> {
    if keys.is_empty() {
        return Ok(BTreeMap::new());
    }

    let mut sql = format!(
        "SELECT zip_code, state, total_chargers, dcfast_count, level2_count, level1_count
         FROM {} WHERE ",
        tier.zip_aggregates()
    );
    let mut params: Vec<DatabaseValue> = Vec::with_capacity(keys.len() * 2);
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            sql.push_str(" OR ");
        }
        let base = i * 2;
        write!(sql, "(zip_code = ${} AND state = ${})", base + 1, base + 2).unwrap();
        params.push(DatabaseValue::String(key.zip.clone()));
        params.push(DatabaseValue::String(key.state.clone()));
    }

    let rows = db.query_raw_params(&sql, &params).await?;

    let mut counts = BTreeMap::new();
    for row in &rows {
        let key = ZipKey {
            state: row.to_value("state").unwrap_or_default(),
            zip: row.to_value("zip_code").unwrap_or_default(),
        };
        counts.insert(
            key,
            ChargerCounts {
                total: row.to_value("total_chargers").unwrap_or(0),
                dcfast: row.to_value("dcfast_count").unwrap_or(0),
                level2: row.to_value("level2_count").unwrap_or(0),
                level1: row.to_value("level1_count").unwrap_or(0),
            },
        );
    }
    Ok(counts)
}

/// Fetches the full count block (levels, connector classes, ports) for
/// the given ZIP keys. The change detector's already-current filter
/// compares all of it, not just levels, so a connector-only modification
/// still marks its ZIP affected.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn zip_full_counts(
    db: &dyn Database,
    tier: Tier,
    keys: &[ZipKey],
) -> Result<BTreeMap<ZipKey, (ChargerCounts, ConnectorCounts, PortCounts)>, DbError> {
    if keys.is_empty() {
        return Ok(BTreeMap::new());
    }

    let mut sql = format!(
        "SELECT zip_code, state, total_chargers, dcfast_count, level2_count, level1_count,
                tesla_count, ccs_count, j1772_count, chademo_count,
                tesla_ports, ccs_ports, j1772_ports, chademo_ports, total_ports
         FROM {} WHERE ",
        tier.zip_aggregates()
    );
    let mut params: Vec<DatabaseValue> = Vec::with_capacity(keys.len() * 2);
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            sql.push_str(" OR ");
        }
        let base = i * 2;
        write!(sql, "(zip_code = ${} AND state = ${})", base + 1, base + 2).unwrap();
        params.push(DatabaseValue::String(key.zip.clone()));
        params.push(DatabaseValue::String(key.state.clone()));
    }

    let rows = db.query_raw_params(&sql, &params).await?;

    let mut counts = BTreeMap::new();
    for row in &rows {
        let key = ZipKey {
            state: row.to_value("state").unwrap_or_default(),
            zip: row.to_value("zip_code").unwrap_or_default(),
        };
        counts.insert(
            key,
            (
                ChargerCounts {
                    total: row.to_value("total_chargers").unwrap_or(0),
                    dcfast: row.to_value("dcfast_count").unwrap_or(0),
                    level2: row.to_value("level2_count").unwrap_or(0),
                    level1: row.to_value("level1_count").unwrap_or(0),
                },
                ConnectorCounts {
                    tesla: row.to_value("tesla_count").unwrap_or(0),
                    ccs: row.to_value("ccs_count").unwrap_or(0),
                    j1772: row.to_value("j1772_count").unwrap_or(0),
                    chademo: row.to_value("chademo_count").unwrap_or(0),
                },
                PortCounts {
                    tesla: row.to_value("tesla_ports").unwrap_or(0),
                    ccs: row.to_value("ccs_ports").unwrap_or(0),
                    j1772: row.to_value("j1772_ports").unwrap_or(0),
                    chademo: row.to_value("chademo_ports").unwrap_or(0),
                    total: row.to_value("total_ports").unwrap_or(0),
                },
            ),
        );
    }
    Ok(counts)
}

/// Returns which of the given ZIP keys already have a staging aggregate
/// row. The sub-pipeline's completion ratio is the size of this set over
/// the affected set.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn zips_present(
    db: &dyn Database,
    tier: Tier,
    keys: &[ZipKey],
) -> Result<Vec<ZipKey>, DbError> {
    Ok(zip_level_counts(db, tier, keys).await?.into_keys().collect())
}

/// Selects aggregate rows of one resolution inside a bounding box. The
/// read path filters serving rows by the tier's zoom tag.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn select_in_bbox(
    db: &dyn Database,
    tier: Tier,
    region_type: RegionType,
    bbox: &BoundingBox,
) -> Result<Vec<RegionAggregate>, DbError> {
    let table = match region_type {
        RegionType::State => tier.state_aggregates(),
        RegionType::County => tier.county_aggregates(),
        RegionType::Zip => tier.zip_aggregates(),
    };

    let rows = db
        .query_raw_params(
            &format!(
                "SELECT * FROM {table}
                 WHERE longitude >= $1 AND longitude <= $2
                   AND latitude >= $3 AND latitude <= $4"
            ),
            &[
                DatabaseValue::Real64(bbox.west),
                DatabaseValue::Real64(bbox.east),
                DatabaseValue::Real64(bbox.south),
                DatabaseValue::Real64(bbox.north),
            ],
        )
        .await?;

    rows.iter()
        .map(|row| aggregate_from_row(row, region_type))
        .collect()
}

/// Decodes an aggregate row of the given resolution.
fn aggregate_from_row(
    row: &switchy_database::Row,
    region_type: RegionType,
) -> Result<RegionAggregate, DbError> {
    let (name, state, county_fips) = match region_type {
        RegionType::State => (
            row.to_value("state_name").unwrap_or_default(),
            row.to_value("state").unwrap_or_default(),
            None,
        ),
        RegionType::County => (
            row.to_value("county_name").unwrap_or_default(),
            row.to_value("state").unwrap_or_default(),
            row.to_value("county_fips").unwrap_or(None),
        ),
        RegionType::Zip => (
            row.to_value("zip_code").unwrap_or_default(),
            row.to_value("state").unwrap_or_default(),
            None,
        ),
    };

    Ok(RegionAggregate {
        region_type,
        state,
        name,
        county_fips,
        latitude: row.to_value("latitude").unwrap_or(0.0),
        longitude: row.to_value("longitude").unwrap_or(0.0),
        population: row.to_value("population").unwrap_or(0),
        population_estimated: row.to_value("population_estimated").unwrap_or(false),
        chargers: ChargerCounts {
            total: row.to_value("total_chargers").unwrap_or(0),
            dcfast: row.to_value("dcfast_count").unwrap_or(0),
            level2: row.to_value("level2_count").unwrap_or(0),
            level1: row.to_value("level1_count").unwrap_or(0),
        },
        connectors: ConnectorCounts {
            tesla: row.to_value("tesla_count").unwrap_or(0),
            ccs: row.to_value("ccs_count").unwrap_or(0),
            j1772: row.to_value("j1772_count").unwrap_or(0),
            chademo: row.to_value("chademo_count").unwrap_or(0),
        },
        ports: PortCounts {
            tesla: row.to_value("tesla_ports").unwrap_or(0),
            ccs: row.to_value("ccs_ports").unwrap_or(0),
            j1772: row.to_value("j1772_ports").unwrap_or(0),
            chademo: row.to_value("chademo_ports").unwrap_or(0),
            total: row.to_value("total_ports").unwrap_or(0),
        },
        need_score: row.to_value("need_score").unwrap_or(0),
        ev_infrastructure_score: row.to_value("ev_infrastructure_score").unwrap_or(0),
        opportunity_score: row.to_value("opportunity_score").unwrap_or(0),
        vmt_per_capita: row.to_value("vmt_per_capita").unwrap_or(None),
        zoom_range: region_type.zoom_range(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use charge_map_region_models::{ConnectorCounts, PortCounts, ZoomRange};

    fn sample(total: i32, dcfast: i32, level2: i32, level1: i32, ports: i32) -> RegionAggregate {
        RegionAggregate {
            region_type: RegionType::State,
            state: "CA".to_string(),
            name: "California".to_string(),
            county_fips: None,
            latitude: 37.0,
            longitude: -120.0,
            population: 39_000_000,
            population_estimated: false,
            chargers: ChargerCounts {
                total,
                dcfast,
                level2,
                level1,
            },
            connectors: ConnectorCounts::default(),
            ports: PortCounts {
                total: ports,
                ..PortCounts::default()
            },
            need_score: 0,
            ev_infrastructure_score: 50,
            opportunity_score: 40,
            vmt_per_capita: None,
            zoom_range: ZoomRange::States,
        }
    }

    #[test]
    fn consistent_row_passes_check() {
        assert!(check_row(&sample(10, 4, 4, 2, 12)).is_ok());
    }

    #[test]
    fn level_totality_violation_rejected() {
        let err = check_row(&sample(10, 4, 4, 1, 12)).unwrap_err();
        assert!(err.to_string().contains("invariant violation"));
    }

    #[test]
    fn port_totality_violation_rejected() {
        let err = check_row(&sample(10, 4, 4, 2, 9)).unwrap_err();
        assert!(err.to_string().contains("total ports"));
    }

    #[test]
    fn placeholder_numbering_continues_after_keys() {
        assert_eq!(placeholders(2, 3), "$3, $4, $5");
        assert_eq!(placeholders(0, 2), "$1, $2");
    }
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Change detection between the freshly staged station set and the
//! currently-serving one.
//!
//! The detector diffs the two sets by external identifier, derives the
//! affected state / county / ZIP sets (a moved station touches both its
//! old and new regions), and filters out ZIPs whose serving aggregate is
//! already current so the ZIP sub-pipeline only does real work.
//!
//! County affecting is FIPS-based: the ZIP crosswalk is the primary
//! derivation path and point-in-polygon against the county topology is
//! the agreeing second path. The two are unioned, and a ZIP whose
//! crosswalk and polygon answers disagree is logged.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use charge_map_aggregate::rollup::{StationRollup, group_by_zip};
use charge_map_database::{Tier, aggregates, stations};
use charge_map_geography::counties::CountyIndex;
use charge_map_geography::fips;
use charge_map_region_models::{ChangeSet, CountyKey, ZipKey};
use charge_map_station_models::Station;
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};
use thiserror::Error;

/// Coordinate drift below this many degrees is not a modification.
pub const COORDINATE_EPSILON: f64 = 0.001;

/// Errors that can occur during change detection.
#[derive(Debug, Error)]
pub enum DiffError {
    /// Storage operation failed.
    #[error("Database error: {0}")]
    Database(#[from] charge_map_database::DbError),

    /// Raw query failed.
    #[error("Database error: {0}")]
    Query(#[from] switchy_database::DatabaseError),
}

/// The classified station-level differences between two sets.
#[derive(Debug, Default)]
pub struct StationDelta<'a> {
    /// In staging, not in serving.
    pub added: Vec<&'a Station>,
    /// In serving, not in staging.
    pub removed: Vec<&'a Station>,
    /// In both, materially different: `(serving, staging)`.
    pub modified: Vec<(&'a Station, &'a Station)>,
}

impl StationDelta<'_> {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Whether two versions of the same station differ materially: level,
/// connector multiset, coordinates beyond [`COORDINATE_EPSILON`], state,
/// or ZIP.
#[must_use]
pub fn station_changed(old: &Station, new: &Station) -> bool {
    if old.level != new.level || old.state != new.state || old.zip != new.zip {
        return true;
    }
    if (old.latitude - new.latitude).abs() > COORDINATE_EPSILON
        || (old.longitude - new.longitude).abs() > COORDINATE_EPSILON
    {
        return true;
    }
    // Both sides are kept sorted, so Vec equality is multiset equality.
    old.connectors != new.connectors
}

/// Diffs two station maps keyed by external identifier.
#[must_use]
pub fn diff_maps<'a>(
    staging: &'a BTreeMap<i64, Station>,
    serving: &'a BTreeMap<i64, Station>,
) -> StationDelta<'a> {
    let mut delta = StationDelta::default();

    for (id, fresh) in staging {
        match serving.get(id) {
            None => delta.added.push(fresh),
            Some(current) => {
                if station_changed(current, fresh) {
                    delta.modified.push((current, fresh));
                }
            }
        }
    }

    for (id, current) in serving {
        if !staging.contains_key(id) {
            delta.removed.push(current);
        }
    }

    delta
}

/// Collects the affected `(state, zip)` pairs from a delta. A modified
/// station contributes both its old and new regions, so a move across a
/// state or ZIP line touches both sides.
#[must_use]
pub fn affected_regions(delta: &StationDelta<'_>) -> (BTreeSet<String>, BTreeSet<ZipKey>) {
    let mut states = BTreeSet::new();
    let mut zips = BTreeSet::new();

    let mut touch = |station: &Station| {
        if station.state.len() == 2 {
            states.insert(station.state.clone());
            if let Some(zip) = &station.zip {
                zips.insert(ZipKey {
                    state: station.state.clone(),
                    zip: zip.clone(),
                });
            }
        }
    };

    for station in &delta.added {
        touch(station);
    }
    for station in &delta.removed {
        touch(station);
    }
    for (old, new) in &delta.modified {
        touch(old);
        touch(new);
    }

    (states, zips)
}

/// Resolves affected ZIPs to counties through the crosswalk table.
async fn counties_from_crosswalk(
    db: &dyn Database,
    zips: &BTreeSet<ZipKey>,
) -> Result<BTreeSet<CountyKey>, DiffError> {
    if zips.is_empty() {
        return Ok(BTreeSet::new());
    }

    let codes: BTreeSet<&str> = zips.iter().map(|key| key.zip.as_str()).collect();

    let mut sql = String::from(
        "SELECT zc.zip, zc.county_fips, cb.name, cb.state
         FROM zip_counties zc
         JOIN county_boundaries cb ON cb.county_fips = zc.county_fips
         WHERE zc.zip IN (",
    );
    let mut params: Vec<DatabaseValue> = Vec::with_capacity(codes.len());
    for (i, code) in codes.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        write!(sql, "${}", i + 1).unwrap();
        params.push(DatabaseValue::String((*code).to_string()));
    }
    sql.push(')');

    let rows = db.query_raw_params(&sql, &params).await?;

    let mut counties = BTreeSet::new();
    for row in &rows {
        let county_fips: String = row.to_value("county_fips").unwrap_or_default();
        let zip: String = row.to_value("zip").unwrap_or_default();
        let state: String = row.to_value("state").unwrap_or_default();

        // The crosswalk is national; keep only counties whose state
        // matches some affected (state, zip) pair, resolved via FIPS.
        let state_matches = zips
            .iter()
            .any(|key| key.zip == zip && fips::abbr_to_fips(&key.state)
                .is_some_and(|state_fips| county_fips.starts_with(state_fips)));
        if !state_matches {
            continue;
        }

        counties.insert(CountyKey {
            fips: county_fips,
            state,
            name: row.to_value("name").unwrap_or_default(),
        });
    }
    Ok(counties)
}

/// Resolves changed stations to counties by point-in-polygon.
fn counties_from_polygons(
    index: &CountyIndex,
    delta: &StationDelta<'_>,
) -> BTreeSet<CountyKey> {
    let mut counties = BTreeSet::new();

    let mut touch = |station: &Station| {
        if let Some(county) = index.lookup(station.longitude, station.latitude) {
            counties.insert(CountyKey {
                fips: county.fips.clone(),
                state: county.state.clone(),
                name: county.name.clone(),
            });
        }
    };

    for station in &delta.added {
        touch(station);
    }
    for station in &delta.removed {
        touch(station);
    }
    for (old, new) in &delta.modified {
        touch(old);
        touch(new);
    }

    counties
}

/// Drops ZIPs whose serving aggregate already matches the fresh staging
/// grouping across levels, connector classes, and ports.
async fn filter_current_zips(
    db: &dyn Database,
    staging_stations: &[Station],
    zips: BTreeSet<ZipKey>,
) -> Result<BTreeSet<ZipKey>, DiffError> {
    if zips.is_empty() {
        return Ok(zips);
    }

    let keys: Vec<ZipKey> = zips.iter().cloned().collect();
    let serving_counts = aggregates::zip_full_counts(db, Tier::Serving, &keys).await?;
    let staging_groups = group_by_zip(staging_stations);

    let mut filtered = BTreeSet::new();
    for key in zips {
        let fresh = staging_groups
            .get(&key)
            .map(|members| StationRollup::from_stations(members.iter().copied()));

        match (serving_counts.get(&key), fresh) {
            // Serving row matches the fresh rollup exactly: nothing to
            // recompute for this ZIP.
            (Some((chargers, connectors, ports)), Some(rollup))
                if *chargers == rollup.chargers
                    && *connectors == rollup.connectors
                    && *ports == rollup.ports => {}
            // No serving row and no staging stations: a no-op ZIP.
            (None, None) => {}
            _ => {
                filtered.insert(key);
            }
        }
    }
    Ok(filtered)
}

/// Diffs staging against serving and derives the affected-region sets.
///
/// An empty result is valid and short-circuits aggregation. When the
/// county index is absent (topology not yet ingested), county affecting
/// falls back to the crosswalk path alone.
///
/// # Errors
///
/// Returns [`DiffError`] if a storage operation fails.
pub async fn detect(
    db: &dyn Database,
    county_index: Option<&CountyIndex>,
) -> Result<ChangeSet, DiffError> {
    let staging = stations::load_all(db, Tier::Staging).await?;
    let serving = stations::load_all(db, Tier::Serving).await?;

    let delta = diff_maps(&staging, &serving);
    log::info!(
        "Change detection: {} added, {} removed, {} modified",
        delta.added.len(),
        delta.removed.len(),
        delta.modified.len(),
    );

    if delta.is_empty() {
        return Ok(ChangeSet::default());
    }

    let (affected_states, affected_zips) = affected_regions(&delta);

    let crosswalk_counties = counties_from_crosswalk(db, &affected_zips).await?;
    let affected_counties = match county_index {
        Some(index) => {
            let polygon_counties = counties_from_polygons(index, &delta);
            for county in polygon_counties.difference(&crosswalk_counties) {
                log::warn!(
                    "County {} ({}) found by polygon lookup but not the ZIP crosswalk",
                    county.fips,
                    county.name,
                );
            }
            crosswalk_counties.union(&polygon_counties).cloned().collect()
        }
        None => crosswalk_counties,
    };

    let staging_list: Vec<Station> = staging.into_values().collect();
    let affected_zips = filter_current_zips(db, &staging_list, affected_zips).await?;

    let mut changes = ChangeSet {
        affected_states,
        affected_counties,
        affected_zips,
        ..ChangeSet::default()
    };
    changes.totals.added = delta.added.len();
    changes.totals.removed = delta.removed.len();
    changes.totals.modified = delta.modified.len();
    changes.totals.states = changes.affected_states.len();
    changes.totals.counties = changes.affected_counties.len();
    changes.totals.zips = changes.affected_zips.len();

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use charge_map_station_models::{ChargerLevel, ConnectorType};
    use chrono::Utc;

    fn station(id: i64, state: &str, zip: &str) -> Station {
        Station {
            external_id: id,
            name: format!("Station {id}"),
            latitude: 37.75,
            longitude: -122.41,
            street_address: None,
            city: None,
            state: state.to_string(),
            zip: Some(zip.to_string()),
            level: ChargerLevel::DcFast,
            num_ports: 4,
            connectors: vec![ConnectorType::Tesla],
            network: None,
            created_at: Utc::now(),
        }
    }

    fn as_map(stations: Vec<Station>) -> BTreeMap<i64, Station> {
        stations.into_iter().map(|s| (s.external_id, s)).collect()
    }

    #[test]
    fn detects_added_and_removed() {
        let staging = as_map(vec![station(1, "CA", "94110"), station(3, "WA", "98101")]);
        let serving = as_map(vec![station(1, "CA", "94110"), station(2, "NV", "89109")]);

        let delta = diff_maps(&staging, &serving);
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].external_id, 3);
        assert_eq!(delta.removed.len(), 1);
        assert_eq!(delta.removed[0].external_id, 2);
        assert!(delta.modified.is_empty());
    }

    #[test]
    fn detector_symmetry() {
        let set_a = as_map(vec![station(1, "CA", "94110"), station(2, "NV", "89109")]);
        let set_b = as_map(vec![station(2, "NV", "89109"), station(3, "WA", "98101")]);

        let forward = diff_maps(&set_a, &set_b);
        let backward = diff_maps(&set_b, &set_a);

        let forward_added: Vec<i64> = forward.added.iter().map(|s| s.external_id).collect();
        let backward_removed: Vec<i64> = backward.removed.iter().map(|s| s.external_id).collect();
        assert_eq!(forward_added, backward_removed);
    }

    #[test]
    fn connector_multiset_change_is_a_modification() {
        let mut new = station(1, "CA", "94110");
        new.connectors = vec![ConnectorType::Tesla, ConnectorType::J1772Combo];
        new.connectors.sort_unstable();
        let old = station(1, "CA", "94110");

        assert!(station_changed(&old, &new));

        let staging = as_map(vec![new]);
        let serving = as_map(vec![old]);
        let delta = diff_maps(&staging, &serving);
        assert_eq!(delta.modified.len(), 1);
    }

    #[test]
    fn coordinate_drift_within_epsilon_is_not_a_change() {
        let old = station(1, "CA", "94110");
        let mut new = station(1, "CA", "94110");
        new.latitude += 0.0005;
        assert!(!station_changed(&old, &new));

        new.latitude = old.latitude + 0.002;
        assert!(station_changed(&old, &new));
    }

    #[test]
    fn level_and_state_and_zip_changes_are_modifications() {
        let old = station(1, "CA", "94110");

        let mut new = station(1, "CA", "94110");
        new.level = ChargerLevel::Level2;
        assert!(station_changed(&old, &new));

        let mut new = station(1, "CA", "94110");
        new.state = "NV".to_string();
        assert!(station_changed(&old, &new));

        let mut new = station(1, "CA", "94110");
        new.zip = Some("94103".to_string());
        assert!(station_changed(&old, &new));
    }

    #[test]
    fn move_touches_both_old_and_new_regions() {
        let old = station(1, "CA", "94110");
        let mut new = station(1, "NV", "89109");
        new.external_id = 1;

        let staging = as_map(vec![new]);
        let serving = as_map(vec![old]);
        let delta = diff_maps(&staging, &serving);
        let (states, zips) = affected_regions(&delta);

        assert!(states.contains("CA"));
        assert!(states.contains("NV"));
        assert!(zips.contains(&ZipKey { state: "CA".to_string(), zip: "94110".to_string() }));
        assert!(zips.contains(&ZipKey { state: "NV".to_string(), zip: "89109".to_string() }));
    }

    #[test]
    fn empty_delta_for_identical_sets() {
        let set = as_map(vec![station(1, "CA", "94110"), station(2, "NV", "89109")]);
        let delta = diff_maps(&set, &set);
        assert!(delta.is_empty());
        let (states, zips) = affected_regions(&delta);
        assert!(states.is_empty());
        assert!(zips.is_empty());
    }
}

//! The state aggregation pass.
//!
//! One full scan of the staging station table grouped by state. Rows are
//! regenerated for every state with stations plus every affected state,
//! so a state whose last charger disappeared still gets a zero-count row
//! rather than vanishing from the map.

use std::collections::BTreeSet;

use charge_map_census::population::{PopulationConfig, population};
use charge_map_database::{Tier, aggregates, stations};
use charge_map_geography::fips;
use charge_map_region_models::{RegionAggregate, RegionType};
use chrono::{DateTime, Utc};
use switchy_database::Database;

use crate::rollup::{StationRollup, group_by_state};
use crate::{AggregateError, INSERT_BATCH_SIZE};

/// Rebuilds the staging state aggregate table.
///
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns [`AggregateError`] if a storage operation fails. Population
/// fetch failures degrade to estimates and do not fail the pass.
pub async fn aggregate_states(
    db: &dyn Database,
    client: &reqwest::Client,
    population_config: &PopulationConfig,
    affected: &BTreeSet<String>,
    now: DateTime<Utc>,
) -> Result<u64, AggregateError> {
    let all_stations = stations::load_all(db, Tier::Staging).await?;
    let station_list: Vec<_> = all_stations.into_values().collect();
    let groups = group_by_state(&station_list);

    // Union of states with stations and states the change detector
    // touched; the latter covers states that just lost their only
    // station.
    let mut targets: BTreeSet<String> = groups.keys().cloned().collect();
    targets.extend(affected.iter().cloned());

    let mut rows: Vec<RegionAggregate> = Vec::with_capacity(targets.len());

    for abbr in &targets {
        let Some(record) = fips::by_abbr(abbr) else {
            log::warn!("Skipping unknown state code {abbr:?}");
            continue;
        };

        let members = groups.get(abbr).map_or(&[][..], Vec::as_slice);
        let rollup = StationRollup::from_stations(members.iter().copied());

        let figure = population(
            db,
            client,
            population_config,
            RegionType::State,
            record.fips,
            now,
        )
        .await?;

        let (longitude, latitude) = if members.is_empty() {
            (record.longitude, record.latitude)
        } else {
            rollup.centroid
        };

        rows.push(RegionAggregate {
            region_type: RegionType::State,
            state: record.abbr.to_string(),
            name: record.name.to_string(),
            county_fips: None,
            latitude,
            longitude,
            population: figure.value,
            population_estimated: figure.is_estimate(),
            chargers: rollup.chargers,
            connectors: rollup.connectors,
            ports: rollup.ports,
            need_score: charge_map_scoring::need_score(
                figure.value,
                i64::from(rollup.chargers.total),
            ),
            ev_infrastructure_score: charge_map_scoring::readiness_score(
                rollup.weighted(),
                figure.value,
                None,
                false,
            ),
            opportunity_score: charge_map_scoring::opportunity_score(
                i64::from(rollup.chargers.total),
                figure.value,
                None,
            ),
            vmt_per_capita: None,
            zoom_range: RegionType::State.zoom_range(),
        });
    }

    aggregates::delete_all_states(db, Tier::Staging).await?;

    let mut written = 0u64;
    for batch in rows.chunks(INSERT_BATCH_SIZE) {
        written += aggregates::insert_state_batch(db, Tier::Staging, batch, now).await?;
    }

    log::info!("State aggregation wrote {written} rows");
    Ok(written)
}

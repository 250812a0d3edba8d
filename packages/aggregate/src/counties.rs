//! The county aggregation pass.
//!
//! Counties come from the boundary index. Candidate stations are selected
//! by state code and a buffered bounding box around the county polygon;
//! the rollup over candidates is CPU-bound, so it fans out across worker
//! threads in chunks. Populations are fetched by FIPS, VMT joins by the
//! same key, and ties between same-named counties are impossible because
//! everything is keyed by FIPS.

use std::collections::BTreeSet;

use charge_map_census::population::{PopulationConfig, population};
use charge_map_census::vmt;
use charge_map_database::{Tier, aggregates, stations};
use charge_map_geography::counties::CountyIndex;
use charge_map_region_models::{CountyKey, RegionAggregate, RegionType};
use charge_map_station_models::Station;
use chrono::{DateTime, Utc};
use switchy_database::Database;

use crate::rollup::StationRollup;
use crate::{AggregateError, INSERT_BATCH_SIZE};

/// Degrees of padding around a county's bbox when selecting candidate
/// stations.
pub const COUNTY_BBOX_BUFFER: f64 = 0.05;

/// Worker threads for the candidate-filtering fan-out.
const ROLLUP_THREADS: usize = 4;

/// One county's computed rollup, pre-population.
struct CountyRollup {
    key: CountyKey,
    centroid: (f64, f64),
    rollup: StationRollup,
}

/// Filters the station list down to one county's candidates and reduces
/// them. Pure; runs on worker threads.
fn roll_up_county(
    shape_county: &CountyKey,
    bbox: charge_map_region_models::BoundingBox,
    centroid: (f64, f64),
    all_stations: &[Station],
) -> CountyRollup {
    let padded = bbox.buffered(COUNTY_BBOX_BUFFER);
    let members: Vec<&Station> = all_stations
        .iter()
        .filter(|s| s.state == shape_county.state && padded.contains(s.longitude, s.latitude))
        .collect();

    let rollup = StationRollup::from_stations(members.iter().copied());
    let centroid = if members.is_empty() {
        centroid
    } else {
        rollup.centroid
    };

    CountyRollup {
        key: shape_county.clone(),
        centroid,
        rollup,
    }
}

/// Rebuilds staging county aggregates: every county in the index when
/// `targets` is `None`, otherwise only the targeted FIPS set.
///
/// Returns the number of rows written.
///
/// # Errors
///
/// Returns [`AggregateError`] if a storage operation fails.
pub async fn aggregate_counties(
    db: &dyn Database,
    client: &reqwest::Client,
    population_config: &PopulationConfig,
    index: &CountyIndex,
    targets: Option<&BTreeSet<CountyKey>>,
    now: DateTime<Utc>,
) -> Result<u64, AggregateError> {
    let all_stations: Vec<Station> = stations::load_all(db, Tier::Staging)
        .await?
        .into_values()
        .collect();

    // Materialize the work list: (identity, bbox, centroid) per county.
    let work: Vec<(CountyKey, charge_map_region_models::BoundingBox, (f64, f64))> = index
        .iter()
        .filter(|shape| {
            targets.is_none_or(|set| set.iter().any(|key| key.fips == shape.county().fips))
        })
        .map(|shape| {
            (
                CountyKey {
                    fips: shape.county().fips.clone(),
                    state: shape.county().state.clone(),
                    name: shape.county().name.clone(),
                },
                *shape.bbox(),
                shape.centroid(),
            )
        })
        .collect();

    // Fan the CPU-bound candidate filtering out across worker threads;
    // each chunk writes to its own output slot.
    let chunk_size = work.len().div_ceil(ROLLUP_THREADS).max(1);
    let mut rollups: Vec<CountyRollup> = Vec::with_capacity(work.len());
    std::thread::scope(|scope| {
        let handles: Vec<_> = work
            .chunks(chunk_size)
            .map(|chunk| {
                let stations_ref = &all_stations;
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|(key, bbox, centroid)| {
                            roll_up_county(key, *bbox, *centroid, stations_ref)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for handle in handles {
            if let Ok(chunk_rollups) = handle.join() {
                rollups.extend(chunk_rollups);
            }
        }
    });

    let daily_vmt = vmt::daily_vmt_by_county(db).await?;

    let mut rows: Vec<RegionAggregate> = Vec::with_capacity(rollups.len());
    for county in rollups {
        let figure = population(
            db,
            client,
            population_config,
            RegionType::County,
            &county.key.fips,
            now,
        )
        .await?;

        let vmt_per_capita = daily_vmt
            .get(&county.key.fips)
            .and_then(|daily| vmt::per_capita(*daily, figure.value));

        if let Some(per_capita) = vmt_per_capita {
            vmt::update_per_capita(db, &county.key.fips, per_capita).await?;
        }

        rows.push(RegionAggregate {
            region_type: RegionType::County,
            state: county.key.state.clone(),
            name: county.key.name.clone(),
            county_fips: Some(county.key.fips.clone()),
            latitude: county.centroid.1,
            longitude: county.centroid.0,
            population: figure.value,
            population_estimated: figure.is_estimate(),
            chargers: county.rollup.chargers,
            connectors: county.rollup.connectors,
            ports: county.rollup.ports,
            need_score: charge_map_scoring::need_score(
                figure.value,
                i64::from(county.rollup.chargers.total),
            ),
            ev_infrastructure_score: charge_map_scoring::readiness_score(
                county.rollup.weighted(),
                figure.value,
                vmt_per_capita,
                false,
            ),
            opportunity_score: charge_map_scoring::opportunity_score(
                i64::from(county.rollup.chargers.total),
                figure.value,
                vmt_per_capita,
            ),
            vmt_per_capita,
            zoom_range: RegionType::County.zoom_range(),
        });
    }

    let fips_codes: Vec<String> = rows
        .iter()
        .filter_map(|row| row.county_fips.clone())
        .collect();
    if targets.is_none() {
        aggregates::delete_counties(db, Tier::Staging, None).await?;
    } else {
        aggregates::delete_counties(db, Tier::Staging, Some(&fips_codes)).await?;
    }

    let mut written = 0u64;
    for batch in rows.chunks(INSERT_BATCH_SIZE) {
        written += aggregates::insert_county_batch(db, Tier::Staging, batch, now).await?;
    }

    log::info!("County aggregation wrote {written} rows");
    Ok(written)
}

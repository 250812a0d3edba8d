//! The resumable ZIP sub-pipeline.
//!
//! ZIP recomputation is the one pass that can outlive a host wall-clock
//! ceiling, so its work list is persisted per cycle and drawn down in
//! lexicographic chunks. A chunk that fails stays unprocessed and is
//! retried on the next invocation; a deadline makes the run yield at the
//! next chunk boundary and report partial completion.

use std::time::{Duration, Instant};

use charge_map_census::population::{PopulationConfig, populations_for_zips};
use charge_map_database::{Tier, aggregates, cycle, stations};
use charge_map_region_models::{RegionAggregate, RegionType, ZipKey};
use chrono::Utc;
use switchy_database::Database;

use crate::AggregateError;
use crate::rollup::{StationRollup, group_by_zip};

/// ZIPs per chunk.
pub const ZIP_CHUNK_SIZE: usize = 100;

/// Pause between chunks.
pub const ZIP_CHUNK_PAUSE: Duration = Duration::from_millis(200);

/// Outcome of one sub-pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZipRunStatus {
    /// Every affected ZIP has been recomputed.
    Complete,
    /// Some ZIPs remain; the fraction in `[0, 1)` is how much is done.
    Partial(f64),
}

impl ZipRunStatus {
    /// Whether the affected set is fully drained.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Completion fraction in `[0, 1]`.
    #[must_use]
    pub const fn completion(self) -> f64 {
        match self {
            Self::Complete => 1.0,
            Self::Partial(fraction) => fraction,
        }
    }
}

/// Knobs for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct ZipRunOptions {
    /// ZIPs per chunk.
    pub chunk_size: usize,
    /// Pause between chunks.
    pub pause: Duration,
    /// Yield at the next chunk boundary once this instant passes.
    pub deadline: Option<Instant>,
}

impl Default for ZipRunOptions {
    fn default() -> Self {
        Self {
            chunk_size: ZIP_CHUNK_SIZE,
            pause: ZIP_CHUNK_PAUSE,
            deadline: None,
        }
    }
}

/// Completion fraction of a queue.
#[must_use]
pub fn completion_ratio(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = processed as f64 / total as f64;
    ratio
}

/// Recomputes one chunk of ZIP aggregates: one station query for the
/// whole chunk, local grouping, batched populations, scores, then
/// delete-and-insert.
async fn process_chunk(
    db: &dyn Database,
    client: &reqwest::Client,
    population_config: &PopulationConfig,
    chunk: &[ZipKey],
) -> Result<u64, AggregateError> {
    let pairs: Vec<(String, String)> = chunk
        .iter()
        .map(|key| (key.state.clone(), key.zip.clone()))
        .collect();
    let chunk_stations = stations::select_by_zips(db, Tier::Staging, &pairs).await?;
    let groups = group_by_zip(&chunk_stations);

    let now = Utc::now();
    let zip_codes: Vec<String> = groups.keys().map(|key| key.zip.clone()).collect();
    let populations = populations_for_zips(db, client, population_config, &zip_codes, now).await?;

    let mut rows: Vec<RegionAggregate> = Vec::with_capacity(groups.len());
    for (key, members) in &groups {
        let rollup = StationRollup::from_stations(members.iter().copied());
        let Some(figure) = populations.get(&key.zip) else {
            continue;
        };

        rows.push(RegionAggregate {
            region_type: RegionType::Zip,
            state: key.state.clone(),
            name: key.zip.clone(),
            county_fips: None,
            latitude: rollup.centroid.1,
            longitude: rollup.centroid.0,
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
            zoom_range: RegionType::Zip.zoom_range(),
        });
    }

    // A ZIP whose last station disappeared gets its stale row deleted and
    // nothing reinserted.
    aggregates::delete_zips(db, Tier::Staging, chunk).await?;
    let written = aggregates::insert_zip_batch(db, Tier::Staging, &rows, now).await?;
    Ok(written)
}

/// Persists the affected-ZIP work list for a cycle.
///
/// # Errors
///
/// Returns [`AggregateError`] if the database operation fails.
pub async fn seed(
    db: &dyn Database,
    cycle_id: &str,
    affected_zips: &std::collections::BTreeSet<ZipKey>,
) -> Result<(), AggregateError> {
    let keys: Vec<ZipKey> = affected_zips.iter().cloned().collect();
    cycle::seed_zip_queue(db, cycle_id, &keys).await?;
    Ok(())
}

/// Draws down the cycle's residual ZIP set in lexicographic chunks.
///
/// A single chunk failure is logged with the chunk's ZIPs and does not
/// abort the run; those ZIPs stay queued for the next invocation.
///
/// # Errors
///
/// Returns [`AggregateError`] only if the queue itself cannot be read or
/// updated.
pub async fn run(
    db: &dyn Database,
    client: &reqwest::Client,
    population_config: &PopulationConfig,
    cycle_id: &str,
    options: &ZipRunOptions,
) -> Result<ZipRunStatus, AggregateError> {
    let remaining = cycle::remaining_zips(db, cycle_id).await?;
    let (total, _processed) = cycle::zip_queue_counts(db, cycle_id).await?;

    if total == 0 {
        return Ok(ZipRunStatus::Complete);
    }

    let chunk_size = options.chunk_size.max(1);
    let chunk_count = remaining.len().div_ceil(chunk_size);

    for (chunk_num, chunk) in remaining.chunks(chunk_size).enumerate() {
        if let Some(deadline) = options.deadline
            && Instant::now() >= deadline
        {
            log::info!(
                "ZIP sub-pipeline yielding at chunk {}/{chunk_count} (deadline reached)",
                chunk_num + 1
            );
            break;
        }

        match process_chunk(db, client, population_config, chunk).await {
            Ok(written) => {
                cycle::mark_zips_processed(db, cycle_id, chunk, Utc::now()).await?;
                log::info!(
                    "ZIP chunk {}/{chunk_count}: {} ZIPs, {written} rows written",
                    chunk_num + 1,
                    chunk.len(),
                );
            }
            Err(e) => {
                let zips: Vec<&str> = chunk.iter().map(|key| key.zip.as_str()).collect();
                log::error!(
                    "ZIP chunk {}/{chunk_count} failed ({}): {e}",
                    chunk_num + 1,
                    zips.join(","),
                );
            }
        }

        if chunk_num + 1 < chunk_count {
            tokio::time::sleep(options.pause).await;
        }
    }

    let (total, processed) = cycle::zip_queue_counts(db, cycle_id).await?;
    let ratio = completion_ratio(processed, total);

    if processed == total {
        Ok(ZipRunStatus::Complete)
    } else {
        log::info!("ZIP sub-pipeline partial: {processed}/{total}");
        Ok(ZipRunStatus::Partial(ratio))
    }
}

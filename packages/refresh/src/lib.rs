#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The refresh-cycle coordinator.
//!
//! Drives one cycle through `Ingesting → Detecting → AggregatingStates →
//! AggregatingCounties → AggregatingZips → Promotable → Promoting`,
//! persisting the phase after every transition so a process restart
//! resumes mid-cycle instead of starting over. Everything before the
//! promote transaction touches staging only; any failure short of
//! promotion leaves serving exactly as it was.

use std::collections::BTreeSet;

use charge_map_aggregate::zip_queue::{ZipRunOptions, ZipRunStatus};
use charge_map_aggregate::{counties, states, zip_queue};
use charge_map_census::population::PopulationConfig;
use charge_map_database::cycle::PersistedCycle;
use charge_map_database::{Tier, aggregates, cycle, promote, stations};
use charge_map_diff::detect;
use charge_map_geography::counties::CountyIndex;
use charge_map_region_models::{ChangeSet, CyclePhase, RegionType};
use charge_map_registry::{RegistryConfig, ingest};
use chrono::Utc;
use serde::Serialize;
use switchy_database::Database;
use thiserror::Error;

/// The cycle-abort taxonomy. Everything below the coordinator converts
/// into one of these, tagged with the cycle id by [`CycleReport`].
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Another cycle holds the refresh lock.
    #[error("cycle-in-progress")]
    CycleInProgress,

    /// Registry fetch or staging ingest failed.
    #[error("upstream-error: {0}")]
    Upstream(#[from] charge_map_registry::RegistryError),

    /// A cycle-level invariant failed; serving left untouched.
    #[error("invariant-violation: {message}")]
    InvariantViolation {
        /// What went wrong.
        message: String,
    },

    /// The atomic rename failed; the cycle stays promotable for retry.
    #[error("promotion-failed: {0}")]
    PromotionFailed(charge_map_database::DbError),

    /// Storage-layer failure outside promotion.
    #[error("storage error: {0}")]
    Storage(#[from] charge_map_database::DbError),

    /// Change detection failed.
    #[error("detect error: {0}")]
    Detect(#[from] charge_map_diff::DiffError),

    /// Aggregation failed.
    #[error("aggregate error: {0}")]
    Aggregate(#[from] charge_map_aggregate::AggregateError),

    /// County topology failed to load.
    #[error("geography error: {0}")]
    Geo(#[from] charge_map_geography::GeoError),
}

/// How a completed invocation left the system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleOutcome {
    /// Staging swapped into serving.
    Promoted,
    /// The detector found nothing; serving untouched.
    NoChanges,
    /// The ZIP sub-pipeline yielded; the cycle resumes next tick.
    Partial(f64),
}

/// Row counts for the trigger response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleCounts {
    /// Stations written to staging.
    pub inserted: u64,
    /// Raw records rejected by the normalizer.
    pub rejected: u64,
    /// State aggregate rows written.
    pub state_rows: u64,
    /// County aggregate rows written.
    pub county_rows: u64,
    /// Affected ZIPs processed so far.
    pub zips_processed: u64,
    /// Affected ZIPs total.
    pub zips_total: u64,
}

/// The result of one coordinator invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// The cycle this invocation ran (or resumed).
    pub cycle_id: String,
    /// Terminal outcome.
    pub outcome: CycleOutcome,
    /// Human-readable summary.
    pub message: String,
    /// Row counts.
    pub counts: CycleCounts,
}

/// Coordinator configuration, assembled from the environment by the
/// binaries and passed in explicitly everywhere else.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Station registry endpoint and credential.
    pub registry: RegistryConfig,
    /// Census endpoint and credential.
    pub population: PopulationConfig,
    /// ZIP sub-pipeline knobs (chunk size, pause, deadline).
    pub zip_options: ZipRunOptions,
}

impl RefreshConfig {
    /// Builds the config from the environment with default ZIP options.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            registry: RegistryConfig::from_env(),
            population: PopulationConfig::from_env(),
            zip_options: ZipRunOptions::default(),
        }
    }
}

/// The ingest gate: something was inserted AND the fresh set is more
/// than half the size of the serving set, protecting against a
/// truncated upstream response.
#[must_use]
pub const fn ingest_gate(inserted: u64, staging_count: u64, serving_count: u64) -> bool {
    inserted > 0 && staging_count * 2 > serving_count
}

/// The promotion gate: the ZIP sub-pipeline is complete and both upper
/// aggregation levels produced rows.
#[must_use]
pub const fn promotion_gate(zip_complete: bool, state_rows: u64, county_rows: u64) -> bool {
    zip_complete && state_rows > 0 && county_rows > 0
}

/// Maps an invocation result to the shell exit code contract.
#[must_use]
pub fn exit_code(result: &Result<CycleReport, RefreshError>) -> i32 {
    match result {
        Ok(report) => match report.outcome {
            CycleOutcome::Promoted | CycleOutcome::NoChanges => 0,
            CycleOutcome::Partial(_) => 5,
        },
        Err(RefreshError::CycleInProgress) => 2,
        Err(RefreshError::Upstream(_)) => 3,
        Err(RefreshError::PromotionFailed(_)) => 4,
        Err(_) => 1,
    }
}

/// Persists a phase transition.
async fn enter_phase(
    db: &dyn Database,
    persisted: &mut PersistedCycle,
    phase: CyclePhase,
) -> Result<(), RefreshError> {
    persisted.phase = phase;
    cycle::save_cycle_state(db, persisted, Utc::now()).await?;
    log::info!("Cycle {}: {phase}", persisted.cycle_id);
    Ok(())
}

/// Returns the cycle to idle: clears persisted state and releases the
/// lock.
async fn go_idle(db: &dyn Database, lock_id: &str) {
    if let Err(e) = cycle::clear_cycle_state(db).await {
        log::error!("Failed to clear cycle state: {e}");
    }
    if let Err(e) = cycle::release_lock(db, lock_id).await {
        log::error!("Failed to release refresh lock: {e}");
    }
}

/// Releases the lock but keeps the persisted state, for yields that
/// resume on a later tick (partial ZIP completion, failed promotion).
async fn yield_cycle(db: &dyn Database, lock_id: &str) {
    if let Err(e) = cycle::release_lock(db, lock_id).await {
        log::error!("Failed to release refresh lock: {e}");
    }
}

/// Loads the county index, or `None` when the topology table is empty.
async fn load_county_index(db: &dyn Database) -> Result<Option<CountyIndex>, RefreshError> {
    let index = CountyIndex::load(db).await?;
    if index.is_empty() {
        log::warn!("County topology table is empty; county derivation limited to the crosswalk");
        Ok(None)
    } else {
        Ok(Some(index))
    }
}

/// Runs (or resumes) one refresh cycle.
///
/// # Errors
///
/// Returns [`RefreshError`] per the §abort taxonomy; in every error case
/// except a failed promotion retry, the cycle has returned to idle and
/// serving is untouched.
#[allow(clippy::too_many_lines)]
pub async fn run_cycle(
    db: &dyn Database,
    client: &reqwest::Client,
    config: &RefreshConfig,
) -> Result<CycleReport, RefreshError> {
    let started = Utc::now();
    let lock_id = format!("run-{}", started.format("%Y%m%d%H%M%S%3f"));

    if !cycle::acquire_lock(db, &lock_id, started).await? {
        return Err(RefreshError::CycleInProgress);
    }

    // A persisted mid-cycle state means a previous invocation yielded
    // (partial ZIPs) or died; resume it rather than starting over. From
    // here on every failure must flow through the cleanup below — the
    // lock is held.
    let result = match cycle::load_cycle_state(db).await {
        Err(e) => Err(e.into()),
        Ok(Some(persisted))
            if matches!(
                persisted.phase,
                CyclePhase::AggregatingZips | CyclePhase::Promotable | CyclePhase::Promoting
            ) =>
        {
            log::info!(
                "Resuming cycle {} at phase {}",
                persisted.cycle_id,
                persisted.phase
            );
            resume_tail(db, client, config, persisted, &lock_id).await
        }
        Ok(_) => fresh_cycle(db, client, config, &lock_id).await,
    };

    if let Err(e) = &result {
        match e {
            RefreshError::PromotionFailed(_) => yield_cycle(db, &lock_id).await,
            RefreshError::CycleInProgress => {}
            _ => go_idle(db, &lock_id).await,
        }
    }

    result
}

/// Runs a cycle from Ingesting.
async fn fresh_cycle(
    db: &dyn Database,
    client: &reqwest::Client,
    config: &RefreshConfig,
    lock_id: &str,
) -> Result<CycleReport, RefreshError> {
    let started = Utc::now();
    let cycle_id = format!("cycle-{}", started.format("%Y%m%d%H%M%S"));

    let mut persisted = PersistedCycle {
        cycle_id: cycle_id.clone(),
        phase: CyclePhase::Ingesting,
        changes: ChangeSet::default(),
        started_at: started,
    };
    cycle::save_cycle_state(db, &persisted, started).await?;
    log::info!("Cycle {cycle_id}: {}", CyclePhase::Ingesting);

    let summary = ingest::ingest(db, client, &config.registry, started).await?;

    let staging_count = stations::count(db, Tier::Staging).await?;
    let serving_count = stations::count(db, Tier::Serving).await?;
    if !ingest_gate(summary.inserted, staging_count, serving_count) {
        return Err(RefreshError::InvariantViolation {
            message: format!(
                "staging station count {staging_count} not above half of serving {serving_count} \
                 (inserted {})",
                summary.inserted
            ),
        });
    }

    enter_phase(db, &mut persisted, CyclePhase::Detecting).await?;

    let county_index = load_county_index(db).await?;
    let changes = detect(db, county_index.as_ref()).await?;

    if changes.is_empty() {
        log::info!("Cycle {cycle_id}: no changes");
        cycle::insert_cycle_log(db, &cycle_id, Utc::now(), &changes).await?;
        go_idle(db, lock_id).await;
        return Ok(CycleReport {
            cycle_id,
            outcome: CycleOutcome::NoChanges,
            message: "no changes".to_string(),
            counts: CycleCounts {
                inserted: summary.inserted,
                rejected: summary.rejected,
                ..CycleCounts::default()
            },
        });
    }

    persisted.changes = changes.clone();
    enter_phase(db, &mut persisted, CyclePhase::AggregatingStates).await?;

    let state_rows =
        states::aggregate_states(db, client, &config.population, &changes.affected_states, Utc::now())
            .await?;

    enter_phase(db, &mut persisted, CyclePhase::AggregatingCounties).await?;

    // A cold serving set means every county is stale; regenerate them
    // all. Otherwise only the affected ones.
    let county_targets: Option<&BTreeSet<_>> =
        (serving_count > 0).then_some(&changes.affected_counties);
    let county_rows = match county_index.as_ref() {
        Some(index) => {
            counties::aggregate_counties(
                db,
                client,
                &config.population,
                index,
                county_targets,
                Utc::now(),
            )
            .await?
        }
        None => 0,
    };

    enter_phase(db, &mut persisted, CyclePhase::AggregatingZips).await?;
    zip_queue::seed(db, &cycle_id, &changes.affected_zips).await?;

    finish_zips(
        db,
        client,
        config,
        persisted,
        lock_id,
        CycleCounts {
            inserted: summary.inserted,
            rejected: summary.rejected,
            state_rows,
            county_rows,
            ..CycleCounts::default()
        },
    )
    .await
}

/// Resumes a cycle that yielded at or after the ZIP phase.
async fn resume_tail(
    db: &dyn Database,
    client: &reqwest::Client,
    config: &RefreshConfig,
    persisted: PersistedCycle,
    lock_id: &str,
) -> Result<CycleReport, RefreshError> {
    let state_rows = aggregates::count_rows(db, Tier::Staging, RegionType::State).await?;
    let county_rows = aggregates::count_rows(db, Tier::Staging, RegionType::County).await?;

    finish_zips(
        db,
        client,
        config,
        persisted,
        lock_id,
        CycleCounts {
            state_rows,
            county_rows,
            ..CycleCounts::default()
        },
    )
    .await
}

/// Drains the ZIP sub-pipeline and, when it completes, runs the
/// promotion tail shared by fresh and resumed cycles.
async fn finish_zips(
    db: &dyn Database,
    client: &reqwest::Client,
    config: &RefreshConfig,
    mut persisted: PersistedCycle,
    lock_id: &str,
    mut counts: CycleCounts,
) -> Result<CycleReport, RefreshError> {
    let cycle_id = persisted.cycle_id.clone();

    let status = zip_queue::run(db, client, &config.population, &cycle_id, &config.zip_options)
        .await?;

    let (zips_total, zips_processed) = cycle::zip_queue_counts(db, &cycle_id).await?;
    counts.zips_total = zips_total;
    counts.zips_processed = zips_processed;

    if let ZipRunStatus::Partial(fraction) = status {
        // Stay at AggregatingZips; the next tick resumes the residue.
        enter_phase(db, &mut persisted, CyclePhase::AggregatingZips).await?;
        yield_cycle(db, lock_id).await;
        return Ok(CycleReport {
            cycle_id,
            outcome: CycleOutcome::Partial(fraction),
            message: format!("zip sub-pipeline partial: {zips_processed}/{zips_total}"),
            counts,
        });
    }

    if counts.state_rows == 0 {
        counts.state_rows = aggregates::count_rows(db, Tier::Staging, RegionType::State).await?;
    }
    if counts.county_rows == 0 {
        counts.county_rows = aggregates::count_rows(db, Tier::Staging, RegionType::County).await?;
    }

    if !promotion_gate(status.is_complete(), counts.state_rows, counts.county_rows) {
        return Err(RefreshError::InvariantViolation {
            message: format!(
                "not promotable: zip complete={}, state rows={}, county rows={}",
                status.is_complete(),
                counts.state_rows,
                counts.county_rows,
            ),
        });
    }

    enter_phase(db, &mut persisted, CyclePhase::Promotable).await?;
    enter_phase(db, &mut persisted, CyclePhase::Promoting).await?;

    if let Err(e) = promote::promote(db).await {
        // Roll the persisted phase back to Promotable so the next tick
        // retries the rename without redoing aggregation.
        enter_phase(db, &mut persisted, CyclePhase::Promotable).await?;
        return Err(RefreshError::PromotionFailed(e));
    }

    cycle::insert_cycle_log(db, &cycle_id, Utc::now(), &persisted.changes).await?;
    go_idle(db, lock_id).await;

    log::info!(
        "Cycle {cycle_id}: promoted ({} states, {} counties, {} zips)",
        persisted.changes.totals.states,
        persisted.changes.totals.counties,
        persisted.changes.totals.zips,
    );

    Ok(CycleReport {
        cycle_id,
        outcome: CycleOutcome::Promoted,
        message: "promoted".to_string(),
        counts,
    })
}

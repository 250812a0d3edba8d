//! Refresh-cycle coordination: the single-cycle lock, persisted cycle
//! state, the residual ZIP queue, and the audit log.
//!
//! The lock is a named database resource rather than an in-process mutex
//! because the scheduler may run replicas; whichever replica inserts the
//! coordination row first owns the cycle.

use std::fmt::Write as _;

use charge_map_region_models::{ChangeSet, CyclePhase, ZipKey};
use chrono::{DateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};

use crate::DbError;

/// Fixed id of the single lock row.
const LOCK_ROW_ID: i32 = 1;

/// Fixed id of the single persisted-state row.
const STATE_ROW_ID: i32 = 1;

/// Attempts to acquire the refresh lock for a cycle.
///
/// Returns `true` when this caller now holds the lock, `false` when
/// another cycle already does.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn acquire_lock(
    db: &dyn Database,
    cycle_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DbError> {
    let inserted = db
        .exec_raw_params(
            "INSERT INTO refresh_lock (id, cycle_id, locked_at) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO NOTHING",
            &[
                DatabaseValue::Int32(LOCK_ROW_ID),
                DatabaseValue::String(cycle_id.to_string()),
                DatabaseValue::DateTime(now.naive_utc()),
            ],
        )
        .await?;

    Ok(inserted > 0)
}

/// Releases the refresh lock, but only if this cycle holds it.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn release_lock(db: &dyn Database, cycle_id: &str) -> Result<(), DbError> {
    db.exec_raw_params(
        "DELETE FROM refresh_lock WHERE id = $1 AND cycle_id = $2",
        &[
            DatabaseValue::Int32(LOCK_ROW_ID),
            DatabaseValue::String(cycle_id.to_string()),
        ],
    )
    .await?;
    Ok(())
}

/// A refresh cycle's persisted coordinator state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedCycle {
    /// The cycle's identifier.
    pub cycle_id: String,
    /// Where the state machine stopped.
    pub phase: CyclePhase,
    /// The affected-region sets detected for this cycle.
    pub changes: ChangeSet,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
}

/// Saves (or replaces) the persisted cycle state.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or the database operation fails.
pub async fn save_cycle_state(
    db: &dyn Database,
    cycle: &PersistedCycle,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    let states = serde_json::to_string(&cycle.changes.affected_states).map_err(json_err)?;
    let counties = serde_json::to_string(&cycle.changes.affected_counties).map_err(json_err)?;
    let zips = serde_json::to_string(&cycle.changes.affected_zips).map_err(json_err)?;

    db.exec_raw_params(
        "INSERT INTO refresh_state (
            id, cycle_id, phase, affected_states, affected_counties,
            affected_zips, started_at, updated_at
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (id) DO UPDATE SET
             cycle_id = EXCLUDED.cycle_id,
             phase = EXCLUDED.phase,
             affected_states = EXCLUDED.affected_states,
             affected_counties = EXCLUDED.affected_counties,
             affected_zips = EXCLUDED.affected_zips,
             started_at = EXCLUDED.started_at,
             updated_at = EXCLUDED.updated_at",
        &[
            DatabaseValue::Int32(STATE_ROW_ID),
            DatabaseValue::String(cycle.cycle_id.clone()),
            DatabaseValue::String(cycle.phase.to_string()),
            DatabaseValue::String(states),
            DatabaseValue::String(counties),
            DatabaseValue::String(zips),
            DatabaseValue::DateTime(cycle.started_at.naive_utc()),
            DatabaseValue::DateTime(now.naive_utc()),
        ],
    )
    .await?;
    Ok(())
}

/// Loads the persisted cycle state, if a cycle is in flight.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation or decoding fails.
pub async fn load_cycle_state(db: &dyn Database) -> Result<Option<PersistedCycle>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT cycle_id, phase, affected_states, affected_counties,
                    affected_zips, started_at
             FROM refresh_state WHERE id = $1",
            &[DatabaseValue::Int32(STATE_ROW_ID)],
        )
        .await?;

    let Some(row) = rows.first() else {
        return Ok(None);
    };

    let phase_text: String = row.to_value("phase").unwrap_or_default();
    let phase = phase_text
        .parse::<CyclePhase>()
        .map_err(|e| DbError::Conversion {
            message: format!("Unknown cycle phase '{phase_text}': {e}"),
        })?;

    let states_json: String = row.to_value("affected_states").unwrap_or_default();
    let counties_json: String = row.to_value("affected_counties").unwrap_or_default();
    let zips_json: String = row.to_value("affected_zips").unwrap_or_default();

    let mut changes = ChangeSet {
        affected_states: serde_json::from_str(&states_json).map_err(json_err)?,
        affected_counties: serde_json::from_str(&counties_json).map_err(json_err)?,
        affected_zips: serde_json::from_str(&zips_json).map_err(json_err)?,
        ..ChangeSet::default()
    };
    changes.totals.states = changes.affected_states.len();
    changes.totals.counties = changes.affected_counties.len();
    changes.totals.zips = changes.affected_zips.len();

    let started_at_naive: chrono::NaiveDateTime = row.to_value("started_at").unwrap_or_default();

    Ok(Some(PersistedCycle {
        cycle_id: row.to_value("cycle_id").unwrap_or_default(),
        phase,
        changes,
        started_at: DateTime::<Utc>::from_naive_utc_and_offset(started_at_naive, Utc),
    }))
}

/// Clears the persisted cycle state (the cycle returned to idle).
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn clear_cycle_state(db: &dyn Database) -> Result<(), DbError> {
    db.exec_raw_params(
        "DELETE FROM refresh_state WHERE id = $1",
        &[DatabaseValue::Int32(STATE_ROW_ID)],
    )
    .await?;
    Ok(())
}

/// Seeds the residual ZIP queue for a cycle, replacing any rows from an
/// earlier cycle.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn seed_zip_queue(
    db: &dyn Database,
    cycle_id: &str,
    zips: &[ZipKey],
) -> Result<(), DbError> {
    db.exec_raw("DELETE FROM refresh_zip_queue").await?;

    for key in zips {
        db.exec_raw_params(
            "INSERT INTO refresh_zip_queue (cycle_id, state, zip) VALUES ($1, $2, $3)
             ON CONFLICT (cycle_id, state, zip) DO NOTHING",
            &[
                DatabaseValue::String(cycle_id.to_string()),
                DatabaseValue::String(key.state.clone()),
                DatabaseValue::String(key.zip.clone()),
            ],
        )
        .await?;
    }
    Ok(())
}

/// Returns the unprocessed ZIP keys for a cycle, ordered lexicographically
/// by ZIP so chunking (and therefore resumption) is deterministic.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn remaining_zips(db: &dyn Database, cycle_id: &str) -> Result<Vec<ZipKey>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT state, zip FROM refresh_zip_queue
             WHERE cycle_id = $1 AND processed_at IS NULL
             ORDER BY zip, state",
            &[DatabaseValue::String(cycle_id.to_string())],
        )
        .await?;

    Ok(rows
        .iter()
        .map(|row| ZipKey {
            state: row.to_value("state").unwrap_or_default(),
            zip: row.to_value("zip").unwrap_or_default(),
        })
        .collect())
}

/// Counts total and processed rows in a cycle's ZIP queue.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn zip_queue_counts(db: &dyn Database, cycle_id: &str) -> Result<(u64, u64), DbError> {
    let rows = db
        .query_raw_params(
            "SELECT COUNT(*) AS total,
                    COUNT(processed_at) AS processed
             FROM refresh_zip_queue WHERE cycle_id = $1",
            &[DatabaseValue::String(cycle_id.to_string())],
        )
        .await?;

    let Some(row) = rows.first() else {
        return Ok((0, 0));
    };
    let total: i64 = row.to_value("total").unwrap_or(0);
    let processed: i64 = row.to_value("processed").unwrap_or(0);
    Ok((
        u64::try_from(total).unwrap_or(0),
        u64::try_from(processed).unwrap_or(0),
    ))
}

/// Marks a chunk of ZIP keys as processed.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn mark_zips_processed(
    db: &dyn Database,
    cycle_id: &str,
    keys: &[ZipKey],
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    if keys.is_empty() {
        return Ok(());
    }

    let mut sql = "UPDATE refresh_zip_queue SET processed_at = $1 WHERE cycle_id = $2 AND ("
        .to_string();
    let mut params: Vec<DatabaseValue> = vec![
        DatabaseValue::DateTime(now.naive_utc()),
        DatabaseValue::String(cycle_id.to_string()),
    ];
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            sql.push_str(" OR ");
        }
        let base = 2 + i * 2;
        write!(sql, "(state = ${} AND zip = ${})", base + 1, base + 2).unwrap();
        params.push(DatabaseValue::String(key.state.clone()));
        params.push(DatabaseValue::String(key.zip.clone()));
    }
    sql.push(')');

    db.exec_raw_params(&sql, &params).await?;
    Ok(())
}

/// Appends the audit-log row for a completed cycle. Written once and
/// never read by the pipeline.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or the database operation fails.
pub async fn insert_cycle_log(
    db: &dyn Database,
    cycle_id: &str,
    detected_at: DateTime<Utc>,
    changes: &ChangeSet,
) -> Result<(), DbError> {
    let states = serde_json::to_string(&changes.affected_states).map_err(json_err)?;
    let counties = serde_json::to_string(&changes.affected_counties).map_err(json_err)?;
    let zips = serde_json::to_string(&changes.affected_zips).map_err(json_err)?;

    db.exec_raw_params(
        "INSERT INTO refresh_cycles (
            cycle_id, detected_at, affected_states, affected_counties,
            affected_zips, stations_added, stations_removed, stations_modified,
            total_states, total_counties, total_zips
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
         ON CONFLICT (cycle_id) DO NOTHING",
        &[
            DatabaseValue::String(cycle_id.to_string()),
            DatabaseValue::DateTime(detected_at.naive_utc()),
            DatabaseValue::String(states),
            DatabaseValue::String(counties),
            DatabaseValue::String(zips),
            DatabaseValue::Int64(i64::try_from(changes.totals.added).unwrap_or(i64::MAX)),
            DatabaseValue::Int64(i64::try_from(changes.totals.removed).unwrap_or(i64::MAX)),
            DatabaseValue::Int64(i64::try_from(changes.totals.modified).unwrap_or(i64::MAX)),
            DatabaseValue::Int64(i64::try_from(changes.totals.states).unwrap_or(i64::MAX)),
            DatabaseValue::Int64(i64::try_from(changes.totals.counties).unwrap_or(i64::MAX)),
            DatabaseValue::Int64(i64::try_from(changes.totals.zips).unwrap_or(i64::MAX)),
        ],
    )
    .await?;
    Ok(())
}

fn json_err(e: serde_json::Error) -> DbError {
    DbError::Conversion {
        message: format!("JSON encoding failed: {e}"),
    }
}

//! The atomic staging-to-serving promotion.
//!
//! All four table pairs swap names inside one transaction: a reader sees
//! either the entire old dataset or the entire new one, never a mixture.
//! On any rename failure the transaction rolls back and serving is
//! untouched, so the coordinator can retry on the next tick.

use switchy_database::Database;

use crate::DbError;

/// The entities whose staging/serving pairs participate in the swap.
const PROMOTED_TABLES: &[&str] = &[
    "stations",
    "state_aggregates",
    "county_aggregates",
    "zip_aggregates",
];

/// Builds the multi-statement swap script. Each pair rotates through a
/// `_retired` name so the old serving data ends up as the next cycle's
/// staging (which the cycle truncates before use anyway).
fn swap_script() -> String {
    let mut sql = String::from("BEGIN;\n");
    for table in PROMOTED_TABLES {
        sql.push_str(&format!(
            "ALTER TABLE {table} RENAME TO {table}_retired;\n\
             ALTER TABLE {table}_staging RENAME TO {table};\n\
             ALTER TABLE {table}_retired RENAME TO {table}_staging;\n"
        ));
    }
    sql.push_str("COMMIT;");
    sql
}

/// Atomically swaps the staging tables into serving.
///
/// # Errors
///
/// Returns [`DbError`] if the transaction fails; in that case the
/// original serving tables remain in place.
pub async fn promote(db: &dyn Database) -> Result<(), DbError> {
    let script = swap_script();

    if let Err(e) = db.exec_raw(&script).await {
        // Best-effort rollback for engines that leave the transaction open
        // after a failed statement.
        if let Err(rollback_err) = db.exec_raw("ROLLBACK;").await {
            log::warn!("Rollback after failed promotion also failed: {rollback_err}");
        }
        return Err(e.into());
    }

    log::info!("Promoted staging tables into serving");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_covers_all_four_pairs_in_one_transaction() {
        let script = swap_script();
        assert!(script.starts_with("BEGIN;"));
        assert!(script.ends_with("COMMIT;"));
        for table in PROMOTED_TABLES {
            assert!(script.contains(&format!("ALTER TABLE {table}_staging RENAME TO {table};")));
            assert!(script.contains(&format!("ALTER TABLE {table}_retired RENAME TO {table}_staging;")));
        }
        // No pair renamed outside the transaction body.
        assert_eq!(script.matches("BEGIN;").count(), 1);
        assert_eq!(script.matches("COMMIT;").count(), 1);
    }
}

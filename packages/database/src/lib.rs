#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Storage layer for the charge map refresh pipeline.
//!
//! Every entity lives in two parallel tables distinguished by a
//! `_staging` suffix: refresh cycles mutate staging, queries read
//! serving, and [`promote::promote`] swaps the pairs by name in a single
//! transaction. Uses `switchy_database` for the query layer and
//! `switchy_schema` for embedded SQL migrations.

pub mod aggregates;
pub mod cycle;
pub mod db;
pub mod promote;
pub mod stations;

use include_dir::{Dir, include_dir};
use switchy_database::Database;
use switchy_schema::discovery::embedded::EmbeddedMigrationSource;
use switchy_schema::runner::MigrationRunner;

/// Embedded SQL migrations from the `migrations/` directory.
static MIGRATIONS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/../../migrations");

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Database query error.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] switchy_schema::MigrationError),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Which copy of a table pair an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// The query-facing copy, touched only by the promote transaction.
    Serving,
    /// The copy rewritten by the refresh cycle.
    Staging,
}

impl Tier {
    /// Station table name for this tier.
    #[must_use]
    pub const fn stations(self) -> &'static str {
        match self {
            Self::Serving => "stations",
            Self::Staging => "stations_staging",
        }
    }

    /// State aggregate table name for this tier.
    #[must_use]
    pub const fn state_aggregates(self) -> &'static str {
        match self {
            Self::Serving => "state_aggregates",
            Self::Staging => "state_aggregates_staging",
        }
    }

    /// County aggregate table name for this tier.
    #[must_use]
    pub const fn county_aggregates(self) -> &'static str {
        match self {
            Self::Serving => "county_aggregates",
            Self::Staging => "county_aggregates_staging",
        }
    }

    /// ZIP aggregate table name for this tier.
    #[must_use]
    pub const fn zip_aggregates(self) -> &'static str {
        match self {
            Self::Serving => "zip_aggregates",
            Self::Staging => "zip_aggregates_staging",
        }
    }
}

/// Runs all pending database migrations.
///
/// # Errors
///
/// Returns [`DbError`] if any migration fails to apply.
pub async fn run_migrations(db: &dyn Database) -> Result<(), DbError> {
    let source = EmbeddedMigrationSource::new(&MIGRATIONS_DIR);
    let runner = MigrationRunner::new(Box::new(source));
    runner.run(db).await?;
    log::info!("Database migrations completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_table_names() {
        assert_eq!(Tier::Serving.stations(), "stations");
        assert_eq!(Tier::Staging.stations(), "stations_staging");
        assert_eq!(Tier::Staging.zip_aggregates(), "zip_aggregates_staging");
        assert_eq!(Tier::Serving.county_aggregates(), "county_aggregates");
    }
}

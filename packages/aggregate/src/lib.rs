#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The aggregation engine.
//!
//! Three passes over the staging station table — by state, by county
//! (bbox candidate filtering against the county topology), and by ZIP —
//! each writing scored rows into the staging aggregate tables. The ZIP
//! pass runs through a resumable chunked sub-pipeline so it can span
//! several scheduler ticks under a host wall-clock ceiling.

pub mod counties;
pub mod rollup;
pub mod states;
pub mod zip_queue;

use thiserror::Error;

/// Rows per aggregate insert batch.
pub const INSERT_BATCH_SIZE: usize = 500;

/// Errors that can occur during aggregation.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// Storage operation failed.
    #[error("Database error: {0}")]
    Database(#[from] charge_map_database::DbError),

    /// Population or VMT lookup failed at the storage layer.
    #[error("Reference data error: {0}")]
    Census(#[from] charge_map_census::CensusError),

    /// County topology failure.
    #[error("Geography error: {0}")]
    Geo(#[from] charge_map_geography::GeoError),
}

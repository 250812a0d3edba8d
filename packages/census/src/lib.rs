#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Population reference cache and VMT ingestion.
//!
//! Populations come from the census API through a 30-day cache; a fetch
//! that fails after retries falls back to a hard-coded estimate without
//! poisoning the cache. VMT arrives as a paged feature collection keyed
//! by county FIPS and is replaced wholesale on each ingestion.

pub mod estimates;
pub mod population;
pub mod vmt;

use thiserror::Error;

/// Errors that can occur during reference-data operations.
#[derive(Debug, Error)]
pub enum CensusError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response decoding error.
    #[error("Conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Where a population figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulationSource {
    /// Fetched from the census API this call.
    Live,
    /// Served from a cache row younger than the TTL.
    Cached,
    /// Hard-coded fallback after a terminal fetch failure or unknown code.
    Estimate,
}

/// A resolved population figure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationFigure {
    /// The population value.
    pub value: i64,
    /// Provenance of the value.
    pub source: PopulationSource,
    /// Display name of the region, when the API provided one.
    pub name: Option<String>,
}

impl PopulationFigure {
    /// Whether this figure is a fallback estimate rather than census data.
    #[must_use]
    pub const fn is_estimate(&self) -> bool {
        matches!(self.source, PopulationSource::Estimate)
    }
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the charge map.
//!
//! Exposes the scheduler trigger endpoint (`POST /api/refresh`, gated by
//! `CRON_SECRET`) and the bounding-box read API the map client consumes.
//! All reads go to the serving tables; the trigger drives the refresh
//! coordinator, which only ever touches serving through the atomic
//! promote.

pub mod handlers;

use std::sync::Arc;

use charge_map_refresh::RefreshConfig;
use switchy_database::Database;

/// Shared application state.
pub struct AppState {
    /// Database connection.
    pub db: Arc<dyn Database>,
    /// HTTP client reused across refresh cycles.
    pub client: reqwest::Client,
    /// Refresh coordinator configuration.
    pub config: RefreshConfig,
    /// Shared secret gating the trigger endpoint.
    pub cron_secret: String,
}

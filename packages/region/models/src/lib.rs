#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Region aggregate row types, change-detection sets, and the persisted
//! refresh-cycle vocabulary.
//!
//! These are the shapes written to the staging aggregate tables and
//! promoted into serving. They are distinct from the canonical station
//! records in `charge_map_station_models`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A geographic bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Returns this box expanded by `degrees` on every side.
    #[must_use]
    pub const fn buffered(&self, degrees: f64) -> Self {
        Self {
            west: self.west - degrees,
            south: self.south - degrees,
            east: self.east + degrees,
            north: self.north + degrees,
        }
    }

    /// Whether the point lies inside (or on the edge of) this box.
    #[must_use]
    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        longitude >= self.west
            && longitude <= self.east
            && latitude >= self.south
            && latitude <= self.north
    }
}

/// Which resolution an aggregate row belongs to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RegionType {
    /// Whole-state aggregate.
    State,
    /// County aggregate keyed by 5-digit FIPS.
    County,
    /// ZIP aggregate keyed by 5-digit code plus state.
    Zip,
}

/// Display tier that consumes an aggregate row, expressed as a map zoom
/// span. Stored as text on the row so the read path can filter on it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum ZoomRange {
    /// Country-level view, one marker per state.
    #[strum(serialize = "0-5")]
    #[serde(rename = "0-5")]
    States,
    /// Regional view, one marker per county.
    #[strum(serialize = "6-8")]
    #[serde(rename = "6-8")]
    Counties,
    /// Street-level view, one marker per ZIP.
    #[strum(serialize = "9-16")]
    #[serde(rename = "9-16")]
    Zips,
}

impl RegionType {
    /// The display tier that reads rows of this resolution.
    #[must_use]
    pub const fn zoom_range(self) -> ZoomRange {
        match self {
            Self::State => ZoomRange::States,
            Self::County => ZoomRange::Counties,
            Self::Zip => ZoomRange::Zips,
        }
    }
}

/// Charger counts by level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargerCounts {
    /// All chargers in the region.
    pub total: i32,
    /// DC fast stations.
    pub dcfast: i32,
    /// Level 2 stations.
    pub level2: i32,
    /// Level 1 stations.
    pub level1: i32,
}

impl ChargerCounts {
    /// Whether the per-level counts sum to the total.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.dcfast + self.level2 + self.level1 == self.total
    }
}

/// Station counts by connector class. A station counts once per class it
/// exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorCounts {
    /// Stations exposing a Tesla / NACS connector.
    pub tesla: i32,
    /// Stations exposing a CCS combo connector.
    pub ccs: i32,
    /// Stations exposing a plain J1772 connector.
    pub j1772: i32,
    /// Stations exposing a `CHAdeMO` connector.
    pub chademo: i32,
}

/// Port counts by connector class. A station's `num_ports` contributes
/// once per connector class it exposes; `total` is the plain sum of
/// `num_ports` over member stations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCounts {
    /// Ports behind Tesla / NACS connectors.
    pub tesla: i32,
    /// Ports behind CCS connectors.
    pub ccs: i32,
    /// Ports behind J1772 connectors.
    pub j1772: i32,
    /// Ports behind `CHAdeMO` connectors.
    pub chademo: i32,
    /// Total ports in the region.
    pub total: i32,
}

/// One row of a state, county, or ZIP aggregate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionAggregate {
    /// Which resolution this row belongs to.
    pub region_type: RegionType,
    /// Two-letter state abbreviation.
    pub state: String,
    /// Display name: state name, county name, or the ZIP code itself.
    pub name: String,
    /// 5-digit county FIPS for county rows, `None` otherwise.
    pub county_fips: Option<String>,
    /// Center latitude for map placement.
    pub latitude: f64,
    /// Center longitude for map placement.
    pub longitude: f64,
    /// Region population, possibly estimated.
    pub population: i64,
    /// Whether `population` is a fallback estimate rather than census data.
    pub population_estimated: bool,
    /// Charger counts by level.
    pub chargers: ChargerCounts,
    /// Station counts by connector class.
    pub connectors: ConnectorCounts,
    /// Port counts by connector class.
    pub ports: PortCounts,
    /// Legacy need score in [0, 100].
    pub need_score: i32,
    /// Readiness score in [0, 100].
    pub ev_infrastructure_score: i32,
    /// Opportunity score in [0, 100]: high where people are many and
    /// chargers are few.
    pub opportunity_score: i32,
    /// Daily vehicle miles traveled per capita, when VMT data joined.
    pub vmt_per_capita: Option<f64>,
    /// Display tier tag.
    pub zoom_range: ZoomRange,
}

/// A county identity as used in affected-region sets: keyed by FIPS, with
/// the state and name carried for display and targeted aggregation.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct CountyKey {
    /// 5-digit county FIPS (2-digit state + 3-digit county).
    pub fips: String,
    /// Two-letter state abbreviation.
    pub state: String,
    /// County display name.
    pub name: String,
}

/// A ZIP identity as used in affected-region sets.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct ZipKey {
    /// Two-letter state abbreviation.
    pub state: String,
    /// Cleaned 5-digit ZIP code.
    pub zip: String,
}

/// Raw change counts from the detector, before and after the
/// already-current filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeTotals {
    /// Stations present in staging but not serving.
    pub added: usize,
    /// Stations present in serving but not staging.
    pub removed: usize,
    /// Stations present in both with material differences.
    pub modified: usize,
    /// Affected state count (post-filter).
    pub states: usize,
    /// Affected county count (post-filter).
    pub counties: usize,
    /// Affected ZIP count (post-filter).
    pub zips: usize,
}

/// The change detector's output: the three affected-region sets and the
/// final (post-filter) totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    /// States with at least one changed station.
    pub affected_states: BTreeSet<String>,
    /// Counties touched by changed stations, FIPS-keyed.
    pub affected_counties: BTreeSet<CountyKey>,
    /// ZIPs touched by changed stations, minus already-current ones.
    pub affected_zips: BTreeSet<ZipKey>,
    /// Change counts.
    pub totals: ChangeTotals,
}

impl ChangeSet {
    /// Whether the detector found nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.affected_states.is_empty()
            && self.affected_counties.is_empty()
            && self.affected_zips.is_empty()
    }
}

/// The persisted phase of a refresh cycle.
///
/// Stored as text in the coordination row so a process restart mid-cycle
/// resumes where it left off instead of restarting at ingestion.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CyclePhase {
    /// No cycle in flight.
    Idle,
    /// Fetching the registry into staging.
    Ingesting,
    /// Diffing staging against serving.
    Detecting,
    /// Rebuilding state aggregates.
    AggregatingStates,
    /// Rebuilding county aggregates.
    AggregatingCounties,
    /// Draining the ZIP sub-pipeline.
    AggregatingZips,
    /// All levels complete; waiting to swap tables.
    Promotable,
    /// Executing the atomic rename.
    Promoting,
}

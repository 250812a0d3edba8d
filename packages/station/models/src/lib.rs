#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Charger classification taxonomy and the canonical station record.
//!
//! This crate defines the shared vocabulary for the entire charge-map
//! system. The upstream registry's raw records are normalized into
//! [`Station`] at the ingestion boundary; raw records never propagate
//! further inward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Charger power classification, highest capability first.
///
/// A station exposing several port classes is classified by its single
/// highest-capability level.
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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargerLevel {
    /// DC fast charging (50 kW and up).
    DcFast,
    /// Level 2 AC charging (240 V).
    Level2,
    /// Level 1 AC charging (120 V).
    Level1,
}

/// Connector type as reported by the upstream registry.
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
pub enum ConnectorType {
    /// Tesla / NACS connector.
    #[strum(serialize = "TESLA")]
    #[serde(rename = "TESLA")]
    Tesla,
    /// SAE J1772 (Level 1/2 AC).
    #[strum(serialize = "J1772")]
    #[serde(rename = "J1772")]
    J1772,
    /// CCS combo (J1772 + DC pins).
    #[strum(serialize = "J1772COMBO")]
    #[serde(rename = "J1772COMBO")]
    J1772Combo,
    /// `CHAdeMO` DC connector.
    #[strum(serialize = "CHADEMO")]
    #[serde(rename = "CHADEMO")]
    Chademo,
    /// Anything the registry reports that we don't model.
    #[strum(serialize = "OTHER")]
    #[serde(other, rename = "OTHER")]
    Other,
}

impl ConnectorType {
    /// Returns whether this connector implies DC fast capability.
    #[must_use]
    pub const fn is_dc_capable(self) -> bool {
        matches!(self, Self::Tesla | Self::J1772Combo | Self::Chademo)
    }
}

/// The connector classes tracked on region aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConnectorClass {
    /// Tesla / NACS.
    Tesla,
    /// CCS (J1772 combo).
    Ccs,
    /// Plain J1772 AC.
    J1772,
    /// `CHAdeMO`.
    Chademo,
}

impl ConnectorType {
    /// Maps a connector type to its aggregate class, if it has one.
    #[must_use]
    pub const fn class(self) -> Option<ConnectorClass> {
        match self {
            Self::Tesla => Some(ConnectorClass::Tesla),
            Self::J1772Combo => Some(ConnectorClass::Ccs),
            Self::J1772 => Some(ConnectorClass::J1772),
            Self::Chademo => Some(ConnectorClass::Chademo),
            Self::Other => None,
        }
    }
}

/// A canonical charging station record.
///
/// Created once during ingestion and never mutated in place; a refreshed
/// record with the same `external_id` replaces the old row wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    /// Stable identifier from the upstream registry.
    pub external_id: i64,
    /// Display name.
    pub name: String,
    /// Latitude in decimal degrees (WGS84).
    pub latitude: f64,
    /// Longitude in decimal degrees (WGS84).
    pub longitude: f64,
    /// Street address, if the registry provides one.
    pub street_address: Option<String>,
    /// City.
    pub city: Option<String>,
    /// Two-letter state abbreviation.
    pub state: String,
    /// Cleaned 5-digit ZIP code. ZIP+4 values are truncated; anything
    /// non-numeric is dropped.
    pub zip: Option<String>,
    /// Highest-capability charger level present.
    pub level: ChargerLevel,
    /// Port count for the classified level, at least 1.
    pub num_ports: i32,
    /// Connector types exposed by the station, sorted for stable
    /// multiset comparison.
    pub connectors: Vec<ConnectorType>,
    /// Charging network label (e.g. "ChargePoint Network").
    pub network: Option<String>,
    /// When this record was created during ingestion.
    pub created_at: DateTime<Utc>,
}

impl Station {
    /// Serializes the connector set for storage as a comma-joined string.
    #[must_use]
    pub fn connectors_column(&self) -> String {
        self.connectors
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<&str>>()
            .join(",")
    }

    /// Parses a comma-joined connector column back into the typed set.
    ///
    /// Unrecognized entries decode as [`ConnectorType::Other`] rather than
    /// erroring, matching the normalizer's treatment of raw records.
    #[must_use]
    pub fn parse_connectors_column(column: &str) -> Vec<ConnectorType> {
        let mut connectors: Vec<ConnectorType> = column
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse().unwrap_or(ConnectorType::Other))
            .collect();
        connectors.sort_unstable();
        connectors
    }
}

/// A raw station record as returned by the upstream registry.
///
/// Field names mirror the registry's JSON; everything is optional because
/// the feed routinely omits fields. Only the normalizer consumes this.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStation {
    /// Registry record id.
    pub id: Option<i64>,
    /// Station display name.
    pub station_name: Option<String>,
    /// Latitude.
    pub latitude: Option<f64>,
    /// Longitude.
    pub longitude: Option<f64>,
    /// Street address.
    pub street_address: Option<String>,
    /// City.
    pub city: Option<String>,
    /// Two-letter state.
    pub state: Option<String>,
    /// Raw ZIP string (may be ZIP+4 or garbage).
    pub zip: Option<String>,
    /// Connector type enum strings.
    pub ev_connector_types: Option<Vec<String>>,
    /// DC fast port count.
    pub ev_dc_fast_num: Option<i64>,
    /// Level 2 port count.
    pub ev_level2_evse_num: Option<i64>,
    /// Level 1 port count.
    pub ev_level1_evse_num: Option<i64>,
    /// Charging network label.
    pub ev_network: Option<String>,
}

/// Why the normalizer rejected a raw record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RejectReason {
    /// Latitude or longitude missing from the raw record.
    MissingCoordinates,
    /// No usable station name.
    MissingName,
    /// Coordinates fall outside the U.S. envelope.
    OutsideUsEnvelope,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_ordering_puts_dcfast_first() {
        assert!(ChargerLevel::DcFast < ChargerLevel::Level2);
        assert!(ChargerLevel::Level2 < ChargerLevel::Level1);
    }

    #[test]
    fn connector_wire_names_match_registry() {
        assert_eq!(ConnectorType::J1772Combo.as_ref(), "J1772COMBO");
        assert_eq!(ConnectorType::Chademo.as_ref(), "CHADEMO");
        assert_eq!(ConnectorType::Tesla.as_ref(), "TESLA");
        assert_eq!(
            "J1772COMBO".parse::<ConnectorType>().unwrap(),
            ConnectorType::J1772Combo
        );
    }

    #[test]
    fn dc_capability() {
        assert!(ConnectorType::Tesla.is_dc_capable());
        assert!(ConnectorType::J1772Combo.is_dc_capable());
        assert!(ConnectorType::Chademo.is_dc_capable());
        assert!(!ConnectorType::J1772.is_dc_capable());
        assert!(!ConnectorType::Other.is_dc_capable());
    }

    #[test]
    fn combo_maps_to_ccs_class() {
        assert_eq!(ConnectorType::J1772Combo.class(), Some(ConnectorClass::Ccs));
        assert_eq!(ConnectorType::Other.class(), None);
    }

    #[test]
    fn connectors_column_roundtrip() {
        let station = Station {
            external_id: 1,
            name: "Test".to_string(),
            latitude: 37.75,
            longitude: -122.41,
            street_address: None,
            city: None,
            state: "CA".to_string(),
            zip: Some("94110".to_string()),
            level: ChargerLevel::DcFast,
            num_ports: 4,
            connectors: vec![ConnectorType::Tesla, ConnectorType::J1772Combo],
            network: None,
            created_at: Utc::now(),
        };
        let column = station.connectors_column();
        assert_eq!(column, "TESLA,J1772COMBO");
        let mut expected = station.connectors.clone();
        expected.sort_unstable();
        assert_eq!(Station::parse_connectors_column(&column), expected);
    }

    #[test]
    fn unknown_connector_decodes_as_other() {
        assert_eq!(
            Station::parse_connectors_column("TESLA,NEMA515"),
            vec![ConnectorType::Tesla, ConnectorType::Other]
        );
    }

    #[test]
    fn raw_station_deserializes_registry_shape() {
        let raw: RawStation = serde_json::from_value(serde_json::json!({
            "id": 1523,
            "station_name": "City Hall Garage",
            "latitude": 37.75,
            "longitude": -122.41,
            "state": "CA",
            "zip": "94110-1234",
            "ev_connector_types": ["TESLA"],
            "ev_dc_fast_num": 8,
            "ev_network": "Tesla"
        }))
        .unwrap();
        assert_eq!(raw.id, Some(1523));
        assert_eq!(raw.ev_dc_fast_num, Some(8));
        assert_eq!(raw.ev_level2_evse_num, None);
    }

    #[test]
    fn reject_reason_wire_form() {
        assert_eq!(RejectReason::MissingCoordinates.as_ref(), "missing-coordinates");
        assert_eq!(RejectReason::OutsideUsEnvelope.as_ref(), "outside-us-envelope");
    }
}

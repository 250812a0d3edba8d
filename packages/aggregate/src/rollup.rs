//! Pure station-group rollups.
//!
//! All three aggregation passes reduce a group of member stations to the
//! same counts; this module is that reduction. The change detector also
//! uses the ZIP grouping to decide whether a serving aggregate is
//! already current.

use std::collections::{BTreeMap, BTreeSet};

use charge_map_region_models::{ChargerCounts, ConnectorCounts, PortCounts, ZipKey};
use charge_map_station_models::{ChargerLevel, ConnectorClass, Station};

/// Level weights for the readiness metric's weighted charger count.
pub const LEVEL_WEIGHTS: (f64, f64, f64) = (1.0, 0.7, 0.3);

/// The reduction of one group of stations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StationRollup {
    /// Charger counts by level.
    pub chargers: ChargerCounts,
    /// Station counts by connector class.
    pub connectors: ConnectorCounts,
    /// Port counts by connector class.
    pub ports: PortCounts,
    /// Arithmetic mean of member coordinates, `(longitude, latitude)`.
    pub centroid: (f64, f64),
}

impl StationRollup {
    /// Reduces a group of stations to counts, ports, and centroid.
    #[must_use]
    pub fn from_stations<'a, I>(stations: I) -> Self
    where
        I: IntoIterator<Item = &'a Station>,
    {
        let mut rollup = Self::default();
        let mut lat_sum = 0.0;
        let mut lng_sum = 0.0;
        let mut members = 0i32;

        for station in stations {
            members += 1;
            lat_sum += station.latitude;
            lng_sum += station.longitude;

            rollup.chargers.total += 1;
            match station.level {
                ChargerLevel::DcFast => rollup.chargers.dcfast += 1,
                ChargerLevel::Level2 => rollup.chargers.level2 += 1,
                ChargerLevel::Level1 => rollup.chargers.level1 += 1,
            }

            // A station counts once per connector class it exposes, and
            // its ports contribute once per class; total ports counts the
            // station's ports exactly once.
            let classes: BTreeSet<ConnectorClass> = station
                .connectors
                .iter()
                .filter_map(|c| c.class())
                .collect();
            for class in &classes {
                match class {
                    ConnectorClass::Tesla => {
                        rollup.connectors.tesla += 1;
                        rollup.ports.tesla += station.num_ports;
                    }
                    ConnectorClass::Ccs => {
                        rollup.connectors.ccs += 1;
                        rollup.ports.ccs += station.num_ports;
                    }
                    ConnectorClass::J1772 => {
                        rollup.connectors.j1772 += 1;
                        rollup.ports.j1772 += station.num_ports;
                    }
                    ConnectorClass::Chademo => {
                        rollup.connectors.chademo += 1;
                        rollup.ports.chademo += station.num_ports;
                    }
                }
            }
            rollup.ports.total += station.num_ports;
        }

        if members > 0 {
            rollup.centroid = (lng_sum / f64::from(members), lat_sum / f64::from(members));
        }
        rollup
    }

    /// Level-weighted charger count feeding the readiness score.
    #[must_use]
    pub fn weighted(&self) -> f64 {
        let (dcfast_weight, level2_weight, level1_weight) = LEVEL_WEIGHTS;
        dcfast_weight * f64::from(self.chargers.dcfast)
            + level2_weight * f64::from(self.chargers.level2)
            + level1_weight * f64::from(self.chargers.level1)
    }
}

/// Groups stations by two-letter state.
#[must_use]
pub fn group_by_state(stations: &[Station]) -> BTreeMap<String, Vec<&Station>> {
    let mut groups: BTreeMap<String, Vec<&Station>> = BTreeMap::new();
    for station in stations {
        if station.state.len() == 2 {
            groups.entry(station.state.clone()).or_default().push(station);
        }
    }
    groups
}

/// Groups stations by `(state, cleaned ZIP)`. Stations without a usable
/// ZIP don't participate in ZIP aggregation.
#[must_use]
pub fn group_by_zip(stations: &[Station]) -> BTreeMap<ZipKey, Vec<&Station>> {
    let mut groups: BTreeMap<ZipKey, Vec<&Station>> = BTreeMap::new();
    for station in stations {
        let Some(zip) = &station.zip else {
            continue;
        };
        if station.state.len() != 2 {
            continue;
        }
        groups
            .entry(ZipKey {
                state: station.state.clone(),
                zip: zip.clone(),
            })
            .or_default()
            .push(station);
    }
    groups
}

/// Per-level counts for a group, as compared against a serving aggregate
/// row by the change detector's already-current filter.
#[must_use]
pub fn level_counts(stations: &[&Station]) -> ChargerCounts {
    StationRollup::from_stations(stations.iter().copied()).chargers
}

#[cfg(test)]
mod tests {
    use super::*;
    use charge_map_station_models::ConnectorType;
    use chrono::Utc;

    fn station(
        id: i64,
        state: &str,
        zip: Option<&str>,
        level: ChargerLevel,
        ports: i32,
        connectors: &[ConnectorType],
        lat: f64,
        lng: f64,
    ) -> Station {
        Station {
            external_id: id,
            name: format!("Station {id}"),
            latitude: lat,
            longitude: lng,
            street_address: None,
            city: None,
            state: state.to_string(),
            zip: zip.map(str::to_string),
            level,
            num_ports: ports,
            connectors: connectors.to_vec(),
            network: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rollup_counts_levels_and_total() {
        let stations = vec![
            station(1, "CA", Some("94110"), ChargerLevel::DcFast, 8, &[ConnectorType::Tesla], 37.75, -122.41),
            station(2, "CA", Some("94110"), ChargerLevel::Level2, 4, &[ConnectorType::J1772], 37.76, -122.42),
            station(3, "CA", Some("94110"), ChargerLevel::Level1, 1, &[], 37.74, -122.40),
        ];
        let rollup = StationRollup::from_stations(&stations);

        assert_eq!(rollup.chargers.total, 3);
        assert_eq!(rollup.chargers.dcfast, 1);
        assert_eq!(rollup.chargers.level2, 1);
        assert_eq!(rollup.chargers.level1, 1);
        assert!(rollup.chargers.is_consistent());
        assert_eq!(rollup.ports.total, 13);
    }

    #[test]
    fn ports_count_once_per_class_and_once_in_total() {
        // A dual-connector station: its 6 ports land in both class columns
        // but only once in the total.
        let stations = vec![station(
            1,
            "CA",
            Some("94110"),
            ChargerLevel::DcFast,
            6,
            &[ConnectorType::Tesla, ConnectorType::J1772Combo],
            37.75,
            -122.41,
        )];
        let rollup = StationRollup::from_stations(&stations);

        assert_eq!(rollup.ports.tesla, 6);
        assert_eq!(rollup.ports.ccs, 6);
        assert_eq!(rollup.ports.total, 6);
        assert_eq!(rollup.connectors.tesla, 1);
        assert_eq!(rollup.connectors.ccs, 1);
        assert!(rollup.ports.total >= rollup.chargers.total);
    }

    #[test]
    fn duplicate_connectors_count_once() {
        let stations = vec![station(
            1,
            "CA",
            Some("94110"),
            ChargerLevel::Level2,
            4,
            &[ConnectorType::J1772, ConnectorType::J1772],
            37.75,
            -122.41,
        )];
        let rollup = StationRollup::from_stations(&stations);
        assert_eq!(rollup.connectors.j1772, 1);
        assert_eq!(rollup.ports.j1772, 4);
    }

    #[test]
    fn centroid_is_arithmetic_mean() {
        let stations = vec![
            station(1, "CA", Some("94110"), ChargerLevel::Level2, 1, &[], 37.0, -122.0),
            station(2, "CA", Some("94110"), ChargerLevel::Level2, 1, &[], 39.0, -120.0),
        ];
        let rollup = StationRollup::from_stations(&stations);
        let (lng, lat) = rollup.centroid;
        assert!((lat - 38.0).abs() < 1e-9);
        assert!((lng - -121.0).abs() < 1e-9);
    }

    #[test]
    fn weighted_uses_level_weights() {
        let stations = vec![
            station(1, "CA", None, ChargerLevel::DcFast, 1, &[], 37.0, -122.0),
            station(2, "CA", None, ChargerLevel::Level2, 1, &[], 37.0, -122.0),
            station(3, "CA", None, ChargerLevel::Level1, 1, &[], 37.0, -122.0),
        ];
        let rollup = StationRollup::from_stations(&stations);
        assert!((rollup.weighted() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn zip_grouping_skips_missing_zip() {
        let stations = vec![
            station(1, "CA", Some("94110"), ChargerLevel::Level2, 1, &[], 37.75, -122.41),
            station(2, "CA", None, ChargerLevel::Level2, 1, &[], 37.75, -122.41),
            station(3, "NV", Some("89109"), ChargerLevel::DcFast, 4, &[], 36.11, -115.17),
        ];
        let groups = group_by_zip(&stations);
        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups[&ZipKey { state: "CA".to_string(), zip: "94110".to_string() }].len(),
            1
        );
    }

    #[test]
    fn state_grouping_skips_malformed_states() {
        let stations = vec![
            station(1, "CA", None, ChargerLevel::Level2, 1, &[], 37.75, -122.41),
            station(2, "", None, ChargerLevel::Level2, 1, &[], 37.75, -122.41),
            station(3, "CAL", None, ChargerLevel::Level2, 1, &[], 37.75, -122.41),
        ];
        let groups = group_by_state(&stations);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn empty_group_is_all_zero() {
        let rollup = StationRollup::from_stations(std::iter::empty::<&Station>());
        assert_eq!(rollup.chargers.total, 0);
        assert_eq!(rollup.ports.total, 0);
        assert!(rollup.chargers.is_consistent());
    }
}

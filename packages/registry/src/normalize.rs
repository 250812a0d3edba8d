//! Raw-to-canonical station normalization.
//!
//! Pure and side-effect-free: the same raw record always yields the same
//! canonical station (for a fixed `created_at`), and re-normalizing a
//! canonical projection is a no-op.

use charge_map_station_models::{
    ChargerLevel, ConnectorType, RawStation, RejectReason, Station,
};
use chrono::{DateTime, Utc};

/// Latitude bounds of the U.S. envelope (southern Florida Keys through
/// northern Alaska).
pub const LAT_BOUNDS: (f64, f64) = (24.5, 71.5);

/// Longitude bounds of the U.S. envelope (Aleutians through Maine).
pub const LNG_BOUNDS: (f64, f64) = (-179.0, -66.0);

/// Cleans a raw ZIP string to its 5-digit form.
///
/// ZIP+4 truncates to the leading five digits; anything whose first five
/// trimmed characters aren't numeric is dropped entirely.
#[must_use]
pub fn clean_zip(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() < 5 {
        return None;
    }
    let prefix = &trimmed[..5];
    if prefix.bytes().all(|b| b.is_ascii_digit()) {
        Some(prefix.to_string())
    } else {
        None
    }
}

/// Parses the registry's connector enum strings, mapping anything
/// unrecognized to [`ConnectorType::Other`]. The result is sorted so the
/// connector set compares as a multiset.
#[must_use]
pub fn parse_connectors(raw: Option<&Vec<String>>) -> Vec<ConnectorType> {
    let mut connectors: Vec<ConnectorType> = raw
        .map(|types| {
            types
                .iter()
                .map(|t| t.parse().unwrap_or(ConnectorType::Other))
                .collect()
        })
        .unwrap_or_default();
    connectors.sort_unstable();
    connectors
}

/// Classifies the charger level and its port count.
///
/// DC fast wins when the record reports any DC-fast ports or exposes a
/// DC-capable connector; otherwise Level 2 wins over Level 1. The port
/// count is the raw count for the chosen level, floored at 1.
#[must_use]
pub fn classify_level(raw: &RawStation, connectors: &[ConnectorType]) -> (ChargerLevel, i32) {
    let dc_fast_ports = raw.ev_dc_fast_num.unwrap_or(0);
    let level2_ports = raw.ev_level2_evse_num.unwrap_or(0);
    let level1_ports = raw.ev_level1_evse_num.unwrap_or(0);

    let (level, ports) =
        if dc_fast_ports > 0 || connectors.iter().any(|c| c.is_dc_capable()) {
            (ChargerLevel::DcFast, dc_fast_ports)
        } else if level2_ports > 0 {
            (ChargerLevel::Level2, level2_ports)
        } else {
            (ChargerLevel::Level1, level1_ports)
        };

    (level, i32::try_from(ports.max(1)).unwrap_or(1))
}

/// Normalizes a raw registry record into a canonical station.
///
/// # Errors
///
/// Returns the [`RejectReason`] when the record lacks coordinates or a
/// name, or its coordinates fall outside the U.S. envelope.
pub fn normalize(raw: &RawStation, created_at: DateTime<Utc>) -> Result<Station, RejectReason> {
    let (Some(latitude), Some(longitude)) = (raw.latitude, raw.longitude) else {
        return Err(RejectReason::MissingCoordinates);
    };

    let name = raw
        .station_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or(RejectReason::MissingName)?;

    if !(LAT_BOUNDS.0..=LAT_BOUNDS.1).contains(&latitude)
        || !(LNG_BOUNDS.0..=LNG_BOUNDS.1).contains(&longitude)
    {
        return Err(RejectReason::OutsideUsEnvelope);
    }

    let connectors = parse_connectors(raw.ev_connector_types.as_ref());
    let (level, num_ports) = classify_level(raw, &connectors);

    Ok(Station {
        external_id: raw.id.unwrap_or_default(),
        name: name.to_string(),
        latitude,
        longitude,
        street_address: raw.street_address.clone().filter(|a| !a.is_empty()),
        city: raw.city.clone().filter(|c| !c.is_empty()),
        state: raw.state.clone().unwrap_or_default().to_uppercase(),
        zip: raw.zip.as_deref().and_then(clean_zip),
        level,
        num_ports,
        connectors,
        network: raw.ev_network.clone().filter(|n| !n.is_empty()),
        created_at,
    })
}

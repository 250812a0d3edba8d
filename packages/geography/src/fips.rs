//! US state FIPS code utilities.
//!
//! One record per state (50 states + DC) mapping the two-digit FIPS code,
//! the two-letter postal abbreviation, the full name, and an approximate
//! geographic center for map placement when a region has no member
//! stations to average. County FIPS codes are the state code plus three
//! digits; helpers here split and resolve them.

/// A single state's identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateRecord {
    /// Two-digit FIPS code.
    pub fips: &'static str,
    /// Two-letter postal abbreviation.
    pub abbr: &'static str,
    /// Full display name.
    pub name: &'static str,
    /// Approximate center latitude.
    pub latitude: f64,
    /// Approximate center longitude.
    pub longitude: f64,
}

/// The 50 US states plus DC, in FIPS order.
#[rustfmt::skip]
pub const STATES: &[StateRecord] = &[
    StateRecord { fips: "01", abbr: "AL", name: "Alabama", latitude: 32.8, longitude: -86.8 },
    StateRecord { fips: "02", abbr: "AK", name: "Alaska", latitude: 64.0, longitude: -152.0 },
    StateRecord { fips: "04", abbr: "AZ", name: "Arizona", latitude: 34.2, longitude: -111.6 },
    StateRecord { fips: "05", abbr: "AR", name: "Arkansas", latitude: 34.9, longitude: -92.4 },
    StateRecord { fips: "06", abbr: "CA", name: "California", latitude: 37.2, longitude: -119.3 },
    StateRecord { fips: "08", abbr: "CO", name: "Colorado", latitude: 39.0, longitude: -105.5 },
    StateRecord { fips: "09", abbr: "CT", name: "Connecticut", latitude: 41.6, longitude: -72.7 },
    StateRecord { fips: "10", abbr: "DE", name: "Delaware", latitude: 39.0, longitude: -75.5 },
    StateRecord { fips: "11", abbr: "DC", name: "District of Columbia", latitude: 38.9, longitude: -77.0 },
    StateRecord { fips: "12", abbr: "FL", name: "Florida", latitude: 28.6, longitude: -82.4 },
    StateRecord { fips: "13", abbr: "GA", name: "Georgia", latitude: 32.6, longitude: -83.4 },
    StateRecord { fips: "15", abbr: "HI", name: "Hawaii", latitude: 20.8, longitude: -156.3 },
    StateRecord { fips: "16", abbr: "ID", name: "Idaho", latitude: 44.4, longitude: -114.6 },
    StateRecord { fips: "17", abbr: "IL", name: "Illinois", latitude: 40.0, longitude: -89.2 },
    StateRecord { fips: "18", abbr: "IN", name: "Indiana", latitude: 39.9, longitude: -86.3 },
    StateRecord { fips: "19", abbr: "IA", name: "Iowa", latitude: 42.0, longitude: -93.5 },
    StateRecord { fips: "20", abbr: "KS", name: "Kansas", latitude: 38.5, longitude: -98.4 },
    StateRecord { fips: "21", abbr: "KY", name: "Kentucky", latitude: 37.5, longitude: -85.3 },
    StateRecord { fips: "22", abbr: "LA", name: "Louisiana", latitude: 31.0, longitude: -92.0 },
    StateRecord { fips: "23", abbr: "ME", name: "Maine", latitude: 45.4, longitude: -69.2 },
    StateRecord { fips: "24", abbr: "MD", name: "Maryland", latitude: 39.0, longitude: -76.8 },
    StateRecord { fips: "25", abbr: "MA", name: "Massachusetts", latitude: 42.3, longitude: -71.8 },
    StateRecord { fips: "26", abbr: "MI", name: "Michigan", latitude: 44.3, longitude: -85.4 },
    StateRecord { fips: "27", abbr: "MN", name: "Minnesota", latitude: 46.3, longitude: -94.3 },
    StateRecord { fips: "28", abbr: "MS", name: "Mississippi", latitude: 32.7, longitude: -89.7 },
    StateRecord { fips: "29", abbr: "MO", name: "Missouri", latitude: 38.4, longitude: -92.5 },
    StateRecord { fips: "30", abbr: "MT", name: "Montana", latitude: 47.0, longitude: -109.6 },
    StateRecord { fips: "31", abbr: "NE", name: "Nebraska", latitude: 41.5, longitude: -99.8 },
    StateRecord { fips: "32", abbr: "NV", name: "Nevada", latitude: 39.3, longitude: -116.6 },
    StateRecord { fips: "33", abbr: "NH", name: "New Hampshire", latitude: 43.7, longitude: -71.6 },
    StateRecord { fips: "34", abbr: "NJ", name: "New Jersey", latitude: 40.2, longitude: -74.7 },
    StateRecord { fips: "35", abbr: "NM", name: "New Mexico", latitude: 34.4, longitude: -106.1 },
    StateRecord { fips: "36", abbr: "NY", name: "New York", latitude: 42.9, longitude: -75.6 },
    StateRecord { fips: "37", abbr: "NC", name: "North Carolina", latitude: 35.5, longitude: -79.4 },
    StateRecord { fips: "38", abbr: "ND", name: "North Dakota", latitude: 47.4, longitude: -100.5 },
    StateRecord { fips: "39", abbr: "OH", name: "Ohio", latitude: 40.3, longitude: -82.8 },
    StateRecord { fips: "40", abbr: "OK", name: "Oklahoma", latitude: 35.6, longitude: -97.5 },
    StateRecord { fips: "41", abbr: "OR", name: "Oregon", latitude: 43.9, longitude: -120.6 },
    StateRecord { fips: "42", abbr: "PA", name: "Pennsylvania", latitude: 40.9, longitude: -77.8 },
    StateRecord { fips: "44", abbr: "RI", name: "Rhode Island", latitude: 41.7, longitude: -71.6 },
    StateRecord { fips: "45", abbr: "SC", name: "South Carolina", latitude: 33.9, longitude: -80.9 },
    StateRecord { fips: "46", abbr: "SD", name: "South Dakota", latitude: 44.4, longitude: -100.2 },
    StateRecord { fips: "47", abbr: "TN", name: "Tennessee", latitude: 35.9, longitude: -86.4 },
    StateRecord { fips: "48", abbr: "TX", name: "Texas", latitude: 31.5, longitude: -99.3 },
    StateRecord { fips: "49", abbr: "UT", name: "Utah", latitude: 39.3, longitude: -111.7 },
    StateRecord { fips: "50", abbr: "VT", name: "Vermont", latitude: 44.1, longitude: -72.7 },
    StateRecord { fips: "51", abbr: "VA", name: "Virginia", latitude: 37.5, longitude: -78.9 },
    StateRecord { fips: "53", abbr: "WA", name: "Washington", latitude: 47.4, longitude: -120.4 },
    StateRecord { fips: "54", abbr: "WV", name: "West Virginia", latitude: 38.6, longitude: -80.6 },
    StateRecord { fips: "55", abbr: "WI", name: "Wisconsin", latitude: 44.6, longitude: -90.0 },
    StateRecord { fips: "56", abbr: "WY", name: "Wyoming", latitude: 43.0, longitude: -107.6 },
];

/// Resolves a two-digit state FIPS code to its record.
#[must_use]
pub fn by_fips(fips: &str) -> Option<&'static StateRecord> {
    STATES.iter().find(|s| s.fips == fips)
}

/// Resolves a two-letter abbreviation (case-insensitive) to its record.
#[must_use]
pub fn by_abbr(abbr: &str) -> Option<&'static StateRecord> {
    STATES.iter().find(|s| s.abbr.eq_ignore_ascii_case(abbr))
}

/// Maps a two-digit FIPS code to its two-letter abbreviation, or `"??"`.
#[must_use]
pub fn state_abbr(fips: &str) -> &'static str {
    by_fips(fips).map_or("??", |s| s.abbr)
}

/// Maps a two-letter abbreviation to its FIPS code.
#[must_use]
pub fn abbr_to_fips(abbr: &str) -> Option<&'static str> {
    by_abbr(abbr).map(|s| s.fips)
}

/// Maps a two-letter abbreviation to the full state name, or `"Unknown"`.
#[must_use]
pub fn state_name(abbr: &str) -> &'static str {
    by_abbr(abbr).map_or("Unknown", |s| s.name)
}

/// Extracts the two-digit state prefix from a 5-digit county FIPS.
#[must_use]
pub fn county_state_fips(county_fips: &str) -> Option<&str> {
    if county_fips.len() == 5 {
        Some(&county_fips[..2])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_fifty_states_plus_dc() {
        assert_eq!(STATES.len(), 51);
    }

    #[test]
    fn fips_abbr_roundtrip() {
        for state in STATES {
            assert_eq!(state_abbr(state.fips), state.abbr);
            assert_eq!(abbr_to_fips(state.abbr), Some(state.fips));
        }
    }

    #[test]
    fn abbr_lookup_is_case_insensitive() {
        assert_eq!(abbr_to_fips("ca"), Some("06"));
        assert_eq!(abbr_to_fips("Ca"), Some("06"));
        assert_eq!(abbr_to_fips("CA"), Some("06"));
    }

    #[test]
    fn unknown_codes() {
        assert_eq!(state_abbr("99"), "??");
        assert_eq!(abbr_to_fips("XX"), None);
        assert_eq!(state_name("XX"), "Unknown");
    }

    #[test]
    fn county_fips_state_prefix() {
        assert_eq!(county_state_fips("06075"), Some("06"));
        assert_eq!(county_state_fips("32003"), Some("32"));
        assert_eq!(county_state_fips("603"), None);
    }

    #[test]
    fn centers_are_plausible() {
        for state in STATES {
            assert!((17.0..=72.0).contains(&state.latitude), "{}", state.abbr);
            assert!((-180.0..=-66.0).contains(&state.longitude), "{}", state.abbr);
        }
    }
}

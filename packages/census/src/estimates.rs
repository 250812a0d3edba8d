//! Hard-coded population fallbacks.
//!
//! Used when the census API is unreachable after retries or returns
//! nothing for a region code. State figures are the 2020 decennial
//! census; counties and ZIPs share a single flat constant.

use charge_map_region_models::RegionType;

/// Fallback population for a county or ZIP with no census answer.
pub const DEFAULT_REGION_POPULATION: i64 = 15_000;

/// 2020 decennial census state populations: `(fips, abbr, population)`.
///
/// Keyed by both code forms because the fetch path addresses states by
/// 2-digit FIPS while display paths use the postal abbreviation.
pub const STATE_POPULATION_2020: &[(&str, &str, i64)] = &[
    ("01", "AL", 5_024_279),
    ("02", "AK", 733_391),
    ("04", "AZ", 7_151_502),
    ("05", "AR", 3_011_524),
    ("06", "CA", 39_538_223),
    ("08", "CO", 5_773_714),
    ("09", "CT", 3_605_944),
    ("10", "DE", 989_948),
    ("11", "DC", 689_545),
    ("12", "FL", 21_538_187),
    ("13", "GA", 10_711_908),
    ("15", "HI", 1_455_271),
    ("16", "ID", 1_839_106),
    ("17", "IL", 12_812_508),
    ("18", "IN", 6_785_528),
    ("19", "IA", 3_190_369),
    ("20", "KS", 2_937_880),
    ("21", "KY", 4_505_836),
    ("22", "LA", 4_657_757),
    ("23", "ME", 1_362_359),
    ("24", "MD", 6_177_224),
    ("25", "MA", 7_029_917),
    ("26", "MI", 10_077_331),
    ("27", "MN", 5_706_494),
    ("28", "MS", 2_961_279),
    ("29", "MO", 6_154_913),
    ("30", "MT", 1_084_225),
    ("31", "NE", 1_961_504),
    ("32", "NV", 3_104_614),
    ("33", "NH", 1_377_529),
    ("34", "NJ", 9_288_994),
    ("35", "NM", 2_117_522),
    ("36", "NY", 20_201_249),
    ("37", "NC", 10_439_388),
    ("38", "ND", 779_094),
    ("39", "OH", 11_799_448),
    ("40", "OK", 3_959_353),
    ("41", "OR", 4_237_256),
    ("42", "PA", 13_002_700),
    ("44", "RI", 1_097_379),
    ("45", "SC", 5_118_425),
    ("46", "SD", 886_667),
    ("47", "TN", 6_910_840),
    ("48", "TX", 29_145_505),
    ("49", "UT", 3_271_616),
    ("50", "VT", 643_077),
    ("51", "VA", 8_631_393),
    ("53", "WA", 7_705_281),
    ("54", "WV", 1_793_716),
    ("55", "WI", 5_893_718),
    ("56", "WY", 576_851),
];

/// Returns the fallback population for a region.
///
/// States resolve through [`STATE_POPULATION_2020`] by 2-digit FIPS or
/// two-letter abbreviation; unknown states, counties, and ZIPs get
/// [`DEFAULT_REGION_POPULATION`].
#[must_use]
pub fn fallback_population(region_type: RegionType, code: &str) -> i64 {
    match region_type {
        RegionType::State => STATE_POPULATION_2020
            .iter()
            .find(|(fips, abbr, _)| *fips == code || abbr.eq_ignore_ascii_case(code))
            .map_or(DEFAULT_REGION_POPULATION, |(_, _, population)| *population),
        RegionType::County | RegionType::Zip => DEFAULT_REGION_POPULATION,
    }
}

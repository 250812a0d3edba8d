#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Scalar scoring functions for region aggregates.
//!
//! All three functions are pure and deterministic: the aggregation engine
//! and the read path call them with the same inputs and must get the same
//! integers back. Scores are clamped to `[0, 100]` and rounded to the
//! nearest integer.
//!
//! The readiness score runs in two regimes. Without VMT data it is purely
//! the charger-density component. When VMT is present, demand adjusts the
//! density (`d / multiplier`) and a population-density component is
//! blended in at 0.7/0.3. The regimes do not meet continuously at the
//! boundary; that is a known property of the metric, not something to
//! smooth over here.

/// Charger-density breakpoints for the station-weighted readiness score,
/// highest first.
pub const READINESS_THRESHOLDS: [f64; 5] = [60.0, 40.0, 25.0, 15.0, 8.0];

/// Breakpoints used when scoring on port-weighted density instead of
/// station-weighted density.
pub const PORT_READINESS_THRESHOLDS: [f64; 5] = [200.0, 120.0, 75.0, 40.0, 20.0];

/// Baseline daily VMT per capita; regions above this are demand-heavy.
pub const VMT_BASELINE: f64 = 25.0;

/// Population at which the density component saturates.
pub const DENSITY_SATURATION_POPULATION: f64 = 300_000.0;

/// Converts daily VMT per capita into the demand multiplier.
///
/// Above-baseline travel demand divides the effective charger density, so
/// a region needs more chargers per capita to earn the same score.
#[must_use]
pub fn demand_multiplier(vmt_per_capita: f64) -> f64 {
    (vmt_per_capita / VMT_BASELINE).clamp(0.5, 2.0)
}

/// Piecewise charger-density component against a descending threshold set.
fn charger_component(d: f64, t: &[f64; 5]) -> f64 {
    let [t1, t2, t3, t4, t5] = *t;
    if d >= t1 {
        80.0 + ((d - t1) / (t1 * 2.0 / 3.0) * 20.0).min(20.0)
    } else if d >= t2 {
        70.0 + (d - t2) / (t1 - t2) * 10.0
    } else if d >= t3 {
        55.0 + (d - t3) / (t2 - t3) * 15.0
    } else if d >= t4 {
        40.0 + (d - t4) / (t3 - t4) * 15.0
    } else if d >= t5 {
        25.0 + (d - t5) / (t4 - t5) * 15.0
    } else {
        d / t5 * 25.0
    }
}

/// Population-density component, saturating at 100.
fn density_component(population: i64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let p = population as f64;
    (p / DENSITY_SATURATION_POPULATION * 100.0).min(100.0)
}

/// EV infrastructure readiness score in `[0, 100]`.
///
/// `weighted` is the level-weighted charger count
/// (`1.0·dcfast + 0.7·level2 + 0.3·level1`), or a port-weighted figure
/// when `port_weighted` is set (which switches the threshold table).
/// `vmt_per_capita`, when present, both demand-adjusts the density and
/// blends in the population-density component.
#[must_use]
pub fn readiness_score(
    weighted: f64,
    population: i64,
    vmt_per_capita: Option<f64>,
    port_weighted: bool,
) -> i32 {
    if population < 1 {
        return 0;
    }
    #[allow(clippy::cast_precision_loss)]
    let d = weighted / population as f64 * 100_000.0;

    let d_adjusted = vmt_per_capita.map_or(d, |vmt| d / demand_multiplier(vmt));

    let thresholds = if port_weighted {
        &PORT_READINESS_THRESHOLDS
    } else {
        &READINESS_THRESHOLDS
    };

    let charger = charger_component(d_adjusted, thresholds);

    let score = if vmt_per_capita.is_some() {
        0.7 * charger + 0.3 * density_component(population)
    } else {
        charger
    };

    #[allow(clippy::cast_possible_truncation)]
    let rounded = score.clamp(0.0, 100.0).round() as i32;
    rounded
}

/// Opportunity score in `[0, 100]`: how underserved a region is relative
/// to its population and travel demand. High where people are many and
/// chargers are few.
#[must_use]
pub fn opportunity_score(total_chargers: i64, population: i64, vmt_per_capita: Option<f64>) -> i32 {
    #[allow(clippy::cast_precision_loss)]
    let p = population as f64;

    if population < 10_000 {
        let score = (p / 10_000.0 * 25.0).min(25.0);
        #[allow(clippy::cast_possible_truncation)]
        let rounded = score.clamp(0.0, 100.0).round() as i32;
        return rounded;
    }

    #[allow(clippy::cast_precision_loss)]
    let d = total_chargers as f64 / p * 100_000.0;
    let m = vmt_per_capita.map_or(1.0, demand_multiplier);

    let base = if d <= 5.0 {
        80.0 + ((p / 100_000.0) / 5.0 * 20.0).min(20.0)
    } else if d <= 15.0 {
        60.0 + (15.0 - d) / 10.0 * 20.0
    } else if d <= 30.0 {
        40.0 + (30.0 - d) / 15.0 * 20.0
    } else if d <= 50.0 {
        20.0 + (50.0 - d) / 20.0 * 20.0
    } else {
        (20.0 - (d - 50.0) / 10.0 * 20.0).max(0.0)
    };

    #[allow(clippy::cast_possible_truncation)]
    let rounded = (base * m).clamp(0.0, 100.0).round() as i32;
    rounded
}

/// Legacy need score, retained for rows written before the readiness
/// metric existed: `pop/10k + (pop/100k)·2 − chargers·5`, clamped.
#[must_use]
pub fn need_score(population: i64, charger_count: i64) -> i32 {
    #[allow(clippy::cast_precision_loss)]
    let p = population as f64;
    #[allow(clippy::cast_precision_loss)]
    let c = charger_count as f64;
    let score = p / 10_000.0 + (p / 100_000.0) * 2.0 - c * 5.0;
    #[allow(clippy::cast_possible_truncation)]
    let rounded = score.clamp(0.0, 100.0).round() as i32;
    rounded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demand_multiplier_clamps() {
        assert!((demand_multiplier(25.0) - 1.0).abs() < f64::EPSILON);
        assert!((demand_multiplier(50.0) - 2.0).abs() < f64::EPSILON);
        assert!((demand_multiplier(200.0) - 2.0).abs() < f64::EPSILON);
        assert!((demand_multiplier(5.0) - 0.5).abs() < f64::EPSILON);
        assert!((demand_multiplier(0.0) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn readiness_at_top_threshold() {
        // d = 60 / 100_000 * 100_000 = 60, exactly T1.
        assert_eq!(readiness_score(60.0, 100_000, None, false), 80);
    }

    #[test]
    fn readiness_saturates_at_100() {
        // d = 160: 80 + min((160-60)/40 * 20, 20) = 100.
        assert_eq!(readiness_score(160.0, 100_000, None, false), 100);
        assert_eq!(readiness_score(100_000.0, 100_000, None, false), 100);
    }

    #[test]
    fn readiness_interior_breakpoints() {
        // Each threshold lands exactly on its bucket floor.
        assert_eq!(readiness_score(40.0, 100_000, None, false), 70);
        assert_eq!(readiness_score(25.0, 100_000, None, false), 55);
        assert_eq!(readiness_score(15.0, 100_000, None, false), 40);
        assert_eq!(readiness_score(8.0, 100_000, None, false), 25);
        // Below the bottom threshold the score tapers linearly to zero.
        assert_eq!(readiness_score(4.0, 100_000, None, false), 13);
        assert_eq!(readiness_score(0.0, 100_000, None, false), 0);
    }

    #[test]
    fn readiness_with_vmt_blends_density() {
        // d = 60, vmt 50 -> multiplier 2.0 -> d' = 30, charger = 60.
        // Density = 100_000/300_000*100 = 33.33; 0.7*60 + 0.3*33.33 = 52.
        assert_eq!(readiness_score(60.0, 100_000, Some(50.0), false), 52);
    }

    #[test]
    fn readiness_port_weighted_thresholds() {
        assert_eq!(readiness_score(200.0, 100_000, None, true), 80);
        assert_eq!(readiness_score(120.0, 100_000, None, true), 70);
        assert_eq!(readiness_score(75.0, 100_000, None, true), 55);
        assert_eq!(readiness_score(20.0, 100_000, None, true), 25);
    }

    #[test]
    fn readiness_monotone_in_weighted() {
        let mut last = 0;
        for weighted in 0..200 {
            let score = readiness_score(f64::from(weighted), 100_000, None, false);
            assert!(score >= last, "regressed at weighted={weighted}");
            last = score;
        }
    }

    #[test]
    fn readiness_non_increasing_in_vmt() {
        let mut last = i32::MAX;
        for vmt in 1..120 {
            let score = readiness_score(60.0, 100_000, Some(f64::from(vmt)), false);
            assert!(score <= last, "increased at vmt={vmt}");
            last = score;
        }
    }

    #[test]
    fn readiness_non_increasing_in_population_without_vmt() {
        let mut last = i32::MAX;
        for population in (50_000..2_000_000).step_by(50_000) {
            let score = readiness_score(60.0, population, None, false);
            assert!(score <= last, "increased at population={population}");
            last = score;
        }
    }

    #[test]
    fn readiness_in_range_over_grid() {
        for weighted in [0.0, 0.5, 3.0, 8.0, 25.0, 60.0, 500.0, 1.0e6] {
            for population in [1, 500, 10_000, 100_000, 5_000_000] {
                for vmt in [None, Some(1.0), Some(25.0), Some(80.0)] {
                    for port_weighted in [false, true] {
                        let score = readiness_score(weighted, population, vmt, port_weighted);
                        assert!((0..=100).contains(&score));
                    }
                }
            }
        }
    }

    #[test]
    fn readiness_zero_population() {
        assert_eq!(readiness_score(60.0, 0, None, false), 0);
    }

    #[test]
    fn opportunity_small_population_caps_at_25() {
        assert_eq!(opportunity_score(0, 5_000, None), 13);
        assert_eq!(opportunity_score(0, 9_999, None), 25);
        assert_eq!(opportunity_score(100, 2_000, None), 5);
    }

    #[test]
    fn opportunity_breakpoints() {
        // d = 5 with population 100_000: 80 + min(1/5*20, 20) = 84.
        assert_eq!(opportunity_score(5, 100_000, None), 84);
        assert_eq!(opportunity_score(15, 100_000, None), 60);
        assert_eq!(opportunity_score(10, 100_000, None), 70);
        assert_eq!(opportunity_score(30, 100_000, None), 40);
        assert_eq!(opportunity_score(50, 100_000, None), 20);
        assert_eq!(opportunity_score(55, 100_000, None), 10);
        assert_eq!(opportunity_score(60, 100_000, None), 0);
    }

    #[test]
    fn opportunity_vmt_scales_up() {
        // Demand-heavy regions are bigger opportunities.
        let base = opportunity_score(15, 100_000, None);
        let scaled = opportunity_score(15, 100_000, Some(50.0));
        assert_eq!(base, 60);
        assert_eq!(scaled, 100);
    }

    #[test]
    fn opportunity_in_range_over_grid() {
        for chargers in [0, 1, 10, 100, 10_000] {
            for population in [1, 9_999, 10_000, 250_000, 8_000_000] {
                for vmt in [None, Some(10.0), Some(40.0)] {
                    let score = opportunity_score(chargers, population, vmt);
                    assert!((0..=100).contains(&score));
                }
            }
        }
    }

    #[test]
    fn need_score_clamps_both_ends() {
        assert_eq!(need_score(0, 100), 0);
        assert_eq!(need_score(10_000_000, 0), 100);
        // 100_000/10_000 + 2 - 5 = 7
        assert_eq!(need_score(100_000, 1), 7);
    }
}

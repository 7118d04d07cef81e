//! Rider/bus pair scoring.
//!
//! A score combines three exponentially decaying terms (distance, speed
//! difference, heading difference) into a value in (0, 1]. Pairs whose fixes
//! are too far apart in time score `INVALID_SCORE` instead.

use crate::geo::{circular_difference, haversine};
use crate::types::LocationRecord;

/// Sentinel score for a temporally stale pair.
pub const INVALID_SCORE: f64 = -1.0;

/// Maximum allowed |rider.ts - bus.ts| in seconds.
pub const MAX_TIME_SKEW_S: f64 = 5.0;

const DISTANCE_WEIGHT: f64 = 0.60;
const SPEED_WEIGHT: f64 = 0.25;
const HEADING_WEIGHT: f64 = 0.15;

const DISTANCE_SCALE_M: f64 = 25.0;
const SPEED_SCALE: f64 = 2.0;
const HEADING_SCALE_DEG: f64 = 20.0;

/// Tunable scoring parameters. Weights must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreParams {
    pub max_time_skew_s: f64,
    pub distance_weight: f64,
    pub speed_weight: f64,
    pub heading_weight: f64,
    pub distance_scale_m: f64,
    pub speed_scale: f64,
    pub heading_scale_deg: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        ScoreParams {
            max_time_skew_s: MAX_TIME_SKEW_S,
            distance_weight: DISTANCE_WEIGHT,
            speed_weight: SPEED_WEIGHT,
            heading_weight: HEADING_WEIGHT,
            distance_scale_m: DISTANCE_SCALE_M,
            speed_scale: SPEED_SCALE,
            heading_scale_deg: HEADING_SCALE_DEG,
        }
    }
}

/// Result of scoring one pair. `distance_m` is reported even when invalid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub value: f64,
    pub distance_m: f64,
}

impl Score {
    pub fn is_valid(&self) -> bool {
        self.value != INVALID_SCORE
    }
}

/// Score a rider/bus pair with the default parameters.
pub fn score(rider: &LocationRecord, bus: &LocationRecord) -> Score {
    score_with(&ScoreParams::default(), rider, bus)
}

/// Score a rider/bus pair.
pub fn score_with(params: &ScoreParams, rider: &LocationRecord, bus: &LocationRecord) -> Score {
    let distance_m = haversine(rider.lat, rider.lon, bus.lat, bus.lon);

    if (rider.timestamp - bus.timestamp).abs() > params.max_time_skew_s {
        return Score {
            value: INVALID_SCORE,
            distance_m,
        };
    }

    let speed_delta = (rider.speed - bus.speed).abs();
    let heading_delta = circular_difference(rider.heading, bus.heading);

    let value = params.distance_weight * (-distance_m / params.distance_scale_m).exp()
        + params.speed_weight * (-speed_delta / params.speed_scale).exp()
        + params.heading_weight * (-heading_delta / params.heading_scale_deg).exp();

    Score { value, distance_m }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(lat: f64, lon: f64, speed: f64, heading: f64, ts: f64) -> LocationRecord {
        LocationRecord::new("x", lat, lon, ts).with_motion(speed, heading)
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let p = ScoreParams::default();
        let sum = p.distance_weight + p.speed_weight + p.heading_weight;
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_perfect_match_scores_one() {
        let rider = fix(37.0, 127.0, 10.0, 90.0, 100.0);
        let bus = fix(37.0, 127.0, 10.0, 90.0, 100.0);
        let s = score(&rider, &bus);
        assert!((s.value - 1.0).abs() < 1e-9, "got {}", s.value);
        assert_eq!(s.distance_m, 0.0);
    }

    #[test]
    fn test_stale_pair_is_invalid() {
        let rider = fix(37.0, 127.0, 10.0, 90.0, 100.0);
        let bus = fix(37.0, 127.0, 10.0, 90.0, 105.5);
        let s = score(&rider, &bus);
        assert_eq!(s.value, INVALID_SCORE);
        assert!(!s.is_valid());

        // Still invalid the other way round, and distance is still reported
        let far = fix(37.001, 127.0, 10.0, 90.0, 90.0);
        let s = score(&rider, &far);
        assert_eq!(s.value, INVALID_SCORE);
        assert!(s.distance_m > 100.0);
    }

    #[test]
    fn test_skew_at_boundary_is_valid() {
        let rider = fix(37.0, 127.0, 0.0, 0.0, 100.0);
        let bus = fix(37.0, 127.0, 0.0, 0.0, 105.0);
        assert!(score(&rider, &bus).is_valid());
    }

    #[test]
    fn test_score_decreases_with_each_term() {
        let rider = fix(37.0, 127.0, 10.0, 90.0, 0.0);
        let base = score(&rider, &fix(37.0, 127.0, 10.0, 90.0, 0.0)).value;
        let farther = score(&rider, &fix(37.0002, 127.0, 10.0, 90.0, 0.0)).value;
        let faster = score(&rider, &fix(37.0, 127.0, 14.0, 90.0, 0.0)).value;
        let turned = score(&rider, &fix(37.0, 127.0, 10.0, 135.0, 0.0)).value;
        assert!(farther < base);
        assert!(faster < base);
        assert!(turned < base);
        assert!(farther > 0.0 && faster > 0.0 && turned > 0.0);
    }

    #[test]
    fn test_heading_wraps_around_north() {
        let rider = fix(37.0, 127.0, 5.0, 355.0, 0.0);
        let bus = fix(37.0, 127.0, 5.0, 5.0, 0.0);
        let expected = 0.60 + 0.25 + 0.15 * (-10.0_f64 / 20.0).exp();
        assert!((score(&rider, &bus).value - expected).abs() < 1e-9);
    }

    #[test]
    fn test_end_to_end_geometry() {
        let bus = fix(37.0, 127.0, 10.0, 90.0, 1000.0);
        let rider = fix(37.00005, 127.0, 10.0, 90.0, 1000.0);
        let s = score(&rider, &bus);
        assert!((s.distance_m - 5.56).abs() < 0.1, "got {}", s.distance_m);
        // 0.60 * e^(-5.56/25) + 0.25 + 0.15 ~= 0.880
        assert!((s.value - 0.880).abs() < 0.005, "got {}", s.value);
        assert!(s.value > 0.72);
    }

    #[test]
    fn test_custom_skew() {
        let params = ScoreParams {
            max_time_skew_s: 1.0,
            ..ScoreParams::default()
        };
        let rider = fix(37.0, 127.0, 0.0, 0.0, 0.0);
        let bus = fix(37.0, 127.0, 0.0, 0.0, 2.0);
        assert_eq!(score_with(&params, &rider, &bus).value, INVALID_SCORE);
        assert!(score(&rider, &bus).is_valid());
    }
}

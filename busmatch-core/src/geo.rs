//! Great-circle geometry on the WGS84 sphere approximation.
//!
//! Distances in metres, angles in degrees. Headings are measured clockwise
//! from true north.

/// Mean Earth radius used for all distance calculations.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two points in metres.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Initial bearing from point 1 to point 2, in [0, 360).
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Smallest angle between two headings, in [0, 180].
///
/// `circular_difference(10.0, 350.0) == 20.0`
pub fn circular_difference(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % 360.0;
    if d <= 180.0 {
        d
    } else {
        360.0 - d
    }
}

/// Lat/lon box that contains every point within `radius_m` of the centre.
///
/// Returns `(min_lat, max_lat, min_lon, max_lon)`. Near the poles the
/// longitude span widens to the full circle.
pub fn bounding_box(lat: f64, lon: f64, radius_m: f64) -> (f64, f64, f64, f64) {
    let angular = radius_m / EARTH_RADIUS_M;
    let dlat = angular.to_degrees();
    let ratio = angular.sin() / lat.to_radians().cos().abs();
    let dlon = if ratio.is_finite() && ratio < 1.0 {
        ratio.asin().to_degrees()
    } else {
        180.0
    };
    (lat - dlat, lat + dlat, lon - dlon, lon + dlon)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_same_point() {
        assert_eq!(haversine(37.0, 127.0, 37.0, 127.0), 0.0);
        assert_eq!(haversine(-33.9, 151.2, -33.9, 151.2), 0.0);
    }

    #[test]
    fn test_haversine_symmetric() {
        let ab = haversine(37.5665, 126.9780, 35.1796, 129.0756);
        let ba = haversine(35.1796, 129.0756, 37.5665, 126.9780);
        assert!((ab - ba).abs() < 1e-6);
        // Seoul -> Busan is roughly 325 km
        assert!((ab - 325_000.0).abs() < 5_000.0, "got {ab}");
    }

    #[test]
    fn test_haversine_small_offset() {
        // 0.00005 deg of latitude is about 5.56 m
        let d = haversine(37.0, 127.0, 37.00005, 127.0);
        assert!((d - 5.56).abs() < 0.05, "got {d}");
    }

    #[test]
    fn test_circular_difference() {
        assert_eq!(circular_difference(10.0, 350.0), 20.0);
        assert_eq!(circular_difference(350.0, 10.0), 20.0);
        assert_eq!(circular_difference(0.0, 180.0), 180.0);
        assert_eq!(circular_difference(90.0, 90.0), 0.0);
        assert_eq!(circular_difference(0.0, 720.0), 0.0);
    }

    #[test]
    fn test_circular_difference_range() {
        let mut a = -400.0;
        while a < 800.0 {
            let mut b = -400.0;
            while b < 800.0 {
                let d = circular_difference(a, b);
                assert!((0.0..=180.0).contains(&d), "a={a} b={b} d={d}");
                b += 37.0;
            }
            a += 41.0;
        }
    }

    #[test]
    fn test_bearing_cardinal() {
        assert!((bearing(37.0, 127.0, 38.0, 127.0) - 0.0).abs() < 1e-6);
        assert!((bearing(37.0, 127.0, 36.0, 127.0) - 180.0).abs() < 1e-6);
        let east = bearing(0.0, 0.0, 0.0, 1.0);
        assert!((east - 90.0).abs() < 1e-6, "got {east}");
    }

    #[test]
    fn test_bounding_box_contains_radius() {
        let (min_lat, max_lat, min_lon, max_lon) = bounding_box(37.0, 127.0, 80.0);
        assert!(haversine(37.0, 127.0, max_lat, 127.0) >= 79.9);
        assert!(haversine(37.0, 127.0, min_lat, 127.0) >= 79.9);
        assert!(haversine(37.0, 127.0, 37.0, max_lon) >= 79.9);
        assert!(haversine(37.0, 127.0, 37.0, min_lon) >= 79.9);
    }
}

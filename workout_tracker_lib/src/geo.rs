pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance in meters between two (latitude, longitude) pairs given in degrees.
pub fn haversine_distance(p1: (f64, f64), p2: (f64, f64)) -> f64 {
    let d_lat = (p2.0 - p1.0).to_radians();
    let d_lon = (p2.1 - p1.1).to_radians();
    let lat1 = p1.0.to_radians();
    let lat2 = p2.0.to_radians();

    let a = f64::sin(d_lat / 2.).powi(2)
        + f64::cos(lat1) * f64::cos(lat2) * f64::sin(d_lon / 2.).powi(2);
    let c = 2. * f64::asin(f64::sqrt(a));

    EARTH_RADIUS_METERS * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousandth_of_a_degree_at_the_equator() {
        let distance = haversine_distance((0., 0.), (0., 0.001));
        assert!((distance - 111.19).abs() < 111.19 * 0.01, "got {distance}");
    }

    #[test]
    fn same_point_is_zero() {
        assert_eq!(haversine_distance((56.158405, 10.206034), (56.158405, 10.206034)), 0.);
    }

    #[test]
    fn is_symmetric() {
        let a = (40.122151, 44.658078);
        let b = (56.158405, 10.206034);
        let diff = haversine_distance(a, b) - haversine_distance(b, a);
        assert!(diff.abs() < 1e-6);
    }
}

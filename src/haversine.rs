//! Haversine distance math and fallback travel tables.
//!
//! Used to back-fill missing backend cells and to build whole matrices when
//! the backend is unreachable. Less accurate than street routing (ignores
//! roads) but always available.

use rayon::prelude::*;

use crate::traits::LonLat;

/// Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points in meters.
pub fn haversine_m(from: LonLat, to: LonLat) -> f64 {
    let phi1 = from.lat.to_radians();
    let phi2 = to.lat.to_radians();
    let dphi = (to.lat - from.lat).to_radians();
    let dlam = (to.lon - from.lon).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlam / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Travel seconds for a distance in meters at an assumed average speed.
pub fn travel_seconds(meters: f64, speed_kmh: f64) -> f64 {
    (meters / 1000.0) / speed_kmh * 3600.0
}

/// Haversine-based travel table provider.
///
/// Estimates travel time from straight-line distance and an assumed speed.
#[derive(Debug, Clone)]
pub struct HaversineTables {
    /// Assumed average driving speed in km/h.
    pub speed_kmh: f64,
}

impl HaversineTables {
    pub fn new(speed_kmh: f64) -> Self {
        Self { speed_kmh }
    }

    /// Full NxN distance table in meters. Diagonal is exactly zero.
    pub fn distance_table(&self, points: &[LonLat]) -> Vec<Vec<f64>> {
        let n = points.len();
        (0..n)
            .into_par_iter()
            .map(|i| {
                (0..n)
                    .map(|j| {
                        if i == j {
                            0.0
                        } else {
                            haversine_m(points[i], points[j])
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// Full NxN duration table in seconds derived from `distance_table`.
    pub fn duration_table(&self, distances_m: &[Vec<f64>]) -> Vec<Vec<f64>> {
        distances_m
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&m| travel_seconds(m, self.speed_kmh))
                    .collect()
            })
            .collect()
    }
}

//! Real Cali (Colombia) locations for realistic test fixtures.
//!
//! Coordinates sourced from OpenStreetMap. All points sit inside the pilot
//! perimeter returned by `pilot_perimeter_geojson`.

use fleet_planner::traits::{LonLat, Stop, VehicleSpec};

/// A named location with coordinates, lon/lat order.
#[derive(Debug, Clone, Copy)]
pub struct Location {
    pub name: &'static str,
    pub lon: f64,
    pub lat: f64,
}

impl Location {
    pub const fn new(name: &'static str, lon: f64, lat: f64) -> Self {
        Self { name, lon, lat }
    }

    pub fn at(&self) -> LonLat {
        LonLat::new(self.lon, self.lat)
    }
}

// ============================================================================
// Central Cali clients (dense cluster around San Antonio / El Peñón)
// ============================================================================

pub const CENTRO: &[Location] = &[
    Location::new("Plaza de Cayzedo", -76.5320, 3.4516),
    Location::new("Iglesia La Merced", -76.5355, 3.4511),
    Location::new("Museo del Oro", -76.5339, 3.4508),
    Location::new("Teatro Municipal", -76.5371, 3.4491),
    Location::new("San Antonio", -76.5402, 3.4480),
    Location::new("El Penon", -76.5431, 3.4459),
    Location::new("Parque del Gato", -76.5450, 3.4485),
    Location::new("Museo La Tertulia", -76.5475, 3.4463),
    Location::new("Zoologico de Cali", -76.5553, 3.4460),
    Location::new("Parque del Perro", -76.5413, 3.4351),
];

// ============================================================================
// Northern clients (Granada / Versalles)
// ============================================================================

pub const NORTE: &[Location] = &[
    Location::new("Granada", -76.5371, 3.4594),
    Location::new("Versalles", -76.5329, 3.4640),
    Location::new("Chipichape", -76.5276, 3.4725),
    Location::new("Torre de Cali", -76.5310, 3.4570),
    Location::new("La Flora", -76.5238, 3.4778),
];

/// Fleet base in the city center.
pub const BASE: Location = Location::new("Base Centro", -76.5340, 3.4530);

/// Stops with ids assigned in order over the given locations.
pub fn stops_from(locations: &[Location]) -> Vec<Stop> {
    locations
        .iter()
        .enumerate()
        .map(|(i, loc)| {
            let mut stop = Stop::new(i as i64 + 1, loc.lon, loc.lat);
            stop.name = Some(loc.name.to_string());
            stop
        })
        .collect()
}

/// A single vehicle starting at the fleet base.
pub fn base_vehicle(max_stops: usize) -> VehicleSpec {
    let mut vehicle = VehicleSpec::new("V1", max_stops);
    vehicle.start = Some(BASE.at());
    vehicle.end = Some(BASE.at());
    vehicle.tw_start = Some("08:00".to_string());
    vehicle.tw_end = Some("18:00".to_string());
    vehicle.break_start = Some("12:00".to_string());
    vehicle.break_end = Some("13:00".to_string());
    vehicle
}

/// A rectangle around central and northern Cali, as one Feature.
pub fn pilot_perimeter_geojson() -> String {
    r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{"name":"cali_piloto"},
        "geometry":{"type":"Polygon","coordinates":[[
            [-76.58,3.42],[-76.50,3.42],[-76.50,3.49],[-76.58,3.49],[-76.58,3.42]
        ]]}}]}"#
        .to_string()
}

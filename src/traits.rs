//! Core domain types and backend seams.
//!
//! These are intentionally minimal. Concrete backends (OSRM, test doubles)
//! implement the provider traits; everything else in the crate works against
//! them.

use serde::{Deserialize, Serialize};

/// A WGS84 coordinate. Field order is the crate-wide convention: longitude
/// first, latitude second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// True when both components are finite and within WGS84 bounds.
    pub fn is_valid(&self) -> bool {
        self.lon.is_finite()
            && self.lat.is_finite()
            && self.lon.abs() <= 180.0
            && self.lat.abs() <= 90.0
    }
}

/// A single service stop scheduled for a working day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub id: i64,
    pub at: LonLat,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    /// Priority 1..=5 (1 highest); carried through to artifacts.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// On-site service time in minutes, 1..=120.
    #[serde(default = "default_service_min")]
    pub service_min: u32,
}

fn default_priority() -> u8 {
    3
}

fn default_service_min() -> u32 {
    8
}

impl Stop {
    pub fn new(id: i64, lon: f64, lat: f64) -> Self {
        Self {
            id,
            at: LonLat::new(lon, lat),
            name: None,
            zone: None,
            priority: default_priority(),
            service_min: default_service_min(),
        }
    }
}

/// Fleet vehicle. Time/break windows are opaque HH:MM strings carried to
/// artifacts verbatim; the solvers never interpret them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleSpec {
    pub id: String,
    #[serde(default)]
    pub start: Option<LonLat>,
    #[serde(default)]
    pub end: Option<LonLat>,
    /// Maximum number of stops this vehicle may serve.
    pub max_stops: usize,
    #[serde(default)]
    pub tw_start: Option<String>,
    #[serde(default)]
    pub tw_end: Option<String>,
    #[serde(default)]
    pub break_start: Option<String>,
    #[serde(default)]
    pub break_end: Option<String>,
}

impl VehicleSpec {
    pub fn new(id: impl Into<String>, max_stops: usize) -> Self {
        Self {
            id: id.into(),
            start: None,
            end: None,
            max_stops,
            tw_start: None,
            tw_end: None,
            break_start: None,
            break_end: None,
        }
    }
}

/// Raw pairwise tables as a backend returns them. Cells may be missing;
/// callers back-fill before anything downstream sees the tables.
#[derive(Debug, Clone)]
pub struct RawTables {
    pub seconds: Vec<Vec<Option<f64>>>,
    pub meters: Vec<Vec<Option<f64>>>,
}

/// One leg of a driven route, between two consecutive waypoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrivenLeg {
    pub distance_m: f64,
    pub duration_s: f64,
    pub steps: usize,
}

/// A street-following route as a backend returns it.
#[derive(Debug, Clone)]
pub struct DrivenRoute {
    pub polyline: String,
    pub distance_m: f64,
    pub duration_s: f64,
    pub legs: Vec<DrivenLeg>,
}

/// Failure reported by a routing backend. Always recoverable: callers fall
/// back to haversine estimates and record the downgrade in metadata.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

/// Supplies pairwise travel-time and travel-distance tables for an ordered
/// point list. Tables are indexed by the provided order.
pub trait TableBackend {
    fn travel_tables(&self, points: &[LonLat]) -> Result<RawTables, BackendError>;
}

/// Supplies a street-following driving route through ordered waypoints.
pub trait RouteBackend {
    fn drive_route(&self, coords: &[LonLat]) -> Result<DrivenRoute, BackendError>;
}

/// Renders preview maps for artifacts. Rendering is a consumer concern; the
/// core only hands over the data and writes whatever HTML comes back.
pub trait MapRenderer {
    /// HTML for a single day's shortlist preview, or None to skip the file.
    fn day_map(
        &self,
        stops: &[Stop],
        vehicle_start: Option<LonLat>,
        day_index: usize,
    ) -> Option<String>;

    /// HTML for a solved day's routes, or None to skip the file.
    fn solution_map(&self, stops: &[Stop], sequences: &[Vec<i64>]) -> Option<String>;
}

/// Renderer that skips every map. Useful headless and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMaps;

impl MapRenderer for NoMaps {
    fn day_map(&self, _: &[Stop], _: Option<LonLat>, _: usize) -> Option<String> {
        None
    }

    fn solution_map(&self, _: &[Stop], _: &[Vec<i64>]) -> Option<String> {
        None
    }
}

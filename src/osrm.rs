//! OSRM HTTP adapter for travel tables and route geometry.

use serde::Deserialize;

use crate::traits::{
    BackendError, DrivenLeg, DrivenRoute, LonLat, RawTables, RouteBackend, TableBackend,
};

#[derive(Debug, Clone)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
    pub health_timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 30,
            health_timeout_secs: 5,
        }
    }
}

/// Error type for OSRM requests.
#[derive(Debug, thiserror::Error)]
pub enum OsrmError {
    /// HTTP request failed (connection, timeout, non-2xx status).
    #[error("OSRM request failed: {0}")]
    RequestFailed(String),
    /// OSRM answered but rejected the request (`code != "Ok"`).
    #[error("OSRM rejected request: {0}")]
    Rejected(String),
    /// Failed to parse the response body.
    #[error("failed to parse OSRM response: {0}")]
    ParseError(String),
    /// No route found between waypoints.
    #[error("no route found between waypoints")]
    NoRoute,
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
    health_client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        let health_client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.health_timeout_secs))
            .build()?;

        Ok(Self {
            config,
            client,
            health_client,
        })
    }

    /// Cheap reachability probe against the server root.
    pub fn test_connection(&self) -> bool {
        match self.health_client.get(&self.config.base_url).send() {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::warn!(%err, "OSRM health probe failed");
                false
            }
        }
    }

    pub fn profile(&self) -> &str {
        &self.config.profile
    }

    /// Fetch duration and distance tables for ordered points in one call.
    ///
    /// Cells the backend could not compute come back as `None`; the caller
    /// back-fills them before the tables leave the matrix service.
    pub fn table(&self, points: &[LonLat]) -> Result<RawTables, OsrmError> {
        let url = format!(
            "{}/table/v1/{}/{}?annotations=duration,distance",
            self.config.base_url,
            self.config.profile,
            coords_segment(points)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| OsrmError::RequestFailed(e.to_string()))?;

        let body: OsrmTableResponse = response
            .json()
            .map_err(|e| OsrmError::ParseError(e.to_string()))?;

        if body.code != "Ok" {
            return Err(OsrmError::Rejected(body.code));
        }

        let n = points.len();
        let durations = body
            .durations
            .ok_or_else(|| OsrmError::ParseError("missing durations".to_string()))?;
        let distances = body
            .distances
            .ok_or_else(|| OsrmError::ParseError("missing distances".to_string()))?;

        if durations.len() != n || distances.len() != n {
            return Err(OsrmError::ParseError(format!(
                "expected {}x{} tables, got {}x{}",
                n,
                n,
                durations.len(),
                distances.len()
            )));
        }

        Ok(RawTables {
            seconds: durations,
            meters: distances,
        })
    }

    /// Fetch a street-following route through ordered waypoints.
    ///
    /// Requests the full-overview polyline plus per-leg breakdown with
    /// step counts.
    pub fn route(&self, coords: &[LonLat]) -> Result<DrivenRoute, OsrmError> {
        if coords.len() < 2 {
            return Err(OsrmError::NoRoute);
        }

        let url = format!(
            "{}/route/v1/{}/{}?overview=full&geometries=polyline&steps=true&annotations=true",
            self.config.base_url,
            self.config.profile,
            coords_segment(coords)
        );

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| OsrmError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OsrmError::RequestFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: OsrmRouteResponse = response
            .json()
            .map_err(|e| OsrmError::ParseError(e.to_string()))?;

        if body.code != "Ok" {
            return Err(OsrmError::Rejected(body.code));
        }

        let route = body.routes.into_iter().next().ok_or(OsrmError::NoRoute)?;

        let legs = route
            .legs
            .into_iter()
            .map(|leg| DrivenLeg {
                distance_m: leg.distance,
                duration_s: leg.duration,
                steps: leg.steps.len(),
            })
            .collect();

        Ok(DrivenRoute {
            polyline: route.geometry,
            distance_m: route.distance,
            duration_s: route.duration,
            legs,
        })
    }
}

impl TableBackend for OsrmClient {
    fn travel_tables(&self, points: &[LonLat]) -> Result<RawTables, BackendError> {
        self.table(points).map_err(|e| BackendError(e.to_string()))
    }
}

impl RouteBackend for OsrmClient {
    fn drive_route(&self, coords: &[LonLat]) -> Result<DrivenRoute, BackendError> {
        self.route(coords).map_err(|e| BackendError(e.to_string()))
    }
}

/// URL path segment: `lon1,lat1;lon2,lat2;...`
fn coords_segment(points: &[LonLat]) -> String {
    points
        .iter()
        .map(|p| format!("{:.6},{:.6}", p.lon, p.lat))
        .collect::<Vec<_>>()
        .join(";")
}

// -----------------------------------------------------------------------------
// OSRM Response Types
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    code: String,
    durations: Option<Vec<Vec<Option<f64>>>>,
    distances: Option<Vec<Vec<Option<f64>>>>,
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    code: String,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    /// Encoded polyline for the full route.
    geometry: String,
    /// Total distance in meters.
    distance: f64,
    /// Total duration in seconds.
    duration: f64,
    /// Per-leg breakdown.
    legs: Vec<OsrmRouteLeg>,
}

#[derive(Debug, Deserialize)]
struct OsrmRouteLeg {
    distance: f64,
    duration: f64,
    #[serde(default)]
    steps: Vec<OsrmRouteStep>,
}

#[derive(Debug, Deserialize)]
struct OsrmRouteStep {
    #[serde(default)]
    #[allow(dead_code)]
    geometry: String,
}

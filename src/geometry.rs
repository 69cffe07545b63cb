//! Street geometry for solved routes, with straight-line fallback.
//!
//! Every route either gets the backend's full-overview polyline or, when
//! the backend cannot answer, a straight-line estimate built from leg-wise
//! haversine distances at an assumed city speed. Both outcomes are cached
//! under the rounded coordinate sequence so a re-export never refetches.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cache::{JsonStore, coords_key};
use crate::config::PlannerConfig;
use crate::haversine::{haversine_m, travel_seconds};
use crate::osrm::{OsrmClient, OsrmConfig};
use crate::polyline::Polyline;
use crate::traits::{DrivenLeg, LonLat, RouteBackend};

/// Geometry attached to a route: real street shape or the fallback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteShape {
    /// Street-following geometry from the routing backend.
    Street {
        polyline: String,
        coordinates: Vec<LonLat>,
        distance_m: f64,
        duration_s: f64,
        legs: Vec<DrivenLeg>,
    },
    /// Leg-wise straight lines with estimated timing.
    StraightLine {
        coordinates: Vec<LonLat>,
        distance_m: f64,
        duration_s: f64,
        legs: Vec<DrivenLeg>,
    },
}

impl RouteShape {
    pub fn geometry_valid(&self) -> bool {
        matches!(self, RouteShape::Street { .. })
    }

    pub fn distance_m(&self) -> f64 {
        match self {
            RouteShape::Street { distance_m, .. } | RouteShape::StraightLine { distance_m, .. } => {
                *distance_m
            }
        }
    }

    pub fn duration_s(&self) -> f64 {
        match self {
            RouteShape::Street { duration_s, .. } | RouteShape::StraightLine { duration_s, .. } => {
                *duration_s
            }
        }
    }

    pub fn legs(&self) -> &[DrivenLeg] {
        match self {
            RouteShape::Street { legs, .. } | RouteShape::StraightLine { legs, .. } => legs,
        }
    }

    pub fn coordinates(&self) -> &[LonLat] {
        match self {
            RouteShape::Street { coordinates, .. }
            | RouteShape::StraightLine { coordinates, .. } => coordinates,
        }
    }
}

pub struct GeometryService<B = OsrmClient> {
    backend: Option<B>,
    cache: Option<JsonStore>,
    cfg: PlannerConfig,
}

impl GeometryService<OsrmClient> {
    pub fn new(cfg: &PlannerConfig) -> Self {
        let osrm_config = OsrmConfig {
            base_url: cfg.backend_url.clone(),
            profile: cfg.profile.clone(),
            timeout_secs: cfg.request_timeout_secs,
            health_timeout_secs: cfg.health_timeout_secs,
        };
        let backend = match OsrmClient::new(osrm_config) {
            Ok(client) => Some(client),
            Err(err) => {
                tracing::warn!(%err, "could not build backend client, geometry falls back");
                None
            }
        };
        Self {
            backend,
            cache: cfg
                .cache_dir
                .as_ref()
                .map(|dir| JsonStore::new(dir, cfg.cache_ttl_secs)),
            cfg: cfg.clone(),
        }
    }
}

impl<B: RouteBackend> GeometryService<B> {
    pub fn with_backend(backend: Option<B>, cfg: &PlannerConfig) -> Self {
        Self {
            backend,
            cache: cfg
                .cache_dir
                .as_ref()
                .map(|dir| JsonStore::new(dir, cfg.cache_ttl_secs)),
            cfg: cfg.clone(),
        }
    }

    /// Geometry for one ordered coordinate sequence. Sequences shorter than
    /// two points short-circuit to an empty straight-line shape.
    pub fn route_shape(&self, coords: &[LonLat]) -> RouteShape {
        if coords.len() < 2 {
            return RouteShape::StraightLine {
                coordinates: coords.to_vec(),
                distance_m: 0.0,
                duration_s: 0.0,
                legs: Vec::new(),
            };
        }

        let key = coords_key(coords, &self.cfg.profile);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.load::<RouteShape>("routes", &key) {
                return hit;
            }
        }

        let shape = match &self.backend {
            Some(backend) => match backend.drive_route(coords) {
                Ok(driven) => RouteShape::Street {
                    coordinates: Polyline::decode(&driven.polyline).into_points(),
                    polyline: driven.polyline,
                    distance_m: driven.distance_m,
                    duration_s: driven.duration_s,
                    legs: driven.legs,
                },
                Err(err) => {
                    tracing::warn!(%err, "route geometry failed, using straight lines");
                    self.straight_line(coords)
                }
            },
            None => self.straight_line(coords),
        };

        if let Some(cache) = &self.cache {
            cache.store("routes", &key, &shape);
        }

        shape
    }

    /// Per-route fan-out; the backend calls are independent I/O.
    pub fn batch(&self, sequences: &[Vec<LonLat>]) -> Vec<RouteShape>
    where
        B: Sync,
    {
        sequences
            .par_iter()
            .map(|coords| self.route_shape(coords))
            .collect()
    }

    fn straight_line(&self, coords: &[LonLat]) -> RouteShape {
        let mut legs = Vec::with_capacity(coords.len() - 1);
        let mut total_m = 0.0;
        for pair in coords.windows(2) {
            let meters = haversine_m(pair[0], pair[1]);
            total_m += meters;
            legs.push(DrivenLeg {
                distance_m: meters,
                duration_s: travel_seconds(meters, self.cfg.line_speed_kmh),
                steps: 1,
            });
        }
        let duration_s = legs.iter().map(|l| l.duration_s).sum();

        RouteShape::StraightLine {
            coordinates: coords.to_vec(),
            distance_m: total_m,
            duration_s,
            legs,
        }
    }
}

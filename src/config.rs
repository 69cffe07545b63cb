//! Planner configuration.
//!
//! One explicit value passed to every service constructor. No ambient reads:
//! callers that want environment-driven settings build the struct themselves.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Routing backend base URL.
    pub backend_url: String,
    /// Routing profile used for matrix and route requests, and as part of
    /// every cache key.
    pub profile: String,
    /// Timeout for matrix and route requests, seconds.
    pub request_timeout_secs: u64,
    /// Timeout for the backend health probe, seconds.
    pub health_timeout_secs: u64,

    /// Cache root directory. None disables on-disk caching entirely.
    pub cache_dir: Option<PathBuf>,
    /// Entries older than this are evicted lazily on access.
    pub cache_ttl_secs: u64,

    /// Hard ceiling on matrix size (VRP path).
    pub matrix_max_points: usize,
    /// Hard ceiling for the single-vehicle solver.
    pub tsp_max_points: usize,
    /// Wall-time budget for the single-vehicle solver, seconds.
    pub tsp_time_limit_secs: u64,
    /// Wall-time budget for the multi-vehicle solver, seconds.
    pub vrp_time_limit_secs: u64,

    /// Weight on travel seconds in the combined arc cost.
    pub time_weight: f64,
    /// Weight on travel meters (scaled by 1/100) in the combined arc cost.
    pub distance_weight: f64,
    /// Fixed cost of leaving a stop unserved.
    pub unserved_penalty: i64,
    /// Scale of the soft stop-count balance term when balancing is on.
    pub balance_weight: f64,

    /// Assumed speed for haversine fallback matrices, km/h.
    pub matrix_speed_kmh: f64,
    /// Assumed speed for straight-line geometry fallback, km/h.
    pub line_speed_kmh: f64,
    /// Service minutes assumed when a stop carries none.
    pub default_service_min: u32,

    /// Root directory for week-tagged artifact trees.
    pub runs_root: PathBuf,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            request_timeout_secs: 30,
            health_timeout_secs: 5,
            cache_dir: Some(PathBuf::from("routing_runs/cache")),
            cache_ttl_secs: 24 * 3600,
            matrix_max_points: 300,
            tsp_max_points: 200,
            tsp_time_limit_secs: 10,
            vrp_time_limit_secs: 60,
            time_weight: 0.7,
            distance_weight: 0.3,
            unserved_penalty: 100_000,
            balance_weight: 1_000.0,
            matrix_speed_kmh: 30.0,
            line_speed_kmh: 50.0,
            default_service_min: 8,
            runs_root: PathBuf::from("routing_runs"),
        }
    }
}

impl PlannerConfig {
    /// Config with caching disabled, for tests and one-shot runs.
    pub fn without_cache(mut self) -> Self {
        self.cache_dir = None;
        self
    }
}

//! Travel matrix service: backend tables with caching and haversine fallback.
//!
//! The service guarantees that whatever leaves it is a pair of square,
//! finite, non-negative tables with a zero diagonal. Backend failures never
//! surface as errors; they downgrade the source recorded in the metadata.

use serde::{Deserialize, Serialize};

use crate::cache::{JsonStore, coords_key};
use crate::config::PlannerConfig;
use crate::error::Error;
use crate::haversine::{HaversineTables, haversine_m, travel_seconds};
use crate::osrm::{OsrmClient, OsrmConfig};
use crate::traits::{LonLat, TableBackend};

/// An identified point submitted for matrix computation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatrixPoint {
    pub id: i64,
    pub at: LonLat,
}

/// Which computation produced the tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixSource {
    /// Routing backend, with any missing cells haversine-filled.
    Backend,
    /// Whole-matrix haversine fallback.
    Haversine,
    /// Degenerate sizes (0 or 1 points) computed locally.
    Trivial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixMeta {
    pub n: usize,
    pub profile: String,
    pub source: MatrixSource,
    /// True when this exact payload came back from the on-disk cache.
    pub from_cache: bool,
    /// Backend cells that were missing and haversine-filled.
    pub filled_cells: usize,
}

/// NxN travel-time (seconds) and travel-distance (meters) tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelMatrix {
    pub seconds: Vec<Vec<f64>>,
    pub meters: Vec<Vec<f64>>,
    pub meta: MatrixMeta,
}

impl TravelMatrix {
    /// Upper-triangle summary, for reports.
    pub fn stats(&self) -> MatrixStats {
        let mut distances = Vec::new();
        let mut times = Vec::new();
        for i in 0..self.meta.n {
            for j in (i + 1)..self.meta.n {
                distances.push(self.meters[i][j]);
                times.push(self.seconds[i][j]);
            }
        }

        let mean = |v: &[f64]| {
            if v.is_empty() {
                0.0
            } else {
                v.iter().sum::<f64>() / v.len() as f64
            }
        };
        let min = |v: &[f64]| v.iter().copied().fold(f64::INFINITY, f64::min);
        let max = |v: &[f64]| v.iter().copied().fold(0.0f64, f64::max);

        let mean_km = mean(&distances) / 1000.0;
        let mean_min = mean(&times) / 60.0;
        MatrixStats {
            pairs: distances.len(),
            min_km: if distances.is_empty() { 0.0 } else { min(&distances) / 1000.0 },
            max_km: max(&distances) / 1000.0,
            mean_km,
            min_minutes: if times.is_empty() { 0.0 } else { min(&times) / 60.0 },
            max_minutes: max(&times) / 60.0,
            mean_minutes: mean_min,
            avg_speed_kmh: if mean_min > 0.0 {
                mean_km / (mean_min / 60.0)
            } else {
                0.0
            },
        }
    }
}

/// Summary statistics over the upper triangle of a matrix pair.
#[derive(Debug, Clone, Serialize)]
pub struct MatrixStats {
    pub pairs: usize,
    pub min_km: f64,
    pub max_km: f64,
    pub mean_km: f64,
    pub min_minutes: f64,
    pub max_minutes: f64,
    pub mean_minutes: f64,
    pub avg_speed_kmh: f64,
}

/// Backend connectivity report.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub connected: bool,
    pub message: String,
}

pub struct MatrixService<B = OsrmClient> {
    backend: Option<B>,
    backend_available: bool,
    cache: Option<JsonStore>,
    cfg: PlannerConfig,
}

impl MatrixService<OsrmClient> {
    /// Build the service against the configured OSRM backend, probing its
    /// health once. An unreachable backend is not an error: the service
    /// runs on haversine fallback.
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
                tracing::warn!(%err, "could not build backend client, using haversine only");
                None
            }
        };
        let backend_available = backend
            .as_ref()
            .map(|b| b.test_connection())
            .unwrap_or(false);
        if !backend_available {
            tracing::warn!("routing backend not available, matrices fall back to haversine");
        }

        Self {
            backend,
            backend_available,
            cache: cfg
                .cache_dir
                .as_ref()
                .map(|dir| JsonStore::new(dir, cfg.cache_ttl_secs)),
            cfg: cfg.clone(),
        }
    }

    /// Re-probe the backend and report the result.
    pub fn test_backend(&self) -> BackendStatus {
        match &self.backend {
            Some(client) if client.test_connection() => BackendStatus {
                connected: true,
                message: format!("backend reachable at {}", self.cfg.backend_url),
            },
            Some(_) => BackendStatus {
                connected: false,
                message: format!("backend unreachable at {}", self.cfg.backend_url),
            },
            None => BackendStatus {
                connected: false,
                message: "no backend client configured".to_string(),
            },
        }
    }
}

impl<B: TableBackend> MatrixService<B> {
    /// Build the service over an explicit backend. `None` forces the
    /// haversine path; tests inject doubles here.
    pub fn with_backend(backend: Option<B>, cfg: &PlannerConfig) -> Self {
        let backend_available = backend.is_some();
        Self {
            backend,
            backend_available,
            cache: cfg
                .cache_dir
                .as_ref()
                .map(|dir| JsonStore::new(dir, cfg.cache_ttl_secs)),
            cfg: cfg.clone(),
        }
    }

    /// Compute (or recall) the travel matrix for the ordered point list.
    pub fn get(&self, points: &[MatrixPoint], use_cache: bool) -> Result<TravelMatrix, Error> {
        let n = points.len();
        if n > self.cfg.matrix_max_points {
            return Err(Error::MatrixTooLarge {
                n,
                max: self.cfg.matrix_max_points,
            });
        }

        if n <= 1 {
            return Ok(trivial_matrix(n, &self.cfg.profile));
        }

        let coords: Vec<LonLat> = points.iter().map(|p| p.at).collect();
        let key = coords_key(&coords, &self.cfg.profile);

        if use_cache {
            if let Some(cache) = &self.cache {
                if let Some(mut hit) = cache.load::<TravelMatrix>("matrices", &key) {
                    hit.meta.from_cache = true;
                    return Ok(hit);
                }
            }
        }

        if self.backend_available {
            if let Some(backend) = &self.backend {
                match backend.travel_tables(&coords) {
                    Ok(raw) => {
                        let matrix = self.adapt_backend_tables(raw, &coords)?;
                        if let Some(err) = validate(&matrix) {
                            tracing::warn!(err, "backend matrix failed validation, falling back");
                        } else {
                            if use_cache {
                                if let Some(cache) = &self.cache {
                                    cache.store("matrices", &key, &matrix);
                                }
                            }
                            return Ok(matrix);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%err, "backend matrix request failed, falling back");
                    }
                }
            }
        }

        // Haversine fallback, cached under its own key so a later backend
        // recovery does not serve estimated tables as street tables.
        let fallback_key = format!("fallback_{key}");
        if use_cache {
            if let Some(cache) = &self.cache {
                if let Some(mut hit) = cache.load::<TravelMatrix>("matrices", &fallback_key) {
                    hit.meta.from_cache = true;
                    return Ok(hit);
                }
            }
        }

        let tables = HaversineTables::new(self.cfg.matrix_speed_kmh);
        let meters = tables.distance_table(&coords);
        let seconds = tables.duration_table(&meters);
        let matrix = TravelMatrix {
            seconds,
            meters,
            meta: MatrixMeta {
                n,
                profile: self.cfg.profile.clone(),
                source: MatrixSource::Haversine,
                from_cache: false,
                filled_cells: 0,
            },
        };

        if use_cache {
            if let Some(cache) = &self.cache {
                cache.store("matrices", &fallback_key, &matrix);
            }
        }

        Ok(matrix)
    }

    /// Replace missing backend cells with haversine estimates and zero the
    /// diagonal.
    fn adapt_backend_tables(
        &self,
        raw: crate::traits::RawTables,
        coords: &[LonLat],
    ) -> Result<TravelMatrix, Error> {
        let n = coords.len();
        if raw.seconds.len() != n || raw.meters.len() != n {
            return Err(Error::InvalidInput(format!(
                "backend returned {}x{} tables for {} points",
                raw.seconds.len(),
                raw.meters.len(),
                n
            )));
        }

        let mut filled = 0usize;
        let mut seconds = vec![vec![0.0; n]; n];
        let mut meters = vec![vec![0.0; n]; n];

        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let raw_m = raw.meters.get(i).and_then(|row| row.get(j)).copied().flatten();
                let raw_s = raw.seconds.get(i).and_then(|row| row.get(j)).copied().flatten();
                match (raw_s, raw_m) {
                    (Some(s), Some(m)) => {
                        seconds[i][j] = s;
                        meters[i][j] = m;
                    }
                    _ => {
                        filled += 1;
                        let m = haversine_m(coords[i], coords[j]);
                        meters[i][j] = m;
                        seconds[i][j] = travel_seconds(m, self.cfg.matrix_speed_kmh);
                    }
                }
            }
        }

        if filled > 0 {
            tracing::warn!(filled, "backend tables had missing cells, haversine-filled");
        }

        Ok(TravelMatrix {
            seconds,
            meters,
            meta: MatrixMeta {
                n,
                profile: self.cfg.profile.clone(),
                source: MatrixSource::Backend,
                from_cache: false,
                filled_cells: filled,
            },
        })
    }
}

fn trivial_matrix(n: usize, profile: &str) -> TravelMatrix {
    TravelMatrix {
        seconds: vec![vec![0.0; n]; n],
        meters: vec![vec![0.0; n]; n],
        meta: MatrixMeta {
            n,
            profile: profile.to_string(),
            source: MatrixSource::Trivial,
            from_cache: false,
            filled_cells: 0,
        },
    }
}

/// Check the invariants every emitted matrix must hold. Returns a human
/// description of the first violation, or None when the matrix is sound.
fn validate(matrix: &TravelMatrix) -> Option<&'static str> {
    let n = matrix.meta.n;
    for table in [&matrix.seconds, &matrix.meters] {
        if table.len() != n || table.iter().any(|row| row.len() != n) {
            return Some("table is not square");
        }
        for (i, row) in table.iter().enumerate() {
            for (j, &cell) in row.iter().enumerate() {
                if !cell.is_finite() {
                    return Some("non-finite cell");
                }
                if cell < 0.0 {
                    return Some("negative cell");
                }
                if i == j && cell != 0.0 {
                    return Some("non-zero diagonal");
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{BackendError, RawTables};

    struct FixedBackend {
        seconds: Vec<Vec<Option<f64>>>,
        meters: Vec<Vec<Option<f64>>>,
    }

    impl TableBackend for FixedBackend {
        fn travel_tables(&self, _points: &[LonLat]) -> Result<RawTables, BackendError> {
            Ok(RawTables {
                seconds: self.seconds.clone(),
                meters: self.meters.clone(),
            })
        }
    }

    struct DeadBackend;

    impl TableBackend for DeadBackend {
        fn travel_tables(&self, _points: &[LonLat]) -> Result<RawTables, BackendError> {
            Err(BackendError("connection refused".to_string()))
        }
    }

    fn points(n: usize) -> Vec<MatrixPoint> {
        (0..n)
            .map(|i| MatrixPoint {
                id: i as i64 + 1,
                at: LonLat::new(-76.5320 - 0.001 * i as f64, 3.4516 + 0.001 * i as f64),
            })
            .collect()
    }

    fn cfg() -> PlannerConfig {
        PlannerConfig::default().without_cache()
    }

    #[test]
    fn test_empty_input_is_trivial() {
        let service = MatrixService::with_backend(None::<DeadBackend>, &cfg());
        let matrix = service.get(&[], true).unwrap();
        assert_eq!(matrix.meta.n, 0);
        assert_eq!(matrix.meta.source, MatrixSource::Trivial);
        assert!(matrix.seconds.is_empty());
    }

    #[test]
    fn test_single_point_is_zero_matrix() {
        let service = MatrixService::with_backend(None::<DeadBackend>, &cfg());
        let matrix = service.get(&points(1), true).unwrap();
        assert_eq!(matrix.seconds, vec![vec![0.0]]);
        assert_eq!(matrix.meters, vec![vec![0.0]]);
    }

    #[test]
    fn test_too_many_points_rejected() {
        let service = MatrixService::with_backend(None::<DeadBackend>, &cfg());
        let err = service.get(&points(301), true).unwrap_err();
        assert!(matches!(err, Error::MatrixTooLarge { n: 301, max: 300 }));
    }

    #[test]
    fn test_dead_backend_falls_back_to_haversine() {
        let service = MatrixService::with_backend(Some(DeadBackend), &cfg());
        let matrix = service.get(&points(3), true).unwrap();

        assert_eq!(matrix.meta.source, MatrixSource::Haversine);
        for i in 0..3 {
            assert_eq!(matrix.seconds[i][i], 0.0);
            for j in 0..3 {
                assert!(matrix.seconds[i][j].is_finite());
                assert!(matrix.seconds[i][j] >= 0.0);
            }
        }
    }

    #[test]
    fn test_null_cells_backfilled() {
        let backend = FixedBackend {
            seconds: vec![
                vec![Some(0.0), None],
                vec![Some(120.0), Some(0.0)],
            ],
            meters: vec![
                vec![Some(0.0), None],
                vec![Some(900.0), Some(0.0)],
            ],
        };
        let service = MatrixService::with_backend(Some(backend), &cfg());
        let matrix = service.get(&points(2), true).unwrap();

        assert_eq!(matrix.meta.source, MatrixSource::Backend);
        assert_eq!(matrix.meta.filled_cells, 1);
        assert!(matrix.seconds[0][1] > 0.0, "filled cell should be positive");
        assert_eq!(matrix.seconds[1][0], 120.0);
    }

    #[test]
    fn test_cache_hit_returns_identical_payload() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PlannerConfig::default();
        config.cache_dir = Some(dir.path().to_path_buf());

        let backend = FixedBackend {
            seconds: vec![
                vec![Some(0.0), Some(33.0)],
                vec![Some(44.0), Some(0.0)],
            ],
            meters: vec![
                vec![Some(0.0), Some(500.0)],
                vec![Some(600.0), Some(0.0)],
            ],
        };
        let service = MatrixService::with_backend(Some(backend), &config);

        let first = service.get(&points(2), true).unwrap();
        assert!(!first.meta.from_cache);
        assert_eq!(first.meta.source, MatrixSource::Backend);

        let second = service.get(&points(2), true).unwrap();
        assert!(second.meta.from_cache);
        assert_eq!(second.seconds, first.seconds);
        assert_eq!(second.meters, first.meters);
    }

    #[test]
    fn test_fallback_cached_under_separate_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PlannerConfig::default();
        config.cache_dir = Some(dir.path().to_path_buf());

        let service = MatrixService::with_backend(Some(DeadBackend), &config);
        let first = service.get(&points(2), true).unwrap();
        assert_eq!(first.meta.source, MatrixSource::Haversine);

        let second = service.get(&points(2), true).unwrap();
        assert!(second.meta.from_cache);
        assert_eq!(second.meta.source, MatrixSource::Haversine);
    }

    #[test]
    fn test_stats_reasonable() {
        let service = MatrixService::with_backend(None::<DeadBackend>, &cfg());
        let matrix = service.get(&points(4), true).unwrap();
        let stats = matrix.stats();

        assert_eq!(stats.pairs, 6);
        assert!(stats.mean_km > 0.0);
        assert!((stats.avg_speed_kmh - 30.0).abs() < 1.0);
    }
}

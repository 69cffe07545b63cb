//! Orchestrator: pipelines the two user workflows.
//!
//! Workflow 1, locate-and-partition: raw clients → coordinate repair →
//! perimeter filter → weekly shortlists → week artifacts.
//! Workflow 2, solve: per-day shortlist + fleet → travel matrix → solver →
//! geometry → solution artifacts.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::artifacts::{self, WeekArtifacts};
use crate::config::PlannerConfig;
use crate::error::Error;
use crate::geometry::GeometryService;
use crate::matrix::{BackendStatus, MatrixPoint, MatrixService};
use crate::perimeter::Perimeter;
use crate::repair::{ClientEvent, ClientRecord, RepairStats, RepairedClient, repair_clients};
use crate::traits::{LonLat, MapRenderer, Stop, VehicleSpec};
use crate::tsp::{CostMetric, TspParams, TspSolution, solve_open_path};
use crate::vrp::{VrpParams, VrpRules, VrpScenario, VrpSolution, solve_open_vrp};
use crate::week::{PartitionParams, WeekPlan, build_weekly_shortlists, normalize_week_tag};

pub struct PlannerSystem {
    cfg: PlannerConfig,
    matrix: MatrixService,
    geometry: GeometryService,
}

#[derive(Debug, Clone)]
pub struct LocateOptions {
    pub n_days: usize,
    pub target_per_day: usize,
    pub seed: u64,
    /// Raw week tag; normalized to the current ISO Monday when malformed.
    pub week_tag: String,
    pub overwrite: bool,
}

#[derive(Debug)]
pub struct LocateOutcome {
    /// The tag actually used, after normalization.
    pub week_tag: String,
    pub repaired: Vec<RepairedClient>,
    pub repair_stats: RepairStats,
    pub plan: WeekPlan,
    pub artifacts: WeekArtifacts,
}

/// Capacity precheck recorded alongside a built scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioInfo {
    pub total_stops: usize,
    pub total_capacity: usize,
    pub expected_service_pct: f64,
    /// Set when a requested start id was not in the stop set and was dropped.
    pub start_id_dropped: bool,
}

/// A solvable (week, day) pair found on disk.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRef {
    pub week_tag: String,
    pub day: usize,
    pub shortlist_path: PathBuf,
    pub stops_count: usize,
}

impl PlannerSystem {
    /// Build the system, probing the routing backend once. An unreachable
    /// backend downgrades matrices and geometry to haversine estimates.
    pub fn new(cfg: PlannerConfig) -> Self {
        let matrix = MatrixService::new(&cfg);
        let geometry = GeometryService::new(&cfg);
        Self {
            cfg,
            matrix,
            geometry,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.cfg
    }

    pub fn backend_status(&self) -> BackendStatus {
        self.matrix.test_backend()
    }

    // -------------------------------------------------------------------------
    // Workflow 1: locate & partition
    // -------------------------------------------------------------------------

    /// Repair client coordinates, keep the ones inside the perimeter, split
    /// them over working days, and persist the week tree.
    pub fn locate_and_partition(
        &self,
        clients: &[ClientRecord],
        events: &[ClientEvent],
        perimeter_geojson: &str,
        vehicle: &VehicleSpec,
        options: &LocateOptions,
        renderer: &dyn MapRenderer,
    ) -> Result<LocateOutcome, Error> {
        let perimeter = Perimeter::from_geojson_str(perimeter_geojson)?;
        let (repaired, repair_stats) = repair_clients(clients, events, &perimeter)?;

        let pool: Vec<Stop> = repaired
            .iter()
            .filter(|r| r.in_perimeter_final)
            .filter_map(|r| {
                let at = r.location()?;
                let source = clients.iter().find(|c| c.id == r.id);
                let mut stop = Stop::new(r.id, at.lon, at.lat);
                if let Some(client) = source {
                    stop.name = client.name.clone();
                    stop.zone = client.zone.clone();
                    if let Some(p) = client.priority {
                        stop.priority = p.clamp(1, 5);
                    }
                }
                Some(stop)
            })
            .collect();

        if pool.is_empty() {
            return Err(Error::InvalidInput(
                "no clients inside the perimeter after repair".to_string(),
            ));
        }

        let week_tag = normalize_week_tag(&options.week_tag, chrono::Utc::now().date_naive());
        if week_tag != options.week_tag {
            tracing::warn!(
                requested = %options.week_tag,
                normalized = %week_tag,
                "week tag normalized to ISO Monday"
            );
        }

        let plan = build_weekly_shortlists(
            &pool,
            vehicle,
            &PartitionParams {
                n_days: options.n_days,
                target_per_day: options.target_per_day,
                seed: options.seed,
            },
        );

        let artifacts = artifacts::persist_week(
            &self.cfg.runs_root,
            &week_tag,
            &pool,
            &plan,
            renderer,
            options.overwrite,
        )?;

        Ok(LocateOutcome {
            week_tag,
            repaired,
            repair_stats,
            plan,
            artifacts,
        })
    }

    // -------------------------------------------------------------------------
    // Workflow 2: solve
    // -------------------------------------------------------------------------

    /// Assemble a solvable scenario, dropping an unknown start id with a
    /// warning and recording the capacity precheck.
    pub fn build_scenario(
        &self,
        stops: Vec<Stop>,
        vehicles: Vec<VehicleSpec>,
        rules: VrpRules,
        start_id: Option<i64>,
    ) -> Result<(VrpScenario, ScenarioInfo), Error> {
        if stops.is_empty() {
            return Err(Error::InvalidInput("scenario has no stops".to_string()));
        }
        if vehicles.is_empty() {
            return Err(Error::InvalidInput("scenario has no vehicles".to_string()));
        }

        let start_id_dropped = match start_id {
            Some(id) if !stops.iter().any(|s| s.id == id) => {
                tracing::warn!(start_id = id, "start id not in stop set, ignoring");
                true
            }
            _ => false,
        };

        let total_stops = stops.len();
        let total_capacity: usize = vehicles
            .iter()
            .map(|v| v.max_stops.min(rules.max_stops_per_vehicle))
            .sum();
        let expected_service_pct = if total_capacity == 0 {
            0.0
        } else {
            (100.0 * total_capacity as f64 / total_stops as f64).min(100.0)
        };
        if expected_service_pct < 100.0 {
            tracing::warn!(
                total_stops,
                total_capacity,
                expected_service_pct,
                "capacity below demand, some stops will go unserved"
            );
        }

        let info = ScenarioInfo {
            total_stops,
            total_capacity,
            expected_service_pct: (expected_service_pct * 10.0).round() / 10.0,
            start_id_dropped,
        };
        let scenario = VrpScenario {
            stops,
            vehicles,
            rules,
            start_id: if start_id_dropped { None } else { start_id },
        };

        Ok((scenario, info))
    }

    /// Solve one day with the fleet and attach street geometry to every
    /// route.
    pub fn solve_day_vrp(
        &self,
        scenario: &VrpScenario,
        use_cache: bool,
    ) -> Result<VrpSolution, Error> {
        let points: Vec<MatrixPoint> = scenario
            .stops
            .iter()
            .map(|s| MatrixPoint { id: s.id, at: s.at })
            .collect();
        let matrix = self.matrix.get(&points, use_cache)?;

        let params = VrpParams {
            time_limit: std::time::Duration::from_secs(self.cfg.vrp_time_limit_secs),
            unserved_penalty: self.cfg.unserved_penalty,
            balance_weight: self.cfg.balance_weight,
        };
        let mut solution = solve_open_vrp(scenario, &matrix.seconds, &matrix.meters, &params)?;

        // Per-route geometry fan-out; short routes short-circuit inside.
        let sequences: Vec<Vec<LonLat>> = solution
            .routes
            .iter()
            .map(|route| {
                route
                    .sequence
                    .iter()
                    .filter_map(|id| scenario.stops.iter().find(|s| s.id == *id))
                    .map(|s| s.at)
                    .collect()
            })
            .collect();
        let shapes = self.geometry.batch(&sequences);
        for (route, shape) in solution.routes.iter_mut().zip(shapes) {
            route.geometry = Some(shape);
        }

        Ok(solution)
    }

    /// Solve one day as a single open path, choosing the cost table by
    /// metric.
    pub fn solve_day_tsp(
        &self,
        stops: &[Stop],
        metric: CostMetric,
        use_cache: bool,
    ) -> Result<TspSolution, Error> {
        if stops.len() > self.cfg.tsp_max_points {
            return Err(Error::MatrixTooLarge {
                n: stops.len(),
                max: self.cfg.tsp_max_points,
            });
        }

        let points: Vec<MatrixPoint> = stops
            .iter()
            .map(|s| MatrixPoint { id: s.id, at: s.at })
            .collect();
        let matrix = self.matrix.get(&points, use_cache)?;
        let ids: Vec<i64> = stops.iter().map(|s| s.id).collect();

        let table = match metric {
            CostMetric::Duration => &matrix.seconds,
            CostMetric::Distance => &matrix.meters,
        };
        let params = TspParams {
            metric,
            time_limit: std::time::Duration::from_secs(self.cfg.tsp_time_limit_secs),
        };

        solve_open_path(&ids, table, matrix.meta.source, &params)
    }

    /// Persist a solved day under the week tree.
    pub fn persist_solution(
        &self,
        week_tag: &str,
        day: usize,
        solution: &VrpSolution,
        stops: &[Stop],
        with_schedule: bool,
        renderer: &dyn MapRenderer,
    ) -> Result<artifacts::SolutionArtifacts, Error> {
        artifacts::persist_solution(
            &self.cfg.runs_root,
            week_tag,
            day,
            solution,
            stops,
            with_schedule,
            renderer,
        )
    }
}

/// Scan the runs root for solvable (week, day) shortlists.
pub fn available_scenarios(root: &Path) -> Vec<ScenarioRef> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        return found;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(week_tag) = name.to_str().and_then(|n| n.strip_prefix("semana_")) else {
            continue;
        };
        if !entry.path().is_dir() {
            continue;
        }

        for day in 1..=7 {
            let shortlist_path = entry
                .path()
                .join("seleccion")
                .join(format!("day_{day}"))
                .join("shortlist.csv");
            if !shortlist_path.exists() {
                continue;
            }
            let stops_count = crate::ingest::read_shortlist_csv(&shortlist_path)
                .map(|(stops, _)| stops.len())
                .unwrap_or(0);
            found.push(ScenarioRef {
                week_tag: week_tag.to_string(),
                day,
                shortlist_path,
                stops_count,
            });
        }
    }

    found.sort_by(|a, b| (&a.week_tag, a.day).cmp(&(&b.week_tag, b.day)));
    found
}

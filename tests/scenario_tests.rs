//! End-to-end scenario tests with literal inputs and expected outputs.
//!
//! Every scenario runs with the routing backend unreachable, so the
//! documented fallbacks (haversine matrices, straight-line geometry) are
//! the code paths under test.

use fleet_planner::config::PlannerConfig;
use fleet_planner::geometry::GeometryService;
use fleet_planner::haversine::{haversine_m, travel_seconds};
use fleet_planner::matrix::{MatrixPoint, MatrixService, MatrixSource};
use fleet_planner::perimeter::Perimeter;
use fleet_planner::repair::{ClientEvent, ClientRecord, CoordSource, repair_clients};
use fleet_planner::system::PlannerSystem;
use fleet_planner::traits::{LonLat, Stop, VehicleSpec};
use fleet_planner::tsp::CostMetric;
use fleet_planner::vrp::{VrpParams, VrpRules, VrpScenario, solve_open_vrp};
use fleet_planner::week::{PartitionParams, build_weekly_shortlists};

fn offline_config(dir: &tempfile::TempDir) -> PlannerConfig {
    let mut cfg = PlannerConfig::default();
    cfg.backend_url = "http://127.0.0.1:1".to_string();
    cfg.health_timeout_secs = 1;
    cfg.request_timeout_secs = 1;
    cfg.runs_root = dir.path().join("routing_runs");
    cfg.cache_dir = Some(dir.path().join("cache"));
    cfg
}

/// Scenario 1: four corners of a block, duration metric, haversine tables.
#[test]
fn trivial_tsp_duration() {
    let dir = tempfile::tempdir().unwrap();
    let system = PlannerSystem::new(offline_config(&dir));

    let coords = [
        LonLat::new(-76.5320, 3.4516),
        LonLat::new(-76.5330, 3.4516),
        LonLat::new(-76.5330, 3.4526),
        LonLat::new(-76.5320, 3.4526),
    ];
    let stops: Vec<Stop> = coords
        .iter()
        .enumerate()
        .map(|(i, p)| Stop::new(i as i64 + 1, p.lon, p.lat))
        .collect();

    let started = std::time::Instant::now();
    let solution = system
        .solve_day_tsp(&stops, CostMetric::Duration, false)
        .unwrap();

    let mut visited = solution.order_ids.clone();
    visited.sort_unstable();
    assert_eq!(visited, vec![1, 2, 3, 4]);
    assert_ne!(solution.start_id, solution.end_id);
    assert_eq!(solution.matrix_source, MatrixSource::Haversine);

    // Optimal open path walks three sides of the square.
    let secs = |a: LonLat, b: LonLat| travel_seconds(haversine_m(a, b), 30.0);
    let short = secs(coords[0], coords[1]);
    let long = secs(coords[1], coords[2]);
    let best = 2.0 * short.min(long) + short.max(long);
    assert!(
        (solution.total_cost - best).abs() < 2.0,
        "expected about {best}s, got {}",
        solution.total_cost
    );
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
}

/// Scenario 2: identical ordered coordinates hit the cache the second time
/// with an element-wise identical payload.
#[test]
fn matrix_cache_hit() {
    let dir = tempfile::tempdir().unwrap();
    let service = MatrixService::new(&offline_config(&dir));

    let points: Vec<MatrixPoint> = (0..4)
        .map(|i| MatrixPoint {
            id: i + 1,
            at: LonLat::new(-76.5320 - 0.001 * i as f64, 3.4516 + 0.001 * i as f64),
        })
        .collect();

    let first = service.get(&points, true).unwrap();
    assert!(!first.meta.from_cache);
    assert_eq!(first.meta.source, MatrixSource::Haversine);

    let second = service.get(&points, true).unwrap();
    assert!(second.meta.from_cache);
    assert_eq!(second.seconds, first.seconds);
    assert_eq!(second.meters, first.meters);
}

/// Scenario 3: a (0,0) client adopts its newest in-perimeter event.
#[test]
fn coord_repair_inside_out() {
    let perimeter_geojson = r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{},
        "geometry":{"type":"Polygon","coordinates":[[
            [-76.58,3.42],[-76.50,3.42],[-76.50,3.49],[-76.58,3.49],[-76.58,3.42]
        ]]}}]}"#;
    let perimeter = Perimeter::from_geojson_str(perimeter_geojson).unwrap();

    let clients = vec![ClientRecord {
        id: 1,
        name: None,
        zone: None,
        priority: None,
        lon: Some(0.0),
        lat: Some(0.0),
    }];
    let events = vec![ClientEvent {
        client_id: 1,
        timestamp: 1_700_000_000,
        lon: -76.5321,
        lat: 3.4517,
    }];

    let (repaired, _) = repair_clients(&clients, &events, &perimeter).unwrap();

    assert_eq!(repaired[0].source, CoordSource::Event1);
    assert!(repaired[0].in_perimeter_final);
    assert_eq!(repaired[0].lon_final, Some(-76.5321));
    assert_eq!(repaired[0].lat_final, Some(3.4517));
}

/// Scenario 4: 100 unique clients, 5 days of 10: disjoint days, 50 left.
#[test]
fn partitioner_disjointness() {
    let pool: Vec<Stop> = (0..100)
        .map(|i| {
            Stop::new(
                i as i64 + 1,
                -76.5320 + 0.0015 * (i % 10) as f64,
                3.4516 + 0.0015 * (i / 10) as f64,
            )
        })
        .collect();

    let mut vehicle = VehicleSpec::new("V1", 40);
    vehicle.start = Some(LonLat::new(-76.5340, 3.4500));

    let plan = build_weekly_shortlists(
        &pool,
        &vehicle,
        &PartitionParams {
            n_days: 5,
            target_per_day: 10,
            seed: 42,
        },
    );

    let mut all = std::collections::HashSet::new();
    for day in &plan.days {
        assert_eq!(day.count(), 10);
        for stop in &day.stops {
            assert!(all.insert(stop.id));
        }
    }
    assert_eq!(all.len(), 50);
    assert_eq!(plan.leftover_count, 50);
}

/// Scenario 5: 5 stops against one vehicle capped at 3.
#[test]
fn vrp_capacity_shortfall() {
    let stops: Vec<Stop> = (0..5)
        .map(|i| Stop::new(i as i64 + 1, -76.5320 + 0.002 * i as f64, 3.4516))
        .collect();
    let coords: Vec<LonLat> = stops.iter().map(|s| s.at).collect();

    let n = coords.len();
    let mut seconds = vec![vec![0.0; n]; n];
    let mut meters = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            if i != j {
                meters[i][j] = haversine_m(coords[i], coords[j]);
                seconds[i][j] = travel_seconds(meters[i][j], 30.0);
            }
        }
    }

    let scenario = VrpScenario {
        stops,
        vehicles: vec![VehicleSpec::new("V1", 3)],
        rules: VrpRules {
            max_stops_per_vehicle: 3,
            balance_load: false,
            time_weight: 1.0,
            distance_weight: 0.0,
        },
        start_id: None,
    };

    let solution = solve_open_vrp(&scenario, &seconds, &meters, &VrpParams::default()).unwrap();

    let served: usize = solution.routes.iter().map(|r| r.served).sum();
    assert_eq!(served, 3);
    assert_eq!(solution.unserved.len(), 2);
    assert_eq!(solution.kpis.served_pct, 60.0);
    assert_eq!(solution.kpis.balance_std_stops, 0.0);

    // Served and unserved together cover the input exactly once.
    let mut all: Vec<i64> = solution
        .routes
        .iter()
        .flat_map(|r| r.sequence.clone())
        .chain(solution.unserved.iter().copied())
        .collect();
    all.sort_unstable();
    assert_eq!(all, vec![1, 2, 3, 4, 5]);
}

/// Scenario 6: route endpoint down, per-route straight-line fallback.
#[test]
fn geometry_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let service = GeometryService::new(&offline_config(&dir));

    let coords = vec![
        LonLat::new(-76.5320, 3.4516),
        LonLat::new(-76.5355, 3.4511),
        LonLat::new(-76.5402, 3.4480),
    ];
    let shape = service.route_shape(&coords);

    assert!(!shape.geometry_valid());

    let expected_m: f64 = coords.windows(2).map(|w| haversine_m(w[0], w[1])).sum();
    assert!((shape.distance_m() - expected_m).abs() < 1.0);

    let expected_s = expected_m / 1000.0 / 50.0 * 3600.0;
    assert!((shape.duration_s() - expected_s).abs() < 1.0);

    let legs_sum: f64 = shape.legs().iter().map(|l| l.distance_m).sum();
    assert!((legs_sum - shape.distance_m()).abs() < 1.0);
}

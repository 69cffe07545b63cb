//! Open multi-vehicle solver with stop caps and optional load balancing.
//!
//! Free start and free end are encoded by extending the stop graph with one
//! virtual source and one virtual sink per vehicle. Arcs out of a source and
//! into a sink cost nothing, the direct source-to-sink arc carries a large
//! finite sentinel so an empty route is expensive but representable, and
//! every other virtual arc is forbidden outright. Unserved stops cost a
//! fixed penalty, so the solver drops stops only when caps leave no room.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::Error;
use crate::geometry::RouteShape;
use crate::traits::{Stop, VehicleSpec};

/// Cost of the direct source-to-sink arc: discourages empty routes while
/// staying finite so a solution with idle vehicles remains representable.
const EMPTY_ROUTE_SENTINEL: i64 = 999_999;
/// Forbidden arcs between virtual nodes. Never on an improving move.
const FORBIDDEN: i64 = 999_999_999;

#[derive(Debug, Clone, Serialize)]
pub struct VrpRules {
    pub max_stops_per_vehicle: usize,
    pub balance_load: bool,
    /// Weight on travel seconds in the arc cost.
    pub time_weight: f64,
    /// Weight on travel meters (scaled by 1/100) in the arc cost.
    pub distance_weight: f64,
}

impl Default for VrpRules {
    fn default() -> Self {
        Self {
            max_stops_per_vehicle: 40,
            balance_load: true,
            time_weight: 0.7,
            distance_weight: 0.3,
        }
    }
}

/// A solvable day: stops, fleet, and the rules binding them.
#[derive(Debug, Clone, Serialize)]
pub struct VrpScenario {
    pub stops: Vec<Stop>,
    pub vehicles: Vec<VehicleSpec>,
    pub rules: VrpRules,
    /// When set, the route containing this stop is rotated so it leads.
    pub start_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct VrpParams {
    pub time_limit: Duration,
    pub unserved_penalty: i64,
    /// Scale applied to the stop-count variance when balancing is on.
    pub balance_weight: f64,
}

impl Default for VrpParams {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(60),
            unserved_penalty: 100_000,
            balance_weight: 1_000.0,
        }
    }
}

/// One leg of a solved route, between consecutive stops.
#[derive(Debug, Clone, Serialize)]
pub struct RouteLeg {
    pub from: i64,
    pub to: i64,
    pub seconds: f64,
    pub meters: f64,
}

/// One vehicle's solved route.
#[derive(Debug, Clone, Serialize)]
pub struct Route {
    pub vehicle_id: String,
    pub sequence: Vec<i64>,
    pub served: usize,
    /// Travel kilometers, 2 decimals.
    pub km: f64,
    /// Travel plus service minutes, 1 decimal.
    pub min: f64,
    pub legs: Vec<RouteLeg>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<RouteShape>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Kpis {
    pub served_pct: f64,
    pub km_total: f64,
    pub min_total: f64,
    /// Standard deviation of served counts across non-empty routes.
    pub balance_std_stops: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VrpSolution {
    pub routes: Vec<Route>,
    pub unserved: Vec<i64>,
    pub kpis: Kpis,
    pub status: String,
}

impl VrpSolution {
    fn empty(status: &str, unserved: Vec<i64>) -> Self {
        Self {
            routes: Vec::new(),
            kpis: Kpis {
                served_pct: 0.0,
                km_total: 0.0,
                min_total: 0.0,
                balance_std_stops: 0.0,
            },
            unserved,
            status: status.to_string(),
        }
    }
}

/// Solve the open VRP over precomputed travel tables.
///
/// Tables are indexed like `scenario.stops`. The solver never fails on
/// infeasibility: when caps cannot cover the stops, the surplus lands in
/// `unserved` and the KPIs say so.
pub fn solve_open_vrp(
    scenario: &VrpScenario,
    seconds: &[Vec<f64>],
    meters: &[Vec<f64>],
    params: &VrpParams,
) -> Result<VrpSolution, Error> {
    let started = Instant::now();
    let n = scenario.stops.len();
    let k = scenario.vehicles.len();

    if seconds.len() != n || meters.len() != n {
        return Err(Error::InvalidInput(format!(
            "matrix dimensions {}x{} do not match {} stops",
            seconds.len(),
            meters.len(),
            n
        )));
    }

    if n == 0 {
        return Ok(VrpSolution::empty("empty_input", Vec::new()));
    }
    if k == 0 {
        let unserved = scenario.stops.iter().map(|s| s.id).collect();
        return Ok(VrpSolution::empty("no_vehicles", unserved));
    }

    tracing::info!(stops = n, vehicles = k, "solving open VRP");

    let graph = ExtendedGraph::build(scenario, seconds, meters);
    let caps: Vec<usize> = scenario
        .vehicles
        .iter()
        .map(|v| v.max_stops.min(scenario.rules.max_stops_per_vehicle))
        .collect();

    let mut state = SearchState {
        routes: vec![Vec::new(); k],
        unserved: Vec::new(),
        graph: &graph,
        caps: &caps,
        balance: scenario.rules.balance_load,
        balance_weight: params.balance_weight,
        unserved_penalty: params.unserved_penalty,
    };

    state.construct(n);
    state.improve(started + params.time_limit);

    Ok(extract(scenario, seconds, meters, &state, started))
}

// -----------------------------------------------------------------------------
// Extended graph
// -----------------------------------------------------------------------------

/// Integer arc costs over real nodes `0..n`, sources `n..n+k`, sinks
/// `n+k..n+2k`.
struct ExtendedGraph {
    n: usize,
    k: usize,
    cost: Vec<Vec<i64>>,
}

impl ExtendedGraph {
    fn build(scenario: &VrpScenario, seconds: &[Vec<f64>], meters: &[Vec<f64>]) -> Self {
        let n = scenario.stops.len();
        let k = scenario.vehicles.len();
        let total = n + 2 * k;
        let tw = scenario.rules.time_weight;
        let dw = scenario.rules.distance_weight;

        let mut cost = vec![vec![0i64; total]; total];

        for i in 0..n {
            for j in 0..n {
                cost[i][j] = (tw * seconds[i][j] + dw * meters[i][j] / 100.0).round() as i64;
            }
        }

        for v in 0..k {
            let source = n + v;
            let sink = n + k + v;

            // Free start and free end.
            for stop in 0..n {
                cost[source][stop] = 0;
                cost[stop][sink] = 0;
            }

            // An empty route is allowed but expensive.
            cost[source][sink] = EMPTY_ROUTE_SENTINEL;

            for other in n..total {
                if other != sink {
                    cost[source][other] = FORBIDDEN;
                }
            }
            // A sink is terminal; a source is never entered from a stop.
            for j in 0..total {
                cost[sink][j] = FORBIDDEN;
            }
            for stop in 0..n {
                cost[stop][source] = FORBIDDEN;
            }
        }

        Self { n, k, cost }
    }

    fn source(&self, vehicle: usize) -> usize {
        self.n + vehicle
    }

    fn sink(&self, vehicle: usize) -> usize {
        self.n + self.k + vehicle
    }

    /// Arc cost along one vehicle's route (source, stops, sink).
    fn route_cost(&self, vehicle: usize, route: &[usize]) -> i64 {
        let source = self.source(vehicle);
        let sink = self.sink(vehicle);
        match route {
            [] => self.cost[source][sink],
            _ => {
                let mut total = self.cost[source][route[0]];
                for w in route.windows(2) {
                    total += self.cost[w[0]][w[1]];
                }
                total + self.cost[route[route.len() - 1]][sink]
            }
        }
    }

    /// Cost change from inserting `stop` at `pos` in the vehicle's route.
    fn insertion_delta(&self, vehicle: usize, route: &[usize], pos: usize, stop: usize) -> i64 {
        let before = if pos == 0 {
            self.source(vehicle)
        } else {
            route[pos - 1]
        };
        let after = if pos == route.len() {
            self.sink(vehicle)
        } else {
            route[pos]
        };
        let direct = if route.is_empty() {
            // Inserting into an empty route replaces the sentinel arc.
            self.cost[self.source(vehicle)][self.sink(vehicle)]
        } else {
            self.cost[before][after]
        };
        self.cost[before][stop] + self.cost[stop][after] - direct
    }
}

// -----------------------------------------------------------------------------
// Search
// -----------------------------------------------------------------------------

struct SearchState<'a> {
    routes: Vec<Vec<usize>>,
    unserved: Vec<usize>,
    graph: &'a ExtendedGraph,
    caps: &'a [usize],
    balance: bool,
    balance_weight: f64,
    unserved_penalty: i64,
}

impl SearchState<'_> {
    fn balance_term(&self, counts: &[usize]) -> i64 {
        if !self.balance || counts.len() < 2 {
            return 0;
        }
        let mean = counts.iter().sum::<usize>() as f64 / counts.len() as f64;
        let variance = counts
            .iter()
            .map(|&c| (c as f64 - mean).powi(2))
            .sum::<f64>()
            / counts.len() as f64;
        (self.balance_weight * variance).round() as i64
    }

    fn objective(&self) -> i64 {
        let arcs: i64 = self
            .routes
            .iter()
            .enumerate()
            .map(|(v, route)| self.graph.route_cost(v, route))
            .sum();
        let counts: Vec<usize> = self.routes.iter().map(Vec::len).collect();
        arcs + self.unserved_penalty * self.unserved.len() as i64 + self.balance_term(&counts)
    }

    /// Greedy construction: cheapest feasible insertion per stop, stops
    /// taken in index order. Whatever finds no room starts unserved.
    fn construct(&mut self, n: usize) {
        for stop in 0..n {
            match self.best_insertion(stop) {
                Some((vehicle, pos, _)) => self.routes[vehicle].insert(pos, stop),
                None => self.unserved.push(stop),
            }
        }
    }

    /// Cheapest feasible insertion across all vehicles, ties to the lower
    /// vehicle index then the earlier position.
    fn best_insertion(&self, stop: usize) -> Option<(usize, usize, i64)> {
        let mut best: Option<(usize, usize, i64)> = None;
        for (vehicle, route) in self.routes.iter().enumerate() {
            if route.len() >= self.caps[vehicle] {
                continue;
            }
            for pos in 0..=route.len() {
                let delta = self.graph.insertion_delta(vehicle, route, pos, stop);
                if best.map(|(_, _, bd)| delta < bd).unwrap_or(true) {
                    best = Some((vehicle, pos, delta));
                }
            }
        }
        best
    }

    /// Improvement passes until nothing improves or the deadline passes.
    /// The deadline is checked between operators, never inside one, so the
    /// search is deterministic whenever a full pass fits the budget.
    fn improve(&mut self, deadline: Instant) {
        loop {
            let mut improved = false;

            improved |= self.try_serve_unserved();
            if Instant::now() >= deadline {
                break;
            }
            improved |= self.relocate_pass(deadline);
            if Instant::now() >= deadline {
                break;
            }
            improved |= self.two_opt_pass(deadline);

            if !improved || Instant::now() >= deadline {
                break;
            }
        }
    }

    /// Pull stops out of the unserved pool whenever capacity allows and
    /// the objective improves (it nearly always does: one insertion versus
    /// the fixed penalty).
    fn try_serve_unserved(&mut self) -> bool {
        let mut improved = false;
        let mut idx = 0;
        while idx < self.unserved.len() {
            let stop = self.unserved[idx];
            match self.best_insertion(stop) {
                Some((vehicle, pos, delta)) => {
                    let balance_before = self.balance_snapshot();
                    let gain = self.unserved_penalty - delta
                        - self.balance_delta_after_insert(vehicle, &balance_before);
                    if gain > 0 {
                        self.routes[vehicle].insert(pos, stop);
                        self.unserved.remove(idx);
                        improved = true;
                        continue;
                    }
                    idx += 1;
                }
                None => idx += 1,
            }
        }
        improved
    }

    fn balance_snapshot(&self) -> Vec<usize> {
        self.routes.iter().map(Vec::len).collect()
    }

    fn balance_delta_after_insert(&self, vehicle: usize, before: &[usize]) -> i64 {
        let mut after = before.to_vec();
        after[vehicle] += 1;
        self.balance_term(&after) - self.balance_term(before)
    }

    /// Move one stop to a better position, possibly on another vehicle.
    /// First-improvement; restarts after every applied move.
    fn relocate_pass(&mut self, deadline: Instant) -> bool {
        let mut improved_any = false;
        'restart: loop {
            if Instant::now() >= deadline {
                break;
            }
            let current = self.objective();
            for from in 0..self.routes.len() {
                for take in 0..self.routes[from].len() {
                    let stop = self.routes[from][take];
                    for to in 0..self.routes.len() {
                        let cap = self.caps[to];
                        let same = from == to;
                        if !same && self.routes[to].len() >= cap {
                            continue;
                        }
                        let positions = self.routes[to].len() + usize::from(!same);
                        for pos in 0..positions {
                            if same && (pos == take || pos == take + 1) {
                                continue;
                            }
                            let mut candidate = self.routes.clone();
                            candidate[from].remove(take);
                            let insert_at = if same && pos > take { pos - 1 } else { pos };
                            candidate[to].insert(insert_at, stop);

                            let old = std::mem::replace(&mut self.routes, candidate);
                            if self.objective() < current {
                                improved_any = true;
                                continue 'restart;
                            }
                            self.routes = old;
                        }
                    }
                }
            }
            break;
        }
        improved_any
    }

    /// Reverse a segment within one route when that shortens it. The
    /// virtual endpoints cost zero, so boundary reversals are evaluated
    /// like interior ones.
    fn two_opt_pass(&mut self, deadline: Instant) -> bool {
        let mut improved = false;
        for vehicle in 0..self.routes.len() {
            let mut route = std::mem::take(&mut self.routes[vehicle]);
            let len = route.len();
            if len >= 3 {
                let mut route_improved = true;
                while route_improved && Instant::now() < deadline {
                    route_improved = false;
                    let current = self.graph.route_cost(vehicle, &route);
                    'scan: for i in 0..len - 1 {
                        for j in i + 1..len {
                            route[i..=j].reverse();
                            if self.graph.route_cost(vehicle, &route) < current {
                                improved = true;
                                route_improved = true;
                                break 'scan;
                            }
                            route[i..=j].reverse();
                        }
                    }
                }
            }
            self.routes[vehicle] = route;
        }
        improved
    }
}

// -----------------------------------------------------------------------------
// Extraction
// -----------------------------------------------------------------------------

fn extract(
    scenario: &VrpScenario,
    seconds: &[Vec<f64>],
    meters: &[Vec<f64>],
    state: &SearchState<'_>,
    started: Instant,
) -> VrpSolution {
    let stops = &scenario.stops;
    let mut routes = Vec::new();

    for (vehicle_idx, indices) in state.routes.iter().enumerate() {
        if indices.is_empty() {
            continue;
        }

        let mut sequence: Vec<i64> = indices.iter().map(|&i| stops[i].id).collect();
        let mut ordered = indices.clone();

        if let Some(start_id) = scenario.start_id {
            if let Some(at) = sequence.iter().position(|&id| id == start_id) {
                sequence.rotate_left(at);
                ordered.rotate_left(at);
            }
        }

        let mut travel_seconds = 0.0;
        let mut travel_meters = 0.0;
        let mut legs = Vec::new();
        for w in ordered.windows(2) {
            let (i, j) = (w[0], w[1]);
            travel_seconds += seconds[i][j];
            travel_meters += meters[i][j];
            legs.push(RouteLeg {
                from: stops[i].id,
                to: stops[j].id,
                seconds: seconds[i][j],
                meters: meters[i][j],
            });
        }

        let service_seconds: f64 = ordered
            .iter()
            .map(|&i| stops[i].service_min as f64 * 60.0)
            .sum();

        routes.push(Route {
            vehicle_id: scenario.vehicles[vehicle_idx].id.clone(),
            served: sequence.len(),
            km: round2(travel_meters / 1000.0),
            min: round1((travel_seconds + service_seconds) / 60.0),
            sequence,
            legs,
            geometry: None,
        });
    }

    let served: usize = routes.iter().map(|r| r.served).sum();
    let unserved: Vec<i64> = state.unserved.iter().map(|&i| stops[i].id).collect();

    let counts: Vec<f64> = routes.iter().map(|r| r.served as f64).collect();
    let balance_std_stops = if counts.len() > 1 {
        let mean = counts.iter().sum::<f64>() / counts.len() as f64;
        let variance = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / counts.len() as f64;
        round2(variance.sqrt())
    } else {
        0.0
    };

    let kpis = Kpis {
        served_pct: round1(100.0 * served as f64 / stops.len() as f64),
        km_total: round2(routes.iter().map(|r| r.km).sum()),
        min_total: round1(routes.iter().map(|r| r.min).sum()),
        balance_std_stops,
    };

    tracing::info!(
        routes = routes.len(),
        served,
        unserved = unserved.len(),
        served_pct = kpis.served_pct,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "open VRP solved"
    );

    VrpSolution {
        routes,
        unserved,
        kpis,
        status: "ok".to_string(),
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

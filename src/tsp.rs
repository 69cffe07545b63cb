//! Open single-vehicle solver: optimal-ish Hamiltonian path with free
//! endpoints, via the dummy-node reduction.
//!
//! The cost matrix is extended with one extra node whose arcs all cost
//! zero; a tour of the extended instance that starts and ends at that node
//! visits every real node, and deleting the two zero-cost dummy arcs leaves
//! an open path whose start and end fell out of the optimization instead of
//! being fixed up front.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::Error;
use crate::matrix::MatrixSource;

/// Which table the arc costs came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CostMetric {
    Duration,
    Distance,
}

#[derive(Debug, Clone)]
pub struct TspParams {
    pub metric: CostMetric,
    pub time_limit: Duration,
}

impl Default for TspParams {
    fn default() -> Self {
        Self {
            metric: CostMetric::Duration,
            time_limit: Duration::from_secs(10),
        }
    }
}

/// An ordered open path over the input ids.
#[derive(Debug, Clone, Serialize)]
pub struct TspSolution {
    pub order_ids: Vec<i64>,
    /// Same path as indices into the input order.
    pub order_idx: Vec<usize>,
    pub start_id: i64,
    pub end_id: i64,
    /// Path cost summed over the original float matrix.
    pub total_cost: f64,
    pub metric: CostMetric,
    pub matrix_source: MatrixSource,
    pub computation_time: Duration,
}

/// Solve the open path over a precomputed cost matrix.
///
/// The matrix rows/columns are indexed like `ids`. Costs are rounded to
/// integers for the search and the final path is re-costed on the float
/// matrix. N=1 returns trivially; N=0 is invalid input.
pub fn solve_open_path(
    ids: &[i64],
    cost_matrix: &[Vec<f64>],
    matrix_source: MatrixSource,
    params: &TspParams,
) -> Result<TspSolution, Error> {
    let started = Instant::now();
    let n = ids.len();

    if n == 0 {
        return Err(Error::InvalidInput("empty input: no points to route".to_string()));
    }
    if cost_matrix.len() != n || cost_matrix.iter().any(|row| row.len() != n) {
        return Err(Error::InvalidInput(format!(
            "cost matrix shape does not match {n} points"
        )));
    }

    if n == 1 {
        return Ok(TspSolution {
            order_ids: vec![ids[0]],
            order_idx: vec![0],
            start_id: ids[0],
            end_id: ids[0],
            total_cost: 0.0,
            metric: params.metric,
            matrix_source,
            computation_time: started.elapsed(),
        });
    }

    // Integerize for the search; index n is the dummy with all-zero arcs.
    let cost = |i: usize, j: usize| -> i64 {
        if i == n || j == n {
            0
        } else {
            cost_matrix[i][j].round() as i64
        }
    };

    let deadline = started + params.time_limit;
    let mut path = cheapest_arc_path(n, &cost);
    two_opt(&mut path, &cost, deadline);

    if path.len() != n {
        return Err(Error::NoSolution { n });
    }

    let total_cost: f64 = path
        .windows(2)
        .map(|w| cost_matrix[w[0]][w[1]])
        .sum();

    let order_ids: Vec<i64> = path.iter().map(|&i| ids[i]).collect();
    let solution = TspSolution {
        start_id: order_ids[0],
        end_id: order_ids[order_ids.len() - 1],
        order_ids,
        order_idx: path,
        total_cost,
        metric: params.metric,
        matrix_source,
        computation_time: started.elapsed(),
    };

    tracing::info!(
        stops = n,
        cost = solution.total_cost,
        elapsed_ms = solution.computation_time.as_millis() as u64,
        "open path solved"
    );

    Ok(solution)
}

/// First solution: walk from the dummy, always taking the cheapest arc to
/// an unvisited real node. Ties break on the lower index, which keeps the
/// construction deterministic.
fn cheapest_arc_path(n: usize, cost: &impl Fn(usize, usize) -> i64) -> Vec<usize> {
    let mut visited = vec![false; n];
    let mut path = Vec::with_capacity(n);
    let mut current = n; // dummy

    for _ in 0..n {
        let mut best: Option<(usize, i64)> = None;
        for next in 0..n {
            if visited[next] {
                continue;
            }
            let c = cost(current, next);
            if best.map(|(_, bc)| c < bc).unwrap_or(true) {
                best = Some((next, c));
            }
        }
        let Some((next, _)) = best else { break };
        visited[next] = true;
        path.push(next);
        current = next;
    }

    path
}

/// 2-opt over the open path. The virtual dummy arcs at both ends cost zero,
/// so reversing a prefix or suffix is evaluated like any interior segment.
/// First-improvement passes repeat until a pass finds nothing; the deadline
/// is only consulted between passes, which keeps equal inputs on equal
/// outputs across machines that finish at least one pass.
fn two_opt(path: &mut [usize], cost: &impl Fn(usize, usize) -> i64, deadline: Instant) {
    let n = path.len();
    if n < 3 {
        return;
    }
    let dummy = usize::MAX; // sentinel meaning "no neighbor"

    let arc = |a: usize, b: usize| -> i64 {
        if a == dummy || b == dummy {
            0
        } else {
            cost(a, b)
        }
    };

    loop {
        let mut improved = false;
        for i in 0..n - 1 {
            for j in i + 1..n {
                let before = if i == 0 { dummy } else { path[i - 1] };
                let after = if j == n - 1 { dummy } else { path[j + 1] };

                let removed = arc(before, path[i]) + arc(path[j], after);
                let added = arc(before, path[j]) + arc(path[i], after);
                if added < removed {
                    path[i..=j].reverse();
                    improved = true;
                }
            }
        }
        if !improved || Instant::now() >= deadline {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::haversine::haversine_m;
    use crate::traits::LonLat;

    fn duration_matrix(coords: &[LonLat], speed_kmh: f64) -> Vec<Vec<f64>> {
        let n = coords.len();
        let mut m = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    m[i][j] =
                        crate::haversine::travel_seconds(haversine_m(coords[i], coords[j]), speed_kmh);
                }
            }
        }
        m
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = solve_open_path(&[], &[], MatrixSource::Trivial, &TspParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_single_point_trivial() {
        let solution = solve_open_path(
            &[42],
            &[vec![0.0]],
            MatrixSource::Trivial,
            &TspParams::default(),
        )
        .unwrap();
        assert_eq!(solution.order_ids, vec![42]);
        assert_eq!(solution.start_id, 42);
        assert_eq!(solution.end_id, 42);
        assert_eq!(solution.total_cost, 0.0);
    }

    #[test]
    fn test_unit_square_path_is_three_sides() {
        // Four corners of a small square; the optimal open path walks three
        // sides and never takes a diagonal.
        let coords = vec![
            LonLat::new(-76.5320, 3.4516),
            LonLat::new(-76.5330, 3.4516),
            LonLat::new(-76.5330, 3.4526),
            LonLat::new(-76.5320, 3.4526),
        ];
        let matrix = duration_matrix(&coords, 30.0);
        let ids = vec![1, 2, 3, 4];
        let solution =
            solve_open_path(&ids, &matrix, MatrixSource::Haversine, &TspParams::default())
                .unwrap();

        let mut sorted = solution.order_ids.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, ids, "path must visit every id once");
        assert_ne!(solution.start_id, solution.end_id);

        let side = matrix[0][1].min(matrix[1][2]);
        let long_side = matrix[0][1].max(matrix[1][2]);
        let best = 2.0 * side + long_side;
        assert!(
            (solution.total_cost - best).abs() < 1.0,
            "expected ~{best}, got {}",
            solution.total_cost
        );
        assert!(solution.computation_time < Duration::from_secs(10));
    }

    #[test]
    fn test_line_of_points_solved_end_to_end() {
        // Points on a line: optimal open path sweeps the line in order.
        let coords: Vec<LonLat> =
            (0..7).map(|i| LonLat::new(-76.5320 + 0.002 * i as f64, 3.4516)).collect();
        let matrix = duration_matrix(&coords, 30.0);
        let ids: Vec<i64> = (1..=7).collect();
        let solution =
            solve_open_path(&ids, &matrix, MatrixSource::Haversine, &TspParams::default())
                .unwrap();

        let forward: Vec<i64> = (1..=7).collect();
        let backward: Vec<i64> = (1..=7).rev().collect();
        assert!(
            solution.order_ids == forward || solution.order_ids == backward,
            "a line should be swept in order, got {:?}",
            solution.order_ids
        );
    }

    #[test]
    fn test_deterministic_given_same_inputs() {
        let coords: Vec<LonLat> = (0..12)
            .map(|i| {
                LonLat::new(
                    -76.5320 + 0.003 * ((i * 7) % 12) as f64,
                    3.4516 + 0.002 * ((i * 5) % 12) as f64,
                )
            })
            .collect();
        let matrix = duration_matrix(&coords, 30.0);
        let ids: Vec<i64> = (1..=12).collect();
        let params = TspParams::default();

        let a = solve_open_path(&ids, &matrix, MatrixSource::Haversine, &params).unwrap();
        let b = solve_open_path(&ids, &matrix, MatrixSource::Haversine, &params).unwrap();
        assert_eq!(a.order_ids, b.order_ids);
        assert_eq!(a.total_cost, b.total_cost);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = solve_open_path(
            &[1, 2],
            &[vec![0.0, 1.0]],
            MatrixSource::Trivial,
            &TspParams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}

//! Weekly partitioner: assign clients to working days by proximity.
//!
//! Greedy nearest-neighbor walk per day, starting from the fleet start
//! point. Output is deterministic for a given input: distance ties break on
//! the lower client id.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

use crate::haversine::haversine_m;
use crate::traits::{LonLat, Stop, VehicleSpec};

/// Partitioner inputs beyond the client pool itself.
#[derive(Debug, Clone)]
pub struct PartitionParams {
    pub n_days: usize,
    pub target_per_day: usize,
    /// Kept for reproducibility plumbing; the greedy walk itself is fully
    /// deterministic (ties break on ascending id), so the seed currently
    /// governs nothing.
    pub seed: u64,
}

/// One day's shortlist, in visit-candidate order.
#[derive(Debug, Clone, Serialize)]
pub struct DayShortlist {
    pub day_index: usize,
    pub stops: Vec<Stop>,
    /// Mean of the selected coordinates, lon/lat; the fleet start when the
    /// day is empty.
    pub centroid: LonLat,
}

impl DayShortlist {
    pub fn count(&self) -> usize {
        self.stops.len()
    }
}

/// A planned week: ordered days plus whatever did not fit.
#[derive(Debug, Clone, Serialize)]
pub struct WeekPlan {
    pub days: Vec<DayShortlist>,
    pub leftover_count: usize,
    pub vehicle: VehicleSpec,
}

impl WeekPlan {
    pub fn total_selected(&self) -> usize {
        self.days.iter().map(DayShortlist::count).sum()
    }
}

/// Build per-day shortlists with a greedy nearest-neighbor walk.
///
/// Each day starts a fresh cursor at the fleet start, repeatedly picks the
/// closest remaining client, and moves the cursor there, until the day
/// target is met or the pool runs dry. Days are pairwise disjoint;
/// duplicated ids in the input keep their first occurrence.
pub fn build_weekly_shortlists(
    pool: &[Stop],
    vehicle: &VehicleSpec,
    params: &PartitionParams,
) -> WeekPlan {
    let start = vehicle.start.unwrap_or_else(|| {
        pool.first()
            .map(|s| s.at)
            .unwrap_or(LonLat::new(0.0, 0.0))
    });

    // Dedup by id, first occurrence wins.
    let mut seen = std::collections::HashSet::new();
    let mut remaining: Vec<&Stop> = pool
        .iter()
        .filter(|s| seen.insert(s.id))
        .collect();
    let pool_size = remaining.len();

    let mut days = Vec::with_capacity(params.n_days);
    for day_index in 1..=params.n_days {
        let mut cursor = start;
        let mut selected: Vec<Stop> = Vec::new();

        while selected.len() < params.target_per_day && !remaining.is_empty() {
            let mut best: Option<(usize, f64)> = None;
            for (idx, stop) in remaining.iter().enumerate() {
                let d = haversine_m(cursor, stop.at);
                let better = match best {
                    None => true,
                    Some((best_idx, best_d)) => {
                        d < best_d || (d == best_d && stop.id < remaining[best_idx].id)
                    }
                };
                if better {
                    best = Some((idx, d));
                }
            }
            let Some((idx, _)) = best else { break };
            let stop = remaining.swap_remove(idx);
            cursor = stop.at;
            selected.push(stop.clone());
        }

        let centroid = if selected.is_empty() {
            start
        } else {
            let n = selected.len() as f64;
            LonLat::new(
                selected.iter().map(|s| s.at.lon).sum::<f64>() / n,
                selected.iter().map(|s| s.at.lat).sum::<f64>() / n,
            )
        };

        days.push(DayShortlist {
            day_index,
            stops: selected,
            centroid,
        });
    }

    let selected_total: usize = days.iter().map(DayShortlist::count).sum();
    let plan = WeekPlan {
        days,
        leftover_count: pool_size - selected_total,
        vehicle: vehicle.clone(),
    };

    tracing::info!(
        days = plan.days.len(),
        selected = selected_total,
        leftover = plan.leftover_count,
        seed = params.seed,
        "weekly shortlists built"
    );

    plan
}

/// Normalize a caller-supplied week tag.
///
/// A valid tag is 8 decimal digits (YYYYMMDD). Anything else is replaced
/// with the ISO Monday of `today`, which makes the normalization visible to
/// the caller by comparing input and output.
pub fn normalize_week_tag(raw: &str, today: NaiveDate) -> String {
    if raw.len() == 8
        && raw.bytes().all(|b| b.is_ascii_digit())
        && NaiveDate::parse_from_str(raw, "%Y%m%d").is_ok()
    {
        return raw.to_string();
    }

    let iso = today.iso_week();
    let monday = NaiveDate::from_isoywd_opt(iso.year(), iso.week(), Weekday::Mon)
        .unwrap_or(today);
    monday.format("%Y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_stops(n: usize) -> Vec<Stop> {
        // A line of points marching north-east, ids ascending with distance.
        (0..n)
            .map(|i| Stop::new(i as i64 + 1, -76.5320 + 0.001 * i as f64, 3.4516))
            .collect()
    }

    fn vehicle_at(lon: f64, lat: f64) -> VehicleSpec {
        let mut v = VehicleSpec::new("V1", 40);
        v.start = Some(LonLat::new(lon, lat));
        v
    }

    fn params(n_days: usize, target: usize) -> PartitionParams {
        PartitionParams {
            n_days,
            target_per_day: target,
            seed: 42,
        }
    }

    #[test]
    fn test_days_are_disjoint_and_sized() {
        let pool = grid_stops(100);
        let plan = build_weekly_shortlists(&pool, &vehicle_at(-76.54, 3.4516), &params(5, 10));

        let mut all_ids = std::collections::HashSet::new();
        for day in &plan.days {
            assert_eq!(day.count(), 10);
            for stop in &day.stops {
                assert!(all_ids.insert(stop.id), "id {} selected twice", stop.id);
            }
        }
        assert_eq!(all_ids.len(), 50);
        assert_eq!(plan.leftover_count, 50);
    }

    #[test]
    fn test_walk_is_nearest_first() {
        let pool = grid_stops(5);
        // Start west of the line: ids should come out in ascending order.
        let plan = build_weekly_shortlists(&pool, &vehicle_at(-76.54, 3.4516), &params(1, 5));
        let ids: Vec<i64> = plan.days[0].stops.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let pool = grid_stops(30);
        let vehicle = vehicle_at(-76.54, 3.4516);
        let p = params(3, 7);
        let a = build_weekly_shortlists(&pool, &vehicle, &p);
        let b = build_weekly_shortlists(&pool, &vehicle, &p);

        for (da, db) in a.days.iter().zip(&b.days) {
            let ids_a: Vec<i64> = da.stops.iter().map(|s| s.id).collect();
            let ids_b: Vec<i64> = db.stops.iter().map(|s| s.id).collect();
            assert_eq!(ids_a, ids_b);
        }
        assert_eq!(a.leftover_count, b.leftover_count);
    }

    #[test]
    fn test_tie_breaks_on_lower_id() {
        // Two stops at the same coordinate, higher id listed first.
        let mut pool = vec![
            Stop::new(7, -76.5320, 3.4516),
            Stop::new(3, -76.5320, 3.4516),
        ];
        pool.push(Stop::new(1, -76.5310, 3.4516));
        let plan = build_weekly_shortlists(&pool, &vehicle_at(-76.5320, 3.4516), &params(1, 3));
        let ids: Vec<i64> = plan.days[0].stops.iter().map(|s| s.id).collect();
        assert_eq!(ids[0], 3, "equidistant pair should pick the lower id");
        assert_eq!(ids[1], 7);
    }

    #[test]
    fn test_duplicate_ids_counted_once() {
        let mut pool = grid_stops(4);
        pool.push(pool[0].clone());
        let plan = build_weekly_shortlists(&pool, &vehicle_at(-76.54, 3.4516), &params(1, 10));
        assert_eq!(plan.days[0].count(), 4);
        assert_eq!(plan.leftover_count, 0);
    }

    #[test]
    fn test_empty_day_centroid_is_start() {
        let pool = grid_stops(3);
        let plan = build_weekly_shortlists(&pool, &vehicle_at(-76.54, 3.4), &params(2, 3));
        assert_eq!(plan.days[1].count(), 0);
        assert_eq!(plan.days[1].centroid, LonLat::new(-76.54, 3.4));
    }

    #[test]
    fn test_week_tag_kept_when_valid() {
        let today = NaiveDate::from_ymd_opt(2025, 11, 5).unwrap();
        assert_eq!(normalize_week_tag("20251027", today), "20251027");
    }

    #[test]
    fn test_week_tag_normalized_to_iso_monday() {
        // 2025-11-05 is a Wednesday; its ISO Monday is 2025-11-03.
        let today = NaiveDate::from_ymd_opt(2025, 11, 5).unwrap();
        assert_eq!(normalize_week_tag("next week", today), "20251103");
        assert_eq!(normalize_week_tag("2025-10-27", today), "20251103");
        assert_eq!(normalize_week_tag("", today), "20251103");
    }

    #[test]
    fn test_week_tag_rejects_impossible_dates() {
        let today = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();
        assert_eq!(normalize_week_tag("20251399", today), "20251103");
    }
}

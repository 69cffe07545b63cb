//! Deterministic export of schedules, routes, and summaries.
//!
//! Everything for one week lives under `<root>/semana_<TAG>/`: the input
//! snapshots in `insumos/`, per-day shortlists in `seleccion/`, solved days
//! in `solutions/`, and `summary.json` at the top. A sibling `latest.json`
//! at the root points at the newest week. The summary is written through a
//! temporary file and renamed into place so readers never see half a file.

use std::path::{Path, PathBuf};

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue};
use serde::Serialize;

use crate::error::Error;
use crate::traits::{MapRenderer, Stop, VehicleSpec};
use crate::vrp::{Route, VrpSolution};
use crate::week::WeekPlan;

#[derive(Debug, Clone, Serialize)]
pub struct DayPaths {
    pub day: usize,
    pub count: usize,
    pub csv_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeekSummary {
    pub week_tag: String,
    pub n_days: usize,
    pub total_selected: usize,
    pub leftover_count: usize,
    pub vehicle_meta: VehicleSpec,
    pub day_paths: Vec<DayPaths>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct WeekArtifacts {
    pub week_path: PathBuf,
    pub summary_path: PathBuf,
    pub summary: WeekSummary,
}

/// Per-stop arrival/departure offsets in minutes from route start.
#[derive(Debug, Clone, Serialize)]
pub struct StopTiming {
    pub id: i64,
    pub arrival_min: f64,
    pub departure_min: f64,
}

pub fn week_dir(root: &Path, week_tag: &str) -> PathBuf {
    root.join(format!("semana_{week_tag}"))
}

/// Persist a planned week: input snapshots, per-day shortlists and preview
/// maps, the atomic summary, and the `latest.json` pointer.
///
/// With `overwrite`, only `seleccion/` is purged and recreated; input
/// materials and previously solved days survive.
pub fn persist_week(
    root: &Path,
    week_tag: &str,
    pool: &[Stop],
    plan: &WeekPlan,
    renderer: &dyn MapRenderer,
    overwrite: bool,
) -> Result<WeekArtifacts, Error> {
    let week_path = week_dir(root, week_tag);
    let insumos = week_path.join("insumos");
    let seleccion = week_path.join("seleccion");

    std::fs::create_dir_all(&week_path)?;
    if overwrite && seleccion.exists() {
        std::fs::remove_dir_all(&seleccion)?;
    }
    std::fs::create_dir_all(&seleccion)?;
    std::fs::create_dir_all(&insumos)?;

    write_shortlist_csv(&insumos.join("jobs.csv"), pool)?;
    write_vehicles_csv(&insumos.join("vehicles.csv"), &plan.vehicle)?;

    let mut day_paths = Vec::with_capacity(plan.days.len());
    for day in &plan.days {
        let day_folder = seleccion.join(format!("day_{}", day.day_index));
        std::fs::create_dir_all(&day_folder)?;

        let csv_path = day_folder.join("shortlist.csv");
        write_shortlist_csv(&csv_path, &day.stops)?;

        let map_path = renderer
            .day_map(&day.stops, plan.vehicle.start, day.day_index)
            .map(|html| -> Result<String, Error> {
                let path = day_folder.join("map.html");
                std::fs::write(&path, html)?;
                Ok(path.display().to_string())
            })
            .transpose()?;

        day_paths.push(DayPaths {
            day: day.day_index,
            count: day.count(),
            csv_path: csv_path.display().to_string(),
            map_path,
        });
    }

    let summary = WeekSummary {
        week_tag: week_tag.to_string(),
        n_days: plan.days.len(),
        total_selected: plan.total_selected(),
        leftover_count: plan.leftover_count,
        vehicle_meta: plan.vehicle.clone(),
        day_paths,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let summary_path = week_path.join("summary.json");
    write_json_atomic(&summary_path, &summary)?;

    let latest = serde_json::json!({
        "week_tag": week_tag,
        "week_path": week_path.display().to_string(),
    });
    write_json_atomic(&root.join("latest.json"), &latest)?;

    tracing::info!(week_tag, days = summary.n_days, "week artifacts persisted");

    Ok(WeekArtifacts {
        week_path,
        summary_path,
        summary,
    })
}

#[derive(Debug, Clone, Serialize)]
struct SolutionDump<'a> {
    week_tag: &'a str,
    day: usize,
    #[serde(flatten)]
    solution: &'a VrpSolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedules: Option<Vec<Vec<StopTiming>>>,
    created_at: String,
}

#[derive(Debug, Clone)]
pub struct SolutionArtifacts {
    pub json_path: PathBuf,
    pub geojson_path: PathBuf,
    pub map_path: Option<PathBuf>,
}

/// Persist one solved day: the route dump, a GeoJSON with a Feature per
/// stop and per route, and the rendered map when the renderer produces one.
pub fn persist_solution(
    root: &Path,
    week_tag: &str,
    day: usize,
    solution: &VrpSolution,
    stops: &[Stop],
    with_schedule: bool,
    renderer: &dyn MapRenderer,
) -> Result<SolutionArtifacts, Error> {
    let solutions_dir = week_dir(root, week_tag).join("solutions");
    std::fs::create_dir_all(&solutions_dir)?;

    let schedules = with_schedule.then(|| {
        solution
            .routes
            .iter()
            .map(|route| stop_schedule(route, stops))
            .collect()
    });

    let dump = SolutionDump {
        week_tag,
        day,
        solution,
        schedules,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let json_path = solutions_dir.join(format!("day_{day}.json"));
    write_json_atomic(&json_path, &dump)?;

    let geojson_path = solutions_dir.join(format!("day_{day}.geojson"));
    let collection = solution_geojson(solution, stops);
    write_json_atomic(&geojson_path, &collection)?;

    let sequences: Vec<Vec<i64>> = solution.routes.iter().map(|r| r.sequence.clone()).collect();
    let map_path = renderer
        .solution_map(stops, &sequences)
        .map(|html| -> Result<PathBuf, Error> {
            let path = solutions_dir.join(format!("day_{day}_map.html"));
            std::fs::write(&path, html)?;
            Ok(path)
        })
        .transpose()?;

    Ok(SolutionArtifacts {
        json_path,
        geojson_path,
        map_path,
    })
}

/// Cumulative arrival/departure offsets along a route, minutes from start.
pub fn stop_schedule(route: &Route, stops: &[Stop]) -> Vec<StopTiming> {
    let service_min = |id: i64| -> f64 {
        stops
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.service_min as f64)
            .unwrap_or(8.0)
    };

    let mut timings = Vec::with_capacity(route.sequence.len());
    let mut clock = 0.0;
    for (idx, &id) in route.sequence.iter().enumerate() {
        if idx > 0 {
            clock += route.legs.get(idx - 1).map(|l| l.seconds).unwrap_or(0.0) / 60.0;
        }
        let arrival = clock;
        clock += service_min(id);
        timings.push(StopTiming {
            id,
            arrival_min: round1(arrival),
            departure_min: round1(clock),
        });
    }
    timings
}

/// One Feature per stop (Point) and one per route (LineString). Routes with
/// street geometry use the decoded polyline; fallback routes connect the
/// stop coordinates directly.
pub fn solution_geojson(solution: &VrpSolution, stops: &[Stop]) -> FeatureCollection {
    let mut features = Vec::new();

    for route in &solution.routes {
        for (position, &id) in route.sequence.iter().enumerate() {
            let Some(stop) = stops.iter().find(|s| s.id == id) else {
                continue;
            };
            let mut props = JsonObject::new();
            props.insert("id_contacto".to_string(), JsonValue::from(id));
            props.insert("vehicle_id".to_string(), JsonValue::from(route.vehicle_id.clone()));
            props.insert("sequence".to_string(), JsonValue::from(position + 1));
            props.insert("priority".to_string(), JsonValue::from(stop.priority));

            features.push(Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::Point(vec![
                    stop.at.lon,
                    stop.at.lat,
                ]))),
                id: None,
                properties: Some(props),
                foreign_members: None,
            });
        }

        let line: Vec<Vec<f64>> = match &route.geometry {
            Some(shape) if !shape.coordinates().is_empty() => shape
                .coordinates()
                .iter()
                .map(|p| vec![p.lon, p.lat])
                .collect(),
            _ => route
                .sequence
                .iter()
                .filter_map(|id| stops.iter().find(|s| s.id == *id))
                .map(|s| vec![s.at.lon, s.at.lat])
                .collect(),
        };

        let mut props = JsonObject::new();
        props.insert("vehicle_id".to_string(), JsonValue::from(route.vehicle_id.clone()));
        props.insert("km".to_string(), JsonValue::from(route.km));
        props.insert("min".to_string(), JsonValue::from(route.min));
        props.insert("served".to_string(), JsonValue::from(route.served));
        props.insert(
            "geometry_valid".to_string(),
            JsonValue::from(route.geometry.as_ref().map(|g| g.geometry_valid()).unwrap_or(false)),
        );

        features.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(geojson::Value::LineString(line))),
            id: None,
            properties: Some(props),
            foreign_members: None,
        });
    }

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Read `latest.json` and return the newest week tag, if any.
pub fn latest_week_tag(root: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(root.join("latest.json")).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    value.get("week_tag")?.as_str().map(String::from)
}

fn write_shortlist_csv(path: &Path, stops: &[Stop]) -> Result<(), Error> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| Error::InvalidInput(format!("cannot write {}: {e}", path.display())))?;
    writer
        .write_record(["id_contacto", "lon", "lat"])
        .and_then(|_| {
            stops.iter().try_for_each(|s| {
                writer.write_record([
                    s.id.to_string(),
                    format!("{:.6}", s.at.lon),
                    format!("{:.6}", s.at.lat),
                ])
            })
        })
        .map_err(|e| Error::InvalidInput(format!("csv write failed: {e}")))?;
    writer.flush().map_err(Error::Io)
}

fn write_vehicles_csv(path: &Path, vehicle: &VehicleSpec) -> Result<(), Error> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| Error::InvalidInput(format!("cannot write {}: {e}", path.display())))?;
    let opt = |o: &Option<String>| o.clone().unwrap_or_default();
    let coord = |c: Option<crate::traits::LonLat>, pick: fn(crate::traits::LonLat) -> f64| {
        c.map(|p| format!("{:.6}", pick(p))).unwrap_or_default()
    };
    writer
        .write_record([
            "vehicle_id",
            "start_lon",
            "start_lat",
            "end_lon",
            "end_lat",
            "max_stops",
            "tw_start",
            "tw_end",
            "break_start",
            "break_end",
        ])
        .and_then(|_| {
            writer.write_record([
                vehicle.id.clone(),
                coord(vehicle.start, |p| p.lon),
                coord(vehicle.start, |p| p.lat),
                coord(vehicle.end, |p| p.lon),
                coord(vehicle.end, |p| p.lat),
                vehicle.max_stops.to_string(),
                opt(&vehicle.tw_start),
                opt(&vehicle.tw_end),
                opt(&vehicle.break_start),
                opt(&vehicle.break_end),
            ])
        })
        .map_err(|e| Error::InvalidInput(format!("csv write failed: {e}")))?;
    writer.flush().map_err(Error::Io)
}

/// Serialize to `<path>.tmp`, then rename into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::InvalidInput(format!("serialization failed: {e}")))?;
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

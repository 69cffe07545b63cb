//! Input file readers: per-day shortlists and fleet descriptions.
//!
//! Headers are normalized once here (case-insensitive, aliases renamed to
//! the canonical names); everything downstream accepts only the canonical
//! schema. Per-row problems are reported and skipped, structural problems
//! are fatal.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

use serde::Serialize;

use crate::error::Error;
use crate::traits::{LonLat, Stop, VehicleSpec};

/// Outcome of reading one input file: what was rejected and why, alongside
/// headline counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub total_rows: usize,
    pub valid_rows: usize,
    /// True when an alias header (e.g. `job_id`) was renamed on the way in.
    pub normalized: bool,
}

const ID_ALIASES: &[&str] = &["job_id", "id_cliente"];
const LON_ALIASES: &[&str] = &["longitud", "longitude"];
const LAT_ALIASES: &[&str] = &["latitud", "latitude"];

/// Read a per-day shortlist (client id + coordinates, optional metadata).
pub fn read_shortlist_csv(path: impl AsRef<Path>) -> Result<(Vec<Stop>, IngestReport), Error> {
    let file = std::fs::File::open(path.as_ref())?;
    parse_shortlist(file)
}

/// Parse a shortlist from any reader. Rows with missing, zero, or
/// out-of-range coordinates are rejected with a warning; duplicate ids keep
/// their first occurrence.
pub fn parse_shortlist(reader: impl Read) -> Result<(Vec<Stop>, IngestReport), Error> {
    let (headers, records) = read_table(reader)?;
    let mut report = IngestReport::default();

    let id_col = resolve_column(&headers, "id_contacto", ID_ALIASES, &mut report)?;
    let lon_col = resolve_column(&headers, "lon", LON_ALIASES, &mut report)?;
    let lat_col = resolve_column(&headers, "lat", LAT_ALIASES, &mut report)?;
    let name_col = headers.get("nombre").or_else(|| headers.get("name")).copied();
    let zone_col = headers.get("zona").or_else(|| headers.get("zone")).copied();
    let priority_col = headers
        .get("prioridad")
        .or_else(|| headers.get("priority"))
        .copied();
    let service_col = headers
        .get("duracion_min")
        .or_else(|| headers.get("service_min"))
        .copied();

    let mut stops = Vec::new();
    let mut seen = HashSet::new();

    for (line, record) in records.iter().enumerate() {
        report.total_rows += 1;
        let row = line + 2; // header is line 1

        let Some(id) = record.get(id_col).and_then(|f| f.trim().parse::<i64>().ok()) else {
            report.warnings.push(format!("row {row}: unparseable id, skipped"));
            continue;
        };
        if !seen.insert(id) {
            report.warnings.push(format!("row {row}: duplicate id {id}, skipped"));
            continue;
        }

        let lon = record.get(lon_col).and_then(|f| f.trim().parse::<f64>().ok());
        let lat = record.get(lat_col).and_then(|f| f.trim().parse::<f64>().ok());
        let coord = match (lon, lat) {
            (Some(lon), Some(lat)) if lon != 0.0 && lat != 0.0 => {
                let p = LonLat::new(lon, lat);
                p.is_valid().then_some(p)
            }
            _ => None,
        };
        let Some(at) = coord else {
            report
                .warnings
                .push(format!("row {row}: invalid coordinates for id {id}, skipped"));
            continue;
        };

        let mut stop = Stop::new(id, at.lon, at.lat);
        stop.name = name_col
            .and_then(|c| record.get(c))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        stop.zone = zone_col
            .and_then(|c| record.get(c))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        if let Some(p) = priority_col.and_then(|c| record.get(c)).and_then(|f| f.trim().parse::<i64>().ok())
        {
            stop.priority = p.clamp(1, 5) as u8;
        }
        if let Some(m) = service_col.and_then(|c| record.get(c)).and_then(|f| f.trim().parse::<i64>().ok())
        {
            stop.service_min = m.clamp(1, 120) as u32;
        }

        stops.push(stop);
    }

    report.valid_rows = stops.len();
    if stops.is_empty() {
        return Err(Error::InvalidInput(
            "no valid rows left after shortlist validation".to_string(),
        ));
    }

    tracing::info!(
        total = report.total_rows,
        valid = report.valid_rows,
        "shortlist ingested"
    );
    Ok((stops, report))
}

/// Read a multi-row fleet file (vehicle id plus optional caps/coords).
pub fn read_fleet_csv(path: impl AsRef<Path>) -> Result<Vec<VehicleSpec>, Error> {
    let file = std::fs::File::open(path.as_ref())?;
    parse_fleet(file)
}

/// Parse a fleet description. Duplicate vehicle ids keep the first row;
/// `max_stops` defaults to 40 and is clamped to 1..=100.
pub fn parse_fleet(reader: impl Read) -> Result<Vec<VehicleSpec>, Error> {
    let (headers, records) = read_table(reader)?;
    let mut report = IngestReport::default();

    let id_col = resolve_column(&headers, "vehicle_id", &["id_vehiculo"], &mut report)?;
    let get = |record: &csv::StringRecord, name: &str| -> Option<f64> {
        headers
            .get(name)
            .and_then(|&c| record.get(c))
            .and_then(|f| f.trim().parse::<f64>().ok())
    };
    let get_str = |record: &csv::StringRecord, name: &str| -> Option<String> {
        headers
            .get(name)
            .and_then(|&c| record.get(c))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let mut vehicles: Vec<VehicleSpec> = Vec::new();
    let mut seen = HashSet::new();

    for record in &records {
        let Some(id) = record.get(id_col).map(str::trim).filter(|s| !s.is_empty()) else {
            continue;
        };
        if !seen.insert(id.to_string()) {
            tracing::warn!(id, "duplicate vehicle id, keeping first row");
            continue;
        }

        let max_stops = headers
            .get("max_stops")
            .and_then(|&c| record.get(c))
            .and_then(|f| f.trim().parse::<i64>().ok())
            .map(|m| m.clamp(1, 100) as usize)
            .unwrap_or(40);

        let start = match (get(record, "start_lon"), get(record, "start_lat")) {
            (Some(lon), Some(lat)) => Some(LonLat::new(lon, lat)),
            _ => None,
        };
        let end = match (get(record, "end_lon"), get(record, "end_lat")) {
            (Some(lon), Some(lat)) => Some(LonLat::new(lon, lat)),
            _ => None,
        };

        vehicles.push(VehicleSpec {
            id: id.to_string(),
            start,
            end,
            max_stops,
            tw_start: get_str(record, "tw_start"),
            tw_end: get_str(record, "tw_end"),
            break_start: get_str(record, "break_start"),
            break_end: get_str(record, "break_end"),
        });
    }

    if vehicles.is_empty() {
        return Err(Error::InvalidInput("no valid vehicles in fleet file".to_string()));
    }
    Ok(vehicles)
}

/// Read the weekly vehicle file: exactly one row, full schema, with HH:MM
/// window validation. Windows are validated here and nowhere else; the
/// solvers never see them.
pub fn parse_week_vehicle(reader: impl Read) -> Result<(VehicleSpec, IngestReport), Error> {
    let (headers, records) = read_table(reader)?;
    let mut report = IngestReport::default();
    report.total_rows = records.len();

    if records.len() != 1 {
        return Err(Error::InvalidInput(format!(
            "weekly vehicle file must have exactly 1 row, found {}",
            records.len()
        )));
    }

    for required in [
        "vehicle_id",
        "start_lon",
        "start_lat",
        "end_lon",
        "end_lat",
        "tw_start",
        "tw_end",
        "break_start",
        "break_end",
    ] {
        if !headers.contains_key(required) {
            return Err(Error::InvalidInput(format!("missing column `{required}`")));
        }
    }

    let record = &records[0];
    let coord = |name: &str, limit: f64| -> Result<f64, Error> {
        let value: f64 = field(&headers, record, name)
            .parse()
            .map_err(|_| Error::InvalidInput(format!("{name}: not a number")))?;
        if value.abs() > limit {
            return Err(Error::InvalidInput(format!("{name}: {value} out of range")));
        }
        Ok(value)
    };

    let start = LonLat::new(coord("start_lon", 180.0)?, coord("start_lat", 90.0)?);
    let end = LonLat::new(coord("end_lon", 180.0)?, coord("end_lat", 90.0)?);

    let mut minutes = HashMap::new();
    for name in ["tw_start", "tw_end", "break_start", "break_end"] {
        let raw = field(&headers, record, name);
        match parse_hhmm(raw) {
            Some(m) => {
                minutes.insert(name, m);
            }
            None => {
                return Err(Error::InvalidInput(format!(
                    "{name}: `{raw}` is not HH:MM"
                )));
            }
        }
    }
    if minutes["tw_start"] >= minutes["tw_end"] {
        return Err(Error::InvalidInput("tw_start must be before tw_end".to_string()));
    }
    if minutes["break_start"] >= minutes["break_end"] {
        return Err(Error::InvalidInput(
            "break_start must be before break_end".to_string(),
        ));
    }
    for edge in ["break_start", "break_end"] {
        if minutes[edge] < minutes["tw_start"] || minutes[edge] > minutes["tw_end"] {
            report
                .warnings
                .push(format!("{edge} falls outside the working window"));
        }
    }

    let vehicle = VehicleSpec {
        id: field(&headers, record, "vehicle_id").to_string(),
        start: Some(start),
        end: Some(end),
        max_stops: 40,
        tw_start: Some(field(&headers, record, "tw_start").to_string()),
        tw_end: Some(field(&headers, record, "tw_end").to_string()),
        break_start: Some(field(&headers, record, "break_start").to_string()),
        break_end: Some(field(&headers, record, "break_end").to_string()),
    };
    report.valid_rows = 1;

    Ok((vehicle, report))
}

pub fn read_week_vehicle_csv(path: impl AsRef<Path>) -> Result<(VehicleSpec, IngestReport), Error> {
    let file = std::fs::File::open(path.as_ref())?;
    parse_week_vehicle(file)
}

/// Trimmed cell for a named column, empty when absent.
fn field<'r>(
    headers: &HashMap<String, usize>,
    record: &'r csv::StringRecord,
    name: &str,
) -> &'r str {
    headers
        .get(name)
        .and_then(|&c| record.get(c))
        .map(str::trim)
        .unwrap_or("")
}

/// Minutes since midnight for a strict `HH:MM` string.
fn parse_hhmm(raw: &str) -> Option<u32> {
    let (h, m) = raw.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    (h <= 23 && m <= 59).then_some(h * 60 + m)
}

/// Load the whole table, sniffing `,` vs `;` from the header line.
fn read_table(
    mut reader: impl Read,
) -> Result<(HashMap<String, usize>, Vec<csv::StringRecord>), Error> {
    let mut raw = String::new();
    reader.read_to_string(&mut raw)?;
    if raw.trim().is_empty() {
        return Err(Error::InvalidInput("empty input file".to_string()));
    }

    let header_line = raw.lines().next().unwrap_or("");
    let delimiter = if header_line.contains(';') && !header_line.contains(',') {
        b';'
    } else {
        b','
    };

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(raw.as_bytes());

    let headers: HashMap<String, usize> = csv_reader
        .headers()
        .map_err(|e| Error::InvalidInput(format!("unreadable header: {e}")))?
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_lowercase(), i))
        .collect();

    let records: Vec<csv::StringRecord> = csv_reader
        .records()
        .filter_map(|r| r.ok())
        .collect();

    Ok((headers, records))
}

/// Resolve a canonical column, renaming a single alias when the canonical
/// header is absent. Canonical and alias in the same header is a conflict.
fn resolve_column(
    headers: &HashMap<String, usize>,
    canonical: &str,
    aliases: &[&str],
    report: &mut IngestReport,
) -> Result<usize, Error> {
    let alias_hit = aliases.iter().find(|a| headers.contains_key(**a));

    if let Some(&col) = headers.get(canonical) {
        if let Some(alias) = alias_hit {
            return Err(Error::InvalidInput(format!(
                "conflicting columns `{canonical}` and `{alias}`"
            )));
        }
        return Ok(col);
    }

    if let Some(alias) = alias_hit {
        report.normalized = true;
        report
            .warnings
            .push(format!("column `{alias}` renamed to `{canonical}`"));
        return Ok(headers[*alias]);
    }

    Err(Error::InvalidInput(format!("missing column `{canonical}`")))
}

//! Coordinate tagging and repair against the operating perimeter.
//!
//! Decides a final (lon, lat) for every client. Clients whose stored
//! coordinate is missing, malformed, or outside the perimeter get up to two
//! repair attempts from their most recent event coordinates; clients that
//! cannot be repaired are tagged rather than dropped.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::perimeter::Perimeter;
use crate::traits::LonLat;

/// A client as it arrives from upstream: the coordinate may be junk.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRecord {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub lat: Option<f64>,
}

/// A historical geo-located event for a client. Only used as a source of
/// candidate coordinates.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEvent {
    pub client_id: i64,
    /// Unix timestamp; newer events are tried first.
    pub timestamp: i64,
    pub lon: f64,
    pub lat: f64,
}

/// Where a client's final coordinate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordSource {
    /// The stored coordinate was valid and inside; kept as-is.
    Original,
    /// Adopted from the most recent qualifying event.
    Event1,
    /// Adopted from the second most recent qualifying event.
    Event2,
    /// No candidate qualified; final coordinates are absent.
    None,
}

/// Repair outcome for one client.
#[derive(Debug, Clone, Serialize)]
pub struct RepairedClient {
    pub id: i64,
    pub lon_final: Option<f64>,
    pub lat_final: Option<f64>,
    pub in_perimeter_original: bool,
    pub in_perimeter_final: bool,
    pub source: CoordSource,
}

impl RepairedClient {
    /// The final coordinate, when one exists.
    pub fn location(&self) -> Option<LonLat> {
        match (self.lon_final, self.lat_final) {
            (Some(lon), Some(lat)) => Some(LonLat::new(lon, lat)),
            _ => None,
        }
    }
}

/// Aggregate counts over a repair pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairStats {
    pub total: usize,
    pub kept_original: usize,
    pub repaired: usize,
    pub unrepairable: usize,
}

/// Zero and out-of-range coordinates count as missing, matching the event
/// store convention of writing 0 for "unknown".
fn sanitize(lon: Option<f64>, lat: Option<f64>) -> Option<LonLat> {
    let (lon, lat) = (lon?, lat?);
    if lon == 0.0 || lat == 0.0 {
        return None;
    }
    let p = LonLat::new(lon, lat);
    p.is_valid().then_some(p)
}

/// Repair every client against the perimeter.
///
/// Per-client problems never fail the pass; they end in
/// `CoordSource::None`. The only fatal condition here is an event history
/// that is absent while repairs are needed.
pub fn repair_clients(
    clients: &[ClientRecord],
    events: &[ClientEvent],
    perimeter: &Perimeter,
) -> Result<(Vec<RepairedClient>, RepairStats), Error> {
    // Up to the two newest events with usable coordinates per client.
    let mut recent: HashMap<i64, Vec<&ClientEvent>> = HashMap::new();
    let mut ordered: Vec<&ClientEvent> = events
        .iter()
        .filter(|e| sanitize(Some(e.lon), Some(e.lat)).is_some())
        .collect();
    ordered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    for event in ordered {
        let slot = recent.entry(event.client_id).or_default();
        if slot.len() < 2 {
            slot.push(event);
        }
    }

    let mut stats = RepairStats {
        total: clients.len(),
        ..RepairStats::default()
    };
    let mut needs_events = false;
    let mut out = Vec::with_capacity(clients.len());

    for client in clients {
        let original = sanitize(client.lon, client.lat);
        let kept = original.filter(|p| perimeter.contains(*p));

        if let Some(p) = kept {
            stats.kept_original += 1;
            out.push(RepairedClient {
                id: client.id,
                lon_final: Some(p.lon),
                lat_final: Some(p.lat),
                in_perimeter_original: true,
                in_perimeter_final: true,
                source: CoordSource::Original,
            });
            continue;
        }

        // Repair candidate: missing or outside. Try the two newest events.
        needs_events = true;
        let mut repaired = None;
        if let Some(candidates) = recent.get(&client.id) {
            for (attempt, event) in candidates.iter().enumerate() {
                let p = LonLat::new(event.lon, event.lat);
                if perimeter.contains(p) {
                    let source = if attempt == 0 {
                        CoordSource::Event1
                    } else {
                        CoordSource::Event2
                    };
                    repaired = Some((p, source));
                    break;
                }
            }
        }

        match repaired {
            Some((p, source)) => {
                stats.repaired += 1;
                out.push(RepairedClient {
                    id: client.id,
                    lon_final: Some(p.lon),
                    lat_final: Some(p.lat),
                    in_perimeter_original: false,
                    in_perimeter_final: true,
                    source,
                });
            }
            None => {
                stats.unrepairable += 1;
                out.push(RepairedClient {
                    id: client.id,
                    lon_final: None,
                    lat_final: None,
                    in_perimeter_original: false,
                    in_perimeter_final: false,
                    source: CoordSource::None,
                });
            }
        }
    }

    if needs_events && events.is_empty() {
        return Err(Error::InvalidInput(
            "clients need repair but no event history was provided".to_string(),
        ));
    }

    tracing::info!(
        total = stats.total,
        kept = stats.kept_original,
        repaired = stats.repaired,
        unrepairable = stats.unrepairable,
        "coordinate repair finished"
    );

    Ok((out, stats))
}

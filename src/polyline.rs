//! Polyline representation and Google polyline codec.
//!
//! Routes travel the wire in the compact encoded form; internally the crate
//! works with decoded coordinate sequences. Encoding/decoding happens at the
//! boundary (when receiving from the backend or exporting artifacts).

use serde::{Deserialize, Serialize};

use crate::traits::LonLat;

/// A route geometry as decoded coordinates, lon/lat order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    points: Vec<LonLat>,
}

impl Polyline {
    pub fn new(points: Vec<LonLat>) -> Self {
        Self { points }
    }

    /// Decode a Google-encoded polyline string (5-digit precision).
    pub fn decode(encoded: &str) -> Self {
        let mut points = Vec::new();
        let mut lat = 0i64;
        let mut lon = 0i64;
        let mut bytes = encoded.bytes().peekable();

        while bytes.peek().is_some() {
            lat += decode_value(&mut bytes);
            lon += decode_value(&mut bytes);
            points.push(LonLat::new(lon as f64 / 1e5, lat as f64 / 1e5));
        }

        Self { points }
    }

    /// Encode to the Google polyline format (5-digit precision).
    pub fn encode(&self) -> String {
        let mut encoded = String::new();
        let mut prev_lat = 0i64;
        let mut prev_lon = 0i64;

        for p in &self.points {
            let lat_e5 = (p.lat * 1e5).round() as i64;
            let lon_e5 = (p.lon * 1e5).round() as i64;

            encode_value(lat_e5 - prev_lat, &mut encoded);
            encode_value(lon_e5 - prev_lon, &mut encoded);

            prev_lat = lat_e5;
            prev_lon = lon_e5;
        }

        encoded
    }

    pub fn points(&self) -> &[LonLat] {
        &self.points
    }

    pub fn into_points(self) -> Vec<LonLat> {
        self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn decode_value(bytes: &mut std::iter::Peekable<std::str::Bytes<'_>>) -> i64 {
    let mut shift = 0;
    let mut result = 0i64;
    while let Some(byte) = bytes.next() {
        let b = byte as i64 - 63;
        result |= (b & 0x1f) << shift;
        shift += 5;
        if b < 0x20 {
            break;
        }
    }
    if (result & 1) != 0 {
        !(result >> 1)
    } else {
        result >> 1
    }
}

fn encode_value(mut value: i64, output: &mut String) {
    // Zig-zag so small negatives stay short.
    if value < 0 {
        value = !value;
        value <<= 1;
        value |= 1;
    } else {
        value <<= 1;
    }

    while value >= 0x20 {
        let chunk = ((value & 0x1f) | 0x20) as u8 + 63;
        output.push(chunk as char);
        value >>= 5;
    }

    output.push((value as u8 + 63) as char);
}

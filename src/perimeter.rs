//! Operating perimeter: polygon union and point-in-polygon tests.
//!
//! The perimeter is built once per run from a GeoJSON FeatureCollection and
//! then queried per candidate point during coordinate repair. Containment is
//! closed: a point on the boundary counts as inside.

use geo::{BooleanOps, Intersects, MultiPolygon, Point, Polygon};
use geojson::GeoJson;

use crate::error::Error;
use crate::traits::LonLat;

/// Spellings of WGS84 accepted in a legacy `crs` member.
const WGS84_NAMES: &[&str] = &[
    "urn:ogc:def:crs:OGC:1.3:CRS84",
    "urn:ogc:def:crs:OGC::CRS84",
    "urn:ogc:def:crs:EPSG::4326",
    "EPSG:4326",
];

/// The operating area as a single healed 2D geometry, WGS84.
#[derive(Debug, Clone)]
pub struct Perimeter {
    merged: MultiPolygon<f64>,
}

impl Perimeter {
    /// Build the perimeter from a GeoJSON FeatureCollection string.
    ///
    /// All polygonal features are unioned into one geometry; the union
    /// re-nodes the rings, healing micro-gaps between adjacent features.
    /// Fails with `InvalidGeometry` when the collection is unparseable or
    /// contains no polygonal feature, and with `NonWgs84` when a legacy
    /// `crs` member names anything but WGS84.
    pub fn from_geojson_str(raw: &str) -> Result<Self, Error> {
        let geojson: GeoJson = raw
            .parse()
            .map_err(|e| Error::InvalidGeometry(format!("unparseable GeoJSON: {e}")))?;

        let collection = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            _ => {
                return Err(Error::InvalidGeometry(
                    "expected a FeatureCollection".to_string(),
                ));
            }
        };

        if let Some(members) = &collection.foreign_members {
            if let Some(crs) = members.get("crs") {
                let name = crs
                    .pointer("/properties/name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("<unnamed>");
                if !WGS84_NAMES.contains(&name) {
                    return Err(Error::NonWgs84(name.to_string()));
                }
            }
        }

        let mut polygons: Vec<Polygon<f64>> = Vec::new();
        for feature in &collection.features {
            let Some(geometry) = &feature.geometry else {
                continue;
            };
            collect_polygons(&geometry.value, &mut polygons);
        }

        let feature_count = collection.features.len();
        let merged = polygons
            .into_iter()
            .map(|polygon| MultiPolygon::new(vec![polygon]))
            .reduce(|acc, next| acc.union(&next))
            .ok_or_else(|| {
                Error::InvalidGeometry("no polygonal features in collection".to_string())
            })?;

        tracing::info!(
            features = feature_count,
            parts = merged.0.len(),
            "perimeter built"
        );

        Ok(Self { merged })
    }

    /// Build the perimeter from a GeoJSON file on disk.
    pub fn from_geojson_file(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_geojson_str(&raw)
    }

    /// True when the point is strictly inside or on the boundary.
    pub fn contains(&self, point: LonLat) -> bool {
        self.merged.intersects(&Point::new(point.lon, point.lat))
    }

    /// Number of disjoint parts after the union.
    pub fn part_count(&self) -> usize {
        self.merged.0.len()
    }
}

fn collect_polygons(value: &geojson::Value, out: &mut Vec<Polygon<f64>>) {
    match value {
        geojson::Value::Polygon(_) => {
            if let Ok(polygon) = Polygon::<f64>::try_from(value.clone()) {
                out.push(polygon);
            }
        }
        geojson::Value::MultiPolygon(_) => {
            if let Ok(multi) = MultiPolygon::<f64>::try_from(value.clone()) {
                out.extend(multi.0);
            }
        }
        geojson::Value::GeometryCollection(inner) => {
            for geometry in inner {
                collect_polygons(&geometry.value, out);
            }
        }
        _ => {
            tracing::warn!("ignoring non-polygonal feature");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min: f64, max: f64) -> String {
        format!(
            r#"{{"type":"Feature","properties":{{}},"geometry":{{"type":"Polygon","coordinates":[[[{min},{min}],[{max},{min}],[{max},{max}],[{min},{max}],[{min},{min}]]]}}}}"#
        )
    }

    fn collection(features: &[String]) -> String {
        format!(
            r#"{{"type":"FeatureCollection","features":[{}]}}"#,
            features.join(",")
        )
    }

    #[test]
    fn test_contains_interior_and_boundary() {
        let fc = collection(&[square(0.0, 1.0)]);
        let perimeter = Perimeter::from_geojson_str(&fc).unwrap();

        assert!(perimeter.contains(LonLat::new(0.5, 0.5)));
        assert!(perimeter.contains(LonLat::new(0.0, 0.5)), "boundary is inside");
        assert!(!perimeter.contains(LonLat::new(1.5, 0.5)));
    }

    #[test]
    fn test_adjacent_squares_union_to_one_part() {
        let fc = collection(&[square(0.0, 1.0), square(1.0, 2.0)]);
        let perimeter = Perimeter::from_geojson_str(&fc).unwrap();

        assert_eq!(perimeter.part_count(), 1);
        assert!(perimeter.contains(LonLat::new(1.0, 0.5)), "shared edge is inside");
        assert!(perimeter.contains(LonLat::new(1.5, 1.5)));
    }

    #[test]
    fn test_disjoint_squares_keep_two_parts() {
        let fc = collection(&[square(0.0, 1.0), square(3.0, 4.0)]);
        let perimeter = Perimeter::from_geojson_str(&fc).unwrap();

        assert_eq!(perimeter.part_count(), 2);
        assert!(!perimeter.contains(LonLat::new(2.0, 2.0)));
    }

    #[test]
    fn test_degenerate_perimeter_contains_nothing() {
        // A polygon collapsed to a single point has no interior.
        let fc = r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{},
            "geometry":{"type":"Polygon","coordinates":[[[1.0,1.0],[1.0,1.0],[1.0,1.0],[1.0,1.0]]]}}]}"#;
        let perimeter = Perimeter::from_geojson_str(fc).unwrap();

        assert!(!perimeter.contains(LonLat::new(0.5, 0.5)));
        assert!(!perimeter.contains(LonLat::new(1.2, 1.0)));
    }

    #[test]
    fn test_empty_collection_rejected() {
        let err = Perimeter::from_geojson_str(r#"{"type":"FeatureCollection","features":[]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        let err = Perimeter::from_geojson_str("not geojson").unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry(_)));
    }

    #[test]
    fn test_foreign_crs_rejected() {
        let fc = format!(
            r#"{{"type":"FeatureCollection","crs":{{"type":"name","properties":{{"name":"EPSG:3857"}}}},"features":[{}]}}"#,
            square(0.0, 1.0)
        );
        let err = Perimeter::from_geojson_str(&fc).unwrap_err();
        assert!(matches!(err, Error::NonWgs84(name) if name == "EPSG:3857"));
    }

    #[test]
    fn test_wgs84_crs_accepted() {
        let fc = format!(
            r#"{{"type":"FeatureCollection","crs":{{"type":"name","properties":{{"name":"urn:ogc:def:crs:OGC:1.3:CRS84"}}}},"features":[{}]}}"#,
            square(0.0, 1.0)
        );
        assert!(Perimeter::from_geojson_str(&fc).is_ok());
    }
}

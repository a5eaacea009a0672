//! GeoJSON boundary reader.
//!
//! Accepts a `FeatureCollection` (or a single `Feature`) whose features carry
//! `Polygon` or `MultiPolygon` geometries, or a bare polygonal geometry.
//! Features with other geometry types are skipped. A legacy top-level `crs` member is honoured; without one the
//! coordinates are taken as WGS84 longitude/latitude.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use geo::{Coord, LineString, MultiPolygon, Polygon};
use log::debug;
use serde_json::{Map, Value};
use thiserror::Error;

use super::loaders::{BoundaryFeature, BoundarySource};
use super::transforms::{Crs, CrsError};

/// Errors that can occur while reading GeoJSON.
#[derive(Error, Debug)]
pub enum GeoJsonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected GeoJSON FeatureCollection, Feature or polygonal geometry")]
    NotAFeatureCollection,

    #[error("invalid feature at index {index}: {reason}")]
    InvalidFeature { index: usize, reason: String },

    #[error("declared CRS: {0}")]
    Crs(#[from] CrsError),

    #[error("no Polygon or MultiPolygon features among {0} features")]
    NoPolygons(usize),
}

pub type Result<T> = std::result::Result<T, GeoJsonError>;

/// Read polygon features from a GeoJSON file.
pub fn load_geojson_boundaries<P: AsRef<Path>>(path: P) -> Result<BoundarySource> {
    let payload = fs::read_to_string(path)?;
    parse_geojson_boundaries(&payload)
}

/// Read polygon features from a GeoJSON document.
pub fn parse_geojson_boundaries(payload: &str) -> Result<BoundarySource> {
    let value: Value = serde_json::from_str(payload)?;
    let obj = value.as_object().ok_or(GeoJsonError::NotAFeatureCollection)?;

    let declared_crs = declared_crs(obj)?;

    let features_val: Vec<&Value> = match obj.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => obj
            .get("features")
            .and_then(Value::as_array)
            .ok_or(GeoJsonError::NotAFeatureCollection)?
            .iter()
            .collect(),
        Some("Feature") => vec![&value],
        Some("Polygon" | "MultiPolygon") => {
            let geometry = parse_polygonal(&value)
                .map_err(|reason| GeoJsonError::InvalidFeature { index: 0, reason })?
                .ok_or(GeoJsonError::NoPolygons(1))?;
            return Ok(BoundarySource {
                features: vec![BoundaryFeature {
                    id: None,
                    position: 0,
                    properties: BTreeMap::new(),
                    geometry,
                }],
                declared_crs,
            });
        }
        _ => return Err(GeoJsonError::NotAFeatureCollection),
    };

    let mut features = Vec::with_capacity(features_val.len());
    for (index, feat_val) in features_val.iter().enumerate() {
        let feat_obj = feat_val
            .as_object()
            .ok_or_else(|| GeoJsonError::InvalidFeature {
                index,
                reason: "feature must be an object".to_string(),
            })?;

        let geometry = match feat_obj.get("geometry") {
            None | Some(Value::Null) => {
                debug!("feature {index} has no geometry, skipping");
                continue;
            }
            Some(g) => parse_polygonal(g)
                .map_err(|reason| GeoJsonError::InvalidFeature { index, reason })?,
        };
        let Some(geometry) = geometry else {
            debug!("feature {index} is not polygonal, skipping");
            continue;
        };

        let id = match feat_obj.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let properties = feat_obj
            .get("properties")
            .and_then(Value::as_object)
            .map(properties_as_text)
            .unwrap_or_default();

        features.push(BoundaryFeature {
            id,
            position: index,
            properties,
            geometry,
        });
    }

    if features.is_empty() && !features_val.is_empty() {
        return Err(GeoJsonError::NoPolygons(features_val.len()));
    }

    Ok(BoundarySource {
        features,
        declared_crs,
    })
}

fn declared_crs(obj: &Map<String, Value>) -> Result<Option<Crs>> {
    let name = obj
        .get("crs")
        .and_then(|crs| crs.get("properties"))
        .and_then(|props| props.get("name"))
        .and_then(Value::as_str);

    match name {
        Some(name) => Ok(Some(Crs::parse(name)?)),
        None => Ok(None),
    }
}

fn properties_as_text(props: &Map<String, Value>) -> BTreeMap<String, String> {
    props
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key.clone(), text))
        })
        .collect()
}

/// `Ok(None)` for valid but non-polygonal geometry.
fn parse_polygonal(value: &Value) -> std::result::Result<Option<MultiPolygon<f64>>, String> {
    let obj = value
        .as_object()
        .ok_or("geometry must be an object".to_string())?;
    let ty = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or("geometry missing type".to_string())?;

    let coords = || {
        obj.get("coordinates")
            .ok_or("geometry missing coordinates".to_string())
    };

    match ty {
        "Polygon" => Ok(Some(MultiPolygon::new(vec![parse_polygon(coords()?)?]))),
        "MultiPolygon" => {
            let polys = coords()?
                .as_array()
                .ok_or("MultiPolygon coordinates must be an array of polygons".to_string())?;
            let mut out = Vec::with_capacity(polys.len());
            for poly in polys {
                out.push(parse_polygon(poly)?);
            }
            Ok(Some(MultiPolygon::new(out)))
        }
        "Point" | "MultiPoint" | "LineString" | "MultiLineString" | "GeometryCollection" => {
            Ok(None)
        }
        other => Err(format!("unsupported geometry type: {other}")),
    }
}

fn parse_position(value: &Value) -> std::result::Result<Coord<f64>, String> {
    let arr = value
        .as_array()
        .ok_or("position must be an array".to_string())?;
    if arr.len() < 2 {
        return Err("position must have [x, y]".to_string());
    }
    let x = arr[0].as_f64().ok_or("x must be a number".to_string())?;
    let y = arr[1].as_f64().ok_or("y must be a number".to_string())?;
    Ok(Coord { x, y })
}

fn parse_ring(value: &Value) -> std::result::Result<LineString<f64>, String> {
    let arr = value
        .as_array()
        .ok_or("ring must be an array of positions".to_string())?;
    let mut coords = Vec::with_capacity(arr.len());
    for item in arr {
        coords.push(parse_position(item)?);
    }
    Ok(LineString::new(coords))
}

fn parse_polygon(value: &Value) -> std::result::Result<Polygon<f64>, String> {
    let rings = value
        .as_array()
        .ok_or("Polygon coordinates must be an array of rings".to_string())?;
    let mut iter = rings.iter();
    let exterior = iter
        .next()
        .ok_or("Polygon must have an exterior ring".to_string())
        .and_then(parse_ring)?;
    let mut interiors = Vec::with_capacity(rings.len().saturating_sub(1));
    for ring in iter {
        interiors.push(parse_ring(ring)?);
    }
    Ok(Polygon::new(exterior, interiors))
}

#[cfg(test)]
mod tests {
    use super::*;

    const WARDS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "id": 7,
                "properties": {"name": "Riverside", "code": 12},
                "geometry": {"type": "Polygon", "coordinates": [
                    [[-2.99, 53.39], [-2.97, 53.39], [-2.97, 53.41], [-2.99, 53.39]],
                    [[-2.985, 53.395], [-2.98, 53.395], [-2.98, 53.40], [-2.985, 53.395]]
                ]}
            },
            {
                "type": "Feature",
                "properties": {"name": "Sensor Hub"},
                "geometry": {"type": "Point", "coordinates": [-2.98, 53.40]}
            },
            {
                "type": "Feature",
                "properties": null,
                "geometry": {"type": "MultiPolygon", "coordinates": [
                    [[[-2.95, 53.40], [-2.94, 53.40], [-2.94, 53.41], [-2.95, 53.40]]],
                    [[[-2.93, 53.40], [-2.92, 53.40], [-2.92, 53.41], [-2.93, 53.40]]]
                ]}
            }
        ]
    }"#;

    #[test]
    fn test_parses_polygon_features_and_skips_points() {
        let source = parse_geojson_boundaries(WARDS).unwrap();
        assert_eq!(source.features.len(), 2);
        assert_eq!(source.declared_crs, None);

        let first = &source.features[0];
        assert_eq!(first.id.as_deref(), Some("7"));
        assert_eq!(first.properties["name"], "Riverside");
        assert_eq!(first.properties["code"], "12");
        assert_eq!(first.geometry.0.len(), 1);
        assert_eq!(first.geometry.0[0].interiors().len(), 1);

        let second = &source.features[1];
        assert_eq!(second.position, 2);
        assert!(second.properties.is_empty());
        assert_eq!(second.geometry.0.len(), 2);
    }

    #[test]
    fn test_bare_geometry_is_one_feature() {
        let payload = r#"{"type": "Polygon", "coordinates": [
            [[-2.99, 53.39], [-2.97, 53.39], [-2.97, 53.41], [-2.99, 53.39]]
        ]}"#;
        let source = parse_geojson_boundaries(payload).unwrap();
        assert_eq!(source.features.len(), 1);
        assert_eq!(source.features[0].position, 0);
        assert!(source.features[0].properties.is_empty());
        assert_eq!(source.features[0].geometry.0[0].exterior().0.len(), 4);
    }

    #[test]
    fn test_declared_crs_is_read() {
        let payload = r#"{
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::27700"}},
            "features": []
        }"#;
        let source = parse_geojson_boundaries(payload).unwrap();
        assert_eq!(source.declared_crs, Some(Crs::BritishNationalGrid));
        assert!(source.features.is_empty());
    }

    #[test]
    fn test_unsupported_declared_crs_is_error() {
        let payload = r#"{
            "type": "FeatureCollection",
            "crs": {"type": "name", "properties": {"name": "EPSG:32630"}},
            "features": []
        }"#;
        assert!(matches!(
            parse_geojson_boundaries(payload),
            Err(GeoJsonError::Crs(_))
        ));
    }

    #[test]
    fn test_only_points_is_error() {
        let payload = r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [0, 0]}}
        ]}"#;
        assert!(matches!(
            parse_geojson_boundaries(payload),
            Err(GeoJsonError::NoPolygons(1))
        ));
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            parse_geojson_boundaries("{not json"),
            Err(GeoJsonError::Json(_))
        ));
        assert!(matches!(
            parse_geojson_boundaries(r#"{"type": "Topology"}"#),
            Err(GeoJsonError::NotAFeatureCollection)
        ));

        let bad_ring = r#"{"type": "Feature", "geometry": {"type": "Polygon", "coordinates": [[["a", 1]]]}}"#;
        assert!(matches!(
            parse_geojson_boundaries(bad_ring),
            Err(GeoJsonError::InvalidFeature { index: 0, .. })
        ));
    }
}

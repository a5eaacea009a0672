//! Data writers for CSV, JSON and GeoJSON output.
//!
//! This module provides functions for writing pipeline results:
//! - The normalized sensor table as delimited text (file or in-memory string)
//! - A render layer as JSON for an external map renderer
//! - Reprojected boundary polygons as a GeoJSON FeatureCollection

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use super::loaders::SensorTable;
use super::transforms::Crs;
use crate::processors::boundaries::BoundarySet;
use crate::processors::compositor::RenderLayer;

/// Pseudo-path used in errors for in-memory output.
const IN_MEMORY: &str = "<memory>";

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// JSON serialization error.
    #[error("JSON write error for '{path}': {source}")]
    JsonError {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Delimiter must be a single ASCII character, got {0:?}")]
    InvalidDelimiter(char),
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Creates a buffered writer for the given path.
fn create_buffered_writer(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(BufWriter::new(file))
}

fn write_table_records<W: Write>(
    writer: W,
    table: &SensorTable,
    delimiter: char,
    path_str: &str,
) -> Result<W> {
    if !delimiter.is_ascii() {
        return Err(WriteError::InvalidDelimiter(delimiter));
    }
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(delimiter as u8)
        .from_writer(writer);

    let csv_err = |e: csv::Error| WriteError::CsvError {
        path: path_str.to_string(),
        source: e,
    };

    csv_writer.write_record(&table.headers).map_err(csv_err)?;
    for row in &table.rows {
        csv_writer.write_record(row).map_err(csv_err)?;
    }

    csv_writer.into_inner().map_err(|e| WriteError::WriteFile {
        path: path_str.to_string(),
        source: e.into_error(),
    })
}

/// Write a sensor table as delimited text.
///
/// The header row is written first, then every row in order. Cells are
/// written verbatim, quoted only where the delimiter or quotes require it.
///
/// # Arguments
///
/// * `path` - Output file path (parent directories will be created if needed)
/// * `table` - Table to write, typically from `NormalizedTable::to_sensor_table`
/// * `delimiter` - Field delimiter
///
/// # Errors
///
/// Returns an error if:
/// - The delimiter is not ASCII
/// - Parent directories cannot be created
/// - File cannot be created or written to
pub fn write_sensor_table(path: &Path, table: &SensorTable, delimiter: char) -> Result<()> {
    ensure_parent_dirs(path)?;
    let writer = create_buffered_writer(path)?;
    let path_str = path.display().to_string();

    let mut writer = write_table_records(writer, table, delimiter, &path_str)?;
    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// Render a sensor table as delimited text in memory.
pub fn sensor_table_to_string(table: &SensorTable, delimiter: char) -> Result<String> {
    let bytes = write_table_records(Vec::new(), table, delimiter, IN_MEMORY)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dirs(path)?;
    let mut writer = create_buffered_writer(path)?;
    let path_str = path.display().to_string();

    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| WriteError::JsonError {
        path: path_str.clone(),
        source: e,
    })?;
    writeln!(writer).map_err(|e| WriteError::WriteFile {
        path: path_str.clone(),
        source: e,
    })?;
    writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}

/// Write a render layer as pretty-printed JSON.
pub fn write_render_layer_json(path: &Path, layer: &RenderLayer) -> Result<()> {
    write_json(path, layer)
}

/// Convert a boundary set to a GeoJSON FeatureCollection.
///
/// Each polygon becomes one `MultiPolygon` feature with a `label` property.
/// The collection carries a named `crs` member unless the set is in WGS84.
pub fn boundaries_to_geojson(set: &BoundarySet) -> Value {
    let features: Vec<Value> = set
        .polygons
        .iter()
        .map(|polygon| {
            let coordinates: Vec<Vec<Vec<[f64; 2]>>> = polygon
                .geometry
                .0
                .iter()
                .map(|part| {
                    std::iter::once(part.exterior())
                        .chain(part.interiors())
                        .map(|ring| ring.coords().map(|c| [c.x, c.y]).collect())
                        .collect()
                })
                .collect();

            json!({
                "type": "Feature",
                "properties": { "label": polygon.label },
                "geometry": { "type": "MultiPolygon", "coordinates": coordinates },
            })
        })
        .collect();

    let mut collection = json!({
        "type": "FeatureCollection",
        "features": features,
    });
    if set.crs != Crs::Wgs84 {
        collection["crs"] = json!({
            "type": "name",
            "properties": { "name": set.crs.to_string() },
        });
    }
    collection
}

/// Write a boundary set as a GeoJSON file.
pub fn write_boundaries_geojson(path: &Path, set: &BoundarySet) -> Result<()> {
    write_json(path, &boundaries_to_geojson(set))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, SensorConfig};
    use crate::core::geojson::parse_geojson_boundaries;
    use crate::core::loaders::{load_sensor_table, read_sensor_table};
    use crate::processors::boundaries::BoundaryPolygon;
    use crate::processors::compositor::{render, ColorConfig, DisplayParameter};
    use crate::processors::geometry::build_points;
    use crate::processors::normalizer::normalize;
    use geo::{polygon, MultiPolygon};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn create_test_table() -> SensorTable {
        let data = "lat,lon,sensor_id,pm25,note\n\
                    51.4,-2.9,,10,\"kerb, north side\"\n\
                    bad,bad,,5,x\n\
                    51.45,-2.95,S2,7,\n";
        read_sensor_table(data.as_bytes(), ',').unwrap()
    }

    fn create_test_boundaries(crs: Crs) -> BoundarySet {
        BoundarySet {
            source: PathBuf::from("wards.geojson"),
            source_crs: crs,
            crs,
            polygons: vec![BoundaryPolygon {
                label: "Riverside".into(),
                geometry: MultiPolygon::new(vec![polygon![
                    (x: -2.99, y: 53.39),
                    (x: -2.97, y: 53.39),
                    (x: -2.97, y: 53.41),
                ]]),
            }],
        }
    }

    #[test]
    fn test_write_sensor_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sensors_export.csv");
        let normalized = normalize(&create_test_table(), &SensorConfig::default()).unwrap();

        write_sensor_table(&path, &normalized.to_sensor_table(), ',').unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "lat,lon,sensor_id,pm25,note");
        assert_eq!(lines.len(), 3); // header + 2 surviving rows
        assert_eq!(lines[1], "51.4,-2.9,,10,\"kerb, north side\"");
        assert_eq!(lines[2], "51.45,-2.95,S2,7,");
    }

    #[test]
    fn test_export_then_reingest_drops_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("export.csv");
        let first = normalize(&create_test_table(), &SensorConfig::default()).unwrap();
        write_sensor_table(&path, &first.to_sensor_table(), ',').unwrap();

        let reloaded = load_sensor_table(&path, ',').unwrap();
        let second = normalize(&reloaded, &SensorConfig::default()).unwrap();
        assert_eq!(second.report.excluded(), 0);
        assert_eq!(second.len(), first.len());
        assert_eq!(second.readings[1].lon, first.readings[1].lon);
        assert_eq!(second.readings[1].lat, first.readings[1].lat);
        assert_eq!(second.readings[0].cells[4], "kerb, north side");
    }

    #[test]
    fn test_sensor_table_to_string() {
        let table = read_sensor_table("a,b\n1,2\n".as_bytes(), ',').unwrap();
        assert_eq!(sensor_table_to_string(&table, ',').unwrap(), "a,b\n1,2\n");
        assert_eq!(sensor_table_to_string(&table, ';').unwrap(), "a;b\n1;2\n");
        assert!(matches!(
            sensor_table_to_string(&table, '→'),
            Err(WriteError::InvalidDelimiter('→'))
        ));
    }

    #[test]
    fn test_write_render_layer_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layer.json");
        let config = PipelineConfig::default();
        let normalized = normalize(&create_test_table(), &config.sensors).unwrap();
        let points = build_points(&normalized);
        let param = DisplayParameter::from_config("pm25", &config.display);
        let boundaries = create_test_boundaries(Crs::Wgs84);
        let colors = ColorConfig {
            outline: &config.outline,
            map: &config.map,
        };
        let layer = render(&points, &param, colors, Some(&boundaries.polygons)).unwrap();

        write_render_layer_json(&path, &layer).unwrap();

        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["crs"], "EPSG:4326");
        assert_eq!(value["parameter"]["field"], "pm25");
        assert_eq!(value["parameter"]["mapping"]["mode"], "continuous");
        assert_eq!(value["parameter"]["mapping"]["scale"], "darkmint");
        assert_eq!(value["points"].as_array().unwrap().len(), 2);
        assert_eq!(value["points"][1]["sensor_id"], "S2");
        assert!(value["points"][0].get("sensor_id").is_none());
        assert_eq!(value["outlines"][0]["label"], "Riverside");
        assert_eq!(value["outline_style"]["color"], "#cccccc");
        assert_eq!(value["viewport"]["style"], "carto-positron");
    }

    #[test]
    fn test_boundaries_geojson_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wards_wgs84.geojson");
        let set = create_test_boundaries(Crs::Wgs84);

        write_boundaries_geojson(&path, &set).unwrap();

        let source = parse_geojson_boundaries(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(source.declared_crs, None);
        assert_eq!(source.features.len(), 1);
        assert_eq!(source.features[0].properties["label"], "Riverside");
        let read = source.features[0].geometry.0[0].exterior().coords();
        let written = set.polygons[0].geometry.0[0].exterior().coords();
        for (a, b) in read.zip(written) {
            assert!((a.x - b.x).abs() < 1e-12 && (a.y - b.y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_boundaries_geojson_names_projected_crs() {
        let value = boundaries_to_geojson(&create_test_boundaries(Crs::WebMercator));
        assert_eq!(value["crs"]["properties"]["name"], "EPSG:3857");
    }
}

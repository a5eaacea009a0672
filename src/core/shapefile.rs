//! ESRI Shapefile boundary reader.
//!
//! Reads polygon shapes (types 5, 15 and 25; Z and M values are ignored) from
//! the `.shp` file, attributes from the `.dbf` sidecar, and the CRS from the
//! `.prj` sidecar. Sidecars are optional. Records are matched to attributes by
//! position, as the format requires.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use geo::{Contains, Coord, LineString, MultiPolygon, Polygon, Winding};
use log::{debug, warn};
use thiserror::Error;

use super::loaders::{BoundaryFeature, BoundarySource};
use super::transforms::{Crs, CrsError};

const SHP_FILE_CODE: i32 = 9994;
const SHP_HEADER_LEN: usize = 100;
const DBF_FIELD_TERMINATOR: u8 = 0x0D;

/// Errors that can occur while reading a shapefile.
#[derive(Error, Debug)]
pub enum ShapefileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid shapefile header: {0}")]
    InvalidHeader(String),

    #[error("Unsupported shape type {0} (expected polygons)")]
    UnsupportedShapeType(i32),

    #[error("Truncated record at byte {0}")]
    Truncated(usize),

    #[error("Invalid dbf file: {0}")]
    InvalidDbf(String),

    #[error("prj: {0}")]
    Crs(#[from] CrsError),
}

pub type Result<T> = std::result::Result<T, ShapefileError>;

fn read_i32_be(bytes: &[u8], offset: usize) -> Result<i32> {
    bytes
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .map(i32::from_be_bytes)
        .ok_or(ShapefileError::Truncated(offset))
}

fn read_i32_le(bytes: &[u8], offset: usize) -> Result<i32> {
    bytes
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .map(i32::from_le_bytes)
        .ok_or(ShapefileError::Truncated(offset))
}

fn read_f64_le(bytes: &[u8], offset: usize) -> Result<f64> {
    bytes
        .get(offset..offset + 8)
        .and_then(|s| s.try_into().ok())
        .map(f64::from_le_bytes)
        .ok_or(ShapefileError::Truncated(offset))
}

fn read_count(bytes: &[u8], offset: usize) -> Result<usize> {
    let value = read_i32_le(bytes, offset)?;
    usize::try_from(value).map_err(|_| ShapefileError::Truncated(offset))
}

/// Locate a sidecar next to `path`, trying lower then upper case extensions.
fn sidecar(path: &Path, ext: &str) -> Option<PathBuf> {
    [ext.to_ascii_lowercase(), ext.to_ascii_uppercase()]
        .into_iter()
        .map(|e| path.with_extension(e))
        .find(|p| p.is_file())
}

/// Paths of the `.shp` file and whichever sidecars exist.
pub fn shapefile_parts(path: &Path) -> Vec<PathBuf> {
    let mut parts = vec![path.to_path_buf()];
    parts.extend(["dbf", "prj", "shx"].iter().filter_map(|ext| sidecar(path, ext)));
    parts
}

/// Read polygon features from a `.shp` file and its sidecars.
pub fn load_shapefile_boundaries<P: AsRef<Path>>(path: P) -> Result<BoundarySource> {
    let path = path.as_ref();
    let shapes = parse_shp(&fs::read(path)?)?;

    let records = match sidecar(path, "dbf") {
        Some(dbf) => parse_dbf(&fs::read(dbf)?)?,
        None => {
            debug!("no dbf next to {}, features will be unlabeled", path.display());
            Vec::new()
        }
    };
    if !records.is_empty() && records.len() != shapes.len() {
        warn!(
            "{}: {} shapes but {} dbf records; matching by position",
            path.display(),
            shapes.len(),
            records.len()
        );
    }

    let declared_crs = match sidecar(path, "prj") {
        Some(prj) => Some(Crs::from_wkt(&fs::read_to_string(prj)?)?),
        None => None,
    };

    let features = shapes
        .into_iter()
        .enumerate()
        .filter_map(|(i, shape)| {
            shape.map(|geometry| BoundaryFeature {
                id: None,
                position: i,
                properties: records.get(i).cloned().unwrap_or_default(),
                geometry,
            })
        })
        .collect();

    Ok(BoundarySource {
        features,
        declared_crs,
    })
}

/// Parse `.shp` bytes into one entry per record; null shapes are `None`.
pub fn parse_shp(bytes: &[u8]) -> Result<Vec<Option<MultiPolygon<f64>>>> {
    if bytes.len() < SHP_HEADER_LEN {
        return Err(ShapefileError::InvalidHeader(format!(
            "file is {} bytes, header needs {SHP_HEADER_LEN}",
            bytes.len()
        )));
    }
    let code = read_i32_be(bytes, 0)?;
    if code != SHP_FILE_CODE {
        return Err(ShapefileError::InvalidHeader(format!("file code {code}")));
    }
    let shape_type = read_i32_le(bytes, 32)?;
    if !matches!(shape_type, 0 | 5 | 15 | 25) {
        return Err(ShapefileError::UnsupportedShapeType(shape_type));
    }

    let mut shapes = Vec::new();
    let mut offset = SHP_HEADER_LEN;
    while offset + 8 <= bytes.len() {
        let content_words = read_i32_be(bytes, offset + 4)?;
        let content_len = usize::try_from(content_words)
            .map_err(|_| ShapefileError::Truncated(offset))?
            * 2;
        let start = offset + 8;
        let end = start + content_len;
        let content = bytes
            .get(start..end)
            .ok_or(ShapefileError::Truncated(offset))?;

        shapes.push(parse_polygon_record(content).map_err(|e| match e {
            ShapefileError::Truncated(at) => ShapefileError::Truncated(start + at),
            other => other,
        })?);
        offset = end;
    }

    Ok(shapes)
}

fn parse_polygon_record(content: &[u8]) -> Result<Option<MultiPolygon<f64>>> {
    let shape_type = read_i32_le(content, 0)?;
    match shape_type {
        0 => return Ok(None),
        5 | 15 | 25 => {}
        other => return Err(ShapefileError::UnsupportedShapeType(other)),
    }

    // Skip type and bounding box.
    let num_parts = read_count(content, 36)?;
    let num_points = read_count(content, 40)?;
    let parts_at = 44;

    // Header counts must fit in the record.
    let needed = num_parts
        .checked_mul(4)
        .zip(num_points.checked_mul(16))
        .and_then(|(parts, points)| parts.checked_add(points))
        .and_then(|body| body.checked_add(parts_at));
    if needed.map_or(true, |n| n > content.len()) {
        return Err(ShapefileError::Truncated(36));
    }
    let points_at = parts_at + 4 * num_parts;

    let mut starts = Vec::with_capacity(num_parts);
    for p in 0..num_parts {
        starts.push(read_count(content, parts_at + 4 * p)?);
    }

    let mut rings = Vec::with_capacity(num_parts);
    for (p, &first) in starts.iter().enumerate() {
        let last = starts.get(p + 1).copied().unwrap_or(num_points);
        if first > last || last > num_points {
            return Err(ShapefileError::Truncated(parts_at + 4 * p));
        }
        let mut coords = Vec::with_capacity(last - first);
        for i in first..last {
            let at = points_at + 16 * i;
            coords.push(Coord {
                x: read_f64_le(content, at)?,
                y: read_f64_le(content, at + 8)?,
            });
        }
        rings.push(LineString::new(coords));
    }

    Ok(Some(assemble_rings(rings)))
}

/// Clockwise rings are exteriors; counter-clockwise rings are holes of the
/// exterior that contains them.
fn assemble_rings(rings: Vec<LineString<f64>>) -> MultiPolygon<f64> {
    let mut exteriors: Vec<(LineString<f64>, Vec<LineString<f64>>)> = Vec::new();
    let mut holes = Vec::new();

    for ring in rings {
        if ring.0.len() < 4 {
            continue;
        }
        if ring.is_cw() {
            exteriors.push((ring, Vec::new()));
        } else {
            holes.push(ring);
        }
    }

    for hole in holes {
        let probe = hole.0[0];
        let owner = exteriors
            .iter()
            .position(|(outer, _)| Polygon::new(outer.clone(), Vec::new()).contains(&probe));
        match owner {
            Some(i) => exteriors[i].1.push(hole),
            // A lone counter-clockwise ring is an exterior drawn the wrong way.
            None => exteriors.push((hole, Vec::new())),
        }
    }

    MultiPolygon::new(
        exteriors
            .into_iter()
            .map(|(outer, inner)| Polygon::new(outer, inner))
            .collect(),
    )
}

#[derive(Debug)]
struct DbfField {
    name: String,
    length: usize,
}

/// Parse dBase III records into name/value maps (values trimmed).
pub fn parse_dbf(bytes: &[u8]) -> Result<Vec<BTreeMap<String, String>>> {
    if bytes.len() < 32 {
        return Err(ShapefileError::InvalidDbf("header shorter than 32 bytes".to_string()));
    }
    let num_records = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let record_len = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;

    if num_records > 0 && record_len == 0 {
        return Err(ShapefileError::InvalidDbf("record length is zero".to_string()));
    }
    let needed = num_records
        .checked_mul(record_len)
        .and_then(|body| body.checked_add(header_len));
    if needed.map_or(true, |n| n > bytes.len()) {
        return Err(ShapefileError::InvalidDbf(format!(
            "{num_records} records of {record_len} bytes do not fit in {} bytes",
            bytes.len()
        )));
    }

    let mut fields = Vec::new();
    let mut offset = 32;
    while offset < header_len && bytes.get(offset) != Some(&DBF_FIELD_TERMINATOR) {
        let desc = bytes
            .get(offset..offset + 32)
            .ok_or_else(|| ShapefileError::InvalidDbf(format!("field descriptor at {offset}")))?;
        let name_end = desc[..11].iter().position(|&b| b == 0).unwrap_or(11);
        fields.push(DbfField {
            name: String::from_utf8_lossy(&desc[..name_end]).trim().to_string(),
            length: desc[16] as usize,
        });
        offset += 32;
    }

    let mut records = Vec::with_capacity(num_records);
    for r in 0..num_records {
        let start = header_len + r * record_len;
        let record = bytes
            .get(start..start + record_len)
            .ok_or_else(|| ShapefileError::InvalidDbf(format!("record {r} truncated")))?;

        let mut values = BTreeMap::new();
        if record.first() != Some(&b'*') {
            let mut at = 1;
            for field in &fields {
                let raw = record
                    .get(at..at + field.length)
                    .ok_or_else(|| ShapefileError::InvalidDbf(format!("record {r} truncated")))?;
                let value = String::from_utf8_lossy(raw).trim().to_string();
                if !value.is_empty() {
                    values.insert(field.name.clone(), value);
                }
                at += field.length;
            }
        }
        records.push(values);
    }

    Ok(records)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_shp_polygon_with_hole() {
        let outer = vec![(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0), (0.0, 0.0)];
        let hole = vec![(2.0, 2.0), (4.0, 2.0), (4.0, 4.0), (2.0, 4.0), (2.0, 2.0)];
        let bytes = shp_bytes(&[vec![outer, hole]]);

        let shapes = parse_shp(&bytes).unwrap();
        assert_eq!(shapes.len(), 1);
        let mp = shapes[0].as_ref().unwrap();
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].exterior().0.len(), 5);
        assert_eq!(mp.0[0].interiors().len(), 1);
    }

    #[test]
    fn test_parse_shp_two_exteriors_make_multipolygon() {
        let a = vec![(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0), (0.0, 0.0)];
        let b = vec![(5.0, 5.0), (5.0, 6.0), (6.0, 6.0), (6.0, 5.0), (5.0, 5.0)];
        let shapes = parse_shp(&shp_bytes(&[vec![a, b]])).unwrap();
        assert_eq!(shapes[0].as_ref().unwrap().0.len(), 2);
    }

    #[test]
    fn test_parse_shp_rejects_bad_header() {
        assert!(matches!(
            parse_shp(&[0u8; 10]),
            Err(ShapefileError::InvalidHeader(_))
        ));

        let mut bytes = shp_bytes(&[]);
        bytes[0..4].copy_from_slice(&1234i32.to_be_bytes());
        assert!(matches!(parse_shp(&bytes), Err(ShapefileError::InvalidHeader(_))));
    }

    #[test]
    fn test_parse_shp_rejects_point_files() {
        let mut bytes = shp_bytes(&[]);
        bytes[32..36].copy_from_slice(&1i32.to_le_bytes());
        assert!(matches!(
            parse_shp(&bytes),
            Err(ShapefileError::UnsupportedShapeType(1))
        ));
    }

    #[test]
    fn test_parse_shp_truncated_record() {
        let mut bytes = shp_bytes(&liverpool_wards());
        bytes.truncate(bytes.len() - 20);
        assert!(matches!(parse_shp(&bytes), Err(ShapefileError::Truncated(_))));
    }

    #[test]
    fn test_parse_shp_rejects_oversized_counts() {
        let mut bytes = shp_bytes(&liverpool_wards());
        // First record content starts at 108; num_parts sits 36 bytes in.
        bytes[144..148].copy_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(parse_shp(&bytes), Err(ShapefileError::Truncated(_))));

        let mut bytes = shp_bytes(&liverpool_wards());
        bytes[148..152].copy_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(parse_shp(&bytes), Err(ShapefileError::Truncated(_))));
    }

    #[test]
    fn test_parse_dbf_rejects_oversized_counts() {
        let mut bytes = dbf_bytes("WD_NAME", 12, &["Central"]);
        bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(parse_dbf(&bytes), Err(ShapefileError::InvalidDbf(_))));

        let mut bytes = dbf_bytes("WD_NAME", 12, &["Central"]);
        bytes[10..12].copy_from_slice(&0u16.to_le_bytes());
        assert!(matches!(parse_dbf(&bytes), Err(ShapefileError::InvalidDbf(_))));
    }

    #[test]
    fn test_null_shapes_keep_file_positions() {
        let wards = liverpool_wards();
        let bytes = shp_bytes(&[wards[0].clone(), Vec::new(), wards[1].clone()]);
        let shapes = parse_shp(&bytes).unwrap();
        assert_eq!(shapes.len(), 3);
        assert!(shapes[1].is_none());

        let dir = tempdir().unwrap();
        let shp = dir.path().join("gaps.shp");
        fs::write(&shp, bytes).unwrap();
        let source = load_shapefile_boundaries(&shp).unwrap();
        let positions: Vec<usize> = source.features.iter().map(|f| f.position).collect();
        assert_eq!(positions, vec![0, 2]);
    }

    #[test]
    fn test_parse_dbf() {
        let records = parse_dbf(&dbf_bytes("WD_NAME", 12, &["Central", "", "Everton"])).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["WD_NAME"], "Central");
        assert!(records[1].is_empty());
        assert_eq!(records[2]["WD_NAME"], "Everton");
    }

    #[test]
    fn test_load_shapefile_with_sidecars() {
        let dir = tempdir().unwrap();
        let shp = write_liverpool_wards(dir.path(), "WardsPolygon");

        let source = load_shapefile_boundaries(&shp).unwrap();
        assert_eq!(source.declared_crs, Some(Crs::BritishNationalGrid));
        assert_eq!(source.features.len(), 2);
        assert_eq!(source.features[0].properties["WD_NAME"], "Central");
        assert_eq!(source.features[1].properties["WD_NAME"], "Everton");

        let parts = shapefile_parts(&shp);
        assert_eq!(parts.len(), 3);
    }

    #[test]
    fn test_load_shapefile_without_sidecars() {
        let dir = tempdir().unwrap();
        let shp = dir.path().join("bare.shp");
        fs::write(&shp, shp_bytes(&liverpool_wards())).unwrap();

        let source = load_shapefile_boundaries(&shp).unwrap();
        assert_eq!(source.declared_crs, None);
        assert!(source.features.iter().all(|f| f.properties.is_empty()));
    }
}

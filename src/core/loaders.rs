//! Loader for the raw sensor table.
//!
//! The sensor feed is a delimited text table with a header row. Cells are kept
//! as their original text so the normalized table can be exported without
//! reformatting anything the normalizer did not touch.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use geo::MultiPolygon;
use thiserror::Error;

use super::transforms::Crs;

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Empty file: {0}")]
    EmptyFile(PathBuf),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Row {row} has {found} fields, header has {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Delimiter must be a single ASCII character, got {0:?}")]
    InvalidDelimiter(char),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Raw sensor table: header plus one text cell per column and row.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorTable {
    /// Column names in file order.
    pub headers: Vec<String>,
    /// Data rows, each exactly `headers.len()` cells long.
    pub rows: Vec<Vec<String>>,
    /// Source file path.
    pub source_path: Option<PathBuf>,
}

impl SensorTable {
    /// Creates an empty table with the given header.
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
            source_path: None,
        }
    }

    /// Number of data rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no data rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first column named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Appends a row, padding or rejecting it to match the header width.
    pub fn push_row(&mut self, mut row: Vec<String>) -> Result<()> {
        let expected = self.headers.len();
        if row.len() > expected {
            return Err(LoaderError::RaggedRow {
                row: self.rows.len() + 1,
                expected,
                found: row.len(),
            });
        }
        row.resize(expected, String::new());
        self.rows.push(row);
        Ok(())
    }

    /// Resolves column names to indices; the error lists every absent name.
    pub fn require_columns(&self, names: &[&str]) -> Result<Vec<usize>> {
        let missing: Vec<&str> = names
            .iter()
            .copied()
            .filter(|name| self.column_index(name).is_none())
            .collect();

        if !missing.is_empty() {
            return Err(LoaderError::MissingColumns(missing.join(", ")));
        }

        Ok(names
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect())
    }
}

/// One polygon feature read from a boundary file, still in its source CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryFeature {
    /// Feature id, when the format carries one.
    pub id: Option<String>,
    /// 0-based record index in the source file, counting skipped records.
    pub position: usize,
    /// Attribute values rendered as text.
    pub properties: BTreeMap<String, String>,
    /// Polygon geometry; single polygons are wrapped.
    pub geometry: MultiPolygon<f64>,
}

/// Boundary features plus the CRS the file declares, if any.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundarySource {
    pub features: Vec<BoundaryFeature>,
    pub declared_crs: Option<Crs>,
}

fn delimiter_byte(delimiter: char) -> Result<u8> {
    if delimiter.is_ascii() {
        Ok(delimiter as u8)
    } else {
        Err(LoaderError::InvalidDelimiter(delimiter))
    }
}

/// Read a sensor table from any reader.
///
/// Short rows are padded with empty cells (treated as missing values later);
/// rows wider than the header are rejected.
pub fn read_sensor_table<R: Read>(reader: R, delimiter: char) -> Result<SensorTable> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter_byte(delimiter)?)
        .from_reader(reader);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(LoaderError::EmptyFile(PathBuf::new()));
    }

    let mut table = SensorTable::new(headers);
    for result in reader.records() {
        let record = result?;
        table.push_row(record.iter().map(str::to_string).collect())?;
    }

    Ok(table)
}

/// Load a sensor table from a delimited text file.
///
/// # Arguments
///
/// * `path` - Path to the sensor file
/// * `delimiter` - Field delimiter (`,` for CSV)
///
/// # Errors
///
/// Returns an error if the file cannot be opened, has no header row, or
/// contains a row the CSV parser rejects.
pub fn load_sensor_table<P: AsRef<Path>>(path: P, delimiter: char) -> Result<SensorTable> {
    let path = path.as_ref();
    let file = File::open(path)?;

    let mut table = read_sensor_table(BufReader::new(file), delimiter).map_err(|e| match e {
        LoaderError::EmptyFile(_) => LoaderError::EmptyFile(path.to_path_buf()),
        other => other,
    })?;
    table.source_path = Some(path.to_path_buf());

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_sensor_table() -> Result<()> {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "lat,lon,sensor_id,pm25,temp").unwrap();
        writeln!(file, "51.4,-2.9,,10,22.0").unwrap();
        writeln!(file, "51.45,-2.95,S2,7,20.1").unwrap();
        file.flush().unwrap();

        let table = load_sensor_table(file.path(), ',')?;
        assert_eq!(table.headers, vec!["lat", "lon", "sensor_id", "pm25", "temp"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0][2], "");
        assert_eq!(table.rows[1][2], "S2");
        assert_eq!(table.source_path.as_deref(), Some(file.path()));

        Ok(())
    }

    #[test]
    fn test_short_rows_are_padded() -> Result<()> {
        let data = "lat,lon,pm25\n51.4,-2.9\n";
        let table = read_sensor_table(data.as_bytes(), ',')?;
        assert_eq!(table.rows[0], vec!["51.4", "-2.9", ""]);
        Ok(())
    }

    #[test]
    fn test_wide_rows_are_rejected() {
        let data = "lat,lon\n51.4,-2.9,extra\n";
        let err = read_sensor_table(data.as_bytes(), ',').unwrap_err();
        assert!(matches!(
            err,
            LoaderError::RaggedRow {
                row: 1,
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn test_header_only_table_is_empty_not_error() -> Result<()> {
        let table = read_sensor_table("lat,lon,pm25\n".as_bytes(), ',')?;
        assert!(table.is_empty());
        assert_eq!(table.headers.len(), 3);
        Ok(())
    }

    #[test]
    fn test_empty_file_is_error() {
        let file = NamedTempFile::new().unwrap();
        let err = load_sensor_table(file.path(), ',').unwrap_err();
        assert!(matches!(err, LoaderError::EmptyFile(p) if p == file.path()));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_sensor_table("/nonexistent/sensors.csv", ',').unwrap_err();
        assert!(matches!(err, LoaderError::Io(_)));
    }

    #[test]
    fn test_semicolon_delimiter() -> Result<()> {
        let table = read_sensor_table("lat;lon\n1.5;2.5\n".as_bytes(), ';')?;
        assert_eq!(table.rows[0], vec!["1.5", "2.5"]);
        Ok(())
    }

    #[test]
    fn test_require_columns() {
        let table = SensorTable::new(vec!["lat".into(), "lon".into(), "pm25".into()]);
        assert_eq!(table.require_columns(&["lon", "lat"]).unwrap(), vec![1, 0]);

        let err = table.require_columns(&["lat", "latitude", "x"]).unwrap_err();
        match err {
            LoaderError::MissingColumns(cols) => assert_eq!(cols, "latitude, x"),
            other => panic!("unexpected error: {other}"),
        }
    }
}

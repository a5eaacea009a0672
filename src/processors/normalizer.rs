//! Coordinate normalization of raw sensor rows.
//!
//! Normalization runs in three steps:
//! 1. [`resolve_axes`] decides which column carries longitude and which
//!    latitude, applying the axis swap when it is enabled.
//! 2. Every coordinate cell is coerced to `f64`; anything that does not parse
//!    to a finite number is treated as missing.
//! 3. Rows with a missing or out-of-range coordinate are dropped. Survivors
//!    keep their input order.
//!
//! The result can be turned back into a [`SensorTable`] whose coordinate
//! columns hold the corrected values, so normalizing that table again with
//! the swap disabled is a no-op.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, info};

use crate::config::SensorConfig;
use crate::core::loaders::{Result, SensorTable};

/// Valid longitude range in degrees.
pub const LON_RANGE: (f64, f64) = (-180.0, 180.0);

/// Valid latitude range in degrees.
pub const LAT_RANGE: (f64, f64) = (-90.0, 90.0);

/// Which source column plays which coordinate role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisRoles {
    /// Column read as longitude.
    pub lon_column: String,
    /// Column read as latitude.
    pub lat_column: String,
}

impl AxisRoles {
    /// Exchange the two roles.
    pub fn swapped(self) -> Self {
        Self {
            lon_column: self.lat_column,
            lat_column: self.lon_column,
        }
    }
}

/// Resolve the coordinate columns, applying the configured axis swap.
///
/// With `swap_axes` set the column named as latitude is read as longitude and
/// vice versa. This happens before any numeric coercion.
pub fn resolve_axes(config: &SensorConfig) -> AxisRoles {
    let roles = AxisRoles {
        lon_column: config.lon_column.clone(),
        lat_column: config.lat_column.clone(),
    };
    if config.swap_axes {
        debug!(
            "swapping axes: '{}' read as longitude, '{}' as latitude",
            roles.lat_column, roles.lon_column
        );
        roles.swapped()
    } else {
        roles
    }
}

/// Coerce a cell to a finite number; anything else is missing.
pub fn coerce_numeric(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Why a row was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DropReason {
    /// A coordinate cell is empty.
    MissingCoordinate,
    /// A coordinate cell is not a finite number.
    NonNumericCoordinate,
    /// A coordinate is outside the valid longitude/latitude range.
    OutOfRange,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DropReason::MissingCoordinate => "missing coordinate",
            DropReason::NonNumericCoordinate => "non-numeric coordinate",
            DropReason::OutOfRange => "coordinate out of range",
        };
        f.write_str(text)
    }
}

/// Counts produced by one normalization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    /// Data rows in the input table.
    pub input_rows: usize,
    /// Rows that survived.
    pub retained: usize,
    /// Dropped rows per reason.
    pub dropped: BTreeMap<DropReason, usize>,
}

impl NormalizeReport {
    /// Total dropped rows; always `input_rows - retained`.
    pub fn excluded(&self) -> usize {
        self.dropped.values().sum()
    }
}

/// One validated sensor row.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Zero-based index of the row in the input table.
    pub row: usize,
    /// Sensor identifier, when the id column exists and the cell is non-empty.
    pub sensor_id: Option<String>,
    /// Longitude in degrees.
    pub lon: f64,
    /// Latitude in degrees.
    pub lat: f64,
    /// Numeric measurement values keyed by column name. Cells that failed
    /// coercion are absent.
    pub measurements: BTreeMap<String, f64>,
    /// Original cells of the row, in header order.
    pub cells: Vec<String>,
}

impl SensorReading {
    /// Value of the named measurement, if present.
    pub fn measurement(&self, name: &str) -> Option<f64> {
        self.measurements.get(name).copied()
    }
}

/// Normalized sensor table: the surviving rows plus the column layout.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub headers: Vec<String>,
    /// Column holding longitude in [`NormalizedTable::corrected_table`].
    pub lon_index: usize,
    /// Column holding latitude in [`NormalizedTable::corrected_table`].
    pub lat_index: usize,
    pub readings: Vec<SensorReading>,
    pub report: NormalizeReport,
}

impl NormalizedTable {
    #[inline]
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Names of the measurement columns, in header order.
    pub fn measurement_columns(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for reading in &self.readings {
            for name in reading.measurements.keys() {
                if !seen.contains(&name.as_str()) {
                    seen.push(name.as_str());
                }
            }
        }
        self.headers
            .iter()
            .map(String::as_str)
            .filter(|h| seen.contains(h))
            .collect()
    }

    /// True if a column named `name` exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    /// The first `n` readings.
    pub fn head(&self, n: usize) -> &[SensorReading] {
        &self.readings[..n.min(self.readings.len())]
    }

    /// Rebuild a raw table from the surviving rows, cells untouched.
    ///
    /// Normalizing the result with the same configuration gives back the
    /// same readings.
    pub fn to_sensor_table(&self) -> SensorTable {
        let mut table = SensorTable::new(self.headers.clone());
        table.rows = self.readings.iter().map(|r| r.cells.clone()).collect();
        table
    }

    /// Surviving rows with the corrected longitude and latitude written into
    /// the configured coordinate columns. Used for display.
    pub fn corrected_table(&self) -> SensorTable {
        let mut table = SensorTable::new(self.headers.clone());
        table.rows = self
            .readings
            .iter()
            .map(|reading| {
                let mut cells = reading.cells.clone();
                cells[self.lon_index] = reading.lon.to_string();
                cells[self.lat_index] = reading.lat.to_string();
                cells
            })
            .collect();
        table
    }
}

fn coordinate(cell: &str, range: (f64, f64)) -> std::result::Result<f64, DropReason> {
    if cell.trim().is_empty() {
        return Err(DropReason::MissingCoordinate);
    }
    let value = coerce_numeric(cell).ok_or(DropReason::NonNumericCoordinate)?;
    if value < range.0 || value > range.1 {
        return Err(DropReason::OutOfRange);
    }
    Ok(value)
}

/// Normalize a raw sensor table.
///
/// # Arguments
///
/// * `table` - Raw table as loaded from the sensor file
/// * `config` - Column names and the axis swap toggle
///
/// # Errors
///
/// Returns [`LoaderError::MissingColumns`](crate::core::loaders::LoaderError)
/// if either coordinate column is absent from the header. Invalid rows are
/// never an error; they are dropped and counted in the report.
pub fn normalize(table: &SensorTable, config: &SensorConfig) -> Result<NormalizedTable> {
    let roles = resolve_axes(config);
    let indices = table.require_columns(&[roles.lon_column.as_str(), roles.lat_column.as_str()])?;
    let (lon_src, lat_src) = (indices[0], indices[1]);

    // Corrected values are shown under the configured names.
    let lon_out = table.column_index(&config.lon_column).unwrap_or(lon_src);
    let lat_out = table.column_index(&config.lat_column).unwrap_or(lat_src);

    let id_index = config
        .id_column
        .as_deref()
        .and_then(|name| table.column_index(name));

    let mut measurement_columns: Vec<(usize, &str)> = Vec::new();
    for (idx, name) in table.headers.iter().enumerate() {
        let is_reserved = idx == lon_src || idx == lat_src || Some(idx) == id_index;
        let is_duplicate = measurement_columns.iter().any(|(_, n)| *n == name);
        if !is_reserved && !is_duplicate {
            measurement_columns.push((idx, name.as_str()));
        }
    }

    let mut report = NormalizeReport {
        input_rows: table.len(),
        ..Default::default()
    };
    let mut readings = Vec::with_capacity(table.len());

    for (row, cells) in table.rows.iter().enumerate() {
        let coords = coordinate(&cells[lon_src], LON_RANGE)
            .and_then(|lon| coordinate(&cells[lat_src], LAT_RANGE).map(|lat| (lon, lat)));

        let (lon, lat) = match coords {
            Ok(pair) => pair,
            Err(reason) => {
                *report.dropped.entry(reason).or_insert(0) += 1;
                continue;
            }
        };

        let sensor_id = id_index
            .map(|idx| cells[idx].trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let measurements = measurement_columns
            .iter()
            .filter_map(|&(idx, name)| coerce_numeric(&cells[idx]).map(|v| (name.to_string(), v)))
            .collect();

        readings.push(SensorReading {
            row,
            sensor_id,
            lon,
            lat,
            measurements,
            cells: cells.clone(),
        });
    }

    report.retained = readings.len();
    for (reason, count) in &report.dropped {
        debug!("dropped {count} rows: {reason}");
    }
    info!(
        "Normalized {} rows: {} retained, {} dropped",
        report.input_rows,
        report.retained,
        report.excluded()
    );

    Ok(NormalizedTable {
        headers: table.headers.clone(),
        lon_index: lon_out,
        lat_index: lat_out,
        readings,
        report,
    })
}

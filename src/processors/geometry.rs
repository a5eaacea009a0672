//! Point geometries for normalized sensor readings.

use geo::{BoundingRect, MultiPoint, Point, Rect};

use super::normalizer::{NormalizedTable, SensorReading};
use crate::core::transforms::Crs;

/// CRS of every sensor point.
pub const SENSOR_CRS: Crs = Crs::Wgs84;

/// A reading paired with its point geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorPoint<'a> {
    pub reading: &'a SensorReading,
    /// x = longitude, y = latitude.
    pub geometry: Point<f64>,
}

/// The point layer built from one normalized table.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSet<'a> {
    pub crs: Crs,
    /// Column names of the source table.
    pub columns: &'a [String],
    pub points: Vec<SensorPoint<'a>>,
}

impl<'a> PointSet<'a> {
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True if the source table has a column named `name`.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Bounding box of all points, `None` when empty.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        let multi: MultiPoint<f64> = self.points.iter().map(|p| p.geometry).collect();
        multi.bounding_rect()
    }
}

/// Build WGS84 point geometries for every reading, in table order.
///
/// An empty table gives an empty point set.
pub fn build_points(table: &NormalizedTable) -> PointSet<'_> {
    let points = table
        .readings
        .iter()
        .map(|reading| SensorPoint {
            reading,
            geometry: Point::new(reading.lon, reading.lat),
        })
        .collect();

    PointSet {
        crs: SENSOR_CRS,
        columns: &table.headers,
        points,
    }
}

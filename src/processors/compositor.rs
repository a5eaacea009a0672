//! Map composition: turns a point layer, a display parameter and optional
//! boundaries into a [`RenderLayer`].
//!
//! The compositor is pure. For the same inputs it produces the same points in
//! the same order with the same colors, and the same outline traces in
//! boundary order.

use geo::{Point, Rect};
use log::debug;
use serde::Serialize;
use thiserror::Error;

use super::boundaries::{merge_rects, BoundaryPolygon};
use super::color::{ColorError, ColorScale, Rgb};
use super::geometry::PointSet;
use crate::config::{DisplayConfig, DisplayPolicy, MapConfig, OutlineStyle, ScaleName};
use crate::core::transforms::Crs;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompositorError {
    #[error("Parameter '{0}' has no column in the sensor table")]
    MissingParameterField(String),

    #[error("Invalid color for parameter '{parameter}': {source}")]
    InvalidColor {
        parameter: String,
        #[source]
        source: ColorError,
    },
}

pub type Result<T> = std::result::Result<T, CompositorError>;

/// Which measurement to show and how to color it.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayParameter {
    pub field: String,
    pub policy: DisplayPolicy,
}

impl DisplayParameter {
    pub fn new(field: impl Into<String>, policy: DisplayPolicy) -> Self {
        Self {
            field: field.into(),
            policy,
        }
    }

    /// Look up the policy for `field` in the display configuration.
    pub fn from_config(field: &str, display: &DisplayConfig) -> Self {
        Self::new(field, display.policy_for(field).clone())
    }
}

/// Styling that does not depend on the chosen parameter.
#[derive(Debug, Clone, Copy)]
pub struct ColorConfig<'a> {
    pub outline: &'a OutlineStyle,
    pub map: &'a MapConfig,
}

/// A point ready to draw.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderPoint {
    /// Row of the reading in the input table.
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,
    pub lon: f64,
    pub lat: f64,
    pub value: f64,
    /// `#rrggbb`
    pub color: String,
}

/// Describes how point values map to colors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ColorMapping {
    Continuous {
        scale: ScaleName,
        /// Scale stops, evenly spaced, as `#rrggbb`.
        stops: Vec<String>,
    },
    Fixed { color: String },
}

/// Metadata of the displayed parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterMeta {
    pub field: String,
    pub mapping: ColorMapping,
    /// Value range the colors span. `None` when no point has a value.
    pub range: Option<[f64; 2]>,
    /// Points dropped because they lack a value for the field.
    pub excluded: usize,
}

/// Outline of one boundary polygon: the exterior ring of each of its parts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlineTrace {
    pub label: String,
    /// `[lon, lat]` positions, one ring per polygon part.
    pub rings: Vec<Vec<[f64; 2]>>,
}

/// Initial camera of the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Viewport {
    pub center: [f64; 2],
    pub zoom: f64,
    pub height: u32,
    pub style: String,
    pub marker_size: u32,
}

/// Everything a renderer needs to draw one map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderLayer {
    pub crs: Crs,
    pub parameter: ParameterMeta,
    pub points: Vec<RenderPoint>,
    pub outlines: Vec<OutlineTrace>,
    pub outline_style: OutlineStyle,
    pub viewport: Viewport,
}

impl RenderLayer {
    /// Bounding box of points and outlines together.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        let points = self.points.iter().map(|p| (p.lon, p.lat));
        let rings = self
            .outlines
            .iter()
            .flat_map(|o| o.rings.iter().flatten())
            .map(|&[x, y]| (x, y));

        points
            .chain(rings)
            .map(|c| Rect::new(c, c))
            .reduce(merge_rects)
    }
}

enum Painter {
    Scale { scale: ColorScale, min: f64, max: f64 },
    Flat(Rgb),
}

impl Painter {
    fn paint(&self, value: f64) -> Rgb {
        match self {
            Painter::Scale { scale, min, max } => scale.color_for(value, *min, *max),
            Painter::Flat(color) => *color,
        }
    }
}

fn outline_trace(polygon: &BoundaryPolygon) -> OutlineTrace {
    let rings = polygon
        .geometry
        .0
        .iter()
        .map(|part| part.exterior().coords().map(|c| [c.x, c.y]).collect())
        .collect();

    OutlineTrace {
        label: polygon.label.clone(),
        rings,
    }
}

fn center_of(rect: Rect<f64>) -> [f64; 2] {
    let c: Point<f64> = rect.center().into();
    [c.x(), c.y()]
}

/// Compose a render layer.
///
/// # Arguments
///
/// * `points` - Validated point layer
/// * `parameter` - Field to display and its color policy
/// * `colors` - Outline style and map settings
/// * `boundaries` - Optional boundary polygons, already in the point CRS
///
/// # Errors
///
/// Returns [`CompositorError::MissingParameterField`] if the source table has
/// no column for the parameter, and [`CompositorError::InvalidColor`] if a
/// fixed color does not parse. Points whose value is missing are excluded,
/// not reported.
pub fn render(
    points: &PointSet<'_>,
    parameter: &DisplayParameter,
    colors: ColorConfig<'_>,
    boundaries: Option<&[BoundaryPolygon]>,
) -> Result<RenderLayer> {
    if !points.has_column(&parameter.field) {
        return Err(CompositorError::MissingParameterField(parameter.field.clone()));
    }

    let valued: Vec<_> = points
        .points
        .iter()
        .filter_map(|p| p.reading.measurement(&parameter.field).map(|v| (p, v)))
        .collect();
    let excluded = points.len() - valued.len();
    if excluded > 0 {
        debug!(
            "{excluded} of {} points have no '{}' value and are excluded",
            points.len(),
            parameter.field
        );
    }

    let observed = valued.iter().fold(None, |acc: Option<[f64; 2]>, (_, v)| {
        Some(match acc {
            Some([lo, hi]) => [lo.min(*v), hi.max(*v)],
            None => [*v, *v],
        })
    });

    let (painter, mapping, range) = match &parameter.policy {
        DisplayPolicy::Continuous { scale, range } => {
            let color_scale = ColorScale::named(*scale);
            let span = range.or(observed);
            let [min, max] = span.unwrap_or([0.0, 0.0]);
            let mapping = ColorMapping::Continuous {
                scale: *scale,
                stops: color_scale.stops().iter().map(|c| c.to_hex()).collect(),
            };
            (
                Painter::Scale {
                    scale: color_scale,
                    min,
                    max,
                },
                mapping,
                span,
            )
        }
        DisplayPolicy::Fixed { color } => {
            let rgb = Rgb::from_hex(color).map_err(|source| CompositorError::InvalidColor {
                parameter: parameter.field.clone(),
                source,
            })?;
            (
                Painter::Flat(rgb),
                ColorMapping::Fixed { color: rgb.to_hex() },
                observed,
            )
        }
    };

    let render_points: Vec<RenderPoint> = valued
        .iter()
        .map(|(p, value)| RenderPoint {
            row: p.reading.row,
            sensor_id: p.reading.sensor_id.clone(),
            lon: p.geometry.x(),
            lat: p.geometry.y(),
            value: *value,
            color: painter.paint(*value).to_hex(),
        })
        .collect();

    let outlines: Vec<OutlineTrace> = boundaries
        .unwrap_or_default()
        .iter()
        .map(outline_trace)
        .collect();

    let mut layer = RenderLayer {
        crs: points.crs,
        parameter: ParameterMeta {
            field: parameter.field.clone(),
            mapping,
            range,
            excluded,
        },
        points: render_points,
        outlines,
        outline_style: colors.outline.clone(),
        viewport: Viewport {
            center: [0.0, 0.0],
            zoom: colors.map.zoom,
            height: colors.map.height,
            style: colors.map.style.clone(),
            marker_size: colors.map.marker_size,
        },
    };

    // Center on the sensors; fall back to the outlines.
    let point_bounds = layer
        .points
        .iter()
        .map(|p| Rect::new((p.lon, p.lat), (p.lon, p.lat)))
        .reduce(merge_rects);
    if let Some(rect) = point_bounds.or_else(|| layer.bounds()) {
        layer.viewport.center = center_of(rect);
    }

    Ok(layer)
}

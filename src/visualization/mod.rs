//! Static map previews of a render layer.
//!
//! Draws boundary outlines and colored sensor points onto a PNG using the
//! plotters library. Positions are projected to Web Mercator so the picture
//! has the same shape as the interactive map.

use std::path::Path;

use geo::Coord;
use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::core::transforms::{from_wgs84, Crs};
use crate::processors::color::Rgb;
use crate::processors::compositor::RenderLayer;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Render layer has no points or outlines")]
    EmptyLayer,
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Default plot width in pixels.
const DEFAULT_WIDTH: u32 = 1200;

/// Fallback point color when a point's color does not parse.
const FALLBACK_POINT: Rgb = Rgb(100, 149, 237);

fn plot_err(e: impl std::fmt::Display) -> VisualizationError {
    VisualizationError::PlottingError(e.to_string())
}

fn project(lon: f64, lat: f64) -> (f64, f64) {
    let c = from_wgs84(Crs::WebMercator, Coord { x: lon, y: lat });
    (c.x, c.y)
}

fn to_plot_color(rgb: Rgb) -> RGBColor {
    RGBColor(rgb.0, rgb.1, rgb.2)
}

/// Plot a render layer and save it as PNG.
///
/// The image is `DEFAULT_WIDTH` wide and as tall as the layer's viewport.
/// Outlines are drawn first in the shared outline color, then points as
/// filled circles sized by the viewport's marker size.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `layer` - Render layer in WGS84
pub fn plot_render_layer(output_path: &Path, layer: &RenderLayer) -> Result<()> {
    if layer.points.is_empty() && layer.outlines.is_empty() {
        return Err(VisualizationError::EmptyLayer);
    }

    let outline_color = Rgb::from_hex(&layer.outline_style.color).map_err(plot_err)?;
    let outline_style = to_plot_color(outline_color)
        .stroke_width(layer.outline_style.line_width.max(1.0).round() as u32);

    let rings: Vec<Vec<(f64, f64)>> = layer
        .outlines
        .iter()
        .flat_map(|o| o.rings.iter())
        .map(|ring| ring.iter().map(|&[lon, lat]| project(lon, lat)).collect())
        .collect();

    let points: Vec<((f64, f64), RGBColor)> = layer
        .points
        .iter()
        .map(|p| {
            let rgb = Rgb::from_hex(&p.color).unwrap_or(FALLBACK_POINT);
            (project(p.lon, p.lat), to_plot_color(rgb))
        })
        .collect();

    let (x_min, x_max, y_min, y_max) =
        compute_bounds(rings.iter().flatten().chain(points.iter().map(|(xy, _)| xy)));
    let x_padding = (x_max - x_min) * 0.05;
    let y_padding = (y_max - y_min) * 0.05;

    let height = layer.viewport.height.max(1);
    let root = BitMapBackend::new(output_path, (DEFAULT_WIDTH, height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .build_cartesian_2d(
            (x_min - x_padding)..(x_max + x_padding),
            (y_min - y_padding)..(y_max + y_padding),
        )
        .map_err(plot_err)?;

    chart
        .draw_series(
            rings
                .iter()
                .map(|ring| PathElement::new(ring.clone(), outline_style)),
        )
        .map_err(plot_err)?;

    let radius = (layer.viewport.marker_size / 3).max(2) as i32;
    chart
        .draw_series(
            points
                .iter()
                .map(|(xy, color)| Circle::new(*xy, radius, color.filled())),
        )
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;

    Ok(())
}

/// Compute the bounds (min/max) for x and y coordinates.
fn compute_bounds<'a>(coords: impl Iterator<Item = &'a (f64, f64)>) -> (f64, f64, f64, f64) {
    let mut x_min = f64::MAX;
    let mut x_max = f64::MIN;
    let mut y_min = f64::MAX;
    let mut y_max = f64::MIN;

    for &(x, y) in coords {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }

    // A single location still needs a visible extent (metres).
    if (x_max - x_min).abs() < 1.0 {
        x_min -= 500.0;
        x_max += 500.0;
    }
    if (y_max - y_min).abs() < 1.0 {
        y_min -= 500.0;
        y_max += 500.0;
    }

    (x_min, x_max, y_min, y_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::processors::compositor::{
        ColorMapping, OutlineTrace, ParameterMeta, RenderPoint, Viewport,
    };
    use crate::config::ScaleName;
    use tempfile::tempdir;

    fn layer(points: Vec<RenderPoint>, outlines: Vec<OutlineTrace>) -> RenderLayer {
        let config = PipelineConfig::default();
        RenderLayer {
            crs: Crs::Wgs84,
            parameter: ParameterMeta {
                field: "pm25".into(),
                mapping: ColorMapping::Continuous {
                    scale: ScaleName::Darkmint,
                    stops: vec![],
                },
                range: Some([1.0, 2.0]),
                excluded: 0,
            },
            points,
            outlines,
            outline_style: config.outline,
            viewport: Viewport {
                center: [-2.98, 53.41],
                zoom: 11.0,
                height: 300,
                style: "carto-positron".into(),
                marker_size: 15,
            },
        }
    }

    fn point(lon: f64, lat: f64, color: &str) -> RenderPoint {
        RenderPoint {
            row: 0,
            sensor_id: None,
            lon,
            lat,
            value: 1.0,
            color: color.into(),
        }
    }

    #[test]
    fn test_plot_render_layer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map.png");
        let outline = OutlineTrace {
            label: "Central".into(),
            rings: vec![vec![[-3.0, 53.3], [-2.9, 53.3], [-2.9, 53.5], [-3.0, 53.3]]],
        };
        let layer = layer(
            vec![point(-2.99, 53.40, "#d2fbd4"), point(-2.95, 53.42, "#123f5a")],
            vec![outline],
        );

        plot_render_layer(&path, &layer).unwrap();
        assert!(path.exists());
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_single_point_layer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one.png");
        let layer = layer(vec![point(-2.99, 53.40, "not a color")], vec![]);

        plot_render_layer(&path, &layer).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_empty_layer_is_error() {
        let dir = tempdir().unwrap();
        let result = plot_render_layer(&dir.path().join("empty.png"), &layer(vec![], vec![]));
        assert!(matches!(result, Err(VisualizationError::EmptyLayer)));
    }
}

//! End-to-end render pipeline.
//!
//! Loads the sensor table, normalizes it, builds points, fetches boundaries
//! through the cache and composes the render layer. A missing or broken
//! boundary source degrades to an empty outline set plus a warning; a broken
//! sensor source or an unknown parameter stops the render.

use std::path::Path;
use std::sync::Arc;

use log::warn;
use thiserror::Error;

use super::boundaries::{BoundaryCache, BoundarySet};
use super::compositor::{render, ColorConfig, CompositorError, DisplayParameter, RenderLayer};
use super::geometry::{build_points, SENSOR_CRS};
use super::normalizer::{normalize, NormalizedTable, SensorReading};
use crate::config::PipelineConfig;
use crate::core::loaders::{load_sensor_table, LoaderError, SensorTable};
use crate::core::writers::{sensor_table_to_string, write_sensor_table, WriteError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Sensor source unreadable: {0}")]
    SourceUnreadable(#[from] LoaderError),

    #[error("Parameter '{0}' has no column in the sensor table")]
    MissingParameterField(String),

    #[error("Render failed: {0}")]
    Render(CompositorError),

    #[error("Export failed: {0}")]
    Export(#[from] WriteError),
}

impl From<CompositorError> for PipelineError {
    fn from(err: CompositorError) -> Self {
        match err {
            CompositorError::MissingParameterField(field) => PipelineError::MissingParameterField(field),
            other => PipelineError::Render(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Per-render choices; unset fields fall back to the configuration.
#[derive(Debug, Clone, Default)]
pub struct RenderRequest {
    /// Parameter to display (`display.default_parameter` when unset).
    pub parameter: Option<String>,
    /// Overlay boundaries (`boundaries.enabled` when unset).
    pub show_boundaries: Option<bool>,
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Normalized table, for preview and export.
    pub table: NormalizedTable,
    pub layer: RenderLayer,
    /// Boundary set the outlines came from, when one was loaded.
    pub boundaries: Option<Arc<BoundarySet>>,
    /// Non-fatal problems, e.g. an unavailable boundary source.
    pub warnings: Vec<String>,
}

impl PipelineOutput {
    /// The first `n` normalized rows.
    pub fn preview(&self, n: usize) -> &[SensorReading] {
        self.table.head(n)
    }

    /// Write the normalized table to `path`.
    pub fn export_csv(&self, path: &Path, delimiter: char) -> Result<()> {
        write_sensor_table(path, &self.table.to_sensor_table(), delimiter)?;
        Ok(())
    }

    /// The normalized table as delimited text.
    pub fn export_string(&self, delimiter: char) -> Result<String> {
        Ok(sensor_table_to_string(&self.table.to_sensor_table(), delimiter)?)
    }
}

/// Run the whole pipeline on a sensor file.
///
/// # Errors
///
/// - [`PipelineError::SourceUnreadable`] if the sensor file cannot be read or
///   lacks a coordinate column
/// - [`PipelineError::MissingParameterField`] if the chosen parameter has no
///   column
pub fn run_pipeline(
    sensor_path: &Path,
    config: &PipelineConfig,
    request: &RenderRequest,
    cache: &BoundaryCache,
) -> Result<PipelineOutput> {
    let table = load_sensor_table(sensor_path, config.sensors.delimiter)?;
    run_on_table(&table, config, request, cache)
}

/// Run the pipeline on an already loaded sensor table.
pub fn run_on_table(
    table: &SensorTable,
    config: &PipelineConfig,
    request: &RenderRequest,
    cache: &BoundaryCache,
) -> Result<PipelineOutput> {
    let normalized = normalize(table, &config.sensors)?;

    let field = request
        .parameter
        .as_deref()
        .unwrap_or(config.display.default_parameter.as_str());
    let parameter = DisplayParameter::from_config(field, &config.display);

    let mut warnings = Vec::new();
    let show = request.show_boundaries.unwrap_or(config.boundaries.enabled);
    let boundaries = if show {
        match config.boundaries.path.as_deref() {
            Some(path) => match cache.get_or_load(path, &config.boundaries, SENSOR_CRS) {
                Ok(set) => Some(set),
                Err(e) => {
                    warn!("{e}; rendering without boundaries");
                    warnings.push(e.to_string());
                    None
                }
            },
            None => {
                let msg = "boundary overlay requested but no boundary path is configured";
                warn!("{msg}");
                warnings.push(msg.to_string());
                None
            }
        }
    } else {
        None
    };

    let points = build_points(&normalized);
    let colors = ColorConfig {
        outline: &config.outline,
        map: &config.map,
    };
    let layer = render(
        &points,
        &parameter,
        colors,
        boundaries.as_deref().map(|set| set.polygons.as_slice()),
    )?;

    Ok(PipelineOutput {
        table: normalized,
        layer,
        boundaries,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shapefile::fixtures::write_liverpool_wards;
    use std::fs;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn sensor_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "lat,lon,sensor_id,pm25,temp").unwrap();
        writeln!(file, "-2.99,53.40,A,10,22.0").unwrap();
        writeln!(file, "bad,bad,,5,19.0").unwrap();
        writeln!(file, "-2.97,53.42,C,,20.1").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_run_with_shapefile_boundaries() -> Result<()> {
        let dir = tempdir().unwrap();
        let shp = write_liverpool_wards(dir.path(), "WardsPolygon");
        let mut config = PipelineConfig::default();
        config.boundaries.path = Some(shp);

        let sensors = sensor_file();
        let cache = BoundaryCache::new();
        let output = run_pipeline(sensors.path(), &config, &RenderRequest::default(), &cache)?;

        assert!(output.warnings.is_empty());
        assert_eq!(output.table.len(), 2);
        assert_eq!(output.table.report.excluded(), 1);
        assert_eq!(output.layer.parameter.field, "pm25");
        assert_eq!(output.layer.points.len(), 1);
        assert_eq!(output.layer.parameter.excluded, 1);
        assert_eq!(output.layer.outlines.len(), 2);
        assert_eq!(output.layer.outlines[1].label, "Everton");
        assert_eq!(cache.len(), 1);

        let temp = run_pipeline(
            sensors.path(),
            &config,
            &RenderRequest {
                parameter: Some("temp".into()),
                show_boundaries: Some(false),
            },
            &cache,
        )?;
        assert_eq!(temp.layer.points.len(), 2);
        assert!(temp.layer.outlines.is_empty());
        assert!(temp.boundaries.is_none());
        Ok(())
    }

    #[test]
    fn test_unavailable_boundaries_degrade() -> Result<()> {
        let dir = tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.boundaries.path = Some(dir.path().join("Wards").join("WardsPolygon.shp"));

        let sensors = sensor_file();
        let output = run_pipeline(
            sensors.path(),
            &config,
            &RenderRequest::default(),
            &BoundaryCache::new(),
        )?;
        assert!(output.layer.outlines.is_empty());
        assert_eq!(output.layer.points.len(), 1);
        assert_eq!(output.warnings.len(), 1);
        assert!(output.warnings[0].contains("unavailable"));

        config.boundaries.path = None;
        let output = run_pipeline(
            sensors.path(),
            &config,
            &RenderRequest::default(),
            &BoundaryCache::new(),
        )?;
        assert_eq!(output.warnings.len(), 1);
        Ok(())
    }

    #[test]
    fn test_fatal_errors() {
        let config = PipelineConfig::default();
        let cache = BoundaryCache::new();
        let request = RenderRequest {
            show_boundaries: Some(false),
            ..Default::default()
        };

        let missing = run_pipeline(Path::new("/nonexistent/sensors.csv"), &config, &request, &cache);
        assert!(matches!(missing, Err(PipelineError::SourceUnreadable(_))));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "latitude,longitude,pm25").unwrap();
        writeln!(file, "53.4,-2.9,1").unwrap();
        file.flush().unwrap();
        let no_coords = run_pipeline(file.path(), &config, &request, &cache);
        assert!(matches!(
            no_coords,
            Err(PipelineError::SourceUnreadable(LoaderError::MissingColumns(_)))
        ));

        let sensors = sensor_file();
        let no2 = RenderRequest {
            parameter: Some("no2".into()),
            show_boundaries: Some(false),
        };
        let err = run_pipeline(sensors.path(), &config, &no2, &cache).unwrap_err();
        assert!(matches!(err, PipelineError::MissingParameterField(f) if f == "no2"));
    }

    #[test]
    fn test_export_and_preview() -> Result<()> {
        let dir = tempdir().unwrap();
        let config = PipelineConfig::default();
        let sensors = sensor_file();
        let request = RenderRequest {
            show_boundaries: Some(false),
            ..Default::default()
        };
        let output = run_pipeline(sensors.path(), &config, &request, &BoundaryCache::new())?;

        assert_eq!(output.preview(1).len(), 1);
        assert_eq!(output.preview(config.map.preview_rows).len(), 2);

        let path = dir.path().join("sensors_export.csv");
        output.export_csv(&path, ',')?;
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, output.export_string(',')?);
        assert_eq!(written.lines().count(), 3);
        assert!(written.starts_with("lat,lon,sensor_id,pm25,temp\n-2.99,53.40,A,10,22.0\n"));
        Ok(())
    }
}

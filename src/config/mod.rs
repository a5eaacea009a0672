//! Configuration types for the sensor map pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Configuration for reading and normalizing the sensor table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Column holding latitude values (before any axis swap)
    #[serde(default = "default_lat_column")]
    pub lat_column: String,

    /// Column holding longitude values (before any axis swap)
    #[serde(default = "default_lon_column")]
    pub lon_column: String,

    /// Optional column with a sensor identifier, used for labels only
    #[serde(default = "default_id_column")]
    pub id_column: Option<String>,

    /// Treat the latitude column as longitude and vice versa
    #[serde(default = "default_swap_axes")]
    pub swap_axes: bool,

    /// Field delimiter of the sensor table
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
}

fn default_lat_column() -> String {
    "lat".to_string()
}

fn default_lon_column() -> String {
    "lon".to_string()
}

fn default_id_column() -> Option<String> {
    Some("sensor_id".to_string())
}

fn default_swap_axes() -> bool {
    true
}

fn default_delimiter() -> char {
    ','
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            lat_column: default_lat_column(),
            lon_column: default_lon_column(),
            id_column: default_id_column(),
            swap_axes: default_swap_axes(),
            delimiter: default_delimiter(),
        }
    }
}

/// Configuration for the administrative boundary overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryConfig {
    /// Whether boundary outlines are requested at all
    #[serde(default = "default_boundaries_enabled")]
    pub enabled: bool,

    /// GeoJSON or shapefile holding the boundary polygons
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Property (or dbf field) used as the polygon label
    #[serde(default)]
    pub name_property: Option<String>,

    /// Source CRS override; takes precedence over the CRS the file declares (e.g. "EPSG:27700")
    #[serde(default)]
    pub source_crs: Option<String>,
}

fn default_boundaries_enabled() -> bool {
    true
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            enabled: default_boundaries_enabled(),
            path: None,
            name_property: None,
            source_crs: None,
        }
    }
}

/// Named sequential color scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleName {
    Darkmint,
    Viridis,
    Plasma,
    Ylorrd,
    Blues,
}

fn default_scale() -> ScaleName {
    ScaleName::Darkmint
}

/// How the points of one parameter are colored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DisplayPolicy {
    /// Interpolate a color scale across the value range.
    Continuous {
        #[serde(default = "default_scale")]
        scale: ScaleName,
        /// Fixed [min, max]; the observed range is used when absent
        #[serde(default)]
        range: Option<[f64; 2]>,
    },
    /// Every point gets the same color (hex, e.g. "#1f77b4").
    Fixed { color: String },
}

impl DisplayPolicy {
    pub fn continuous(scale: ScaleName) -> Self {
        DisplayPolicy::Continuous { scale, range: None }
    }
}

/// Parameter name to display policy mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Parameter rendered when none is requested
    #[serde(default = "default_parameter")]
    pub default_parameter: String,

    /// Per-parameter policies
    #[serde(default = "default_parameter_policies")]
    pub parameters: BTreeMap<String, DisplayPolicy>,

    /// Policy for parameters missing from `parameters`
    #[serde(default = "default_fallback_policy")]
    pub fallback: DisplayPolicy,
}

fn default_parameter() -> String {
    "pm25".to_string()
}

fn default_parameter_policies() -> BTreeMap<String, DisplayPolicy> {
    let mut policies = BTreeMap::new();
    policies.insert("pm1".to_string(), DisplayPolicy::continuous(ScaleName::Plasma));
    policies.insert("pm25".to_string(), DisplayPolicy::continuous(ScaleName::Darkmint));
    policies.insert("pm10".to_string(), DisplayPolicy::continuous(ScaleName::Ylorrd));
    policies.insert("temp".to_string(), DisplayPolicy::continuous(ScaleName::Viridis));
    policies.insert("humidity".to_string(), DisplayPolicy::continuous(ScaleName::Blues));
    policies
}

fn default_fallback_policy() -> DisplayPolicy {
    DisplayPolicy::continuous(ScaleName::Darkmint)
}

impl DisplayConfig {
    /// Policy registered for `parameter`, or the fallback.
    pub fn policy_for(&self, parameter: &str) -> &DisplayPolicy {
        self.parameters.get(parameter).unwrap_or(&self.fallback)
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            default_parameter: default_parameter(),
            parameters: default_parameter_policies(),
            fallback: default_fallback_policy(),
        }
    }
}

/// Shared style of every boundary outline trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineStyle {
    /// Line color (hex)
    #[serde(default = "default_outline_color")]
    pub color: String,

    /// Line width in pixels
    #[serde(default = "default_line_width")]
    pub line_width: f32,

    /// Polygon fill opacity (0.0 to 1.0)
    #[serde(default = "default_fill_opacity")]
    pub fill_opacity: f32,
}

fn default_outline_color() -> String {
    "#cccccc".to_string()
}

fn default_line_width() -> f32 {
    1.0
}

fn default_fill_opacity() -> f32 {
    0.1
}

impl Default for OutlineStyle {
    fn default() -> Self {
        Self {
            color: default_outline_color(),
            line_width: default_line_width(),
            fill_opacity: default_fill_opacity(),
        }
    }
}

/// Map viewport and preview settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    /// Basemap style name handed to the renderer
    #[serde(default = "default_map_style")]
    pub style: String,

    /// Initial zoom level
    #[serde(default = "default_zoom")]
    pub zoom: f64,

    /// Map height in pixels
    #[serde(default = "default_height")]
    pub height: u32,

    /// Maximum marker size in pixels
    #[serde(default = "default_marker_size")]
    pub marker_size: u32,

    /// Rows shown by the table preview
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
}

fn default_map_style() -> String {
    "carto-positron".to_string()
}

fn default_zoom() -> f64 {
    11.0
}

fn default_height() -> u32 {
    600
}

fn default_marker_size() -> u32 {
    15
}

fn default_preview_rows() -> usize {
    20
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            style: default_map_style(),
            zoom: default_zoom(),
            height: default_height(),
            marker_size: default_marker_size(),
            preview_rows: default_preview_rows(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sensors: SensorConfig,

    #[serde(default)]
    pub boundaries: BoundaryConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub outline: OutlineStyle,

    #[serde(default)]
    pub map: MapConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sensor_config() {
        let config = SensorConfig::default();
        assert_eq!(config.lat_column, "lat");
        assert_eq!(config.lon_column, "lon");
        assert_eq!(config.id_column.as_deref(), Some("sensor_id"));
        assert!(config.swap_axes);
    }

    #[test]
    fn test_policy_lookup_falls_back() {
        let config = DisplayConfig::default();
        assert_eq!(
            config.policy_for("pm25"),
            &DisplayPolicy::continuous(ScaleName::Darkmint)
        );
        assert_eq!(config.policy_for("no2"), &config.fallback);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r##"
sensors:
  swap_axes: false
display:
  parameters:
    no2:
      mode: fixed
      color: "#ff0000"
"##;
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(!config.sensors.swap_axes);
        assert_eq!(config.sensors.lat_column, "lat");
        assert_eq!(
            config.display.policy_for("no2"),
            &DisplayPolicy::Fixed {
                color: "#ff0000".to_string()
            }
        );
        assert_eq!(config.outline.color, "#cccccc");
        assert_eq!(config.map.preview_rows, 20);
    }

    #[test]
    fn test_yaml_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        let config = PipelineConfig::default();
        config.to_yaml(&path).unwrap();

        let loaded = PipelineConfig::from_yaml(&path).unwrap();
        assert_eq!(loaded.display.parameters, config.display.parameters);
        assert_eq!(loaded.map.zoom, 11.0);
    }
}

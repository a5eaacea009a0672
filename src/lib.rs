//! Sensor data normalization and boundary map rendering pipeline.
//!
//! This crate provides tools for:
//! - Loading sensor tables and correcting their coordinate columns
//! - Building WGS84 point geometries for the surviving readings
//! - Loading ward boundaries from GeoJSON or shapefiles and reprojecting them
//! - Composing a parameter-colored render layer with boundary outlines
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use sensor_map_pipeline::processors::{run_pipeline, BoundaryCache, RenderRequest};
//! use sensor_map_pipeline::PipelineConfig;
//!
//! let config = PipelineConfig::default();
//! let output = run_pipeline(
//!     Path::new("sensors.csv"),
//!     &config,
//!     &RenderRequest::default(),
//!     BoundaryCache::global(),
//! )
//! .unwrap();
//! println!("{} points", output.layer.points.len());
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{BoundaryConfig, DisplayConfig, DisplayPolicy, MapConfig, PipelineConfig, SensorConfig};
pub use core::loaders::SensorTable;
pub use core::transforms::Crs;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

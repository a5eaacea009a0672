//! Core data types and I/O operations.

pub mod geojson;
pub mod loaders;
pub mod shapefile;
pub mod transforms;
pub mod writers;

pub use loaders::{load_sensor_table, BoundaryFeature, BoundarySource, LoaderError, SensorTable};
pub use transforms::{Crs, CrsError};
pub use writers::{write_boundaries_geojson, write_render_layer_json, write_sensor_table, WriteError};

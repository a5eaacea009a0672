//! Data processing modules.

pub mod boundaries;
pub mod color;
pub mod compositor;
pub mod geometry;
pub mod normalizer;
pub mod pipeline;

// Re-export key types for convenience
pub use boundaries::{load_boundaries, BoundaryCache, BoundaryError, BoundaryPolygon, BoundarySet};
pub use compositor::{render, ColorConfig, CompositorError, DisplayParameter, RenderLayer};
pub use geometry::{build_points, PointSet, SensorPoint};
pub use normalizer::{normalize, NormalizeReport, NormalizedTable, SensorReading};
pub use pipeline::{run_pipeline, PipelineError, PipelineOutput, RenderRequest};

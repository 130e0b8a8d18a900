//! # Tessera Spatial
//!
//! Spatial analysis used to split a level into several tiles.
//!
//! ## Features
//! - Uniform grid index over triangle primitives
//! - Per-cell density and curvature metrics
//! - Octree-style adaptive slicing driven by those metrics

pub mod density;
pub mod primitive;
pub mod slicer;

pub use density::{DensityAnalyzer, DensityMetrics, SpatialIndex};
pub use primitive::GeometricPrimitive;
pub use slicer::{AdaptiveConfig, AdaptiveSlicer, MeshSlice, SliceRegion};

//! # Tessera Core
//!
//! Shared data model for the Tessera OBJ to 3D Tiles converter.
//!
//! This crate provides the types every pipeline stage exchanges:
//! - **Math**: glam re-exports and [`BoundingBox3D`]
//! - **Mesh**: vertices with optional normal/UV/skin data, triangles, materials
//! - **Cancellation**: a cooperative [`CancellationToken`] shared by every stage

pub mod cancel;
pub mod math;
pub mod mesh;

pub use cancel::CancellationToken;
pub use math::BoundingBox3D;
pub use mesh::{BoneWeights, Material, Mesh, Triangle, UvRect, UvTransform, Vertex, VertexAttributes};

/// Crate version, used in generated asset metadata
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default generator string written into produced tilesets
pub fn generator_name() -> String {
    format!("tessera {}", VERSION)
}

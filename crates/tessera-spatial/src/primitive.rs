//! Triangle primitives for spatial analysis

use tessera_core::math::Vec3;
use tessera_core::Mesh;

/// One triangle with its derived geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometricPrimitive {
    /// Index of the triangle in its mesh
    pub triangle: usize,
    /// Vertex indices in the mesh
    pub indices: [u32; 3],
    pub vertices: [Vec3; 3],
    /// Unit normal, zero for degenerate triangles
    pub normal: Vec3,
    pub area: f32,
    pub centroid: Vec3,
}

impl GeometricPrimitive {
    pub fn from_mesh(mesh: &Mesh) -> Vec<GeometricPrimitive> {
        mesh.triangles
            .iter()
            .enumerate()
            .map(|(triangle, tri)| {
                let vertices = tri.positions(&mesh.vertices);
                let [a, b, c] = vertices;
                let cross = (b - a).cross(c - a);
                GeometricPrimitive {
                    triangle,
                    indices: tri.indices,
                    vertices,
                    normal: cross.normalize_or_zero(),
                    area: cross.length() * 0.5,
                    centroid: (a + b + c) / 3.0,
                }
            })
            .collect()
    }
}

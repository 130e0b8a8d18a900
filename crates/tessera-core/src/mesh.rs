//! Mesh data model
//!
//! An indexed triangle mesh with optional per-vertex normals, UVs and skinning data,
//! plus the material list triangles refer to.

use std::path::PathBuf;

use ahash::AHashMap;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::math::{BoundingBox3D, Vec2, Vec3};

bitflags! {
    /// Optional vertex attributes present somewhere in a mesh
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VertexAttributes: u8 {
        const NORMAL = 1 << 0;
        const UV = 1 << 1;
        const SKIN = 1 << 2;
    }
}

/// Four bone influences on a single vertex
///
/// Slots with a zero weight are empty. The fixed capacity matches what tile formats
/// can carry per vertex.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoneWeights {
    /// Bone index per slot
    pub indices: [u16; 4],
    /// Weight per slot
    pub weights: [f32; 4],
}

impl BoneWeights {
    pub const SLOTS: usize = 4;

    pub fn new(indices: [u16; 4], weights: [f32; 4]) -> Self {
        Self { indices, weights }
    }

    /// Weights with a single influence in slot 0
    pub fn single(bone: u16, weight: f32) -> Self {
        Self {
            indices: [bone, 0, 0, 0],
            weights: [weight, 0.0, 0.0, 0.0],
        }
    }

    /// True when every slot is empty
    pub fn is_zero(&self) -> bool {
        self.weights.iter().all(|w| *w == 0.0)
    }

    /// Weight assigned to `bone`, if any slot carries it
    pub fn weight_for(&self, bone: u16) -> Option<f32> {
        self.indices
            .iter()
            .zip(self.weights.iter())
            .find(|(index, weight)| **index == bone && **weight != 0.0)
            .map(|(_, weight)| *weight)
    }
}

/// A mesh vertex
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Option<Vec3>,
    pub uv: Option<Vec2>,
    pub skin: Option<BoneWeights>,
}

impl Vertex {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn with_normal(mut self, normal: Vec3) -> Self {
        self.normal = Some(normal);
        self
    }

    pub fn with_uv(mut self, uv: Vec2) -> Self {
        self.uv = Some(uv);
        self
    }

    pub fn with_skin(mut self, skin: BoneWeights) -> Self {
        self.skin = Some(skin);
        self
    }

    /// Attributes this vertex carries
    pub fn attributes(&self) -> VertexAttributes {
        let mut attributes = VertexAttributes::empty();
        attributes.set(VertexAttributes::NORMAL, self.normal.is_some());
        attributes.set(VertexAttributes::UV, self.uv.is_some());
        attributes.set(VertexAttributes::SKIN, self.skin.is_some());
        attributes
    }

    fn weld_key(&self) -> VertexKey {
        VertexKey {
            position: self.position.to_array().map(f32::to_bits),
            normal: self.normal.map(|n| n.to_array().map(f32::to_bits)),
            uv: self.uv.map(|uv| uv.to_array().map(f32::to_bits)),
            skin: self.skin.map(|s| (s.indices, s.weights.map(f32::to_bits))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct VertexKey {
    position: [u32; 3],
    normal: Option<[u32; 3]>,
    uv: Option<[u32; 2]>,
    skin: Option<([u16; 4], [u32; 4])>,
}

/// A triangle referencing three vertices of its mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Triangle {
    /// Vertex indices, counter-clockwise front face
    pub indices: [u32; 3],
    /// Index into the owning mesh's material list
    pub material: Option<u32>,
}

impl Triangle {
    pub fn new(indices: [u32; 3], material: Option<u32>) -> Self {
        Self { indices, material }
    }

    /// Corner positions looked up in `vertices`
    pub fn positions(&self, vertices: &[Vertex]) -> [Vec3; 3] {
        self.indices.map(|i| vertices[i as usize].position)
    }

    /// Unit face normal, zero for degenerate triangles
    pub fn normal(&self, vertices: &[Vertex]) -> Vec3 {
        let [a, b, c] = self.positions(vertices);
        (b - a).cross(c - a).normalize_or_zero()
    }

    pub fn area(&self, vertices: &[Vertex]) -> f32 {
        let [a, b, c] = self.positions(vertices);
        (b - a).cross(c - a).length() * 0.5
    }

    pub fn centroid(&self, vertices: &[Vertex]) -> Vec3 {
        let [a, b, c] = self.positions(vertices);
        (a + b + c) / 3.0
    }
}

/// Rectangle in UV space, all coordinates in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UvRect {
    pub min_u: f32,
    pub min_v: f32,
    pub max_u: f32,
    pub max_v: f32,
}

impl UvRect {
    pub const FULL: Self = Self {
        min_u: 0.0,
        min_v: 0.0,
        max_u: 1.0,
        max_v: 1.0,
    };

    pub fn width(&self) -> f32 {
        self.max_u - self.min_u
    }

    pub fn height(&self) -> f32 {
        self.max_v - self.min_v
    }
}

/// Affine mapping applied to a material's texture coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvTransform {
    pub offset: Vec2,
    pub scale: Vec2,
}

impl UvTransform {
    pub const IDENTITY: Self = Self {
        offset: Vec2::ZERO,
        scale: Vec2::ONE,
    };

    /// Mapping from the unit square into `rect`
    pub fn from_rect(rect: UvRect) -> Self {
        Self {
            offset: Vec2::new(rect.min_u, rect.min_v),
            scale: Vec2::new(rect.width(), rect.height()),
        }
    }

    pub fn apply(&self, uv: Vec2) -> Vec2 {
        self.offset + uv * self.scale
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for UvTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Surface material
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    /// Linear RGBA base color
    pub diffuse_color: [f32; 4],
    /// Resolved path of the diffuse texture
    pub diffuse_texture: Option<PathBuf>,
    /// Mapping from source UVs to the UVs the texture is sampled with
    pub uv_transform: UvTransform,
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            diffuse_color: [1.0, 1.0, 1.0, 1.0],
            diffuse_texture: None,
            uv_transform: UvTransform::IDENTITY,
        }
    }
}

/// Indexed triangle mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub triangles: Vec<Triangle>,
    pub materials: Vec<Material>,
}

impl Mesh {
    pub fn new(vertices: Vec<Vertex>, triangles: Vec<Triangle>) -> Self {
        Self {
            vertices,
            triangles,
            materials: Vec::new(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// A mesh without triangles has nothing to render or simplify
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Bounds of the vertices referenced by triangles
    pub fn bounds(&self) -> Option<BoundingBox3D> {
        BoundingBox3D::from_points(
            self.triangles
                .iter()
                .flat_map(|t| t.indices)
                .map(|i| self.vertices[i as usize].position),
        )
    }

    /// Union of the optional attributes carried by any vertex
    pub fn attributes(&self) -> VertexAttributes {
        self.vertices
            .iter()
            .fold(VertexAttributes::empty(), |acc, v| acc | v.attributes())
    }

    pub fn surface_area(&self) -> f32 {
        self.triangles.iter().map(|t| t.area(&self.vertices)).sum()
    }

    /// Per-vertex normals, explicit ones first, area-weighted face normals otherwise
    pub fn vertex_normals(&self) -> Vec<Vec3> {
        let mut accumulated = vec![Vec3::ZERO; self.vertices.len()];
        for triangle in &self.triangles {
            let [a, b, c] = triangle.positions(&self.vertices);
            // Unnormalised cross product weights by area
            let face = (b - a).cross(c - a);
            for index in triangle.indices {
                accumulated[index as usize] += face;
            }
        }

        self.vertices
            .iter()
            .zip(accumulated)
            .map(|(vertex, sum)| {
                vertex
                    .normal
                    .map(Vec3::normalize_or_zero)
                    .filter(|n| *n != Vec3::ZERO)
                    .unwrap_or_else(|| {
                        let n = sum.normalize_or_zero();
                        if n == Vec3::ZERO { Vec3::Z } else { n }
                    })
            })
            .collect()
    }

    /// Merge bit-identical vertices and drop unreferenced ones
    pub fn welded(&self) -> Mesh {
        let mut lookup: AHashMap<VertexKey, u32> = AHashMap::with_capacity(self.vertices.len());
        let mut vertices = Vec::with_capacity(self.vertices.len());
        let mut remap = vec![u32::MAX; self.vertices.len()];

        for triangle in &self.triangles {
            for index in triangle.indices {
                let slot = &mut remap[index as usize];
                if *slot != u32::MAX {
                    continue;
                }
                let vertex = self.vertices[index as usize];
                *slot = *lookup.entry(vertex.weld_key()).or_insert_with(|| {
                    vertices.push(vertex);
                    (vertices.len() - 1) as u32
                });
            }
        }

        let triangles = self
            .triangles
            .iter()
            .map(|t| Triangle::new(t.indices.map(|i| remap[i as usize]), t.material))
            .collect();

        log::debug!("Welded {} vertices into {}", self.vertices.len(), vertices.len());
        Mesh {
            vertices,
            triangles,
            materials: self.materials.clone(),
        }
    }

    /// Sub-mesh made of the given triangles with compacted vertices
    pub fn extract(&self, triangle_indices: &[usize]) -> Mesh {
        let mut remap: AHashMap<u32, u32> = AHashMap::with_capacity(triangle_indices.len() * 2);
        let mut vertices = Vec::new();
        let mut triangles = Vec::with_capacity(triangle_indices.len());

        for &ti in triangle_indices {
            let triangle = self.triangles[ti];
            let indices = triangle.indices.map(|i| {
                *remap.entry(i).or_insert_with(|| {
                    vertices.push(self.vertices[i as usize]);
                    (vertices.len() - 1) as u32
                })
            });
            triangles.push(Triangle::new(indices, triangle.material));
        }

        Mesh {
            vertices,
            triangles,
            materials: self.materials.clone(),
        }
    }
}

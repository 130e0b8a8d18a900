//! Density-adaptive slicing
//!
//! A level is first bucketed into a coarse grid. Each occupied cell is split into
//! octants while its metrics exceed the configured thresholds, down to `max_depth`.
//! Leaf cells become slices. Slice coordinates are expressed on the finest grid
//! (`base_resolution * 2^max_depth` cells per axis), so cells at different depths never
//! share coordinates.

use serde::{Deserialize, Serialize};
use tessera_core::math::UVec3;
use tessera_core::{BoundingBox3D, Mesh};

use crate::density::{DensityAnalyzer, DensityMetrics, SpatialIndex};
use crate::primitive::GeometricPrimitive;

/// Thresholds for adaptive slicing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdaptiveConfig {
    /// Cells per axis of the initial grid
    pub base_resolution: u32,
    /// Maximum number of octant subdivisions below the initial grid
    pub max_depth: u32,
    /// Split any cell holding more triangles than this
    pub max_triangles_per_slice: usize,
    /// Never split a cell holding this many triangles or fewer
    pub min_triangles_per_slice: usize,
    /// Split cells denser than this (triangles per unit volume)
    pub triangle_density_threshold: Option<f32>,
    /// Split cells whose mean normal deviation exceeds this
    pub curvature_threshold: Option<f32>,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            base_resolution: 1,
            max_depth: 3,
            max_triangles_per_slice: 20_000,
            min_triangles_per_slice: 256,
            triangle_density_threshold: None,
            curvature_threshold: Some(0.5),
        }
    }
}

impl AdaptiveConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.base_resolution == 0 {
            return Err("baseResolution must be at least 1".into());
        }
        if self.max_depth > 10 {
            return Err(format!("maxDepth {} is too deep (limit 10)", self.max_depth));
        }
        if self.max_triangles_per_slice == 0 {
            return Err("maxTrianglesPerSlice must be positive".into());
        }
        Ok(())
    }

    /// Cells per axis on the finest grid
    pub fn finest_resolution(&self) -> u32 {
        self.base_resolution << self.max_depth
    }
}

/// A leaf cell chosen by the slicer
#[derive(Debug, Clone, PartialEq)]
pub struct SliceRegion {
    /// Minimum corner on the finest grid
    pub coords: UVec3,
    /// Subdivision depth below the initial grid
    pub depth: u32,
    /// Cell bounds
    pub cell: BoundingBox3D,
    /// Triangle indices of the sliced mesh, ascending
    pub triangles: Vec<usize>,
    pub metrics: DensityMetrics,
}

/// A slice with its own compacted mesh
#[derive(Debug, Clone, PartialEq)]
pub struct MeshSlice {
    pub coords: UVec3,
    pub mesh: Mesh,
    /// Tight bounds of the slice's triangles
    pub bounds: BoundingBox3D,
}

/// Splits meshes into density-adaptive slices
#[derive(Debug, Clone)]
pub struct AdaptiveSlicer {
    config: AdaptiveConfig,
    analyzer: DensityAnalyzer,
}

impl AdaptiveSlicer {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self {
            config,
            analyzer: DensityAnalyzer::new(),
        }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Leaf regions of `mesh`, ordered by z, y then x; empty for an empty mesh
    pub fn regions(&self, mesh: &Mesh) -> Vec<SliceRegion> {
        let Some(bounds) = mesh.bounds() else {
            return Vec::new();
        };
        let primitives = GeometricPrimitive::from_mesh(mesh);
        let index = SpatialIndex::build(&primitives, bounds, self.config.base_resolution);
        let scale = 1u32 << self.config.max_depth;

        let mut regions = Vec::new();
        for key in index.occupied_cells() {
            let cell_primitives: Vec<&GeometricPrimitive> =
                index.get(key).map(|c| c.iter().collect()).unwrap_or_default();
            self.subdivide(index.cell_bounds(key), cell_primitives, 0, key * scale, &mut regions);
        }

        regions.sort_unstable_by_key(|r| (r.coords.z, r.coords.y, r.coords.x));
        regions
    }

    /// Slice `mesh` into independent sub-meshes
    pub fn slice(&self, mesh: &Mesh) -> Vec<MeshSlice> {
        let slices: Vec<MeshSlice> = self
            .regions(mesh)
            .into_iter()
            .filter_map(|region| {
                let sub = mesh.extract(&region.triangles);
                let bounds = sub.bounds()?;
                Some(MeshSlice {
                    coords: region.coords,
                    mesh: sub,
                    bounds,
                })
            })
            .collect();
        log::debug!(
            "Sliced {} triangles into {} regions",
            mesh.triangle_count(),
            slices.len()
        );
        slices
    }

    fn should_split(&self, metrics: &DensityMetrics, depth: u32) -> bool {
        if depth >= self.config.max_depth || metrics.triangle_count <= self.config.min_triangles_per_slice {
            return false;
        }
        metrics.triangle_count > self.config.max_triangles_per_slice
            || self
                .config
                .triangle_density_threshold
                .is_some_and(|limit| metrics.triangle_density > limit)
            || self
                .config
                .curvature_threshold
                .is_some_and(|limit| metrics.curvature_complexity > limit)
    }

    fn subdivide(
        &self,
        cell: BoundingBox3D,
        primitives: Vec<&GeometricPrimitive>,
        depth: u32,
        origin: UVec3,
        out: &mut Vec<SliceRegion>,
    ) {
        let metrics = self.analyzer.region_metrics(primitives.iter().copied(), cell);

        if !self.should_split(&metrics, depth) {
            let mut triangles: Vec<usize> = primitives.iter().map(|p| p.triangle).collect();
            triangles.sort_unstable();
            out.push(SliceRegion {
                coords: origin,
                depth,
                cell,
                triangles,
                metrics,
            });
            return;
        }

        let center = cell.center();
        let mut children: [Vec<&GeometricPrimitive>; 8] = Default::default();
        for primitive in primitives {
            let c = primitive.centroid;
            let octant = usize::from(c.x >= center.x)
                | usize::from(c.y >= center.y) << 1
                | usize::from(c.z >= center.z) << 2;
            children[octant].push(primitive);
        }

        let step = 1u32 << (self.config.max_depth - depth - 1);
        let octants = cell.octants();
        for (octant, child) in children.into_iter().enumerate() {
            if child.is_empty() {
                continue;
            }
            let offset = UVec3::new(
                (octant & 1) as u32,
                ((octant >> 1) & 1) as u32,
                ((octant >> 2) & 1) as u32,
            ) * step;
            self.subdivide(octants[octant], child, depth + 1, origin + offset, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::math::Vec3;
    use tessera_core::{Triangle, Vertex};

    /// Two separate flat patches of `n` x `n` quads, far apart along X
    fn two_patches(n: u32) -> Mesh {
        let mut vertices = Vec::new();
        let mut triangles = Vec::new();
        for patch in 0..2 {
            let base = vertices.len() as u32;
            let x_offset = patch as f32 * 100.0;
            for y in 0..=n {
                for x in 0..=n {
                    vertices.push(Vertex::new(Vec3::new(x_offset + x as f32, y as f32, 0.0)));
                }
            }
            let row = n + 1;
            for y in 0..n {
                for x in 0..n {
                    let i = base + y * row + x;
                    triangles.push(Triangle::new([i, i + 1, i + row + 1], None));
                    triangles.push(Triangle::new([i, i + row + 1, i + row], None));
                }
            }
        }
        Mesh::new(vertices, triangles)
    }

    #[test]
    fn test_small_mesh_is_one_slice() {
        let mesh = two_patches(2);
        let slicer = AdaptiveSlicer::new(AdaptiveConfig::default());
        let regions = slicer.regions(&mesh);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].coords, UVec3::ZERO);
        assert_eq!(regions[0].triangles.len(), mesh.triangle_count());
    }

    #[test]
    fn test_empty_mesh_has_no_slices() {
        let slicer = AdaptiveSlicer::new(AdaptiveConfig::default());
        assert!(slicer.regions(&Mesh::default()).is_empty());
        assert!(slicer.slice(&Mesh::default()).is_empty());
    }

    #[test]
    fn test_dense_mesh_is_split() {
        let mesh = two_patches(8);
        let config = AdaptiveConfig {
            max_triangles_per_slice: 100,
            min_triangles_per_slice: 10,
            max_depth: 2,
            ..Default::default()
        };
        let slicer = AdaptiveSlicer::new(config);
        let regions = slicer.regions(&mesh);

        assert!(regions.len() >= 2);
        let total: usize = regions.iter().map(|r| r.triangles.len()).sum();
        assert_eq!(total, mesh.triangle_count());

        // Every triangle lands in exactly one region
        let mut seen: Vec<usize> = regions.iter().flat_map(|r| r.triangles.clone()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), mesh.triangle_count());

        // Coordinates are unique on the finest grid
        let mut coords: Vec<_> = regions.iter().map(|r| (r.coords.x, r.coords.y, r.coords.z)).collect();
        coords.sort_unstable();
        coords.dedup();
        assert_eq!(coords.len(), regions.len());
        let finest = slicer.config().finest_resolution();
        assert!(regions.iter().all(|r| r.coords.max_element() < finest));
    }

    #[test]
    fn test_split_stops_at_max_depth() {
        let mesh = two_patches(8);
        let config = AdaptiveConfig {
            max_triangles_per_slice: 1,
            min_triangles_per_slice: 0,
            max_depth: 1,
            curvature_threshold: None,
            ..Default::default()
        };
        let regions = AdaptiveSlicer::new(config).regions(&mesh);
        assert!(regions.iter().all(|r| r.depth <= 1));
        assert!(regions.len() <= 8);
    }

    #[test]
    fn test_slices_have_tight_bounds() {
        let mesh = two_patches(8);
        let config = AdaptiveConfig {
            max_triangles_per_slice: 200,
            min_triangles_per_slice: 10,
            max_depth: 1,
            ..Default::default()
        };
        let slices = AdaptiveSlicer::new(config).slice(&mesh);
        // One split: each patch is cut in half along Y, ordered by y then x
        assert_eq!(slices.len(), 4);
        assert_eq!(slices[0].bounds.max.x, 8.0);
        assert_eq!(slices[0].bounds.max.y, 4.0);
        assert_eq!(slices[1].bounds.min.x, 100.0);
        assert_eq!(slices[0].mesh.triangle_count(), 64);
        assert!(slices[2].bounds.min.y >= 3.0);
    }

    #[test]
    fn test_config_json() {
        let config: AdaptiveConfig = serde_json::from_str(r#"{"maxDepth": 2, "curvatureThreshold": null}"#).unwrap();
        assert_eq!(config.max_depth, 2);
        assert!(config.curvature_threshold.is_none());
        assert_eq!(config.finest_resolution(), 4);
        assert!(config.validate().is_ok());
        assert!(AdaptiveConfig { base_resolution: 0, ..Default::default() }.validate().is_err());
    }
}

//! Grid index and density metrics
//!
//! Primitives are bucketed by centroid into a uniform grid over the (padded) bounds.
//! Flat axes are padded so every cell has a positive volume.

use ahash::{AHashMap, AHashSet};
use tessera_core::math::{UVec3, Vec3};
use tessera_core::BoundingBox3D;

use crate::primitive::GeometricPrimitive;

/// Density and curvature of one region; every field is non-negative
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DensityMetrics {
    /// Distinct vertices per unit volume
    pub vertex_density: f32,
    /// Triangles per unit volume
    pub triangle_density: f32,
    /// Mean pairwise normal deviation `1 - ni . nj`, in `[0, 2]`
    pub curvature_complexity: f32,
    pub surface_area: f32,
    pub volume: f32,
    pub triangle_count: usize,
}

/// Uniform grid of primitives keyed by cell coordinates
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    bounds: BoundingBox3D,
    resolution: u32,
    cell_size: Vec3,
    cells: AHashMap<UVec3, Vec<GeometricPrimitive>>,
}

impl SpatialIndex {
    /// Bucket `primitives` into `resolution`^3 cells over `bounds`
    pub fn build(primitives: &[GeometricPrimitive], bounds: BoundingBox3D, resolution: u32) -> Self {
        let resolution = resolution.max(1);
        let bounds = pad_bounds(bounds);
        let cell_size = bounds.size() / resolution as f32;
        let mut index = Self {
            bounds,
            resolution,
            cell_size,
            cells: AHashMap::new(),
        };
        for primitive in primitives {
            let key = index.cell_key(primitive.centroid);
            index.cells.entry(key).or_default().push(*primitive);
        }
        index
    }

    /// Bounds covered by the grid
    pub fn bounds(&self) -> BoundingBox3D {
        self.bounds
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Cell containing `point`, clamped to the grid
    pub fn cell_key(&self, point: Vec3) -> UVec3 {
        let max = (self.resolution - 1) as f32;
        let local = ((point - self.bounds.min) / self.cell_size).floor();
        local.clamp(Vec3::ZERO, Vec3::splat(max)).as_uvec3()
    }

    pub fn cell_bounds(&self, key: UVec3) -> BoundingBox3D {
        let min = self.bounds.min + key.as_vec3() * self.cell_size;
        BoundingBox3D::new(min, min + self.cell_size)
    }

    pub fn get(&self, key: UVec3) -> Option<&[GeometricPrimitive]> {
        self.cells.get(&key).map(Vec::as_slice)
    }

    /// Occupied cells in x, y, z order
    pub fn occupied_cells(&self) -> Vec<UVec3> {
        let mut keys: Vec<UVec3> = self.cells.keys().copied().collect();
        keys.sort_unstable_by_key(|k| (k.z, k.y, k.x));
        keys
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Computes density metrics for cells and arbitrary regions
#[derive(Debug, Clone, Copy, Default)]
pub struct DensityAnalyzer;

impl DensityAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Metrics of every occupied cell in `index`
    pub fn analyze(&self, index: &SpatialIndex) -> AHashMap<UVec3, DensityMetrics> {
        index
            .cells
            .iter()
            .map(|(key, primitives)| {
                let metrics = self.region_metrics(primitives.iter(), index.cell_bounds(*key));
                (*key, metrics)
            })
            .collect()
    }

    /// Metrics of the given primitives inside `region`
    pub fn region_metrics<'a, I>(&self, primitives: I, region: BoundingBox3D) -> DensityMetrics
    where
        I: IntoIterator<Item = &'a GeometricPrimitive>,
    {
        let volume = region.volume().max(f32::MIN_POSITIVE);
        let mut vertices: AHashSet<u32> = AHashSet::new();
        let mut count = 0usize;
        let mut surface_area = 0.0f32;
        let mut normal_sum = Vec3::ZERO;
        let mut oriented = 0usize;

        for primitive in primitives {
            count += 1;
            surface_area += primitive.area;
            vertices.extend(primitive.indices);
            if primitive.normal != Vec3::ZERO {
                normal_sum += primitive.normal;
                oriented += 1;
            }
        }

        DensityMetrics {
            vertex_density: vertices.len() as f32 / volume,
            triangle_density: count as f32 / volume,
            curvature_complexity: mean_normal_deviation(normal_sum, oriented),
            surface_area,
            volume,
            triangle_count: count,
        }
    }
}

/// Mean of `1 - ni . nj` over all unordered pairs of `n` unit normals summing to `sum`
///
/// Uses `sum_{i<j} ni . nj = (|sum|^2 - n) / 2`, so no pairwise loop is needed.
fn mean_normal_deviation(sum: Vec3, n: usize) -> f32 {
    if n < 2 {
        return 0.0;
    }
    let n = n as f32;
    let pairs = n * (n - 1.0) * 0.5;
    let dot_sum = (sum.length_squared() - n) * 0.5;
    ((pairs - dot_sum) / pairs).clamp(0.0, 2.0)
}

/// Give flat axes a small thickness so volumes stay positive
pub fn pad_bounds(bounds: BoundingBox3D) -> BoundingBox3D {
    let size = bounds.size();
    let epsilon = (bounds.diagonal() * 1e-3).max(1e-6);
    let pad = Vec3::select(size.cmplt(Vec3::splat(epsilon)), Vec3::splat(epsilon * 0.5), Vec3::ZERO);
    BoundingBox3D::new(bounds.min - pad, bounds.max + pad)
}

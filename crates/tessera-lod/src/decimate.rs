//! Quadric error metric edge collapse
//!
//! Every vertex accumulates the area-weighted quadrics of its incident faces, plus
//! perpendicular penalty planes along open edges so outlines survive. Candidate
//! collapses sit in a min-heap keyed by error; each vertex carries a stamp that is bumped
//! whenever it moves, which invalidates stale heap entries lazily.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ahash::AHashMap;
use rayon::prelude::*;
use smallvec::SmallVec;
use tessera_core::math::DVec3;
use tessera_core::{CancellationToken, Mesh, Triangle, Vertex};

use crate::quadric::Quadric;
use crate::skinning::collapse_skin;
use crate::{LodError, LodResult, LodSchedule};

/// Collapses between cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 512;

/// Tuning knobs for the collapse loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecimationOptions {
    /// Weight of the penalty planes along open edges, relative to face quadrics
    pub boundary_weight: f64,
    /// Minimum cosine between a face normal before and after a collapse
    pub min_normal_cosine: f64,
}

impl Default for DecimationOptions {
    fn default() -> Self {
        Self {
            boundary_weight: 100.0,
            min_normal_cosine: 0.2,
        }
    }
}

/// One simplified level
#[derive(Debug, Clone, PartialEq)]
pub struct LodMesh {
    pub level: u32,
    pub mesh: Mesh,
    pub target_ratio: f32,
    pub simplified_triangle_count: usize,
    /// `simplified_triangle_count / original triangle count`
    pub reduction_ratio: f32,
}

/// Produces simplified meshes from a shared, read-only source
#[derive(Debug, Clone, Default)]
pub struct MeshDecimationEngine {
    options: DecimationOptions,
}

impl MeshDecimationEngine {
    pub fn new(options: DecimationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DecimationOptions {
        &self.options
    }

    /// Generate every level of `schedule` in parallel, one result per level
    pub fn generate_levels(
        &self,
        source: &Mesh,
        schedule: &LodSchedule,
        cancel: &CancellationToken,
    ) -> Vec<LodResult<LodMesh>> {
        schedule
            .ratios()
            .par_iter()
            .enumerate()
            .map(|(level, &ratio)| self.generate_level(source, level as u32, ratio, cancel))
            .collect()
    }

    /// Simplify `source` to `ratio` of its triangles
    pub fn generate_level(
        &self,
        source: &Mesh,
        level: u32,
        ratio: f32,
        cancel: &CancellationToken,
    ) -> LodResult<LodMesh> {
        let original = source.triangle_count();
        if original == 0 {
            return Err(LodError::DegenerateMesh { level });
        }
        if cancel.is_cancelled() {
            return Err(LodError::Cancelled { level });
        }

        let target = ((original as f64 * f64::from(ratio)).round() as usize).clamp(1, original);
        let mesh = if target >= original {
            source.clone()
        } else {
            self.simplify(source, target, cancel)
                .map_err(|_| LodError::Cancelled { level })?
        };

        let simplified = mesh.triangle_count();
        if simplified == 0 {
            return Err(LodError::EmptyResult { level });
        }

        let reduction_ratio = simplified as f32 / original as f32;
        log::debug!(
            "Level {}: {} -> {} triangles (target {}, ratio {:.3})",
            level,
            original,
            simplified,
            target,
            reduction_ratio
        );
        Ok(LodMesh {
            level,
            mesh,
            target_ratio: ratio,
            simplified_triangle_count: simplified,
            reduction_ratio,
        })
    }

    /// Collapse edges until at most `target` triangles remain or no valid collapse is left
    ///
    /// Fails only when cancelled.
    pub fn simplify(
        &self,
        source: &Mesh,
        target: usize,
        cancel: &CancellationToken,
    ) -> Result<Mesh, Cancelled> {
        let mut state = CollapseState::new(source, self.options);
        let mut collapses = 0usize;

        while state.live_triangles > target {
            if collapses % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(Cancelled);
            }
            let Some(candidate) = state.heap.pop() else {
                break;
            };
            if !state.is_current(&candidate) || !state.is_valid(&candidate) {
                continue;
            }
            state.apply(&candidate);
            collapses += 1;
        }

        Ok(state.into_mesh(source))
    }
}

/// Marker error for a cancelled simplification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    cost: f64,
    /// Retained vertex
    keep: u32,
    /// Absorbed vertex
    drop: u32,
    target: DVec3,
    /// Interpolation parameter from `keep` to `drop`
    t: f64,
    keep_stamp: u32,
    drop_stamp: u32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // Reversed so BinaryHeap pops the cheapest collapse; ties resolve by vertex ids
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.keep.cmp(&self.keep))
            .then_with(|| other.drop.cmp(&self.drop))
    }
}

type TriangleList = SmallVec<[u32; 8]>;

struct CollapseState {
    options: DecimationOptions,
    positions: Vec<DVec3>,
    vertices: Vec<Vertex>,
    quadrics: Vec<Quadric>,
    triangles: Vec<[u32; 3]>,
    triangle_alive: Vec<bool>,
    vertex_alive: Vec<bool>,
    stamps: Vec<u32>,
    incident: Vec<TriangleList>,
    live_triangles: usize,
    heap: BinaryHeap<Candidate>,
}

impl CollapseState {
    fn new(source: &Mesh, options: DecimationOptions) -> Self {
        let vertex_count = source.vertex_count();
        let positions: Vec<DVec3> = source.vertices.iter().map(|v| v.position.as_dvec3()).collect();
        let triangles: Vec<[u32; 3]> = source.triangles.iter().map(|t| t.indices).collect();

        let mut quadrics = vec![Quadric::ZERO; vertex_count];
        let mut incident: Vec<TriangleList> = vec![TriangleList::new(); vertex_count];
        let mut edge_faces: AHashMap<(u32, u32), (u32, u32)> = AHashMap::new();

        for (ti, tri) in triangles.iter().enumerate() {
            let [a, b, c] = tri.map(|i| positions[i as usize]);
            let cross = (b - a).cross(c - a);
            let double_area = cross.length();
            if double_area > 0.0 {
                let normal = cross / double_area;
                let q = Quadric::from_point_normal(a, normal) * (double_area * 0.5);
                for &i in tri {
                    quadrics[i as usize] += q;
                }
            }
            for &i in tri {
                incident[i as usize].push(ti as u32);
            }
            for (u, v) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                let entry = edge_faces.entry(edge_key(u, v)).or_insert((0, ti as u32));
                entry.0 += 1;
            }
        }

        for (&(u, v), &(count, ti)) in &edge_faces {
            if count != 1 {
                continue;
            }
            let [a, b, c] = triangles[ti as usize].map(|i| positions[i as usize]);
            let face_normal = (b - a).cross(c - a).normalize_or_zero();
            let (pu, pv) = (positions[u as usize], positions[v as usize]);
            let edge = pv - pu;
            let plane_normal = edge.cross(face_normal).normalize_or_zero();
            if plane_normal == DVec3::ZERO {
                continue;
            }
            let q = Quadric::from_point_normal(pu, plane_normal) * (options.boundary_weight * edge.length_squared());
            quadrics[u as usize] += q;
            quadrics[v as usize] += q;
        }

        let mut state = Self {
            options,
            positions,
            vertices: source.vertices.clone(),
            quadrics,
            live_triangles: triangles.len(),
            triangle_alive: vec![true; triangles.len()],
            triangles,
            vertex_alive: vec![true; vertex_count],
            stamps: vec![0; vertex_count],
            incident,
            heap: BinaryHeap::with_capacity(edge_faces.len()),
        };

        let mut edges: Vec<(u32, u32)> = edge_faces.into_keys().collect();
        // Hash map iteration order is random; sort for reproducible output
        edges.sort_unstable();
        for (u, v) in edges {
            let candidate = state.candidate(u, v);
            state.heap.push(candidate);
        }
        state
    }

    fn candidate(&self, u: u32, v: u32) -> Candidate {
        let (keep, drop) = (u.min(v), u.max(v));
        let pk = self.positions[keep as usize];
        let pd = self.positions[drop as usize];
        let q = self.quadrics[keep as usize] + self.quadrics[drop as usize];
        let edge = pd - pk;
        let edge_len_sq = edge.length_squared();

        let mut options: SmallVec<[(DVec3, f64); 4]> = SmallVec::new();
        if let Some(p) = q.optimal_point() {
            // Reject solutions that wander far from the edge on near-singular systems
            let reach = edge_len_sq.sqrt();
            let lo = pk.min(pd) - DVec3::splat(reach);
            let hi = pk.max(pd) + DVec3::splat(reach);
            if p.cmpge(lo).all() && p.cmple(hi).all() {
                let t = if edge_len_sq > 0.0 {
                    ((p - pk).dot(edge) / edge_len_sq).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                options.push((p, t));
            }
        }
        options.push(((pk + pd) * 0.5, 0.5));
        options.push((pk, 0.0));
        options.push((pd, 1.0));

        let mut best = options[0];
        let mut best_cost = q.error(best.0);
        for &(p, t) in &options[1..] {
            let cost = q.error(p);
            if cost < best_cost {
                best = (p, t);
                best_cost = cost;
            }
        }

        Candidate {
            cost: best_cost,
            keep,
            drop,
            target: best.0,
            t: best.1,
            keep_stamp: self.stamps[keep as usize],
            drop_stamp: self.stamps[drop as usize],
        }
    }

    fn is_current(&self, c: &Candidate) -> bool {
        let (k, d) = (c.keep as usize, c.drop as usize);
        self.vertex_alive[k]
            && self.vertex_alive[d]
            && self.stamps[k] == c.keep_stamp
            && self.stamps[d] == c.drop_stamp
    }

    fn alive_incident(&self, vertex: u32) -> impl Iterator<Item = u32> + '_ {
        self.incident[vertex as usize]
            .iter()
            .copied()
            .filter(|&t| self.triangle_alive[t as usize])
    }

    fn neighbors(&self, vertex: u32) -> SmallVec<[u32; 16]> {
        let mut out: SmallVec<[u32; 16]> = SmallVec::new();
        for t in self.alive_incident(vertex) {
            for &other in &self.triangles[t as usize] {
                if other != vertex && !out.contains(&other) {
                    out.push(other);
                }
            }
        }
        out
    }

    fn is_valid(&self, c: &Candidate) -> bool {
        let shared: TriangleList = self
            .alive_incident(c.keep)
            .filter(|&t| self.triangles[t as usize].contains(&c.drop))
            .collect();
        if shared.is_empty() || shared.len() >= self.live_triangles {
            return false;
        }

        // Link condition: common neighbours are exactly the shared faces' apexes
        let apexes: SmallVec<[u32; 4]> = shared
            .iter()
            .filter_map(|&t| {
                self.triangles[t as usize]
                    .iter()
                    .copied()
                    .find(|&v| v != c.keep && v != c.drop)
            })
            .collect();
        let keep_neighbors = self.neighbors(c.keep);
        let common = self
            .neighbors(c.drop)
            .into_iter()
            .filter(|v| keep_neighbors.contains(v))
            .count();
        if common != apexes.len() {
            return false;
        }

        // Faces that survive must not flip, degenerate or duplicate an existing face
        let mut survivors: SmallVec<[[u32; 3]; 16]> = SmallVec::new();
        for vertex in [c.keep, c.drop] {
            for t in self.alive_incident(vertex) {
                if shared.contains(&t) {
                    continue;
                }
                let tri = self.triangles[t as usize];
                if !self.keeps_orientation(tri, vertex, c.target) {
                    return false;
                }
                let mut key = tri.map(|i| if i == c.drop { c.keep } else { i });
                key.sort_unstable();
                if survivors.contains(&key) {
                    return false;
                }
                survivors.push(key);
            }
        }
        true
    }

    fn keeps_orientation(&self, tri: [u32; 3], moved: u32, target: DVec3) -> bool {
        let before = tri.map(|i| self.positions[i as usize]);
        let after = tri.map(|i| if i == moved { target } else { self.positions[i as usize] });
        let n0 = (before[1] - before[0]).cross(before[2] - before[0]);
        let n1 = (after[1] - after[0]).cross(after[2] - after[0]);
        let (l0, l1) = (n0.length(), n1.length());
        if l1 <= l0 * 1e-6 || l1 == 0.0 {
            return false;
        }
        if l0 == 0.0 {
            return true;
        }
        n0.dot(n1) / (l0 * l1) >= self.options.min_normal_cosine
    }

    fn apply(&mut self, c: &Candidate) {
        let (keep, drop) = (c.keep as usize, c.drop as usize);

        let retained = self.vertices[keep];
        let absorbed = self.vertices[drop];
        let t = c.t as f32;
        self.vertices[keep] = Vertex {
            position: c.target.as_vec3(),
            normal: lerp_option(retained.normal, absorbed.normal, t).map(|n| n.normalize_or_zero()),
            uv: lerp_option(retained.uv, absorbed.uv, t),
            skin: collapse_skin(retained.skin, absorbed.skin),
        };
        self.positions[keep] = c.target;
        let absorbed_quadric = self.quadrics[drop];
        self.quadrics[keep] += absorbed_quadric;

        let moved: TriangleList = self.alive_incident(c.drop).collect();
        for t in moved {
            let tri = &mut self.triangles[t as usize];
            if tri.contains(&c.keep) {
                self.triangle_alive[t as usize] = false;
                self.live_triangles -= 1;
            } else {
                for index in tri.iter_mut() {
                    if *index == c.drop {
                        *index = c.keep;
                    }
                }
                self.incident[keep].push(t);
            }
        }

        let alive = &self.triangle_alive;
        self.incident[keep].retain(|t| alive[*t as usize]);
        self.incident[drop].clear();
        self.vertex_alive[drop] = false;
        self.stamps[keep] = self.stamps[keep].wrapping_add(1);

        for neighbor in self.neighbors(c.keep) {
            let candidate = self.candidate(c.keep, neighbor);
            self.heap.push(candidate);
        }
    }

    fn into_mesh(self, source: &Mesh) -> Mesh {
        let mut remap = vec![u32::MAX; self.vertices.len()];
        let mut vertices = Vec::new();
        let mut triangles = Vec::with_capacity(self.live_triangles);

        for (ti, tri) in self.triangles.iter().enumerate() {
            if !self.triangle_alive[ti] {
                continue;
            }
            let indices = tri.map(|i| {
                let slot = &mut remap[i as usize];
                if *slot == u32::MAX {
                    *slot = vertices.len() as u32;
                    vertices.push(self.vertices[i as usize]);
                }
                *slot
            });
            triangles.push(Triangle::new(indices, source.triangles[ti].material));
        }

        Mesh {
            vertices,
            triangles,
            materials: source.materials.clone(),
        }
    }
}

fn edge_key(u: u32, v: u32) -> (u32, u32) {
    (u.min(v), u.max(v))
}

fn lerp_option<T>(a: Option<T>, b: Option<T>, t: f32) -> Option<T>
where
    T: Copy + std::ops::Mul<f32, Output = T> + std::ops::Add<Output = T>,
{
    match (a, b) {
        (Some(a), Some(b)) => Some(a * (1.0 - t) + b * t),
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    }
}

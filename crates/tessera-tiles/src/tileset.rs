//! tileset.json model and builder
//!
//! Levels nest coarse to fine: each slice at level `L + 1` becomes a child of one node at
//! level `L`. When level `L` holds a single node it parents the whole next level. When it
//! holds several, each finer slice goes to the node whose box overlaps it most, ties broken
//! by the nearest center. Levels missing from the input are skipped over, so the next
//! present level attaches to the last present one.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessera_core::math::DVec3;
use tessera_core::BoundingBox3D;

use crate::geo::GeoOrigin;
use crate::slice::Slice;
use crate::{TileError, TileResult};

/// Fraction of the model diagonal used as the finest level's geometric error
pub const ERROR_SCALE: f64 = 0.1;

/// Smallest half-extent written to a bounding box
pub const MIN_HALF_EXTENT: f64 = 0.01;

/// Oriented bounding box: center followed by three half-axis vectors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingVolume {
    #[serde(rename = "box")]
    pub data: [f64; 12],
}

impl BoundingVolume {
    /// Axis-aligned box around `bounds`, with flat axes thickened to [`MIN_HALF_EXTENT`]
    pub fn from_bounds(bounds: &BoundingBox3D) -> Self {
        let c = bounds.center().as_dvec3();
        let h = bounds.half_extents().as_dvec3().max(DVec3::splat(MIN_HALF_EXTENT));
        Self {
            data: [c.x, c.y, c.z, h.x, 0.0, 0.0, 0.0, h.y, 0.0, 0.0, 0.0, h.z],
        }
    }

    pub fn center(&self) -> DVec3 {
        DVec3::new(self.data[0], self.data[1], self.data[2])
    }

    /// Half extents of an axis-aligned box
    pub fn half_extents(&self) -> DVec3 {
        DVec3::new(self.data[3], self.data[7], self.data[11])
    }

    pub fn diagonal(&self) -> f64 {
        self.half_extents().length() * 2.0
    }

    fn overlap_volume(&self, other: &BoundingVolume) -> f64 {
        let lo = (self.center() - self.half_extents()).max(other.center() - other.half_extents());
        let hi = (self.center() + self.half_extents()).min(other.center() + other.half_extents());
        let size = (hi - lo).max(DVec3::ZERO);
        size.x * size.y * size.z
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Refine {
    Add,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileContent {
    /// Relative to the directory holding tileset.json
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileNode {
    pub bounding_volume: BoundingVolume,
    pub geometric_error: f64,
    pub refine: Refine,
    /// Column-major 4x4 placing this subtree, set on the root when geo-referenced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<[f64; 16]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<TileContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TileNode>,
}

impl TileNode {
    /// Number of nodes in this subtree
    pub fn count_tiles(&self) -> usize {
        1 + self.children.iter().map(TileNode::count_tiles).sum::<usize>()
    }

    /// Depth of this subtree, 1 for a leaf
    pub fn max_depth(&self) -> usize {
        1 + self.children.iter().map(TileNode::max_depth).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilesetAsset {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gltf_up_axis: Option<String>,
}

/// Root tileset.json document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tileset {
    pub asset: TilesetAsset,
    pub geometric_error: f64,
    pub root: TileNode,
}

impl Tileset {
    pub fn from_json(json: &str) -> TileResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> TileResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write pretty-printed JSON to `path` and return the byte size
    pub fn write(&self, path: &Path) -> TileResult<u64> {
        let json = self.to_json()?;
        fs::write(path, json.as_bytes()).map_err(|source| TileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(json.len() as u64)
    }
}

/// Assembles the tile hierarchy from written slices
#[derive(Debug, Clone)]
pub struct TilesetBuilder {
    base_dir: PathBuf,
    generator: String,
    geo_origin: Option<GeoOrigin>,
}

impl TilesetBuilder {
    /// Content URIs are made relative to `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            generator: tessera_core::generator_name(),
            geo_origin: None,
        }
    }

    pub fn with_generator(mut self, generator: impl Into<String>) -> Self {
        self.generator = generator.into();
        self
    }

    /// Anchor model space at `origin` through the root transform
    pub fn with_geo_origin(mut self, origin: Option<GeoOrigin>) -> Self {
        self.geo_origin = origin;
        self
    }

    /// Geometric error of `level` for a model whose bounds have the given diagonal
    pub fn geometric_error(diagonal: f64, level: u32, max_level: u32) -> f64 {
        diagonal * 2f64.powi(max_level.saturating_sub(level) as i32) * ERROR_SCALE
    }

    /// Build the tileset for `slices`; `max_level` is the full-detail level
    pub fn build(&self, slices: &[Slice], model_bounds: &BoundingBox3D, max_level: u32) -> TileResult<Tileset> {
        let mut levels: BTreeMap<u32, Vec<&Slice>> = BTreeMap::new();
        for slice in slices {
            levels.entry(slice.level).or_default().push(slice);
        }
        if !levels.contains_key(&0) {
            return Err(TileError::MissingRootLevel);
        }
        for group in levels.values_mut() {
            group.sort_by_key(|s| (s.z, s.y, s.x));
        }

        let max_level = levels.keys().next_back().map_or(max_level, |top| max_level.max(*top));
        let diagonal = BoundingVolume::from_bounds(model_bounds).diagonal();
        let groups: Vec<(u32, Vec<&Slice>)> = levels.into_iter().collect();

        // Finest level first; each level's nodes wait in `pending` for their parents
        let mut pending: Vec<(usize, TileNode)> = Vec::new();
        let mut roots = Vec::new();
        for (i, (level, group)) in groups.iter().enumerate().rev() {
            let error = Self::geometric_error(diagonal, *level, max_level);
            let mut nodes: Vec<TileNode> = group
                .iter()
                .map(|slice| self.slice_node(slice, error, *level == max_level))
                .collect();
            for (parent, child) in pending.drain(..) {
                nodes[parent].children.push(child);
            }

            if i == 0 {
                roots = nodes;
            } else {
                let parents = assign_parents(&groups[i - 1].1, group);
                pending = parents.into_iter().zip(nodes).collect();
            }
        }

        let mut root = if roots.len() == 1 {
            roots.remove(0)
        } else {
            let union = groups[0]
                .1
                .iter()
                .fold(BoundingBox3D::EMPTY, |acc, s| acc.merge(&s.bounding_box));
            TileNode {
                bounding_volume: BoundingVolume::from_bounds(&union),
                geometric_error: Self::geometric_error(diagonal, 0, max_level),
                refine: Refine::Replace,
                transform: None,
                content: None,
                children: roots,
            }
        };

        if let Some(origin) = &self.geo_origin {
            log::debug!("Placing root at lon {} lat {} height {}", origin.lon, origin.lat, origin.height);
            root.transform = Some(origin.transform());
        }

        log::info!(
            "Built tileset with {} tiles over {} levels",
            root.count_tiles(),
            groups.len()
        );

        Ok(Tileset {
            asset: TilesetAsset {
                version: "1.0".into(),
                generator: Some(self.generator.clone()),
                gltf_up_axis: Some("Z".into()),
            },
            geometric_error: root.geometric_error * 2.0,
            root,
        })
    }

    fn slice_node(&self, slice: &Slice, geometric_error: f64, leaf: bool) -> TileNode {
        TileNode {
            bounding_volume: BoundingVolume::from_bounds(&slice.bounding_box),
            geometric_error,
            refine: if leaf { Refine::Add } else { Refine::Replace },
            transform: None,
            content: Some(TileContent {
                uri: self.content_uri(&slice.file_path),
            }),
            children: Vec::new(),
        }
    }

    fn content_uri(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.base_dir).unwrap_or(path);
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Index into `parents` for every slice in `children`
fn assign_parents(parents: &[&Slice], children: &[&Slice]) -> Vec<usize> {
    if parents.len() == 1 {
        return vec![0; children.len()];
    }
    let volumes: Vec<BoundingVolume> = parents
        .iter()
        .map(|s| BoundingVolume::from_bounds(&s.bounding_box))
        .collect();

    children
        .iter()
        .map(|child| {
            let volume = BoundingVolume::from_bounds(&child.bounding_box);
            let mut best = 0;
            let mut best_overlap = f64::NEG_INFINITY;
            let mut best_distance = f64::INFINITY;
            for (index, parent) in volumes.iter().enumerate() {
                let overlap = parent.overlap_volume(&volume);
                let distance = parent.center().distance_squared(volume.center());
                if overlap > best_overlap || (overlap == best_overlap && distance < best_distance) {
                    best = index;
                    best_overlap = overlap;
                    best_distance = distance;
                }
            }
            best
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::math::{UVec3, Vec3};

    fn bounds(min: [f32; 3], max: [f32; 3]) -> BoundingBox3D {
        BoundingBox3D::new(Vec3::from(min), Vec3::from(max))
    }

    fn slice(level: u32, coords: [u32; 3], b: BoundingBox3D, path: &str) -> Slice {
        Slice::new(level, UVec3::from(coords), b, format!("/out/{path}"), 100)
    }

    fn chain(levels: u32) -> Vec<Slice> {
        let b = bounds([0.0; 3], [3.0, 4.0, 12.0]);
        (0..levels)
            .map(|level| slice(level, [0; 3], b, &format!("{level}/tile.b3dm")))
            .collect()
    }

    #[test]
    fn test_error_decreases_toward_leaves() {
        let model = bounds([0.0; 3], [3.0, 4.0, 12.0]);
        let tileset = TilesetBuilder::new("/out").build(&chain(3), &model, 2).unwrap();

        let mut node = &tileset.root;
        let mut errors = vec![node.geometric_error];
        while let Some(child) = node.children.first() {
            errors.push(child.geometric_error);
            node = child;
        }
        assert_eq!(errors.len(), 3);
        assert!(errors.windows(2).all(|w| w[0] > w[1]));
        // Diagonal 13, finest error 1.3, halving upward
        assert!((errors[2] - 1.3).abs() < 1e-9);
        assert!((errors[0] - 5.2).abs() < 1e-9);
        assert!((tileset.geometric_error - 10.4).abs() < 1e-9);
    }

    #[test]
    fn test_refine_add_only_at_max_level() {
        let model = bounds([0.0; 3], [1.0; 3]);
        let tileset = TilesetBuilder::new("/out").build(&chain(3), &model, 2).unwrap();

        assert_eq!(tileset.root.refine, Refine::Replace);
        assert_eq!(tileset.root.children[0].refine, Refine::Replace);
        assert_eq!(tileset.root.children[0].children[0].refine, Refine::Add);
        assert_eq!(tileset.root.max_depth(), 3);
    }

    #[test]
    fn test_missing_level_zero_fails() {
        let model = bounds([0.0; 3], [1.0; 3]);
        let slices: Vec<Slice> = chain(3).into_iter().skip(1).collect();
        let result = TilesetBuilder::new("/out").build(&slices, &model, 2);
        assert!(matches!(result, Err(TileError::MissingRootLevel)));
    }

    #[test]
    fn test_content_uri_is_relative() {
        let model = bounds([0.0; 3], [1.0; 3]);
        let tileset = TilesetBuilder::new("/out").build(&chain(2), &model, 1).unwrap();
        assert_eq!(tileset.root.content.as_ref().unwrap().uri, "0/tile.b3dm");
        assert_eq!(tileset.root.children[0].content.as_ref().unwrap().uri, "1/tile.b3dm");
    }

    #[test]
    fn test_flat_box_has_minimum_extent() {
        let volume = BoundingVolume::from_bounds(&bounds([0.0, 0.0, 5.0], [2.0, 4.0, 5.0]));
        assert_eq!(
            volume.data,
            [1.0, 2.0, 5.0, 1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, MIN_HALF_EXTENT]
        );
    }

    #[test]
    fn test_uneven_branches_follow_overlap() {
        let model = bounds([0.0; 3], [8.0, 2.0, 2.0]);
        let left = bounds([0.0; 3], [4.0, 2.0, 2.0]);
        let right = bounds([4.0, 0.0, 0.0], [8.0, 2.0, 2.0]);
        let slices = vec![
            slice(0, [0, 0, 0], model, "0/tile.b3dm"),
            slice(1, [0, 0, 0], left, "1/tile_0_0_0.b3dm"),
            slice(1, [4, 0, 0], right, "1/tile_4_0_0.b3dm"),
            slice(2, [0, 0, 0], bounds([0.0; 3], [2.0, 2.0, 2.0]), "2/tile_0_0_0.b3dm"),
            slice(2, [2, 0, 0], bounds([2.0, 0.0, 0.0], [4.0, 2.0, 2.0]), "2/tile_2_0_0.b3dm"),
            slice(2, [6, 0, 0], bounds([6.0, 0.0, 0.0], [8.0, 2.0, 2.0]), "2/tile_6_0_0.b3dm"),
        ];
        let tileset = TilesetBuilder::new("/out").build(&slices, &model, 2).unwrap();

        let root = &tileset.root;
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[0].children.len(), 2);
        assert_eq!(root.children[1].children.len(), 1);
        assert_eq!(
            root.children[1].children[0].content.as_ref().unwrap().uri,
            "2/tile_6_0_0.b3dm"
        );
        assert_eq!(root.count_tiles(), 6);
    }

    #[test]
    fn test_several_level_zero_slices_get_synthetic_root() {
        let model = bounds([0.0; 3], [8.0, 2.0, 2.0]);
        let slices = vec![
            slice(0, [0, 0, 0], bounds([0.0; 3], [4.0, 2.0, 2.0]), "0/a.b3dm"),
            slice(0, [1, 0, 0], bounds([4.0, 0.0, 0.0], [8.0, 2.0, 2.0]), "0/b.b3dm"),
        ];
        let tileset = TilesetBuilder::new("/out").build(&slices, &model, 0).unwrap();

        assert!(tileset.root.content.is_none());
        assert_eq!(tileset.root.children.len(), 2);
        assert_eq!(tileset.root.bounding_volume.center(), DVec3::new(4.0, 1.0, 1.0));
        assert!(tileset.root.children.iter().all(|c| c.refine == Refine::Add));
        assert!(tileset.root.children.iter().all(|c| c.geometric_error <= tileset.root.geometric_error));
    }

    #[test]
    fn test_skipped_level_attaches_to_previous() {
        let model = bounds([0.0; 3], [1.0; 3]);
        let slices: Vec<Slice> = chain(3).into_iter().filter(|s| s.level != 1).collect();
        let tileset = TilesetBuilder::new("/out").build(&slices, &model, 2).unwrap();

        assert_eq!(tileset.root.children.len(), 1);
        let leaf = &tileset.root.children[0];
        assert_eq!(leaf.content.as_ref().unwrap().uri, "2/tile.b3dm");
        assert_eq!(leaf.refine, Refine::Add);
        assert!((tileset.root.geometric_error / leaf.geometric_error - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_json_shape() {
        let model = bounds([0.0; 3], [1.0; 3]);
        let tileset = TilesetBuilder::new("/out")
            .with_generator("tessera test")
            .build(&chain(1), &model, 0)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&tileset.to_json().unwrap()).unwrap();

        assert_eq!(value["asset"]["version"], "1.0");
        assert_eq!(value["asset"]["generator"], "tessera test");
        assert_eq!(value["asset"]["gltfUpAxis"], "Z");
        assert_eq!(value["root"]["refine"], "ADD");
        assert_eq!(value["root"]["boundingVolume"]["box"].as_array().unwrap().len(), 12);
        assert!(value["root"].get("children").is_none());
        assert!(value["root"].get("transform").is_none());
        assert_eq!(Tileset::from_json(&tileset.to_json().unwrap()).unwrap(), tileset);
    }

    #[test]
    fn test_geo_origin_sets_root_transform_only() {
        let model = bounds([0.0; 3], [1.0; 3]);
        let origin = GeoOrigin::new(8.5, 47.3, 400.0);
        let tileset = TilesetBuilder::new("/out")
            .with_geo_origin(Some(origin))
            .build(&chain(2), &model, 1)
            .unwrap();

        assert_eq!(tileset.root.transform, Some(origin.transform()));
        assert!(tileset.root.children[0].transform.is_none());

        let value: serde_json::Value = serde_json::from_str(&tileset.to_json().unwrap()).unwrap();
        let transform = value["root"]["transform"].as_array().unwrap();
        assert_eq!(transform.len(), 16);
        assert_eq!(transform[15], 1.0);
        assert!(value["root"]["children"][0].get("transform").is_none());
        assert_eq!(Tileset::from_json(&tileset.to_json().unwrap()).unwrap(), tileset);
    }
}

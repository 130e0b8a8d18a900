//! Durable per-tile records

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tessera_core::math::UVec3;
use tessera_core::BoundingBox3D;

use crate::encoder::TileFormat;

/// Metadata for one written tile file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slice {
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
    /// Tight bounds of the tile's geometry
    pub bounding_box: BoundingBox3D,
    pub file_path: PathBuf,
    pub file_size: u64,
    /// Seconds since the Unix epoch
    pub created_at: u64,
}

impl Slice {
    /// Record a tile written now
    pub fn new(
        level: u32,
        coords: UVec3,
        bounding_box: BoundingBox3D,
        file_path: impl Into<PathBuf>,
        file_size: u64,
    ) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            level,
            x: coords.x,
            y: coords.y,
            z: coords.z,
            bounding_box,
            file_path: file_path.into(),
            file_size,
            created_at,
        }
    }

    pub fn coords(&self) -> UVec3 {
        UVec3::new(self.x, self.y, self.z)
    }
}

/// Tile path relative to the output directory
///
/// A level written as a single tile uses `{level}/tile.<ext>`; sliced levels carry the
/// slice's grid coordinates.
pub fn tile_file_name(level: u32, coords: Option<UVec3>, format: TileFormat) -> PathBuf {
    let ext = format.extension();
    let name = match coords {
        Some(c) => format!("tile_{}_{}_{}.{ext}", c.x, c.y, c.z),
        None => format!("tile.{ext}"),
    };
    PathBuf::from(level.to_string()).join(name)
}

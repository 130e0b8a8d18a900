//! Job summary returned to callers

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Result of one LOD level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelSummary {
    pub level: u32,
    pub triangle_count: usize,
    /// `triangle_count / original_triangle_count`
    pub reduction_ratio: f32,
    /// Tiles written for this level
    pub tile_count: usize,
}

/// Outcome of a successful conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub success: bool,
    pub input_file: PathBuf,
    pub output_directory: PathBuf,
    pub original_triangle_count: usize,
    pub lod_levels: Vec<LevelSummary>,
    /// Levels dropped under the skip-level policy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_levels: Vec<u32>,
    pub tileset_path: PathBuf,
    /// Tiles, tileset.json and the atlas image if one was written
    pub total_files: usize,
    /// Bytes across all written files
    pub total_size: u64,
    /// Wall-clock seconds
    pub processing_time: f64,
    /// Recovered problems: skipped input lines, atlas fallback, missing textures
    pub warnings: Vec<String>,
    pub atlas_generated: bool,
}

impl JobSummary {
    pub fn tile_count(&self) -> usize {
        self.lod_levels.iter().map(|l| l.tile_count).sum()
    }
}

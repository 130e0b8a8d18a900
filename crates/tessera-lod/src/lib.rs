//! # Tessera LOD
//!
//! Level-of-detail generation for the Tessera converter.
//!
//! - **Quadrics**: symmetric 4x4 error matrices accumulated from face planes
//! - **Decimation**: greedy lowest-error edge collapse down to a triangle budget
//! - **Skinning**: pure 4-slot bone weight merge and renormalisation
//!
//! Level 0 is the coarsest level. Every level is simplified independently from the
//! same source mesh, so levels can be produced in parallel.

use thiserror::Error;

pub mod decimate;
pub mod quadric;
pub mod skinning;

pub use decimate::{DecimationOptions, LodMesh, MeshDecimationEngine};
pub use quadric::Quadric;
pub use skinning::{merge_bone_weights, normalize_bone_weights};

/// LOD generation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LodError {
    #[error("Level {level}: source mesh has no triangles")]
    DegenerateMesh { level: u32 },

    #[error("Level {level}: simplification left no triangles")]
    EmptyResult { level: u32 },

    #[error("Invalid LOD schedule: {0}")]
    InvalidSchedule(String),

    #[error("Level {level}: cancelled")]
    Cancelled { level: u32 },
}

/// Result type for LOD operations
pub type LodResult<T> = Result<T, LodError>;

/// Target triangle ratio per level, level 0 first
#[derive(Debug, Clone, PartialEq)]
pub struct LodSchedule {
    ratios: Vec<f32>,
}

impl LodSchedule {
    /// Finest level keeps every triangle; each coarser level halves the budget
    pub fn halving(level_count: u32) -> LodResult<Self> {
        if level_count == 0 {
            return Err(LodError::InvalidSchedule("at least one level is required".into()));
        }
        let finest = level_count - 1;
        let ratios = (0..level_count)
            .map(|level| 0.5f32.powi((finest - level) as i32))
            .collect();
        Ok(Self { ratios })
    }

    /// Explicit ratios; each must lie in (0, 1] and never decrease with level
    pub fn from_ratios(ratios: Vec<f32>) -> LodResult<Self> {
        if ratios.is_empty() {
            return Err(LodError::InvalidSchedule("at least one level is required".into()));
        }
        if let Some(bad) = ratios.iter().find(|r| !(**r > 0.0 && **r <= 1.0)) {
            return Err(LodError::InvalidSchedule(format!("ratio {bad} outside (0, 1]")));
        }
        if ratios.windows(2).any(|w| w[1] < w[0]) {
            return Err(LodError::InvalidSchedule(
                "ratios must not decrease from coarse to fine levels".into(),
            ));
        }
        Ok(Self { ratios })
    }

    pub fn level_count(&self) -> u32 {
        self.ratios.len() as u32
    }

    pub fn max_level(&self) -> u32 {
        self.level_count() - 1
    }

    pub fn ratio(&self, level: u32) -> Option<f32> {
        self.ratios.get(level as usize).copied()
    }

    pub fn ratios(&self) -> &[f32] {
        &self.ratios
    }
}

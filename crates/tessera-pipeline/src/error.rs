//! Pipeline errors
//!
//! Every fatal failure carries the stage it happened in and, where relevant, the level
//! and the underlying cause. Recoverable problems (skipped input lines, atlas overflow,
//! unreadable textures) never become errors; they are collected as job warnings.

use std::fmt;
use std::path::PathBuf;

use tessera_assets::AssetError;
use tessera_lod::LodError;
use tessera_tiles::TileError;
use thiserror::Error;

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Configure,
    Load,
    Atlas,
    Decimate,
    Slice,
    Encode,
    Tileset,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configure => "configure",
            Self::Load => "load",
            Self::Atlas => "atlas",
            Self::Decimate => "decimate",
            Self::Slice => "slice",
            Self::Encode => "encode",
            Self::Tileset => "tileset",
        };
        f.write_str(name)
    }
}

/// Coarse classification callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConfig,
    InputNotFound,
    UnsupportedFormat,
    Io,
    EmptyMesh,
    DecimationFailure,
    EncodingFailure,
    TilesetBuildFailure,
    Cancelled,
}

/// Fatal pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Input not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Unsupported input format: {0}")]
    UnsupportedFormat(String),

    #[error("Reading input failed: {0}")]
    Io(#[source] AssetError),

    #[error("{} contains no triangles", .0.display())]
    EmptyMesh(PathBuf),

    #[error("Writing atlas failed: {0}")]
    AtlasWrite(#[source] AssetError),

    #[error("Decimation failed at level {level}: {source}")]
    Decimation {
        level: u32,
        #[source]
        source: LodError,
    },

    #[error("Cannot create output directory {}: {source}", path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoding level {level} to {} failed: {source}", path.display())]
    Encoding {
        level: u32,
        path: PathBuf,
        #[source]
        source: TileError,
    },

    #[error("Building tileset failed: {0}")]
    Tileset(#[source] TileError),

    #[error("Conversion cancelled during {stage}")]
    Cancelled { stage: Stage },
}

impl PipelineError {
    /// Map a loader error onto the pipeline's error kinds
    pub fn from_load(err: AssetError) -> Self {
        match err {
            AssetError::InputNotFound(path) => Self::InputNotFound(path),
            AssetError::UnsupportedFormat(ext) => Self::UnsupportedFormat(ext),
            AssetError::Cancelled => Self::Cancelled { stage: Stage::Load },
            other => Self::Io(other),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::InputNotFound(_) => ErrorKind::InputNotFound,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::Io(_) => ErrorKind::Io,
            Self::EmptyMesh(_) => ErrorKind::EmptyMesh,
            Self::Decimation { .. } => ErrorKind::DecimationFailure,
            Self::AtlasWrite(_) | Self::OutputDirectory { .. } | Self::Encoding { .. } => {
                ErrorKind::EncodingFailure
            }
            Self::Tileset(_) => ErrorKind::TilesetBuildFailure,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidConfig(_) => Stage::Configure,
            Self::InputNotFound(_) | Self::UnsupportedFormat(_) | Self::Io(_) | Self::EmptyMesh(_) => {
                Stage::Load
            }
            Self::AtlasWrite(_) => Stage::Atlas,
            Self::Decimation { .. } => Stage::Decimate,
            Self::OutputDirectory { .. } | Self::Encoding { .. } => Stage::Encode,
            Self::Tileset(_) => Stage::Tileset,
            Self::Cancelled { stage } => *stage,
        }
    }

    /// Level the failure belongs to, if any
    pub fn level(&self) -> Option<u32> {
        match self {
            Self::Decimation { level, .. } | Self::Encoding { level, .. } => Some(*level),
            _ => None,
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

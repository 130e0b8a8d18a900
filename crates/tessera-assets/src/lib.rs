//! # Tessera Assets
//!
//! Source asset handling for the Tessera converter.
//!
//! ## Features
//! - Extension-keyed model loader registry
//! - Wavefront OBJ loading with MTL materials and per-line error recovery
//! - Shared texture decode cache
//! - Shelf-packed texture atlas generation with UV remapping

use std::path::PathBuf;

use thiserror::Error;

pub mod atlas;
pub mod loader;
pub mod mtl;
pub mod obj;
pub mod texture_cache;

pub use atlas::{AtlasConfig, AtlasRegion, TextureAtlas, TextureAtlasPacker};
pub use loader::{LoadedModel, LoaderRegistry, ModelLoader, ParseWarning};
pub use obj::ObjLoader;
pub use texture_cache::TextureCache;

/// Asset errors
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Input not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported model format: {0}")]
    UnsupportedFormat(String),

    #[error("Texture decode failed for {}: {source}", path.display())]
    TextureDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Atlas overflow: textures need {required} px^2, budget is {budget} px^2")]
    AtlasOverflow { required: u64, budget: u64 },

    #[error("Invalid atlas configuration: {0}")]
    InvalidAtlasConfig(String),

    #[error("Failed to write atlas {}: {source}", path.display())]
    AtlasWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Loading cancelled")]
    Cancelled,
}

/// Result type for asset operations
pub type AssetResult<T> = Result<T, AssetError>;

/// Model formats known to the loader registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFormat {
    Obj,
}

impl ModelFormat {
    /// Get file extensions for this format
    pub fn extensions(&self) -> &[&str] {
        match self {
            Self::Obj => &["obj"],
        }
    }

    /// Check an extension against this format, ignoring case
    pub fn matches(&self, extension: &str) -> bool {
        let extension = extension.to_ascii_lowercase();
        self.extensions().iter().any(|e| *e == extension)
    }
}

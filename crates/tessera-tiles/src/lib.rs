//! # Tessera Tiles
//!
//! Output side of the converter: binary glTF tiles, the b3dm container and the
//! `tileset.json` hierarchy that ties the levels together.

use std::path::PathBuf;

use thiserror::Error;

pub mod b3dm;
pub mod encoder;
pub mod geo;
pub mod glb;
pub mod slice;
pub mod tileset;

pub use b3dm::B3dmHeader;
pub use encoder::{EncodedTile, EncoderOptions, TileEncoder, TileFormat};
pub use geo::GeoOrigin;
pub use slice::{tile_file_name, Slice};
pub use tileset::{BoundingVolume, Refine, TileContent, TileNode, Tileset, TilesetAsset, TilesetBuilder};

/// Tile and tileset errors
#[derive(Error, Debug)]
pub enum TileError {
    #[error("IO error writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to embed texture {}: {source}", path.display())]
    TextureEmbed {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Cannot encode a tile without triangles")]
    EmptyMesh,

    #[error("Invalid tile payload: {0}")]
    InvalidPayload(String),

    #[error("No level 0 slice, the tileset has no root")]
    MissingRootLevel,
}

/// Result type for tile operations
pub type TileResult<T> = Result<T, TileError>;

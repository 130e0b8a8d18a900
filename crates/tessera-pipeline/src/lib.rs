//! # Tessera Pipeline
//!
//! Turns a Wavefront OBJ model into a 3D Tiles tileset: a `tileset.json` plus one binary
//! tile per LOD level (or per slice under adaptive slicing), and optionally a texture atlas.
//!
//! ```no_run
//! use std::path::Path;
//! use tessera_core::CancellationToken;
//! use tessera_pipeline::{ConversionConfig, PipelineOrchestrator};
//!
//! let pipeline = PipelineOrchestrator::new(ConversionConfig::default())?;
//! let summary = pipeline.convert(Path::new("model.obj"), Path::new("out"), &CancellationToken::new())?;
//! println!("{} tiles", summary.tile_count());
//! # Ok::<(), tessera_pipeline::PipelineError>(())
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod store;
pub mod summary;

pub use config::{ConversionConfig, FailurePolicy};
pub use error::{ErrorKind, PipelineError, PipelineResult, Stage};
pub use orchestrator::{PipelineOrchestrator, TILESET_FILE_NAME};
pub use store::{ArtifactStore, InMemoryArtifactStore, InMemoryMetadataStore, MetadataStore, StoreError};
pub use summary::{JobSummary, LevelSummary};

//! External collaborators
//!
//! The pipeline hands every written tile to an optional metadata store and every written
//! file to an optional artifact store. Their failures are logged and reported as job
//! warnings; they never fail the conversion.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tessera_tiles::Slice;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{0}")]
pub struct StoreError(pub String);

/// Receives the durable record of each tile
pub trait MetadataStore: Send + Sync {
    fn record_slice(&self, slice: &Slice) -> Result<(), StoreError>;
}

/// Receives each produced file for later retrieval
pub trait ArtifactStore: Send + Sync {
    fn publish(&self, path: &Path, size: u64) -> Result<(), StoreError>;
}

/// Metadata store that keeps records in memory
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    slices: Mutex<Vec<Slice>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slices(&self) -> Vec<Slice> {
        self.slices.lock().clone()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn record_slice(&self, slice: &Slice) -> Result<(), StoreError> {
        self.slices.lock().push(slice.clone());
        Ok(())
    }
}

/// Artifact store that remembers published paths
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    artifacts: Mutex<Vec<(PathBuf, u64)>>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifacts(&self) -> Vec<(PathBuf, u64)> {
        self.artifacts.lock().clone()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn publish(&self, path: &Path, size: u64) -> Result<(), StoreError> {
        self.artifacts.lock().push((path.to_path_buf(), size));
        Ok(())
    }
}

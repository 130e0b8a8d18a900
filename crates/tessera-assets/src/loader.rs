//! Model loader registry
//!
//! Loaders advertise the file extensions they understand; the registry picks one by
//! extension so callers never name a concrete format.

use std::fmt;
use std::path::Path;

use tessera_core::{BoundingBox3D, CancellationToken, Mesh};

use crate::obj::ObjLoader;
use crate::{AssetError, AssetResult};

/// A malformed input line that was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    /// 1-based line number
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Result of loading a model file
#[derive(Debug, Clone, Default)]
pub struct LoadedModel {
    /// Mesh with its material list
    pub mesh: Mesh,
    /// Running bounds of every parsed vertex position, `None` when nothing was parsed
    pub bounds: Option<BoundingBox3D>,
    /// Lines skipped during parsing
    pub warnings: Vec<ParseWarning>,
}

/// Capability interface implemented by every model format
pub trait ModelLoader: Send + Sync {
    /// Loader name for logging
    fn name(&self) -> &str;

    /// Whether files with this extension (without the dot) can be loaded
    fn supports_format(&self, extension: &str) -> bool;

    /// Load a model, checking `cancel` periodically
    fn load(&self, path: &Path, cancel: &CancellationToken) -> AssetResult<LoadedModel>;
}

/// Loaders selected by file extension
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn ModelLoader>>,
}

impl LoaderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self { loaders: Vec::new() }
    }

    /// Registry with every built-in loader
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ObjLoader::new()));
        registry
    }

    /// Add a loader; later registrations win for shared extensions
    pub fn register(&mut self, loader: Box<dyn ModelLoader>) {
        self.loaders.push(loader);
    }

    /// Find the loader for an extension
    pub fn find(&self, extension: &str) -> Option<&dyn ModelLoader> {
        self.loaders
            .iter()
            .rev()
            .find(|loader| loader.supports_format(extension))
            .map(|loader| loader.as_ref())
    }

    /// Load `path` with the loader registered for its extension
    pub fn load(&self, path: &Path, cancel: &CancellationToken) -> AssetResult<LoadedModel> {
        if !path.is_file() {
            return Err(AssetError::InputNotFound(path.to_path_buf()));
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let loader = self
            .find(extension)
            .ok_or_else(|| AssetError::UnsupportedFormat(extension.to_string()))?;

        log::debug!("Loading {} with {} loader", path.display(), loader.name());
        loader.load(path, cancel)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

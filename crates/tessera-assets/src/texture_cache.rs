//! Texture decode cache
//!
//! Maps a texture path to its decoded RGBA image. Each distinct path is decoded at most
//! once (successfully) even under concurrent callers, and every caller receives the same
//! shared image afterwards. Entries stay until [`TextureCache::clear`] is called.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::AHashMap;
use image::RgbaImage;
use parking_lot::{Mutex, RwLock};

use crate::{AssetError, AssetResult};

/// Per-path slot; the mutex serialises decodes of the same path only
type Slot = Arc<Mutex<Option<Arc<RgbaImage>>>>;

/// Concurrency-safe cache of decoded textures
#[derive(Debug, Default)]
pub struct TextureCache {
    entries: RwLock<AHashMap<PathBuf, Slot>>,
    decodes: AtomicUsize,
}

impl TextureCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the decoded image for `path`, decoding it on first use
    pub fn get_or_load(&self, path: &Path) -> AssetResult<Arc<RgbaImage>> {
        let slot = self.slot(path);
        let mut guard = slot.lock();
        if let Some(image) = guard.as_ref() {
            return Ok(Arc::clone(image));
        }

        let decoded = image::open(path)
            .map_err(|source| AssetError::TextureDecode {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgba8();
        self.decodes.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "Decoded texture {} ({}x{})",
            path.display(),
            decoded.width(),
            decoded.height()
        );

        let image = Arc::new(decoded);
        *guard = Some(Arc::clone(&image));
        Ok(image)
    }

    /// Cached image for `path` without decoding
    pub fn get(&self, path: &Path) -> Option<Arc<RgbaImage>> {
        let entries = self.entries.read();
        entries.get(path).and_then(|slot| slot.lock().clone())
    }

    /// Store an already decoded image, replacing any previous entry
    pub fn insert(&self, path: impl Into<PathBuf>, image: Arc<RgbaImage>) {
        self.entries
            .write()
            .insert(path.into(), Arc::new(Mutex::new(Some(image))));
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of cached paths with a decoded image
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|slot| slot.lock().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total successful decodes since creation
    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::Relaxed)
    }

    fn slot(&self, path: &Path) -> Slot {
        if let Some(slot) = self.entries.read().get(path) {
            return Arc::clone(slot);
        }
        let mut entries = self.entries.write();
        Arc::clone(entries.entry(path.to_path_buf()).or_default())
    }
}

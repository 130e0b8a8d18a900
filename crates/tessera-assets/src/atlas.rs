//! Texture atlas packing
//!
//! Every distinct diffuse texture is placed on shelves (rows) in material insertion
//! order, with `padding_px` pixels between neighbouring regions. The padding is filled by
//! stretching each region's border so bilinear sampling does not bleed across regions.
//! Materials are only rewritten once the whole atlas has been built and saved.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{RgbaImage, imageops};
use serde::{Deserialize, Serialize};
use tessera_core::{Material, UvRect, UvTransform};

use crate::texture_cache::TextureCache;
use crate::{AssetError, AssetResult};

/// Smallest accepted atlas edge in pixels
pub const MIN_ATLAS_SIZE: u32 = 512;
/// Largest accepted atlas edge in pixels
pub const MAX_ATLAS_SIZE: u32 = 8192;

/// Atlas settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AtlasConfig {
    pub enabled: bool,
    /// Maximum atlas edge, within `[512, 8192]`
    pub max_atlas_size: u32,
    /// Gap between adjacent regions
    pub padding_px: u32,
    /// Atlas file name inside the output directory
    pub file_name: String,
    /// Log every placement at info level
    pub verbose_logging: bool,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_atlas_size: 4096,
            padding_px: 2,
            file_name: "atlas.png".to_string(),
            verbose_logging: false,
        }
    }
}

impl AtlasConfig {
    pub fn validate(&self) -> AssetResult<()> {
        if !(MIN_ATLAS_SIZE..=MAX_ATLAS_SIZE).contains(&self.max_atlas_size) {
            return Err(AssetError::InvalidAtlasConfig(format!(
                "maxAtlasSize {} outside [{}, {}]",
                self.max_atlas_size, MIN_ATLAS_SIZE, MAX_ATLAS_SIZE
            )));
        }
        if self.padding_px >= self.max_atlas_size / 2 {
            return Err(AssetError::InvalidAtlasConfig(format!(
                "paddingPx {} too large for maxAtlasSize {}",
                self.padding_px, self.max_atlas_size
            )));
        }
        if self.file_name.trim().is_empty() {
            return Err(AssetError::InvalidAtlasConfig("fileName is empty".into()));
        }
        Ok(())
    }
}

/// Placement of one source texture
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasRegion {
    /// Source texture path
    pub texture: PathBuf,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Region in UV space (V up, as in OBJ)
    pub uv: UvRect,
}

/// A packed atlas that has been written to disk
#[derive(Debug, Clone)]
pub struct TextureAtlas {
    pub image: Arc<RgbaImage>,
    pub regions: Vec<AtlasRegion>,
    /// Written PNG location
    pub path: PathBuf,
    /// Size of the written PNG
    pub byte_size: u64,
}

impl TextureAtlas {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// UV rectangle assigned to a source texture
    pub fn uv_rect_for(&self, texture: &Path) -> Option<UvRect> {
        self.regions
            .iter()
            .find(|region| region.texture == texture)
            .map(|region| region.uv)
    }
}

/// Texture atlas packer
#[derive(Debug, Clone)]
pub struct TextureAtlasPacker {
    config: AtlasConfig,
}

impl TextureAtlasPacker {
    pub fn new(config: AtlasConfig) -> AssetResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    /// Pack the textures of `materials` into one atlas written to `output_dir`
    ///
    /// Returns `Ok(None)` when atlasing is disabled or nothing is textured. On success the
    /// materials point at the atlas and carry the UV transform into their region, and the
    /// atlas image is stored in `cache` under its output path. On any error the materials
    /// are left untouched.
    pub fn pack(
        &self,
        materials: &mut [Material],
        cache: &TextureCache,
        output_dir: &Path,
    ) -> AssetResult<Option<TextureAtlas>> {
        if !self.config.enabled || materials.is_empty() {
            return Ok(None);
        }

        let sources = self.load_sources(materials, cache);
        if sources.is_empty() {
            return Ok(None);
        }

        let sizes: Vec<(u32, u32)> = sources.iter().map(|(_, image)| image.dimensions()).collect();
        let (width, height, placements) = self.layout(&sizes)?;

        let mut atlas = RgbaImage::new(width, height);
        let mut regions = Vec::with_capacity(sources.len());
        let bleed = self.config.padding_px / 2;
        for ((texture, image), (x, y)) in sources.iter().zip(placements) {
            imageops::replace(&mut atlas, &**image, i64::from(x), i64::from(y));
            extend_edges(&mut atlas, x, y, image.width(), image.height(), bleed);

            let region = AtlasRegion {
                texture: texture.clone(),
                x,
                y,
                width: image.width(),
                height: image.height(),
                uv: uv_rect(x, y, image.width(), image.height(), width, height),
            };
            if self.config.verbose_logging {
                log::info!(
                    "Atlas region {} at ({}, {}) {}x{}",
                    texture.display(),
                    x,
                    y,
                    region.width,
                    region.height
                );
            } else {
                log::debug!("Atlas region {} at ({}, {})", texture.display(), x, y);
            }
            regions.push(region);
        }

        let path = output_dir.join(&self.config.file_name);
        atlas.save(&path).map_err(|source| AssetError::AtlasWrite {
            path: path.clone(),
            source,
        })?;
        let byte_size = std::fs::metadata(&path)
            .map_err(|source| AssetError::Io {
                path: path.clone(),
                source,
            })?
            .len();

        let image = Arc::new(atlas);
        cache.insert(path.clone(), Arc::clone(&image));
        let atlas = TextureAtlas {
            image,
            regions,
            path,
            byte_size,
        };

        for material in materials.iter_mut() {
            let Some(rect) = material.diffuse_texture.as_deref().and_then(|t| atlas.uv_rect_for(t)) else {
                continue;
            };
            material.uv_transform = remap_transform(material.uv_transform, rect);
            material.diffuse_texture = Some(atlas.path.clone());
        }

        log::info!(
            "Packed {} textures into {}x{} atlas ({} bytes)",
            atlas.regions.len(),
            atlas.width(),
            atlas.height(),
            atlas.byte_size
        );
        Ok(Some(atlas))
    }

    /// Distinct textures in material order; unreadable ones are left out of the atlas
    fn load_sources(&self, materials: &[Material], cache: &TextureCache) -> Vec<(PathBuf, Arc<RgbaImage>)> {
        let mut sources: Vec<(PathBuf, Arc<RgbaImage>)> = Vec::new();
        for texture in materials.iter().filter_map(|m| m.diffuse_texture.as_ref()) {
            if sources.iter().any(|(path, _)| path == texture) {
                continue;
            }
            match cache.get_or_load(texture) {
                Ok(image) => sources.push((texture.clone(), image)),
                Err(err) => log::warn!("Texture left out of atlas: {}", err),
            }
        }
        sources
    }

    /// Choose atlas dimensions and shelf placements
    fn layout(&self, sizes: &[(u32, u32)]) -> AssetResult<(u32, u32, Vec<(u32, u32)>)> {
        let max = self.config.max_atlas_size;
        let padding = self.config.padding_px;
        let budget = u64::from(max) * u64::from(max);
        let required: u64 = sizes
            .iter()
            .map(|&(w, h)| u64::from(w + padding) * u64::from(h + padding))
            .sum();

        let widest = sizes.iter().map(|&(w, _)| w).max().unwrap_or(0);
        let tallest = sizes.iter().map(|&(_, h)| h).max().unwrap_or(0);
        if required > budget || widest > max || tallest > max {
            return Err(AssetError::AtlasOverflow { required, budget });
        }

        let side = (required as f64).sqrt().ceil() as u32;
        let mut width = side.max(widest).next_power_of_two().min(max);
        loop {
            if let Some((used_height, placements)) = shelf_pack(sizes, width, padding, max) {
                let height = used_height.next_power_of_two().min(max);
                return Ok((width, height, placements));
            }
            if width >= max {
                return Err(AssetError::AtlasOverflow { required, budget });
            }
            width = (width * 2).min(max);
        }
    }
}

/// Place rectangles left to right on shelves; `None` when they exceed `max_height`
pub fn shelf_pack(
    sizes: &[(u32, u32)],
    width: u32,
    padding: u32,
    max_height: u32,
) -> Option<(u32, Vec<(u32, u32)>)> {
    let mut placements = Vec::with_capacity(sizes.len());
    let (mut x, mut y, mut shelf_height) = (0u32, 0u32, 0u32);

    for &(w, h) in sizes {
        if w > width {
            return None;
        }
        if x > 0 && x + w > width {
            y += shelf_height + padding;
            x = 0;
            shelf_height = 0;
        }
        placements.push((x, y));
        x += w + padding;
        shelf_height = shelf_height.max(h);
    }

    let used_height = y + shelf_height;
    (used_height <= max_height).then_some((used_height, placements))
}

/// UV rectangle of a pixel region, flipped so V grows upwards
fn uv_rect(x: u32, y: u32, w: u32, h: u32, atlas_w: u32, atlas_h: u32) -> UvRect {
    let (aw, ah) = (atlas_w as f32, atlas_h as f32);
    UvRect {
        min_u: x as f32 / aw,
        max_u: (x + w) as f32 / aw,
        min_v: 1.0 - (y + h) as f32 / ah,
        max_v: 1.0 - y as f32 / ah,
    }
}

/// Compose an existing UV transform with the mapping into `rect`
fn remap_transform(existing: UvTransform, rect: UvRect) -> UvTransform {
    let into_rect = UvTransform::from_rect(rect);
    UvTransform {
        offset: into_rect.apply(existing.offset),
        scale: existing.scale * into_rect.scale,
    }
}

/// Replicate a region's border pixels `amount` pixels outwards
fn extend_edges(atlas: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, amount: u32) {
    if amount == 0 || w == 0 || h == 0 {
        return;
    }
    let x0 = x.saturating_sub(amount);
    let y0 = y.saturating_sub(amount);
    let x1 = (x + w + amount).min(atlas.width());
    let y1 = (y + h + amount).min(atlas.height());

    for py in y0..y1 {
        for px in x0..x1 {
            let inside = px >= x && px < x + w && py >= y && py < y + h;
            if inside {
                continue;
            }
            let sx = px.clamp(x, x + w - 1);
            let sy = py.clamp(y, y + h - 1);
            let pixel = *atlas.get_pixel(sx, sy);
            atlas.put_pixel(px, py, pixel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use tessera_core::math::Vec2;

    fn textured_material(dir: &Path, name: &str, size: u32, color: [u8; 4]) -> Material {
        let path = dir.join(format!("{name}.png"));
        RgbaImage::from_pixel(size, size, Rgba(color)).save(&path).unwrap();
        let mut material = Material::new(name);
        material.diffuse_texture = Some(path);
        material
    }

    fn config(max: u32) -> AtlasConfig {
        AtlasConfig {
            enabled: true,
            max_atlas_size: max,
            padding_px: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(AtlasConfig::default().validate().is_ok());
        assert!(AtlasConfig { max_atlas_size: 256, ..Default::default() }.validate().is_err());
        assert!(AtlasConfig { max_atlas_size: 16384, ..Default::default() }.validate().is_err());
        assert!(AtlasConfig { file_name: " ".into(), ..Default::default() }.validate().is_err());
    }

    #[test]
    fn test_config_json_defaults() {
        let config: AtlasConfig = serde_json::from_str(r#"{"enabled": true, "maxAtlasSize": 1024}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.max_atlas_size, 1024);
        assert_eq!(config.padding_px, 2);
        assert_eq!(config.file_name, "atlas.png");
    }

    #[test]
    fn test_shelf_pack_respects_padding() {
        let sizes = [(64, 64), (64, 64), (32, 32)];
        let (height, placements) = shelf_pack(&sizes, 128, 2, 512).unwrap();
        assert_eq!(placements, vec![(0, 0), (0, 66), (66, 66)]);
        assert_eq!(height, 130);
    }

    #[test]
    fn test_shelf_pack_too_tall() {
        assert!(shelf_pack(&[(100, 300), (100, 300)], 150, 0, 512).is_none());
    }

    #[test]
    fn test_pack_remaps_materials() {
        let dir = tempfile::tempdir().unwrap();
        let mut materials = vec![
            textured_material(dir.path(), "red", 64, [255, 0, 0, 255]),
            textured_material(dir.path(), "green", 64, [0, 255, 0, 255]),
            Material::new("plain"),
            textured_material(dir.path(), "blue", 32, [0, 0, 255, 255]),
        ];
        let cache = TextureCache::new();
        let packer = TextureAtlasPacker::new(config(512)).unwrap();

        let atlas = packer.pack(&mut materials, &cache, dir.path()).unwrap().unwrap();
        assert_eq!(atlas.regions.len(), 3);
        assert!(atlas.path.exists());
        assert!(atlas.byte_size > 0);
        assert!(atlas.width() <= 512 && atlas.height() <= 512);
        assert_eq!((atlas.regions[0].x, atlas.regions[0].y), (0, 0));

        for region in &atlas.regions {
            let uv = region.uv;
            assert!(uv.min_u >= 0.0 && uv.max_u <= 1.0 && uv.min_u < uv.max_u);
            assert!(uv.min_v >= 0.0 && uv.max_v <= 1.0 && uv.min_v < uv.max_v);
        }

        // Regions never touch: padding separates them
        for (i, a) in atlas.regions.iter().enumerate() {
            for b in &atlas.regions[i + 1..] {
                let apart_x = a.x + a.width + 2 <= b.x || b.x + b.width + 2 <= a.x;
                let apart_y = a.y + a.height + 2 <= b.y || b.y + b.height + 2 <= a.y;
                assert!(apart_x || apart_y);
            }
        }

        assert_eq!(materials[0].diffuse_texture.as_deref(), Some(atlas.path.as_path()));
        assert!(!materials[0].uv_transform.is_identity());
        assert!(materials[2].diffuse_texture.is_none());
        assert!(materials[2].uv_transform.is_identity());

        // Corner (0,0) of the first texture maps onto the bottom-left of its region
        let rect = atlas.regions[0].uv;
        let mapped = materials[0].uv_transform.apply(Vec2::ZERO);
        assert!((mapped - Vec2::new(rect.min_u, rect.min_v)).length() < 1e-6);

        // Pixels land where the region says
        assert_eq!(*atlas.image.get_pixel(1, 1), Rgba([255, 0, 0, 255]));
        assert!(cache.get(&atlas.path).is_some());
    }

    #[test]
    fn test_overflow_leaves_materials_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut materials = vec![
            textured_material(dir.path(), "a", 400, [1, 2, 3, 255]),
            textured_material(dir.path(), "b", 400, [4, 5, 6, 255]),
        ];
        let before = materials.clone();
        let packer = TextureAtlasPacker::new(config(512)).unwrap();

        let result = packer.pack(&mut materials, &TextureCache::new(), dir.path());
        assert!(matches!(result, Err(AssetError::AtlasOverflow { .. })));
        assert_eq!(materials, before);
        assert!(!dir.path().join("atlas.png").exists());
    }

    #[test]
    fn test_disabled_or_untextured_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut materials = vec![textured_material(dir.path(), "a", 8, [0, 0, 0, 255])];
        let disabled = TextureAtlasPacker::new(AtlasConfig::default()).unwrap();
        assert!(disabled.pack(&mut materials, &TextureCache::new(), dir.path()).unwrap().is_none());

        let mut plain = vec![Material::new("plain")];
        let enabled = TextureAtlasPacker::new(config(512)).unwrap();
        assert!(enabled.pack(&mut plain, &TextureCache::new(), dir.path()).unwrap().is_none());
        assert!(enabled.pack(&mut [], &TextureCache::new(), dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_edge_extension_fills_gutter() {
        let mut atlas = RgbaImage::new(8, 8);
        atlas.put_pixel(2, 2, Rgba([9, 9, 9, 255]));
        extend_edges(&mut atlas, 2, 2, 1, 1, 1);
        assert_eq!(*atlas.get_pixel(1, 1), Rgba([9, 9, 9, 255]));
        assert_eq!(*atlas.get_pixel(3, 3), Rgba([9, 9, 9, 255]));
        assert_eq!(*atlas.get_pixel(4, 4), Rgba([0, 0, 0, 0]));
    }
}

//! Conversion settings

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tessera_assets::AtlasConfig;
use tessera_lod::LodSchedule;
use tessera_spatial::AdaptiveConfig;
use tessera_tiles::{GeoOrigin, TileFormat};

use crate::error::{PipelineError, PipelineResult};

/// Upper bound on LOD levels; level 0 of 16 would target 1/32768 of the source
pub const MAX_LOD_LEVELS: u32 = 16;

/// What to do when a level cannot be simplified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailurePolicy {
    /// Fail the whole job
    #[default]
    Abort,
    /// Drop the level and keep going
    SkipLevel,
}

/// Settings for one conversion job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversionConfig {
    pub lod_levels: u32,
    /// Explicit target ratio per level, level 0 first
    pub lod_ratios: Option<Vec<f32>>,
    pub atlas: AtlasConfig,
    /// Density-adaptive slicing; `None` writes one tile per level
    pub adaptive: Option<AdaptiveConfig>,
    pub failure_policy: FailurePolicy,
    pub tile_format: TileFormat,
    pub unlit_materials: bool,
    /// Merge bit-identical vertices before decimation
    pub weld_vertices: bool,
    pub generator: String,
    /// Where model space sits on the globe; `None` leaves the root untransformed
    pub geo_origin: Option<GeoOrigin>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            lod_levels: 3,
            lod_ratios: None,
            atlas: AtlasConfig::default(),
            adaptive: None,
            failure_policy: FailurePolicy::Abort,
            tile_format: TileFormat::B3dm,
            unlit_materials: true,
            weld_vertices: true,
            generator: tessera_core::generator_name(),
            geo_origin: None,
        }
    }
}

impl ConversionConfig {
    /// Load settings from a JSON file; absent fields keep their defaults
    pub fn from_json_file(path: &Path) -> PipelineResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| PipelineError::InvalidConfig(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> PipelineResult<()> {
        self.schedule()?;
        if self.atlas.enabled {
            self.atlas
                .validate()
                .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        }
        if let Some(adaptive) = &self.adaptive {
            adaptive.validate().map_err(PipelineError::InvalidConfig)?;
        }
        if let Some(origin) = &self.geo_origin {
            origin.validate().map_err(PipelineError::InvalidConfig)?;
        }
        Ok(())
    }

    /// Ratio schedule for the configured levels
    pub fn schedule(&self) -> PipelineResult<LodSchedule> {
        if self.lod_levels == 0 || self.lod_levels > MAX_LOD_LEVELS {
            return Err(PipelineError::InvalidConfig(format!(
                "lodLevels {} outside [1, {MAX_LOD_LEVELS}]",
                self.lod_levels
            )));
        }
        let schedule = match &self.lod_ratios {
            Some(ratios) => {
                if ratios.len() != self.lod_levels as usize {
                    return Err(PipelineError::InvalidConfig(format!(
                        "{} lodRatios given for {} levels",
                        ratios.len(),
                        self.lod_levels
                    )));
                }
                LodSchedule::from_ratios(ratios.clone())
            }
            None => LodSchedule::halving(self.lod_levels),
        };
        schedule.map_err(|e| PipelineError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConversionConfig::default();
        assert_eq!(config.lod_levels, 3);
        assert!(!config.atlas.enabled);
        assert!(config.adaptive.is_none());
        assert_eq!(config.tile_format, TileFormat::B3dm);
        assert!(config.validate().is_ok());
        assert_eq!(config.schedule().unwrap().ratios(), &[0.25, 0.5, 1.0]);
    }

    #[test]
    fn test_partial_json() {
        let config: ConversionConfig = serde_json::from_str(
            r#"{
                "lodLevels": 2,
                "lodRatios": [0.3, 1.0],
                "atlas": { "enabled": true, "maxAtlasSize": 1024 },
                "adaptive": { "maxDepth": 2 },
                "failurePolicy": "skipLevel",
                "tileFormat": "glb"
            }"#,
        )
        .unwrap();
        assert_eq!(config.lod_levels, 2);
        assert_eq!(config.atlas.max_atlas_size, 1024);
        assert_eq!(config.atlas.padding_px, 2);
        assert_eq!(config.adaptive.as_ref().unwrap().max_depth, 2);
        assert_eq!(config.failure_policy, FailurePolicy::SkipLevel);
        assert_eq!(config.tile_format, TileFormat::Glb);
        assert!(config.unlit_materials);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        let zero = ConversionConfig {
            lod_levels: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let mismatched = ConversionConfig {
            lod_ratios: Some(vec![0.5, 1.0]),
            ..Default::default()
        };
        assert!(mismatched.validate().is_err());

        let mut atlas = ConversionConfig::default();
        atlas.atlas.enabled = true;
        atlas.atlas.max_atlas_size = 100;
        assert!(matches!(atlas.validate(), Err(PipelineError::InvalidConfig(_))));

        let adaptive = ConversionConfig {
            adaptive: Some(AdaptiveConfig {
                base_resolution: 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(adaptive.validate().is_err());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "lodLevels": 4, "weldVertices": false }"#).unwrap();

        let config = ConversionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.lod_levels, 4);
        assert!(!config.weld_vertices);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(ConversionConfig::from_json_file(&path).is_err());
        assert!(ConversionConfig::from_json_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_geo_origin() {
        let config: ConversionConfig =
            serde_json::from_str(r#"{"geoOrigin": {"lon": 121.5, "lat": 31.2, "height": 4.0}}"#).unwrap();
        assert_eq!(config.geo_origin, Some(GeoOrigin::new(121.5, 31.2, 4.0)));
        assert!(config.validate().is_ok());

        let config = ConversionConfig {
            geo_origin: Some(GeoOrigin::new(0.0, 95.0, 0.0)),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }
}

//! Conversion pipeline
//!
//! load -> atlas (optional) -> decimate every level in parallel -> slice (optional) ->
//! encode every tile in parallel -> tileset.json -> summary.
//!
//! Files written before a fatal error are left in place.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tessera_assets::{AssetError, LoaderRegistry, TextureAtlasPacker, TextureCache};
use tessera_core::math::UVec3;
use tessera_core::{BoundingBox3D, CancellationToken, Mesh};
use tessera_lod::{LodError, LodMesh, LodResult, MeshDecimationEngine};
use tessera_spatial::AdaptiveSlicer;
use tessera_tiles::{tile_file_name, EncoderOptions, Slice, TileEncoder, TilesetBuilder};

use crate::config::{ConversionConfig, FailurePolicy};
use crate::error::{PipelineError, PipelineResult, Stage};
use crate::store::{ArtifactStore, MetadataStore};
use crate::summary::{JobSummary, LevelSummary};

/// File name of the tileset inside the output directory
pub const TILESET_FILE_NAME: &str = "tileset.json";

/// One tile waiting to be encoded
struct TileJob {
    level: u32,
    /// Grid coordinates, `None` when the level is a single tile
    coords: Option<UVec3>,
    mesh: Mesh,
    bounds: BoundingBox3D,
}

/// A tile on disk
struct WrittenTile {
    slice: Slice,
    missing_textures: Vec<PathBuf>,
}

/// Runs conversion jobs
pub struct PipelineOrchestrator {
    config: ConversionConfig,
    loaders: LoaderRegistry,
    textures: Arc<TextureCache>,
    decimator: MeshDecimationEngine,
    metadata: Option<Arc<dyn MetadataStore>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
}

impl PipelineOrchestrator {
    /// Validate `config` and set up a pipeline with the default loaders and a private
    /// texture cache
    pub fn new(config: ConversionConfig) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            loaders: LoaderRegistry::with_defaults(),
            textures: Arc::new(TextureCache::new()),
            decimator: MeshDecimationEngine::default(),
            metadata: None,
            artifacts: None,
        })
    }

    pub fn with_loaders(mut self, loaders: LoaderRegistry) -> Self {
        self.loaders = loaders;
        self
    }

    /// Share a texture cache with other jobs
    pub fn with_texture_cache(mut self, textures: Arc<TextureCache>) -> Self {
        self.textures = textures;
        self
    }

    pub fn with_metadata_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(store);
        self
    }

    pub fn with_artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn texture_cache(&self) -> &Arc<TextureCache> {
        &self.textures
    }

    /// Convert `input` into a tileset under `output_dir`
    pub fn convert(
        &self,
        input: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<JobSummary> {
        let start = Instant::now();
        let schedule = self.config.schedule()?;
        let mut warnings = Vec::new();
        let mut total_files = 0usize;
        let mut total_size = 0u64;

        // Load
        log::info!("Loading {}", input.display());
        let model = self.loaders.load(input, cancel).map_err(PipelineError::from_load)?;
        warnings.extend(model.warnings.iter().map(|w| format!("{}: {w}", input.display())));
        let mut mesh = if self.config.weld_vertices {
            model.mesh.welded()
        } else {
            model.mesh
        };
        // Geometric error scales with every parsed position, referenced by a face or not
        let bounds = match (mesh.is_empty(), model.bounds.or_else(|| mesh.bounds())) {
            (false, Some(bounds)) => bounds,
            _ => return Err(PipelineError::EmptyMesh(input.to_path_buf())),
        };
        let original_triangles = mesh.triangle_count();
        log::info!(
            "Loaded {} vertices, {} triangles, {} materials ({} lines skipped)",
            mesh.vertex_count(),
            original_triangles,
            mesh.materials.len(),
            model.warnings.len()
        );

        fs::create_dir_all(output_dir).map_err(|source| PipelineError::OutputDirectory {
            path: output_dir.to_path_buf(),
            source,
        })?;

        // Atlas
        let mut atlas_generated = false;
        if self.config.atlas.enabled {
            let packer = TextureAtlasPacker::new(self.config.atlas.clone())
                .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
            match packer.pack(&mut mesh.materials, &self.textures, output_dir) {
                Ok(Some(atlas)) => {
                    atlas_generated = true;
                    total_files += 1;
                    total_size += atlas.byte_size;
                    self.publish(&atlas.path, atlas.byte_size, &mut warnings);
                }
                Ok(None) => log::debug!("No textures to atlas"),
                Err(err @ (AssetError::AtlasWrite { .. } | AssetError::Io { .. })) => {
                    return Err(PipelineError::AtlasWrite(err));
                }
                Err(err) => {
                    log::warn!("Continuing without atlas: {err}");
                    warnings.push(format!("atlas disabled: {err}"));
                }
            }
        }
        check_cancel(cancel, Stage::Atlas)?;

        // Decimate
        let results = self.decimator.generate_levels(&mesh, &schedule, cancel);
        let (levels, skipped_levels) = collect_levels(results, self.config.failure_policy, &mut warnings)?;
        drop(mesh);
        check_cancel(cancel, Stage::Decimate)?;

        // Slice
        let jobs: Vec<TileJob> = match &self.config.adaptive {
            Some(adaptive) => {
                let slicer = AdaptiveSlicer::new(adaptive.clone());
                levels
                    .par_iter()
                    .map(|lod| slice_level(&slicer, lod))
                    .collect::<Vec<_>>()
                    .into_iter()
                    .flatten()
                    .collect()
            }
            None => levels.iter().filter_map(whole_level).collect(),
        };
        check_cancel(cancel, Stage::Slice)?;

        // Encode
        let encoder = TileEncoder::new(
            EncoderOptions {
                format: self.config.tile_format,
                unlit: self.config.unlit_materials,
                generator: self.config.generator.clone(),
            },
            Arc::clone(&self.textures),
        );
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        let written = self.encode_all(&jobs, &encoder, &stem, output_dir, cancel)?;
        drop(jobs);

        let mut missing: Vec<PathBuf> = written.iter().flat_map(|w| w.missing_textures.clone()).collect();
        missing.sort();
        missing.dedup();
        warnings.extend(missing.iter().map(|p| format!("texture unavailable: {}", p.display())));

        let slices: Vec<Slice> = written.into_iter().map(|w| w.slice).collect();
        for slice in &slices {
            total_files += 1;
            total_size += slice.file_size;
            if let Some(store) = &self.metadata {
                if let Err(err) = store.record_slice(slice) {
                    log::warn!("Metadata store rejected {}: {err}", slice.file_path.display());
                    warnings.push(format!("metadata store: {err}"));
                }
            }
            self.publish(&slice.file_path, slice.file_size, &mut warnings);
        }

        // Tileset
        let tileset = TilesetBuilder::new(output_dir)
            .with_generator(self.config.generator.clone())
            .with_geo_origin(self.config.geo_origin)
            .build(&slices, &bounds, schedule.max_level())
            .map_err(PipelineError::Tileset)?;
        let tileset_path = output_dir.join(TILESET_FILE_NAME);
        let tileset_size = tileset.write(&tileset_path).map_err(PipelineError::Tileset)?;
        total_files += 1;
        total_size += tileset_size;
        self.publish(&tileset_path, tileset_size, &mut warnings);

        let lod_levels = levels
            .iter()
            .map(|lod| LevelSummary {
                level: lod.level,
                triangle_count: lod.simplified_triangle_count,
                reduction_ratio: lod.reduction_ratio,
                tile_count: slices.iter().filter(|s| s.level == lod.level).count(),
            })
            .collect();

        let summary = JobSummary {
            success: true,
            input_file: input.to_path_buf(),
            output_directory: output_dir.to_path_buf(),
            original_triangle_count: original_triangles,
            lod_levels,
            skipped_levels,
            tileset_path,
            total_files,
            total_size,
            processing_time: start.elapsed().as_secs_f64(),
            warnings,
            atlas_generated,
        };
        log::info!(
            "Converted {} into {} files ({} bytes) in {:.2}s",
            input.display(),
            summary.total_files,
            summary.total_size,
            summary.processing_time
        );
        Ok(summary)
    }

    /// Encode every job in parallel; the first failure cancels the remaining ones
    fn encode_all(
        &self,
        jobs: &[TileJob],
        encoder: &TileEncoder,
        stem: &str,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<WrittenTile>> {
        let siblings = cancel.child();
        let results: Vec<PipelineResult<WrittenTile>> = jobs
            .par_iter()
            .map(|job| {
                if siblings.is_cancelled() {
                    return Err(PipelineError::Cancelled { stage: Stage::Encode });
                }
                let result = encode_job(job, encoder, stem, output_dir);
                if result.is_err() {
                    siblings.cancel();
                }
                result
            })
            .collect();

        // Report the failure that triggered cancellation rather than its echoes
        let mut cancelled = None;
        let mut written = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(tile) => written.push(tile),
                Err(err @ PipelineError::Cancelled { .. }) => {
                    if cancelled.is_none() {
                        cancelled = Some(err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        match cancelled {
            Some(err) => Err(err),
            None => Ok(written),
        }
    }

    fn publish(&self, path: &Path, size: u64, warnings: &mut Vec<String>) {
        if let Some(store) = &self.artifacts {
            if let Err(err) = store.publish(path, size) {
                log::warn!("Artifact store rejected {}: {err}", path.display());
                warnings.push(format!("artifact store: {err}"));
            }
        }
    }
}

fn check_cancel(cancel: &CancellationToken, stage: Stage) -> PipelineResult<()> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled { stage });
    }
    Ok(())
}

/// Apply the failure policy to per-level results, returning kept levels and skipped ones
fn collect_levels(
    results: Vec<LodResult<LodMesh>>,
    policy: FailurePolicy,
    warnings: &mut Vec<String>,
) -> PipelineResult<(Vec<LodMesh>, Vec<u32>)> {
    let mut levels = Vec::with_capacity(results.len());
    let mut skipped = Vec::new();
    for (index, result) in results.into_iter().enumerate() {
        let level = index as u32;
        match result {
            Ok(lod) => {
                log::info!(
                    "Level {}: {} triangles (ratio {:.3})",
                    lod.level,
                    lod.simplified_triangle_count,
                    lod.reduction_ratio
                );
                levels.push(lod);
            }
            Err(LodError::Cancelled { .. }) => return Err(PipelineError::Cancelled { stage: Stage::Decimate }),
            Err(source) if policy == FailurePolicy::SkipLevel => {
                log::warn!("Skipping level {level}: {source}");
                warnings.push(format!("level {level} skipped: {source}"));
                skipped.push(level);
            }
            Err(source) => return Err(PipelineError::Decimation { level, source }),
        }
    }
    Ok((levels, skipped))
}

fn whole_level(lod: &LodMesh) -> Option<TileJob> {
    let bounds = lod.mesh.bounds()?;
    Some(TileJob {
        level: lod.level,
        coords: None,
        mesh: lod.mesh.clone(),
        bounds,
    })
}

fn slice_level(slicer: &AdaptiveSlicer, lod: &LodMesh) -> Vec<TileJob> {
    let slices = slicer.slice(&lod.mesh);
    let single = slices.len() == 1;
    log::debug!("Level {}: {} slices", lod.level, slices.len());
    slices
        .into_iter()
        .map(|slice| TileJob {
            level: lod.level,
            coords: (!single).then_some(slice.coords),
            mesh: slice.mesh,
            bounds: slice.bounds,
        })
        .collect()
}

fn encode_job(job: &TileJob, encoder: &TileEncoder, stem: &str, output_dir: &Path) -> PipelineResult<WrittenTile> {
    let relative = tile_file_name(job.level, job.coords, encoder.options().format);
    let path = output_dir.join(&relative);
    let batch_name = match job.coords {
        Some(c) => format!("{stem}_L{}_{}_{}_{}", job.level, c.x, c.y, c.z),
        None => format!("{stem}_L{}", job.level),
    };
    let encoding_error = |source| PipelineError::Encoding {
        level: job.level,
        path: path.clone(),
        source,
    };

    let tile = encoder.encode(&job.mesh, &batch_name).map_err(encoding_error)?;
    let size = tile.write_to(&path).map_err(encoding_error)?;
    log::debug!("Wrote {} ({} bytes)", relative.display(), size);

    Ok(WrittenTile {
        slice: Slice::new(job.level, job.coords.unwrap_or(UVec3::ZERO), job.bounds, path, size),
        missing_textures: tile.missing_textures,
    })
}

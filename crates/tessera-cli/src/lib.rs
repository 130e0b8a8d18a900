//! # Tessera CLI
//!
//! Command-line front end for the converter.
//!
//! ## Commands
//! - `convert` - Convert a model into a 3D Tiles tileset
//! - `inspect` - Print mesh statistics for a model file

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use tessera_assets::LoaderRegistry;
use tessera_core::CancellationToken;
use tessera_pipeline::{ConversionConfig, FailurePolicy, PipelineOrchestrator};
use tessera_spatial::AdaptiveConfig;
use tessera_tiles::{GeoOrigin, TileFormat};

/// Tessera model to 3D Tiles converter
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Tile container written by `convert`
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    B3dm,
    Glb,
}

impl From<FormatArg> for TileFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::B3dm => TileFormat::B3dm,
            FormatArg::Glb => TileFormat::Glb,
        }
    }
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Convert a model into a tileset
    Convert {
        /// Input model (.obj)
        input: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Number of detail levels
        #[arg(short, long)]
        lod_levels: Option<u32>,

        /// JSON configuration file, flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Pack textures into a single atlas
        #[arg(long)]
        atlas: bool,

        /// Maximum atlas edge in pixels
        #[arg(long)]
        atlas_size: Option<u32>,

        /// Split levels into density-driven slices
        #[arg(long)]
        adaptive: bool,

        /// Tile container format
        #[arg(short, long, value_enum)]
        format: Option<FormatArg>,

        /// Drop levels that fail to simplify instead of aborting
        #[arg(long)]
        skip_failed_levels: bool,

        /// Place the model on the globe at `lon,lat[,height]`
        #[arg(long, value_parser = parse_geo_origin, allow_hyphen_values = true)]
        geo_origin: Option<GeoOrigin>,

        /// Write the job summary JSON here instead of stdout
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Print mesh statistics for a model
    Inspect {
        /// Input model (.obj)
        input: PathBuf,
    },
}

/// Overrides collected from `convert` flags
#[derive(Debug, Default)]
struct Overrides {
    lod_levels: Option<u32>,
    atlas: bool,
    atlas_size: Option<u32>,
    adaptive: bool,
    format: Option<FormatArg>,
    skip_failed_levels: bool,
    geo_origin: Option<GeoOrigin>,
}

impl Overrides {
    fn apply(self, config: &mut ConversionConfig) {
        if let Some(levels) = self.lod_levels {
            config.lod_levels = levels;
        }
        if self.atlas {
            config.atlas.enabled = true;
        }
        if let Some(size) = self.atlas_size {
            config.atlas.max_atlas_size = size;
        }
        if self.adaptive && config.adaptive.is_none() {
            config.adaptive = Some(AdaptiveConfig::default());
        }
        if let Some(format) = self.format {
            config.tile_format = format.into();
        }
        if self.skip_failed_levels {
            config.failure_policy = FailurePolicy::SkipLevel;
        }
        if self.geo_origin.is_some() {
            config.geo_origin = self.geo_origin;
        }
    }
}

/// Parse `lon,lat` or `lon,lat,height`
fn parse_geo_origin(value: &str) -> Result<GeoOrigin, String> {
    let numbers = value
        .split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|e| format!("{part:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    let origin = match numbers[..] {
        [lon, lat] => GeoOrigin::new(lon, lat, 0.0),
        [lon, lat, height] => GeoOrigin::new(lon, lat, height),
        _ => return Err("expected lon,lat[,height]".into()),
    };
    origin.validate()?;
    Ok(origin)
}

fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<ConversionConfig> {
    let mut config = match path {
        Some(path) => ConversionConfig::from_json_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => ConversionConfig::default(),
    };
    overrides.apply(&mut config);
    Ok(config)
}

/// Execute the CLI command
pub fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match cli.command {
        Commands::Convert {
            input,
            output,
            lod_levels,
            config,
            atlas,
            atlas_size,
            adaptive,
            format,
            skip_failed_levels,
            geo_origin,
            summary,
        } => {
            let overrides = Overrides {
                lod_levels,
                atlas,
                atlas_size,
                adaptive,
                format,
                skip_failed_levels,
                geo_origin,
            };
            let config = load_config(config.as_deref(), overrides)?;
            let pipeline = PipelineOrchestrator::new(config).context("Invalid conversion settings")?;

            let job = pipeline
                .convert(&input, &output, &CancellationToken::new())
                .with_context(|| format!("Failed to convert {}", input.display()))?;

            for warning in &job.warnings {
                log::warn!("{warning}");
            }
            log::info!(
                "Wrote {} tiles across {} levels to {}",
                job.tile_count(),
                job.lod_levels.len(),
                output.display()
            );

            let json = serde_json::to_string_pretty(&job)?;
            match summary {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("Failed to write summary {}", path.display()))?;
                    log::info!("Summary written to {}", path.display());
                }
                None => println!("{json}"),
            }
        }

        Commands::Inspect { input } => {
            let model = LoaderRegistry::with_defaults()
                .load(&input, &CancellationToken::new())
                .with_context(|| format!("Failed to load {}", input.display()))?;
            let mesh = &model.mesh;

            println!("{}", input.display());
            println!("  vertices:  {}", mesh.vertex_count());
            println!("  triangles: {}", mesh.triangle_count());
            println!("  materials: {}", mesh.materials.len());
            match model.bounds {
                Some(bounds) => {
                    println!("  bounds:    {} .. {}", bounds.min, bounds.max);
                    println!("  diagonal:  {:.4}", bounds.diagonal());
                }
                None => println!("  bounds:    (empty)"),
            }
            if !model.warnings.is_empty() {
                println!("  skipped lines: {}", model.warnings.len());
                for warning in &model.warnings {
                    log::warn!("{warning}");
                }
            }
        }
    }

    Ok(())
}

//! End-to-end conversion tests against real files in a scratch directory

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use tessera_core::CancellationToken;
use tessera_pipeline::{
    ConversionConfig, ErrorKind, InMemoryArtifactStore, InMemoryMetadataStore, JobSummary, PipelineOrchestrator,
};
use tessera_spatial::AdaptiveConfig;
use tessera_tiles::b3dm::read_b3dm;
use tessera_tiles::glb::read_glb;
use tessera_tiles::{GeoOrigin, TileFormat, TileNode, Tileset};

const CUBE_OBJ: &str = "\
# unit cube
v -1 -1 -1
v 1 -1 -1
v 1 1 -1
v -1 1 -1
v -1 -1 1
v 1 -1 1
v 1 1 1
v -1 1 1
f 1 3 2
f 1 4 3
f 5 6 7
f 5 7 8
f 1 2 6
f 1 6 5
f 4 8 7
f 4 7 3
f 1 5 8
f 1 8 4
f 2 3 7
f 2 7 6
";

const QUAD_OBJ: &str = "\
mtllib scene.mtl
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
usemtl a
f 1/1 2/2 3/3
usemtl b
f 1/1 3/3 4/4
";

const QUAD_MTL: &str = "\
newmtl a
Kd 1 1 1
map_Kd a.png
newmtl b
Kd 1 1 1
map_Kd b.png
";

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn write_texture(dir: &Path, name: &str, size: u32, color: [u8; 4]) {
    RgbaImage::from_pixel(size, size, Rgba(color))
        .save(dir.join(name))
        .unwrap();
}

/// Flat `n` x `n` quad grid as OBJ text
fn grid_obj(n: u32) -> String {
    let mut text = String::new();
    for y in 0..=n {
        for x in 0..=n {
            text.push_str(&format!("v {x} {y} 0\n"));
        }
    }
    let row = n + 1;
    for y in 0..n {
        for x in 0..n {
            let i = y * row + x + 1;
            text.push_str(&format!("f {} {} {} {}\n", i, i + 1, i + row + 1, i + row));
        }
    }
    text
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(files_under(&path));
        } else {
            files.push(path);
        }
    }
    files.sort();
    files
}

fn read_tileset(summary: &JobSummary) -> Tileset {
    Tileset::from_json(&fs::read_to_string(&summary.tileset_path).unwrap()).unwrap()
}

fn content_uris(node: &TileNode, out: &mut Vec<String>) {
    if let Some(content) = &node.content {
        out.push(content.uri.clone());
    }
    for child in &node.children {
        content_uris(child, out);
    }
}

fn assert_errors_never_grow(node: &TileNode) {
    for child in &node.children {
        assert!(node.geometric_error >= child.geometric_error);
        assert_errors_never_grow(child);
    }
}

fn convert(config: ConversionConfig, input: &Path, output: &Path) -> JobSummary {
    PipelineOrchestrator::new(config)
        .unwrap()
        .convert(input, output, &CancellationToken::new())
        .unwrap()
}

#[test]
fn test_cube_three_levels() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "cube.obj", CUBE_OBJ);
    let output = dir.path().join("out");

    let summary = convert(ConversionConfig::default(), &input, &output);

    let files = files_under(&output);
    assert_eq!(
        files,
        vec![
            output.join("0/tile.b3dm"),
            output.join("1/tile.b3dm"),
            output.join("2/tile.b3dm"),
            output.join("tileset.json"),
        ]
    );
    assert!(summary.success);
    assert_eq!(summary.original_triangle_count, 12);
    assert_eq!(summary.total_files, 4);
    let on_disk: u64 = files.iter().map(|f| fs::metadata(f).unwrap().len()).sum();
    assert_eq!(summary.total_size, on_disk);
    assert!(!summary.atlas_generated);
    assert!(summary.warnings.is_empty());

    assert_eq!(summary.lod_levels.len(), 3);
    let finest = &summary.lod_levels[2];
    assert_eq!(finest.triangle_count, 12);
    assert_eq!(finest.reduction_ratio, 1.0);
    assert!(summary.lod_levels.windows(2).all(|w| w[0].triangle_count <= w[1].triangle_count));
    assert!(summary.lod_levels.iter().all(|l| l.triangle_count >= 1 && l.tile_count == 1));

    let tileset = read_tileset(&summary);
    assert_eq!(tileset.root.content.as_ref().unwrap().uri, "0/tile.b3dm");
    assert_eq!(tileset.root.max_depth(), 3);
    assert!(tileset.geometric_error >= tileset.root.geometric_error);
    assert_errors_never_grow(&tileset.root);

    for file in &files[..3] {
        let bytes = fs::read(file).unwrap();
        let parts = read_b3dm(&bytes).unwrap();
        let (document, _) = read_glb(parts.glb).unwrap();
        assert_eq!(document["asset"]["version"], "2.0");
    }
}

#[test]
fn test_glb_tiles_and_collaborators() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "cube.obj", CUBE_OBJ);
    let output = dir.path().join("out");
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let artifacts = Arc::new(InMemoryArtifactStore::new());

    let config = ConversionConfig {
        lod_levels: 2,
        tile_format: TileFormat::Glb,
        ..Default::default()
    };
    let summary = PipelineOrchestrator::new(config)
        .unwrap()
        .with_metadata_store(metadata.clone())
        .with_artifact_store(artifacts.clone())
        .convert(&input, &output, &CancellationToken::new())
        .unwrap();

    assert!(output.join("0/tile.glb").is_file());
    assert!(output.join("1/tile.glb").is_file());
    assert_eq!(summary.total_files, 3);

    let slices = metadata.slices();
    assert_eq!(slices.len(), 2);
    assert!(slices.iter().all(|s| s.file_size > 0 && s.file_path.is_file()));
    assert_eq!(artifacts.artifacts().len(), 3);
    assert!(artifacts
        .artifacts()
        .iter()
        .any(|(path, _)| path.ends_with("tileset.json")));
}

#[test]
fn test_atlas_generated() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "scene.mtl", QUAD_MTL);
    write_texture(dir.path(), "a.png", 8, [255, 0, 0, 255]);
    write_texture(dir.path(), "b.png", 8, [0, 0, 255, 255]);
    let input = write(dir.path(), "quad.obj", QUAD_OBJ);
    let output = dir.path().join("out");

    let mut config = ConversionConfig::default();
    config.atlas.enabled = true;
    config.atlas.max_atlas_size = 512;
    let summary = convert(config, &input, &output);

    assert!(summary.atlas_generated);
    assert!(output.join("atlas.png").is_file());
    assert_eq!(summary.total_files, 5);

    // Both materials now sample the same embedded atlas image
    let bytes = fs::read(output.join("2/tile.b3dm")).unwrap();
    let parts = read_b3dm(&bytes).unwrap();
    let (document, _) = read_glb(parts.glb).unwrap();
    assert_eq!(document["images"].as_array().unwrap().len(), 1);
    assert_eq!(document["materials"].as_array().unwrap().len(), 2);
}

#[test]
fn test_atlas_overflow_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "scene.mtl", QUAD_MTL);
    write_texture(dir.path(), "a.png", 600, [255, 0, 0, 255]);
    write_texture(dir.path(), "b.png", 600, [0, 255, 0, 255]);
    let input = write(dir.path(), "quad.obj", QUAD_OBJ);
    let output = dir.path().join("out");

    let mut config = ConversionConfig::default();
    config.atlas.enabled = true;
    config.atlas.max_atlas_size = 512;
    let summary = convert(config, &input, &output);

    assert!(summary.success);
    assert!(!summary.atlas_generated);
    assert!(!output.join("atlas.png").exists());
    assert!(summary.warnings.iter().any(|w| w.contains("atlas")));
    assert_eq!(summary.total_files, 4);

    // Original per-material textures are embedded instead
    let bytes = fs::read(output.join("2/tile.b3dm")).unwrap();
    let parts = read_b3dm(&bytes).unwrap();
    let (document, _) = read_glb(parts.glb).unwrap();
    assert_eq!(document["images"].as_array().unwrap().len(), 2);
}

#[test]
fn test_missing_texture_is_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "scene.mtl", QUAD_MTL);
    write_texture(dir.path(), "a.png", 4, [255, 255, 255, 255]);
    let input = write(dir.path(), "quad.obj", QUAD_OBJ);
    let output = dir.path().join("out");

    let summary = convert(ConversionConfig::default(), &input, &output);
    assert!(summary.warnings.iter().any(|w| w.contains("b.png")));
    assert_eq!(summary.total_files, 4);
}

#[test]
fn test_adaptive_slicing_writes_every_referenced_tile() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "grid.obj", &grid_obj(24));
    let output = dir.path().join("out");

    let config = ConversionConfig {
        lod_levels: 2,
        adaptive: Some(AdaptiveConfig {
            max_depth: 2,
            max_triangles_per_slice: 100,
            min_triangles_per_slice: 10,
            curvature_threshold: None,
            ..Default::default()
        }),
        ..Default::default()
    };
    let summary = convert(config, &input, &output);

    assert_eq!(summary.original_triangle_count, 24 * 24 * 2);
    assert!(summary.lod_levels[1].tile_count > 1);

    let tileset = read_tileset(&summary);
    let mut uris = Vec::new();
    content_uris(&tileset.root, &mut uris);
    assert_eq!(uris.len(), summary.tile_count());
    for uri in &uris {
        assert!(output.join(uri).is_file(), "{uri} missing");
    }
    assert!(uris.iter().any(|u| u.starts_with("1/tile_")));
    assert_errors_never_grow(&tileset.root);
    assert_eq!(summary.total_files, summary.tile_count() + 1);
}

#[test]
fn test_malformed_lines_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let text = format!("{CUBE_OBJ}v 1 two 3\nf 1 2\n");
    let input = write(dir.path(), "cube.obj", &text);
    let summary = convert(ConversionConfig::default(), &input, &dir.path().join("out"));

    assert_eq!(summary.warnings.len(), 2);
    assert_eq!(summary.original_triangle_count, 12);
}

#[test]
fn test_error_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out");
    let pipeline = PipelineOrchestrator::new(ConversionConfig::default()).unwrap();
    let cancel = CancellationToken::new();

    let err = pipeline
        .convert(&dir.path().join("absent.obj"), &output, &cancel)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputNotFound);
    assert!(!output.exists());

    let empty = write(dir.path(), "empty.obj", "# nothing here\nv 0 0 0\n");
    let err = pipeline.convert(&empty, &output, &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmptyMesh);

    let stl = write(dir.path(), "model.stl", "solid x\nendsolid x\n");
    let err = pipeline.convert(&stl, &output, &cancel).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);

    let cube = write(dir.path(), "cube.obj", CUBE_OBJ);
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = pipeline.convert(&cube, &output, &cancelled).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[test]
fn test_unreferenced_vertices_widen_model_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "cube.obj", &format!("{CUBE_OBJ}v 10 10 10\n"));
    let summary = convert(ConversionConfig::default(), &input, &dir.path().join("out"));

    // Parsed bounds span (-1,-1,-1)..(10,10,10); root is two levels above the leaf
    let expected = 11.0 * 3f64.sqrt() * 4.0 * 0.1;
    let tileset = read_tileset(&summary);
    assert!((tileset.root.geometric_error - expected).abs() < 1e-4);
    assert_eq!(summary.original_triangle_count, 12);
}

#[test]
fn test_geo_origin_places_root() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "cube.obj", CUBE_OBJ);
    let origin = GeoOrigin::new(-122.4, 37.8, 15.0);
    let config = ConversionConfig {
        geo_origin: Some(origin),
        ..Default::default()
    };
    let summary = convert(config, &input, &dir.path().join("out"));

    let tileset = read_tileset(&summary);
    assert_eq!(tileset.root.transform, Some(origin.transform()));
    assert!(tileset.root.children.iter().all(|c| c.transform.is_none()));
}

#[test]
fn test_unwritable_level_fails_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "grid.obj", &grid_obj(8));
    let output = dir.path().join("out");
    fs::create_dir_all(&output).unwrap();
    // A plain file where the level 1 directory belongs
    fs::write(output.join("1"), b"not a directory").unwrap();

    let err = PipelineOrchestrator::new(ConversionConfig::default())
        .unwrap()
        .convert(&input, &output, &CancellationToken::new())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EncodingFailure);
    assert_eq!(err.level(), Some(1));
    assert!(err.to_string().contains("tile.b3dm"));
    assert!(!output.join("tileset.json").exists());
}

#[test]
fn test_rerun_overwrites_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(dir.path(), "cube.obj", CUBE_OBJ);
    let output = dir.path().join("out");

    let first = convert(ConversionConfig::default(), &input, &output);
    let second = convert(ConversionConfig::default(), &input, &output);
    assert_eq!(first.total_files, second.total_files);
    assert_eq!(files_under(&output).len(), 4);
}

//! Mesh to tile encoding
//!
//! Each material becomes one glTF primitive with its own compacted vertex set, so a vertex
//! shared by faces of different materials is duplicated and can carry each material's UV
//! transform. Textures come from the injected [`TextureCache`]; after atlasing the cache
//! already holds the atlas image under the path the materials point at.

use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tessera_assets::TextureCache;
use tessera_core::math::{Vec2, Vec3};
use tessera_core::{Material, Mesh, UvTransform, VertexAttributes};

use crate::b3dm;
use crate::glb::GltfBuilder;
use crate::{TileError, TileResult};

const UNLIT_EXTENSION: &str = "KHR_materials_unlit";

/// Binary container written for each tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    /// Batched 3D Model wrapping a GLB
    #[default]
    B3dm,
    /// Bare GLB content
    Glb,
}

impl TileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::B3dm => "b3dm",
            Self::Glb => "glb",
        }
    }
}

/// Encoder settings
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderOptions {
    pub format: TileFormat,
    /// Emit `KHR_materials_unlit` on every material
    pub unlit: bool,
    /// Written to the glTF asset block
    pub generator: String,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            format: TileFormat::B3dm,
            unlit: true,
            generator: tessera_core::generator_name(),
        }
    }
}

/// An encoded tile held in memory
#[derive(Debug, Clone, Default)]
pub struct EncodedTile {
    pub bytes: Vec<u8>,
    /// Textures that failed to load and were left out
    pub missing_textures: Vec<PathBuf>,
}

impl EncodedTile {
    /// Write the tile to `path`, creating parent directories, and return its size
    pub fn write_to(&self, path: &Path) -> TileResult<u64> {
        let io_err = |source| TileError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, &self.bytes).map_err(io_err)?;
        Ok(self.bytes.len() as u64)
    }
}

/// Per-primitive attribute streams
#[derive(Default)]
struct PrimitiveData {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    uvs: Vec<[f32; 2]>,
    joints: Vec<[u16; 4]>,
    weights: Vec<[f32; 4]>,
    indices: Vec<u32>,
}

/// Encodes meshes into self-contained tiles
pub struct TileEncoder {
    options: EncoderOptions,
    cache: Arc<TextureCache>,
}

impl TileEncoder {
    pub fn new(options: EncoderOptions, cache: Arc<TextureCache>) -> Self {
        Self { options, cache }
    }

    pub fn options(&self) -> &EncoderOptions {
        &self.options
    }

    /// Encode `mesh` as a tile whose single batch feature is named `batch_name`
    pub fn encode(&self, mesh: &Mesh, batch_name: &str) -> TileResult<EncodedTile> {
        if mesh.is_empty() {
            return Err(TileError::EmptyMesh);
        }
        let (glb, missing_textures) = self.encode_glb(mesh)?;
        let bytes = match self.options.format {
            TileFormat::B3dm => b3dm::wrap_glb(&glb, batch_name)?,
            TileFormat::Glb => glb,
        };
        log::debug!(
            "Encoded {} triangles as {} ({} bytes)",
            mesh.triangle_count(),
            self.options.format.extension(),
            bytes.len()
        );
        Ok(EncodedTile {
            bytes,
            missing_textures,
        })
    }

    fn encode_glb(&self, mesh: &Mesh) -> TileResult<(Vec<u8>, Vec<PathBuf>)> {
        let mut gltf = GltfBuilder::new();
        let normals = mesh.vertex_normals();
        let attributes = mesh.attributes();
        let has_uv = attributes.contains(VertexAttributes::UV);
        let has_skin = attributes.contains(VertexAttributes::SKIN);

        let mut textures: AHashMap<PathBuf, Option<usize>> = AHashMap::new();
        let mut missing = Vec::new();
        if self.options.unlit {
            gltf.use_extension(UNLIT_EXTENSION);
        }

        for (material_index, triangles) in group_by_material(mesh) {
            let material = material_index.map(|m| &mesh.materials[m as usize]);

            let texture = match material.and_then(|m| m.diffuse_texture.as_deref()) {
                Some(path) => match textures.get(path) {
                    Some(slot) => *slot,
                    None => {
                        let slot = self.embed_texture(&mut gltf, path, &mut missing)?;
                        textures.insert(path.to_path_buf(), slot);
                        slot
                    }
                },
                None => None,
            };
            let gltf_material = gltf.add_material(self.material_json(material, texture));

            let uv_transform = material.map_or(UvTransform::IDENTITY, |m| m.uv_transform);
            let data = collect_primitive(mesh, &normals, &triangles, uv_transform, has_skin);

            let mut attrs = Map::new();
            attrs.insert("POSITION".into(), json!(gltf.push_positions(&data.positions)));
            attrs.insert("NORMAL".into(), json!(gltf.push_vec3(&data.normals)));
            if has_uv {
                attrs.insert("TEXCOORD_0".into(), json!(gltf.push_vec2(&data.uvs)));
            }
            if has_skin {
                attrs.insert("JOINTS_0".into(), json!(gltf.push_joints(&data.joints)));
                attrs.insert("WEIGHTS_0".into(), json!(gltf.push_vec4(&data.weights)));
            }
            let batch_ids = vec![0.0f32; data.positions.len()];
            attrs.insert("_BATCHID".into(), json!(gltf.push_scalars(&batch_ids)));

            let indices = gltf.push_indices(&data.indices);
            gltf.add_primitive(attrs, indices, gltf_material);
        }

        Ok((gltf.finish(&self.options.generator)?, missing))
    }

    /// Embed the texture at `path`, or record it as missing when it cannot be loaded
    fn embed_texture(
        &self,
        gltf: &mut GltfBuilder,
        path: &Path,
        missing: &mut Vec<PathBuf>,
    ) -> TileResult<Option<usize>> {
        let image = match self.cache.get_or_load(path) {
            Ok(image) => image,
            Err(err) => {
                log::warn!("Leaving texture out of tile: {err}");
                missing.push(path.to_path_buf());
                return Ok(None);
            }
        };
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|source| TileError::TextureEmbed {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Some(gltf.add_png_texture(&png)))
    }

    fn material_json(&self, material: Option<&Material>, texture: Option<usize>) -> Value {
        let (name, color) = material.map_or(("default", [1.0; 4]), |m| (m.name.as_str(), m.diffuse_color));

        let mut pbr = json!({
            "baseColorFactor": color,
            "metallicFactor": 0.0,
            "roughnessFactor": 1.0,
        });
        if let Some(texture) = texture {
            pbr["baseColorTexture"] = json!({ "index": texture });
        }

        let mut value = json!({
            "name": name,
            "pbrMetallicRoughness": pbr,
            "doubleSided": true,
        });
        if color[3] < 1.0 {
            value["alphaMode"] = json!("BLEND");
        }
        if self.options.unlit {
            value["extensions"] = json!({ UNLIT_EXTENSION: {} });
        }
        value
    }
}

/// Triangle indices grouped by material, untextured (or unknown material) first
fn group_by_material(mesh: &Mesh) -> BTreeMap<Option<u32>, Vec<usize>> {
    let mut groups: BTreeMap<Option<u32>, Vec<usize>> = BTreeMap::new();
    for (index, triangle) in mesh.triangles.iter().enumerate() {
        let material = triangle
            .material
            .filter(|m| (*m as usize) < mesh.materials.len());
        groups.entry(material).or_default().push(index);
    }
    groups
}

fn collect_primitive(
    mesh: &Mesh,
    normals: &[Vec3],
    triangles: &[usize],
    uv_transform: UvTransform,
    has_skin: bool,
) -> PrimitiveData {
    let mut data = PrimitiveData::default();
    let mut remap: AHashMap<u32, u32> = AHashMap::with_capacity(triangles.len() * 2);

    for &ti in triangles {
        for index in mesh.triangles[ti].indices {
            let local = *remap.entry(index).or_insert_with(|| {
                let vertex = &mesh.vertices[index as usize];
                data.positions.push(vertex.position.to_array());
                data.normals.push(normals[index as usize].to_array());

                // OBJ texture space has V pointing up, glTF has it pointing down
                let uv = uv_transform.apply(vertex.uv.unwrap_or(Vec2::ZERO));
                data.uvs.push([uv.x, 1.0 - uv.y]);

                if has_skin {
                    let skin = vertex.skin.unwrap_or_default();
                    let sum: f32 = skin.weights.iter().sum();
                    let weights = if sum > 0.0 {
                        skin.weights.map(|w| w / sum)
                    } else {
                        [1.0, 0.0, 0.0, 0.0]
                    };
                    data.joints.push(skin.indices);
                    data.weights.push(weights);
                }
                (data.positions.len() - 1) as u32
            });
            data.indices.push(local);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::b3dm::read_b3dm;
    use crate::glb::read_glb;
    use image::{Rgba, RgbaImage};
    use tessera_core::{BoneWeights, Triangle, UvRect, Vertex};

    fn quad(material: Option<u32>) -> Mesh {
        Mesh::new(
            vec![
                Vertex::new(Vec3::new(0.0, 0.0, 0.0)).with_uv(Vec2::new(0.0, 0.0)),
                Vertex::new(Vec3::new(1.0, 0.0, 0.0)).with_uv(Vec2::new(1.0, 0.0)),
                Vertex::new(Vec3::new(1.0, 1.0, 0.0)).with_uv(Vec2::new(1.0, 1.0)),
                Vertex::new(Vec3::new(0.0, 1.0, 0.0)).with_uv(Vec2::new(0.0, 1.0)),
            ],
            vec![Triangle::new([0, 1, 2], material), Triangle::new([0, 2, 3], material)],
        )
    }

    fn encoder(format: TileFormat) -> (TileEncoder, Arc<TextureCache>) {
        let cache = Arc::new(TextureCache::new());
        let options = EncoderOptions {
            format,
            unlit: true,
            generator: "test".into(),
        };
        (TileEncoder::new(options, cache.clone()), cache)
    }

    #[test]
    fn test_b3dm_wraps_valid_glb() {
        let (encoder, _) = encoder(TileFormat::B3dm);
        let tile = encoder.encode(&quad(None), "level_0").unwrap();

        let parts = read_b3dm(&tile.bytes).unwrap();
        assert_eq!(parts.batch_table.unwrap()["name"][0], "level_0");

        let (document, _) = read_glb(parts.glb).unwrap();
        let primitive = &document["meshes"][0]["primitives"][0];
        for key in ["POSITION", "NORMAL", "TEXCOORD_0", "_BATCHID"] {
            assert!(primitive["attributes"].get(key).is_some(), "missing {key}");
        }
        assert!(primitive["attributes"].get("JOINTS_0").is_none());
        let indices = primitive["indices"].as_u64().unwrap() as usize;
        assert_eq!(document["accessors"][indices]["count"], 6);
        assert_eq!(document["extensionsUsed"][0], UNLIT_EXTENSION);
    }

    #[test]
    fn test_glb_format_has_no_container() {
        let (encoder, _) = encoder(TileFormat::Glb);
        let tile = encoder.encode(&quad(None), "x").unwrap();
        assert_eq!(&tile.bytes[0..4], b"glTF");
        assert!(read_glb(&tile.bytes).is_ok());
    }

    #[test]
    fn test_empty_mesh_rejected() {
        let (encoder, _) = encoder(TileFormat::B3dm);
        assert!(matches!(encoder.encode(&Mesh::default(), "x"), Err(TileError::EmptyMesh)));
    }

    #[test]
    fn test_one_primitive_per_material() {
        let mut mesh = quad(Some(0));
        mesh.triangles[1].material = Some(1);
        mesh.materials = vec![Material::new("red"), Material::new("blue")];
        mesh.materials[0].diffuse_color = [1.0, 0.0, 0.0, 0.5];

        let (encoder, _) = encoder(TileFormat::Glb);
        let tile = encoder.encode(&mesh, "x").unwrap();
        let (document, _) = read_glb(&tile.bytes).unwrap();

        let primitives = document["meshes"][0]["primitives"].as_array().unwrap();
        assert_eq!(primitives.len(), 2);
        assert_eq!(document["materials"][0]["name"], "red");
        assert_eq!(document["materials"][0]["alphaMode"], "BLEND");
        assert!(document["materials"][1].get("alphaMode").is_none());

        // Shared corner vertices are duplicated per primitive
        let position = primitives[0]["attributes"]["POSITION"].as_u64().unwrap() as usize;
        assert_eq!(document["accessors"][position]["count"], 3);
    }

    #[test]
    fn test_uv_transform_and_flip_applied() {
        let mut mesh = quad(Some(0));
        let mut material = Material::new("atlased");
        material.uv_transform = UvTransform::from_rect(UvRect {
            min_u: 0.5,
            min_v: 0.0,
            max_u: 1.0,
            max_v: 0.5,
        });
        mesh.materials = vec![material];

        let (encoder, _) = encoder(TileFormat::Glb);
        let tile = encoder.encode(&mesh, "x").unwrap();
        let (document, bin) = read_glb(&tile.bytes).unwrap();

        let primitive = &document["meshes"][0]["primitives"][0];
        let accessor = &document["accessors"][primitive["attributes"]["TEXCOORD_0"].as_u64().unwrap() as usize];
        let view = &document["bufferViews"][accessor["bufferView"].as_u64().unwrap() as usize];
        let offset = view["byteOffset"].as_u64().unwrap() as usize;
        let uvs: &[[f32; 2]] = bytemuck::cast_slice(&bin[offset..offset + 4 * 8]);

        // (1, 1) lands on the rect's max corner, then V flips
        assert_eq!(uvs[2], [1.0, 0.5]);
        assert_eq!(uvs[0], [0.5, 1.0]);
    }

    #[test]
    fn test_skin_weights_sum_to_one() {
        let mut mesh = quad(None);
        for vertex in &mut mesh.vertices {
            vertex.skin = Some(BoneWeights::new([2, 5, 0, 0], [0.6, 0.2, 0.0, 0.0]));
        }
        mesh.vertices[3].skin = None;

        let (encoder, _) = encoder(TileFormat::Glb);
        let tile = encoder.encode(&mesh, "x").unwrap();
        let (document, bin) = read_glb(&tile.bytes).unwrap();

        let primitive = &document["meshes"][0]["primitives"][0];
        let weights = &document["accessors"][primitive["attributes"]["WEIGHTS_0"].as_u64().unwrap() as usize];
        let view = &document["bufferViews"][weights["bufferView"].as_u64().unwrap() as usize];
        let offset = view["byteOffset"].as_u64().unwrap() as usize;
        let values: &[[f32; 4]] = bytemuck::cast_slice(&bin[offset..offset + 4 * 16]);

        assert!((values[0][0] - 0.75).abs() < 1e-6);
        assert!((values[0][1] - 0.25).abs() < 1e-6);
        assert_eq!(values[3], [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_textures_embedded_once_and_missing_reported() {
        let dir = tempfile::tempdir().unwrap();
        let atlas = dir.path().join("atlas.png");
        let absent = dir.path().join("absent.png");

        let mut mesh = quad(Some(0));
        mesh.triangles[1].material = Some(1);
        let mut first = Material::new("a");
        first.diffuse_texture = Some(atlas.clone());
        let mut second = Material::new("b");
        second.diffuse_texture = Some(atlas.clone());
        let mut third = Material::new("c");
        third.diffuse_texture = Some(absent.clone());
        mesh.materials = vec![first, second, third];
        mesh.vertices.push(Vertex::new(Vec3::new(2.0, 0.0, 0.0)));
        mesh.triangles.push(Triangle::new([1, 4, 2], Some(2)));

        let (encoder, cache) = encoder(TileFormat::Glb);
        cache.insert(&atlas, Arc::new(RgbaImage::from_pixel(4, 4, Rgba([9, 9, 9, 255]))));

        let tile = encoder.encode(&mesh, "x").unwrap();
        let (document, _) = read_glb(&tile.bytes).unwrap();

        assert_eq!(document["images"].as_array().unwrap().len(), 1);
        assert_eq!(document["materials"][0]["pbrMetallicRoughness"]["baseColorTexture"]["index"], 0);
        assert_eq!(document["materials"][1]["pbrMetallicRoughness"]["baseColorTexture"]["index"], 0);
        assert!(document["materials"][2]["pbrMetallicRoughness"].get("baseColorTexture").is_none());
        assert_eq!(tile.missing_textures, vec![absent]);
    }

    #[test]
    fn test_write_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2").join("tile.b3dm");
        let (encoder, _) = encoder(TileFormat::B3dm);
        let tile = encoder.encode(&quad(None), "x").unwrap();

        let size = tile.write_to(&path).unwrap();
        assert_eq!(size, std::fs::metadata(&path).unwrap().len());
        assert_eq!(size as usize, tile.bytes.len());
    }
}

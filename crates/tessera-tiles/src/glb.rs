//! Binary glTF assembly
//!
//! Attributes, indices and embedded images share one BIN buffer. Every buffer view starts
//! on a 4-byte boundary. The JSON and BIN chunks are padded so that each chunk, and the
//! whole file, ends on an 8-byte boundary, which lets a GLB be appended to a b3dm body
//! without re-alignment.

use bytemuck::Pod;
use serde_json::{json, Map, Value};

use crate::{TileError, TileResult};

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_VERSION: u32 = 2;
const GLB_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

// Buffer view targets
pub const ARRAY_BUFFER: u32 = 34_962;
pub const ELEMENT_ARRAY_BUFFER: u32 = 34_963;

// Accessor component types
pub const UNSIGNED_SHORT: u32 = 5_123;
pub const UNSIGNED_INT: u32 = 5_125;
pub const FLOAT: u32 = 5_126;

/// Append `fill` bytes until `offset + buffer.len()` is a multiple of `alignment`
pub fn pad_to_alignment(buffer: &mut Vec<u8>, offset: usize, alignment: usize, fill: u8) {
    let rem = (offset + buffer.len()) % alignment;
    if rem != 0 {
        buffer.resize(buffer.len() + alignment - rem, fill);
    }
}

/// Incrementally built glTF document with a single mesh and one binary buffer
#[derive(Debug, Default)]
pub struct GltfBuilder {
    bin: Vec<u8>,
    buffer_views: Vec<Value>,
    accessors: Vec<Value>,
    primitives: Vec<Value>,
    materials: Vec<Value>,
    images: Vec<Value>,
    textures: Vec<Value>,
    extensions_used: Vec<String>,
}

impl GltfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_view(&mut self, data: &[u8], target: Option<u32>) -> usize {
        pad_to_alignment(&mut self.bin, 0, 4, 0);
        let mut view = json!({
            "buffer": 0,
            "byteOffset": self.bin.len(),
            "byteLength": data.len(),
        });
        if let Some(target) = target {
            view["target"] = json!(target);
        }
        self.bin.extend_from_slice(data);
        self.buffer_views.push(view);
        self.buffer_views.len() - 1
    }

    fn push_accessor<T: Pod>(
        &mut self,
        data: &[T],
        target: u32,
        component_type: u32,
        kind: &str,
        bounds: Option<(Vec<f32>, Vec<f32>)>,
    ) -> usize {
        let view = self.push_view(bytemuck::cast_slice(data), Some(target));
        let mut accessor = json!({
            "bufferView": view,
            "componentType": component_type,
            "count": data.len(),
            "type": kind,
        });
        if let Some((min, max)) = bounds {
            accessor["min"] = json!(min);
            accessor["max"] = json!(max);
        }
        self.accessors.push(accessor);
        self.accessors.len() - 1
    }

    /// POSITION accessor, with the `min`/`max` glTF requires
    pub fn push_positions(&mut self, positions: &[[f32; 3]]) -> usize {
        let mut min = [f32::INFINITY; 3];
        let mut max = [f32::NEG_INFINITY; 3];
        for p in positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        self.push_accessor(positions, ARRAY_BUFFER, FLOAT, "VEC3", Some((min.to_vec(), max.to_vec())))
    }

    pub fn push_vec3(&mut self, values: &[[f32; 3]]) -> usize {
        self.push_accessor(values, ARRAY_BUFFER, FLOAT, "VEC3", None)
    }

    pub fn push_vec2(&mut self, values: &[[f32; 2]]) -> usize {
        self.push_accessor(values, ARRAY_BUFFER, FLOAT, "VEC2", None)
    }

    pub fn push_vec4(&mut self, values: &[[f32; 4]]) -> usize {
        self.push_accessor(values, ARRAY_BUFFER, FLOAT, "VEC4", None)
    }

    pub fn push_joints(&mut self, values: &[[u16; 4]]) -> usize {
        self.push_accessor(values, ARRAY_BUFFER, UNSIGNED_SHORT, "VEC4", None)
    }

    pub fn push_scalars(&mut self, values: &[f32]) -> usize {
        self.push_accessor(values, ARRAY_BUFFER, FLOAT, "SCALAR", None)
    }

    pub fn push_indices(&mut self, indices: &[u32]) -> usize {
        self.push_accessor(indices, ELEMENT_ARRAY_BUFFER, UNSIGNED_INT, "SCALAR", None)
    }

    /// Embed PNG bytes and return the texture index
    pub fn add_png_texture(&mut self, png: &[u8]) -> usize {
        let view = self.push_view(png, None);
        self.images.push(json!({ "bufferView": view, "mimeType": "image/png" }));
        self.textures.push(json!({ "source": self.images.len() - 1, "sampler": 0 }));
        self.textures.len() - 1
    }

    pub fn add_material(&mut self, material: Value) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    pub fn add_primitive(&mut self, attributes: Map<String, Value>, indices: usize, material: usize) {
        self.primitives.push(json!({
            "attributes": attributes,
            "indices": indices,
            "material": material,
            "mode": 4,
        }));
    }

    pub fn use_extension(&mut self, name: &str) {
        if !self.extensions_used.iter().any(|e| e == name) {
            self.extensions_used.push(name.to_string());
        }
    }

    /// Serialize the document into GLB bytes
    pub fn finish(mut self, generator: &str) -> TileResult<Vec<u8>> {
        pad_to_alignment(&mut self.bin, 0, 8, 0);

        let mut root = json!({
            "asset": { "version": "2.0", "generator": generator },
            "scene": 0,
            "scenes": [{ "nodes": [0] }],
            "nodes": [{ "mesh": 0 }],
            "meshes": [{ "primitives": self.primitives }],
            "materials": self.materials,
            "accessors": self.accessors,
            "bufferViews": self.buffer_views,
            "buffers": [{ "byteLength": self.bin.len() }],
        });
        if !self.textures.is_empty() {
            root["images"] = json!(self.images);
            root["textures"] = json!(self.textures);
            root["samplers"] = json!([{
                "magFilter": 9729,
                "minFilter": 9987,
                "wrapS": 10497,
                "wrapT": 10497,
            }]);
        }
        if !self.extensions_used.is_empty() {
            root["extensionsUsed"] = json!(self.extensions_used);
        }

        write_glb(&root, &self.bin)
    }
}

/// Frame a glTF JSON document and its binary buffer as GLB
pub fn write_glb(document: &Value, bin: &[u8]) -> TileResult<Vec<u8>> {
    let mut json_chunk = serde_json::to_vec(document)?;
    pad_to_alignment(&mut json_chunk, GLB_HEADER_LEN + CHUNK_HEADER_LEN, 8, b' ');

    let mut bin_chunk = bin.to_vec();
    pad_to_alignment(&mut bin_chunk, 0, 8, 0);

    let mut total = GLB_HEADER_LEN + CHUNK_HEADER_LEN + json_chunk.len();
    if !bin_chunk.is_empty() {
        total += CHUNK_HEADER_LEN + bin_chunk.len();
    }
    let total_u32 = u32::try_from(total)
        .map_err(|_| TileError::InvalidPayload(format!("GLB of {total} bytes exceeds 4 GiB")))?;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(GLB_MAGIC);
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&total_u32.to_le_bytes());

    out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_chunk);

    if !bin_chunk.is_empty() {
        out.extend_from_slice(&(bin_chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(&bin_chunk);
    }
    Ok(out)
}

fn read_u32(data: &[u8], offset: usize) -> TileResult<u32> {
    data.get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| TileError::InvalidPayload(format!("truncated at byte {offset}")))
}

/// Split GLB bytes into the parsed JSON document and the BIN chunk
pub fn read_glb(data: &[u8]) -> TileResult<(Value, &[u8])> {
    if data.len() < GLB_HEADER_LEN || &data[0..4] != GLB_MAGIC {
        return Err(TileError::InvalidPayload("missing glTF magic".into()));
    }
    let version = read_u32(data, 4)?;
    if version != GLB_VERSION {
        return Err(TileError::InvalidPayload(format!("unsupported glTF version {version}")));
    }
    let total = read_u32(data, 8)? as usize;
    if total != data.len() {
        return Err(TileError::InvalidPayload(format!(
            "GLB declares {total} bytes but holds {}",
            data.len()
        )));
    }

    let mut offset = GLB_HEADER_LEN;
    let mut document = None;
    let mut bin: &[u8] = &[];
    while offset + CHUNK_HEADER_LEN <= data.len() {
        let length = read_u32(data, offset)? as usize;
        let kind = read_u32(data, offset + 4)?;
        let start = offset + CHUNK_HEADER_LEN;
        let chunk = data
            .get(start..start + length)
            .ok_or_else(|| TileError::InvalidPayload("chunk overruns file".into()))?;
        match kind {
            CHUNK_JSON => document = Some(serde_json::from_slice(chunk)?),
            CHUNK_BIN => bin = chunk,
            _ => {}
        }
        offset = start + length;
    }

    let document = document.ok_or_else(|| TileError::InvalidPayload("no JSON chunk".into()))?;
    Ok((document, bin))
}

//! Wavefront OBJ loader
//!
//! Reads `v`, `vt`, `vn`, `f`, `usemtl` and `mtllib`. Polygons are fan-triangulated
//! around their first corner. Malformed lines are skipped and reported as
//! [`ParseWarning`]s; only open and read failures abort the load.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap;
use tessera_core::{BoundingBox3D, CancellationToken, Material, Mesh, Triangle, Vertex};
use tessera_core::math::{Vec2, Vec3};

use crate::loader::{LoadedModel, ModelLoader, ParseWarning};
use crate::mtl::{load_mtl, parse_floats, resolve_texture_path};
use crate::{AssetError, AssetResult, ModelFormat};

/// Lines between cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 4096;

/// Loader for `.obj` files
#[derive(Debug, Default)]
pub struct ObjLoader;

impl ObjLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModelLoader for ObjLoader {
    fn name(&self) -> &str {
        "obj"
    }

    fn supports_format(&self, extension: &str) -> bool {
        ModelFormat::Obj.matches(extension)
    }

    fn load(&self, path: &Path, cancel: &CancellationToken) -> AssetResult<LoadedModel> {
        let file = File::open(path).map_err(|_| AssetError::InputNotFound(path.to_path_buf()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let model = parse_obj(BufReader::new(file), base_dir, cancel).map_err(|err| match err {
            ParseFailure::Io(source) => AssetError::Io {
                path: path.to_path_buf(),
                source,
            },
            ParseFailure::Cancelled => AssetError::Cancelled,
        })?;

        log::info!(
            "Loaded {}: {} vertices, {} triangles, {} materials, {} warnings",
            path.display(),
            model.mesh.vertex_count(),
            model.mesh.triangle_count(),
            model.mesh.materials.len(),
            model.warnings.len()
        );
        Ok(model)
    }
}

/// Why parsing stopped early
#[derive(Debug)]
pub enum ParseFailure {
    Io(std::io::Error),
    Cancelled,
}

/// Parse OBJ text; `base_dir` resolves `mtllib` references
pub fn parse_obj<R: BufRead>(
    reader: R,
    base_dir: &Path,
    cancel: &CancellationToken,
) -> Result<LoadedModel, ParseFailure> {
    let mut state = ObjState::new(base_dir);

    for (index, line) in reader.lines().enumerate() {
        if index % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(ParseFailure::Cancelled);
        }
        let line = line.map_err(ParseFailure::Io)?;
        state.parse_line(index + 1, &line);
    }

    Ok(state.finish())
}

/// Resolve an OBJ index against the number of elements parsed so far
///
/// Positive indices are 1-based; negative ones count back from the end.
pub fn resolve_index(raw: i64, count: usize) -> Option<usize> {
    let resolved = match raw {
        0 => return None,
        r if r > 0 => r - 1,
        r => count as i64 + r,
    };
    (resolved >= 0 && (resolved as usize) < count).then_some(resolved as usize)
}

/// Split a polygon into triangles sharing its first corner
pub fn fan_triangulate(corners: &[u32]) -> Vec<[u32; 3]> {
    if corners.len() < 3 {
        return Vec::new();
    }
    (1..corners.len() - 1)
        .map(|i| [corners[0], corners[i], corners[i + 1]])
        .collect()
}

/// Position, texcoord and normal indices of one face corner
type CornerKey = (usize, Option<usize>, Option<usize>);

struct ObjState<'a> {
    base_dir: &'a Path,
    positions: Vec<Vec3>,
    uvs: Vec<Vec2>,
    normals: Vec<Vec3>,
    vertices: Vec<Vertex>,
    triangles: Vec<Triangle>,
    corners: AHashMap<CornerKey, u32>,
    materials: Vec<Material>,
    material_ids: AHashMap<String, u32>,
    current_material: Option<u32>,
    bounds: BoundingBox3D,
    warnings: Vec<ParseWarning>,
}

impl<'a> ObjState<'a> {
    fn new(base_dir: &'a Path) -> Self {
        Self {
            base_dir,
            positions: Vec::new(),
            uvs: Vec::new(),
            normals: Vec::new(),
            vertices: Vec::new(),
            triangles: Vec::new(),
            corners: AHashMap::new(),
            materials: Vec::new(),
            material_ids: AHashMap::new(),
            current_material: None,
            bounds: BoundingBox3D::EMPTY,
            warnings: Vec::new(),
        }
    }

    fn warn(&mut self, line: usize, message: impl Into<String>) {
        let message = message.into();
        log::warn!("OBJ line {}: {}", line, message);
        self.warnings.push(ParseWarning { line, message });
    }

    fn parse_line(&mut self, line_no: usize, line: &str) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return;
        }

        let mut parts = line.split_whitespace();
        let keyword = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();

        match keyword {
            "v" => match parse_floats::<3>(&rest) {
                Some([x, y, z]) => {
                    let position = Vec3::new(x, y, z);
                    self.bounds.expand_to_include(position);
                    self.positions.push(position);
                }
                None => self.warn(line_no, "vertex needs three numeric coordinates"),
            },
            "vt" => match parse_floats::<2>(&rest) {
                Some([u, v]) => self.uvs.push(Vec2::new(u, v)),
                None => self.warn(line_no, "texture coordinate needs two numbers"),
            },
            "vn" => match parse_floats::<3>(&rest) {
                Some([x, y, z]) => self.normals.push(Vec3::new(x, y, z)),
                None => self.warn(line_no, "normal needs three numbers"),
            },
            "f" => {
                if let Err(message) = self.parse_face(&rest) {
                    self.warn(line_no, message);
                }
            }
            "usemtl" => match rest.first() {
                Some(name) => self.current_material = Some(self.material_id(name)),
                None => self.warn(line_no, "usemtl without a name"),
            },
            "mtllib" => {
                // Names with spaces are common in exported files
                let reference = rest.join(" ");
                if reference.is_empty() {
                    self.warn(line_no, "mtllib without a file");
                } else {
                    self.load_library(line_no, &reference);
                }
            }
            // Groups, objects, smoothing and other directives carry nothing we encode
            _ => {}
        }
    }

    fn parse_face(&mut self, tokens: &[&str]) -> Result<(), String> {
        if tokens.len() < 3 {
            return Err(format!("face needs at least 3 corners, found {}", tokens.len()));
        }

        let keys = tokens
            .iter()
            .map(|token| self.resolve_corner(token))
            .collect::<Result<Vec<_>, _>>()?;
        let corners: Vec<u32> = keys.into_iter().map(|key| self.corner_vertex(key)).collect();

        for indices in fan_triangulate(&corners) {
            self.triangles.push(Triangle::new(indices, self.current_material));
        }
        Ok(())
    }

    fn resolve_corner(&self, token: &str) -> Result<CornerKey, String> {
        let mut fields = token.split('/');
        let position = parse_reference(fields.next(), self.positions.len(), "vertex", token)?
            .ok_or_else(|| format!("corner '{token}' has no vertex index"))?;
        let uv = parse_reference(fields.next(), self.uvs.len(), "texture coordinate", token)?;
        let normal = parse_reference(fields.next(), self.normals.len(), "normal", token)?;
        Ok((position, uv, normal))
    }

    fn corner_vertex(&mut self, key: CornerKey) -> u32 {
        if let Some(&index) = self.corners.get(&key) {
            return index;
        }
        let (position, uv, normal) = key;
        let vertex = Vertex {
            position: self.positions[position],
            normal: normal.map(|i| self.normals[i]),
            uv: uv.map(|i| self.uvs[i]),
            skin: None,
        };
        let index = self.vertices.len() as u32;
        self.vertices.push(vertex);
        self.corners.insert(key, index);
        index
    }

    fn material_id(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.material_ids.get(name) {
            return id;
        }
        let id = self.materials.len() as u32;
        self.materials.push(Material::new(name));
        self.material_ids.insert(name.to_string(), id);
        id
    }

    fn load_library(&mut self, line_no: usize, reference: &str) {
        let path = resolve_texture_path(self.base_dir, reference);
        match load_mtl(&path) {
            Ok(library) => {
                for warning in library.warnings {
                    self.warn(line_no, format!("{}: {}", path.display(), warning));
                }
                for material in library.materials {
                    let id = self.material_id(&material.name);
                    self.materials[id as usize] = material;
                }
            }
            Err(err) => self.warn(line_no, format!("material library skipped: {err}")),
        }
    }

    fn finish(self) -> LoadedModel {
        LoadedModel {
            mesh: Mesh {
                vertices: self.vertices,
                triangles: self.triangles,
                materials: self.materials,
            },
            bounds: (!self.bounds.is_empty()).then_some(self.bounds),
            warnings: self.warnings,
        }
    }
}

/// Parse one slash-separated index field; empty fields mean "absent"
fn parse_reference(
    field: Option<&str>,
    count: usize,
    what: &str,
    token: &str,
) -> Result<Option<usize>, String> {
    let Some(field) = field.filter(|f| !f.is_empty()) else {
        return Ok(None);
    };
    let raw: i64 = field
        .parse()
        .map_err(|_| format!("corner '{token}' has a non-numeric {what} index"))?;
    resolve_index(raw, count)
        .map(Some)
        .ok_or_else(|| format!("{what} index {raw} out of range ({count} defined)"))
}

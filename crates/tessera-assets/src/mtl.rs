//! Wavefront MTL material libraries
//!
//! Only the diffuse channel is read: `newmtl`, `Kd`, `d`, `Tr` and `map_Kd`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tessera_core::Material;

use crate::loader::ParseWarning;
use crate::{AssetError, AssetResult};

/// Materials parsed from one library, in declaration order
#[derive(Debug, Clone, Default)]
pub struct MtlLibrary {
    pub materials: Vec<Material>,
    pub warnings: Vec<ParseWarning>,
}

/// Load an MTL file; texture paths resolve against the file's directory
pub fn load_mtl(path: &Path) -> AssetResult<MtlLibrary> {
    let file = File::open(path).map_err(|_| AssetError::InputNotFound(path.to_path_buf()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_mtl(BufReader::new(file), base_dir).map_err(|source| AssetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse MTL text
pub fn parse_mtl<R: BufRead>(reader: R, base_dir: &Path) -> std::io::Result<MtlLibrary> {
    let mut library = MtlLibrary::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.split_whitespace();
        let keyword = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();
        let line_no = index + 1;

        if keyword == "newmtl" {
            match rest.first() {
                Some(name) => library.materials.push(Material::new(*name)),
                None => library.warn(line_no, "newmtl without a name"),
            }
            continue;
        }

        let Some(material) = library.materials.last_mut() else {
            if matches!(keyword, "Kd" | "d" | "Tr" | "map_Kd") {
                library.warn(line_no, format!("{keyword} before any newmtl"));
            }
            continue;
        };

        let problem = match keyword {
            "Kd" => match parse_floats::<3>(&rest) {
                Some([r, g, b]) => {
                    material.diffuse_color[0] = r;
                    material.diffuse_color[1] = g;
                    material.diffuse_color[2] = b;
                    None
                }
                None => Some("malformed Kd"),
            },
            "d" => parse_floats::<1>(&rest)
                .map(|[alpha]| material.diffuse_color[3] = alpha.clamp(0.0, 1.0))
                .map_or(Some("malformed d"), |_| None),
            "Tr" => parse_floats::<1>(&rest)
                .map(|[transparency]| material.diffuse_color[3] = (1.0 - transparency).clamp(0.0, 1.0))
                .map_or(Some("malformed Tr"), |_| None),
            // Options such as `-s 1 1 1` precede the file name
            "map_Kd" => match rest.last() {
                Some(file) => {
                    material.diffuse_texture = Some(resolve_texture_path(base_dir, file));
                    None
                }
                None => Some("map_Kd without a file"),
            },
            _ => None,
        };

        if let Some(message) = problem {
            library.warn(line_no, message);
        }
    }

    Ok(library)
}

/// Resolve a texture reference relative to the referencing file
pub fn resolve_texture_path(base_dir: &Path, reference: &str) -> PathBuf {
    let normalized = reference.replace('\\', "/");
    let path = Path::new(&normalized);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Parse the first `N` tokens as finite floats; `inf`, `nan` and overflowing literals fail
pub(crate) fn parse_floats<const N: usize>(parts: &[&str]) -> Option<[f32; N]> {
    if parts.len() < N {
        return None;
    }
    let mut out = [0.0; N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part.parse::<f32>().ok().filter(|v| v.is_finite())?;
    }
    Some(out)
}

impl MtlLibrary {
    fn warn(&mut self, line: usize, message: impl Into<String>) {
        let message = message.into();
        log::warn!("MTL line {}: {}", line, message);
        self.warnings.push(ParseWarning { line, message });
    }
}

//! `.ksm` binary mesh cache
//!
//! Little-endian layout:
//!
//! ```text
//! u16 version
//! u32 name_length, name bytes
//! u64 geometry_count
//! repeated geometry_count times:
//!     u32 name_length, name bytes
//!     u32 material_name_length, material name bytes
//!     vec3 center
//!     vec3 extents.min, vec3 extents.max
//!     u32 vertex_size, u32 vertex_count, raw vertex bytes
//!     u32 index_size, u32 index_count, raw index bytes
//! ```
//!
//! A missing `.ksm` is produced from the `.obj` of the same name, whose
//! `.mtl` materials are written out as `.kmt` files.

use super::obj_loader::{parse_mtl, parse_obj};
use super::{read_text, write_bytes, AssetError, AssetResult};
use crate::core::AssetConfig;
use crate::foundation::math::Vec3;
use crate::render::types::{Extents3D, GeometryConfig};
use std::path::Path;

/// Current `.ksm` version
pub const KSM_VERSION: u16 = 1;

/// A loaded mesh: a name plus its geometries
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData {
    /// Mesh name
    pub name: String,
    /// Geometry configs, ready for the geometry system
    pub geometries: Vec<GeometryConfig>,
}

impl MeshData {
    /// Serialize to `.ksm` bytes
    pub fn to_ksm_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&KSM_VERSION.to_le_bytes());
        write_string(&mut out, &self.name);
        out.extend_from_slice(&(self.geometries.len() as u64).to_le_bytes());

        for geometry in &self.geometries {
            write_string(&mut out, &geometry.name);
            write_string(&mut out, geometry.material_name.as_deref().unwrap_or(""));
            write_vec3(&mut out, &geometry.center);
            write_vec3(&mut out, &geometry.extents.min);
            write_vec3(&mut out, &geometry.extents.max);

            out.extend_from_slice(&geometry.vertex_size.to_le_bytes());
            out.extend_from_slice(&geometry.vertex_count.to_le_bytes());
            out.extend_from_slice(&geometry.vertices);

            out.extend_from_slice(&(std::mem::size_of::<u32>() as u32).to_le_bytes());
            out.extend_from_slice(&(geometry.indices.len() as u32).to_le_bytes());
            for index in &geometry.indices {
                out.extend_from_slice(&index.to_le_bytes());
            }
        }
        out
    }

    /// Parse `.ksm` bytes. `source` labels errors.
    pub fn from_ksm_bytes(bytes: &[u8], source: &str) -> AssetResult<Self> {
        let mut reader = ByteReader {
            bytes,
            position: 0,
            source,
        };

        let version = reader.u16()?;
        if version != KSM_VERSION {
            return Err(reader.invalid(format!("unsupported version {version}")));
        }
        let name = reader.string()?;
        let geometry_count = reader.u64()?;

        let mut geometries = Vec::new();
        for _ in 0..geometry_count {
            let name = reader.string()?;
            let material_name = reader.string()?;
            let center = reader.vec3()?;
            let min = reader.vec3()?;
            let max = reader.vec3()?;

            let vertex_size = reader.u32()?;
            let vertex_count = reader.u32()?;
            let vertex_bytes = vertex_size as usize * vertex_count as usize;
            let vertices = reader.take(vertex_bytes)?.to_vec();

            let index_size = reader.u32()?;
            let index_count = reader.u32()?;
            if index_size != 4 {
                return Err(reader.invalid(format!("unsupported index size {index_size}")));
            }
            let indices = reader
                .take(index_count as usize * 4)?
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();

            geometries.push(GeometryConfig {
                vertex_size,
                vertex_count,
                vertices,
                indices,
                center,
                extents: Extents3D { min, max },
                name,
                material_name: (!material_name.is_empty()).then_some(material_name),
            });
        }

        if reader.position != bytes.len() {
            log::warn!(
                "[MESH] {}: {} trailing bytes ignored",
                source,
                bytes.len() - reader.position
            );
        }
        Ok(Self { name, geometries })
    }

    /// Read a `.ksm` file
    pub fn load_ksm(path: &Path) -> AssetResult<Self> {
        let bytes = std::fs::read(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ksm_bytes(&bytes, &path.display().to_string())
    }

    /// Write a `.ksm` file
    pub fn save_ksm(&self, path: &Path) -> AssetResult<()> {
        write_bytes(path, &self.to_ksm_bytes())
    }
}

/// Load mesh `name` from the models directory.
///
/// Prefers `<name>.ksm`. Otherwise imports `<name>.obj`, writes the `.ksm`
/// cache next to it, and writes any `.mtl` materials into the materials
/// directory as `.kmt` files that do not exist yet.
pub fn load_mesh(assets: &AssetConfig, name: &str) -> AssetResult<MeshData> {
    let models_dir = assets.models_dir();
    let ksm_path = models_dir.join(format!("{name}.ksm"));
    if ksm_path.exists() {
        log::debug!("[MESH] Loading cached mesh {}", ksm_path.display());
        return MeshData::load_ksm(&ksm_path);
    }

    let obj_path = models_dir.join(format!("{name}.obj"));
    if !obj_path.exists() {
        return Err(AssetError::NotFound(format!(
            "mesh '{}' (no .ksm or .obj in {})",
            name,
            models_dir.display()
        )));
    }

    log::info!("[MESH] Importing {}", obj_path.display());
    let text = read_text(&obj_path)?;
    let obj = parse_obj(&text, name, &obj_path.display().to_string())?;

    for library in &obj.material_libraries {
        let mtl_path = models_dir.join(library);
        let mtl_text = match read_text(&mtl_path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("[MESH] Material library skipped: {}", e);
                continue;
            }
        };
        let materials_dir = assets.materials_dir();
        for material in parse_mtl(&mtl_text, &mtl_path.display().to_string())? {
            let kmt_path = materials_dir.join(format!("{}.kmt", material.name));
            if kmt_path.exists() {
                continue;
            }
            std::fs::create_dir_all(&materials_dir).map_err(|source| AssetError::Io {
                path: materials_dir.clone(),
                source,
            })?;
            material.save(&kmt_path)?;
            log::debug!("[MESH] Wrote material {}", kmt_path.display());
        }
    }

    let mesh = MeshData {
        name: name.to_string(),
        geometries: obj.geometries,
    };
    if let Err(e) = mesh.save_ksm(&ksm_path) {
        log::warn!("[MESH] Could not write mesh cache: {}", e);
    }
    Ok(mesh)
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

fn write_vec3(out: &mut Vec<u8>, value: &Vec3) {
    for component in value.iter() {
        out.extend_from_slice(&component.to_le_bytes());
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    position: usize,
    source: &'a str,
}

impl<'a> ByteReader<'a> {
    fn invalid(&self, reason: String) -> AssetError {
        AssetError::InvalidData {
            path: self.source.to_string(),
            reason,
        }
    }

    fn take(&mut self, count: usize) -> AssetResult<&'a [u8]> {
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                self.invalid(format!(
                    "unexpected end of data reading {} bytes at offset {}",
                    count, self.position
                ))
            })?;
        let bytes: &'a [u8] = self.bytes;
        let slice = &bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> AssetResult<[u8; N]> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> AssetResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> AssetResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> AssetResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> AssetResult<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    fn vec3(&mut self) -> AssetResult<Vec3> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    fn string(&mut self) -> AssetResult<String> {
        let length = self.u32()? as usize;
        let bytes = self.take(length)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| self.invalid(format!("invalid UTF-8 string: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec2;
    use crate::render::types::Vertex3D;
    use tempfile::TempDir;

    fn triangle() -> GeometryConfig {
        let vertices = [
            Vertex3D::new(Vec3::new(0.0, 0.0, 0.0), Vec3::z(), Vec2::new(0.0, 0.0)),
            Vertex3D::new(Vec3::new(1.0, 0.0, 0.0), Vec3::z(), Vec2::new(1.0, 0.0)),
            Vertex3D::new(Vec3::new(0.0, 1.0, 0.0), Vec3::z(), Vec2::new(0.0, 1.0)),
        ];
        GeometryConfig::from_vertices_3d("tri", &vertices, vec![0, 1, 2], Some("red".to_string()))
    }

    #[test]
    fn test_ksm_header_layout() {
        let mesh = MeshData {
            name: "m".to_string(),
            geometries: vec![],
        };
        let bytes = mesh.to_ksm_bytes();
        assert_eq!(bytes.len(), 2 + 4 + 1 + 8);
        assert_eq!(&bytes[0..2], &1_u16.to_le_bytes());
        assert_eq!(&bytes[2..6], &1_u32.to_le_bytes());
        assert_eq!(bytes[6], b'm');
    }

    #[test]
    fn test_ksm_preserves_geometry() {
        let mesh = MeshData {
            name: "single".to_string(),
            geometries: vec![triangle()],
        };
        let parsed = MeshData::from_ksm_bytes(&mesh.to_ksm_bytes(), "test").unwrap();
        assert_eq!(parsed, mesh);
        assert_eq!(parsed.geometries[0].material_name.as_deref(), Some("red"));
    }

    #[test]
    fn test_truncated_ksm_rejected() {
        let mesh = MeshData {
            name: "single".to_string(),
            geometries: vec![triangle()],
        };
        let bytes = mesh.to_ksm_bytes();
        let result = MeshData::from_ksm_bytes(&bytes[..bytes.len() - 3], "test");
        assert!(matches!(result, Err(AssetError::InvalidData { .. })));
    }

    #[test]
    fn test_load_mesh_imports_obj_and_writes_caches() {
        let dir = TempDir::new().unwrap();
        let assets = AssetConfig::new().with_assets_dir(dir.path());
        std::fs::create_dir_all(assets.models_dir()).unwrap();

        std::fs::write(
            assets.models_dir().join("quad.obj"),
            "mtllib quad.mtl\no quad\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\nvn 0 0 1\nusemtl blue\nf 1/1/1 2/2/1 3/3/1 4/4/1\n",
        )
        .unwrap();
        std::fs::write(
            assets.models_dir().join("quad.mtl"),
            "newmtl blue\nKd 0 0 1\nmap_Kd blue.png\n",
        )
        .unwrap();

        let mesh = load_mesh(&assets, "quad").unwrap();
        assert_eq!(mesh.geometries.len(), 1);
        assert_eq!(mesh.geometries[0].vertex_count, 4);
        assert_eq!(mesh.geometries[0].indices, vec![0, 1, 2, 0, 2, 3]);

        assert!(assets.models_dir().join("quad.ksm").exists());
        let material = crate::assets::MaterialConfig::load(&assets.materials_dir().join("blue.kmt")).unwrap();
        assert_eq!(material.diffuse_map_name.as_deref(), Some("blue"));

        // Second load comes from the cache
        std::fs::remove_file(assets.models_dir().join("quad.obj")).unwrap();
        let cached = load_mesh(&assets, "quad").unwrap();
        assert_eq!(cached, mesh);
    }

    #[test]
    fn test_missing_mesh_is_not_found() {
        let dir = TempDir::new().unwrap();
        let assets = AssetConfig::new().with_assets_dir(dir.path());
        assert!(matches!(load_mesh(&assets, "nothing"), Err(AssetError::NotFound(_))));
    }
}

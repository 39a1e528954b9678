//! Wavefront `.obj` / `.mtl` import
//!
//! Faces are split into one geometry per object/group and material. Polygons
//! are fan-triangulated, negative indices are resolved relative to the end of
//! the current lists, missing normals are replaced with the face normal, and
//! identical vertices are merged.

use super::{AssetError, AssetResult, MaterialConfig};
use crate::foundation::math::{Vec2, Vec3, Vec4};
use crate::render::types::{GeometryConfig, Vertex3D};
use std::collections::HashMap;
use std::path::Path;

/// Result of parsing an `.obj` file
#[derive(Debug, Clone, PartialEq)]
pub struct ObjData {
    /// One geometry per group/material run
    pub geometries: Vec<GeometryConfig>,
    /// `mtllib` file names in declaration order
    pub material_libraries: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct FaceVertex {
    position: usize,
    texcoord: Option<usize>,
    normal: Option<usize>,
}

struct Group {
    name: String,
    material: Option<String>,
    triangles: Vec<[FaceVertex; 3]>,
}

struct ObjParser<'a> {
    source: &'a str,
    mesh_name: &'a str,
    positions: Vec<Vec3>,
    normals: Vec<Vec3>,
    texcoords: Vec<Vec2>,
    current: Group,
    name_counts: HashMap<String, u32>,
    geometries: Vec<GeometryConfig>,
}

/// Parse `.obj` text into geometry configs
pub fn parse_obj(text: &str, mesh_name: &str, source: &str) -> AssetResult<ObjData> {
    let mut parser = ObjParser {
        source,
        mesh_name,
        positions: Vec::new(),
        normals: Vec::new(),
        texcoords: Vec::new(),
        current: Group {
            name: mesh_name.to_string(),
            material: None,
            triangles: Vec::new(),
        },
        name_counts: HashMap::new(),
        geometries: Vec::new(),
    };
    let mut material_libraries = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(keyword) = parts.next() else {
            continue;
        };
        let rest: Vec<&str> = parts.collect();

        match keyword {
            "v" => {
                let [x, y, z] = parser.floats::<3>(&rest, line_number)?;
                parser.positions.push(Vec3::new(x, y, z));
            }
            "vn" => {
                let [x, y, z] = parser.floats::<3>(&rest, line_number)?;
                parser.normals.push(Vec3::new(x, y, z));
            }
            "vt" => {
                let [u, v] = parser.floats::<2>(&rest, line_number)?;
                parser.texcoords.push(Vec2::new(u, v));
            }
            "f" => parser.face(&rest, line_number)?,
            "o" | "g" => {
                parser.flush();
                if let Some(name) = rest.first() {
                    parser.current.name = (*name).to_string();
                }
            }
            "usemtl" => {
                parser.flush();
                parser.current.material = rest.first().map(|s| (*s).to_string());
            }
            "mtllib" => material_libraries.extend(rest.iter().map(|s| (*s).to_string())),
            "s" | "l" | "p" => {}
            other => log::trace!("[OBJ] {}:{}: ignoring '{}'", source, line_number, other),
        }
    }
    parser.flush();

    Ok(ObjData {
        geometries: parser.geometries,
        material_libraries,
    })
}

impl ObjParser<'_> {
    fn error(&self, line: usize, reason: String) -> AssetError {
        AssetError::Parse {
            path: self.source.to_string(),
            line,
            reason,
        }
    }

    fn floats<const N: usize>(&self, fields: &[&str], line: usize) -> AssetResult<[f32; N]> {
        if fields.len() < N {
            return Err(self.error(line, format!("expected {} numbers, got {}", N, fields.len())));
        }
        let mut out = [0.0; N];
        for (slot, field) in out.iter_mut().zip(fields) {
            *slot = field
                .parse()
                .map_err(|_| self.error(line, format!("invalid number '{field}'")))?;
        }
        Ok(out)
    }

    fn resolve(&self, field: &str, count: usize, line: usize) -> AssetResult<usize> {
        let value: i64 = field
            .parse()
            .map_err(|_| self.error(line, format!("invalid index '{field}'")))?;
        let resolved = match value {
            0 => None,
            v if v > 0 => Some(v as usize - 1),
            v => (count as i64 + v).try_into().ok(),
        };
        resolved
            .filter(|i| *i < count)
            .ok_or_else(|| self.error(line, format!("index {value} out of range ({count} entries)")))
    }

    fn face(&mut self, fields: &[&str], line: usize) -> AssetResult<()> {
        if fields.len() < 3 {
            return Err(self.error(line, "face needs at least 3 vertices".to_string()));
        }
        let mut corners = Vec::with_capacity(fields.len());
        for field in fields {
            let mut indices = field.split('/');
            let position = self.resolve(indices.next().unwrap_or(""), self.positions.len(), line)?;
            let texcoord = match indices.next() {
                Some(t) if !t.is_empty() => Some(self.resolve(t, self.texcoords.len(), line)?),
                _ => None,
            };
            let normal = match indices.next() {
                Some(n) if !n.is_empty() => Some(self.resolve(n, self.normals.len(), line)?),
                _ => None,
            };
            corners.push(FaceVertex {
                position,
                texcoord,
                normal,
            });
        }
        for i in 1..corners.len() - 1 {
            self.current.triangles.push([corners[0], corners[i], corners[i + 1]]);
        }
        Ok(())
    }

    fn flush(&mut self) {
        if self.current.triangles.is_empty() {
            return;
        }
        let triangles = std::mem::take(&mut self.current.triangles);

        let mut vertices = Vec::with_capacity(triangles.len() * 3);
        for triangle in &triangles {
            let p: [Vec3; 3] = triangle.map(|c| self.positions[c.position]);
            let face_normal = (p[1] - p[0]).cross(&(p[2] - p[0]));
            let face_normal = face_normal.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::z);
            for (corner, position) in triangle.iter().zip(p) {
                let normal = corner.normal.map_or(face_normal, |n| self.normals[n]);
                let texcoord = corner.texcoord.map_or_else(Vec2::zeros, |t| self.texcoords[t]);
                vertices.push(Vertex3D::new(position, normal, texcoord));
            }
        }
        let indices: Vec<u32> = (0..vertices.len() as u32).collect();
        let (vertices, indices) = deduplicate_vertices(&vertices, &indices);

        let base = if self.current.name.is_empty() {
            self.mesh_name.to_string()
        } else {
            self.current.name.clone()
        };
        let count = self.name_counts.entry(base.clone()).or_insert(0);
        let name = if *count == 0 { base } else { format!("{base}_{count}") };
        *count += 1;

        log::debug!(
            "[OBJ] Geometry '{}': {} vertices, {} indices",
            name,
            vertices.len(),
            indices.len()
        );
        self.geometries.push(GeometryConfig::from_vertices_3d(
            name,
            &vertices,
            indices,
            self.current.material.clone(),
        ));
    }
}

/// Merge identical vertices. Unique vertices keep first-occurrence order and
/// indices are remapped onto them.
pub fn deduplicate_vertices(vertices: &[Vertex3D], indices: &[u32]) -> (Vec<Vertex3D>, Vec<u32>) {
    let mut unique = Vec::with_capacity(vertices.len());
    let mut lookup: HashMap<[u32; 12], u32> = HashMap::with_capacity(vertices.len());

    let remapped = indices
        .iter()
        .map(|&index| {
            let vertex = vertices[index as usize];
            let key: [u32; 12] = bytemuck::cast(vertex);
            *lookup.entry(key).or_insert_with(|| {
                unique.push(vertex);
                unique.len() as u32 - 1
            })
        })
        .collect();
    (unique, remapped)
}

/// Parse `.mtl` text into material configs
pub fn parse_mtl(text: &str, source: &str) -> AssetResult<Vec<MaterialConfig>> {
    let mut materials = Vec::new();
    let mut current: Option<MaterialConfig> = None;

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        if keyword == "newmtl" {
            materials.extend(current.take());
            current = Some(MaterialConfig::new(rest));
            continue;
        }
        let Some(material) = current.as_mut() else {
            log::warn!("[OBJ] {}:{}: '{}' before newmtl", source, index + 1, keyword);
            continue;
        };

        match keyword {
            "Kd" => {
                let rgb: Vec<f32> = rest.split_whitespace().filter_map(|v| v.parse().ok()).collect();
                if let [r, g, b, ..] = rgb[..] {
                    material.diffuse_colour = Vec4::new(r, g, b, material.diffuse_colour.w);
                } else {
                    return Err(AssetError::Parse {
                        path: source.to_string(),
                        line: index + 1,
                        reason: format!("Kd needs 3 numbers, got '{rest}'"),
                    });
                }
            }
            "d" => {
                if let Ok(alpha) = rest.parse::<f32>() {
                    material.diffuse_colour.w = alpha;
                }
            }
            "Tr" => {
                if let Ok(transparency) = rest.parse::<f32>() {
                    material.diffuse_colour.w = 1.0 - transparency;
                }
            }
            "map_Kd" => {
                // Options like -s may precede the file name
                let file = rest.split_whitespace().last().unwrap_or("");
                material.diffuse_map_name = Path::new(file)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string);
            }
            _ => {}
        }
    }
    materials.extend(current);
    Ok(materials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_is_triangulated_and_deduplicated() {
        let text = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let obj = parse_obj(text, "quad", "test").unwrap();
        assert_eq!(obj.geometries.len(), 1);

        let geometry = &obj.geometries[0];
        assert_eq!(geometry.name, "quad");
        assert_eq!(geometry.vertex_count, 4);
        assert_eq!(geometry.indices, vec![0, 1, 2, 0, 2, 3]);

        let vertices = geometry.vertices_3d().unwrap();
        assert_eq!(vertices[0].normal, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_negative_indices() {
        let text = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\n";
        let obj = parse_obj(text, "tri", "test").unwrap();
        assert_eq!(obj.geometries[0].indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let text = "v 0 0 0\nv 1 0 0\nf 1 2 3\n";
        assert!(matches!(
            parse_obj(text, "bad", "test"),
            Err(AssetError::Parse { line: 3, .. })
        ));
    }

    #[test]
    fn test_groups_split_by_material() {
        let text = "\
mtllib scene.mtl
v 0 0 0
v 1 0 0
v 0 1 0
vt 0 0
vn 0 0 1
o body
usemtl red
f 1/1/1 2/1/1 3/1/1
usemtl blue
f 3//1 2//1 1//1
";
        let obj = parse_obj(text, "scene", "test").unwrap();
        assert_eq!(obj.material_libraries, vec!["scene.mtl".to_string()]);
        assert_eq!(obj.geometries.len(), 2);
        assert_eq!(obj.geometries[0].name, "body");
        assert_eq!(obj.geometries[0].material_name.as_deref(), Some("red"));
        assert_eq!(obj.geometries[1].name, "body_1");
        assert_eq!(obj.geometries[1].material_name.as_deref(), Some("blue"));
    }

    #[test]
    fn test_deduplicate_keeps_first_occurrence_order() {
        let a = Vertex3D::new(Vec3::new(0.0, 0.0, 0.0), Vec3::z(), Vec2::zeros());
        let b = Vertex3D::new(Vec3::new(1.0, 0.0, 0.0), Vec3::z(), Vec2::zeros());
        let (unique, indices) = deduplicate_vertices(&[b, a, b, a], &[0, 1, 2, 3, 2]);
        assert_eq!(unique, vec![b, a]);
        assert_eq!(indices, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_parse_mtl() {
        let text = "\
# exported
newmtl red
Kd 1.0 0.0 0.0
d 0.5
newmtl textured
Kd 1 1 1
map_Kd -s 1 1 1 textures/brick_wall.png
";
        let materials = parse_mtl(text, "test").unwrap();
        assert_eq!(materials.len(), 2);
        assert_eq!(materials[0].name, "red");
        assert_eq!(materials[0].diffuse_colour, Vec4::new(1.0, 0.0, 0.0, 0.5));
        assert_eq!(materials[1].diffuse_map_name.as_deref(), Some("brick_wall"));
    }
}

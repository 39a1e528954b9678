//! Geometry system
//!
//! Uploads vertex/index data through the backend and hands out reference
//! counted [`GeometryId`]s. Also generates the primitive shapes the engine
//! uses itself (planes for UI and floors, cubes for the skybox).

use super::material::{MaterialContext, MaterialSystem};
use crate::foundation::math::{Vec2, Vec3};
use crate::render::backend::GeometryHandle;
use crate::render::types::{Extents3D, GeometryConfig, GeometryId, MaterialId, Vertex2D, Vertex3D};
use crate::render::{RenderError, RenderResult};

/// Name of the default 3D geometry
pub const DEFAULT_GEOMETRY_NAME: &str = "default";

/// Name of the default 2D geometry
pub const DEFAULT_GEOMETRY_2D_NAME: &str = "default_2d";

/// Uploaded geometry
#[derive(Debug, Clone)]
pub struct Geometry {
    /// Slot id
    pub id: GeometryId,
    /// Name
    pub name: String,
    /// Bumped on upload
    pub generation: u32,
    /// Backend handle
    pub internal: Option<GeometryHandle>,
    /// Material drawn with this geometry
    pub material: MaterialId,
    /// Bounds centre, object space
    pub center: Vec3,
    /// Bounds, object space
    pub extents: Extents3D,
}

#[derive(Debug)]
struct GeometrySlot {
    geometry: Geometry,
    reference_count: u64,
    auto_release: bool,
    material_name: Option<String>,
}

/// Reference-counted geometry table
pub struct GeometrySystem {
    slots: Vec<Option<GeometrySlot>>,
    default_geometry: GeometryId,
    default_geometry_2d: GeometryId,
}

impl GeometrySystem {
    /// Create the system with the default 3D and 2D quads in slots 0 and 1
    pub fn new(ctx: &mut MaterialContext<'_>, materials: &mut MaterialSystem, max_geometries: u32) -> RenderResult<Self> {
        if max_geometries < 3 {
            return Err(RenderError::InitializationFailed(
                "geometry system needs room for the default geometries".to_string(),
            ));
        }
        let mut system = Self {
            slots: (0..max_geometries).map(|_| None).collect(),
            default_geometry: GeometryId(0),
            default_geometry_2d: GeometryId(1),
        };

        let default_3d = plane(10.0, 10.0, 1, 1, 1.0, 1.0, DEFAULT_GEOMETRY_NAME, None);
        let material = materials.default_material();
        system.slots[0] = Some(upload(ctx, GeometryId(0), &default_3d, material, None, false)?);

        let default_2d = quad_2d(DEFAULT_GEOMETRY_2D_NAME, Vec2::new(100.0, 100.0), None);
        let ui_material = materials.ui_default(ctx);
        system.slots[1] = Some(upload(ctx, GeometryId(1), &default_2d, ui_material, None, false)?);

        log::info!("[GEOMETRY] Geometry system ready ({} slots)", max_geometries);
        Ok(system)
    }

    /// Default 3D geometry
    pub fn default_geometry(&self) -> GeometryId {
        self.default_geometry
    }

    /// Default 2D geometry
    pub fn default_geometry_2d(&self) -> GeometryId {
        self.default_geometry_2d
    }

    /// Upload a geometry and acquire its material. The new geometry starts
    /// with one reference.
    pub fn acquire_from_config(
        &mut self,
        ctx: &mut MaterialContext<'_>,
        materials: &mut MaterialSystem,
        config: &GeometryConfig,
        auto_release: bool,
    ) -> RenderResult<GeometryId> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| RenderError::ResourceCreationFailed(format!("no free geometry slot for '{}'", config.name)))?;
        let id = GeometryId(index as u32);

        let material = match &config.material_name {
            Some(name) if !name.is_empty() => materials.acquire(ctx, name),
            _ => materials.default_material(),
        };
        match upload(ctx, id, config, material, config.material_name.clone(), auto_release) {
            Ok(slot) => {
                self.slots[index] = Some(slot);
                Ok(id)
            }
            Err(e) => {
                if let Some(name) = &config.material_name {
                    materials.release(ctx, name);
                }
                Err(e)
            }
        }
    }

    /// Add a reference to a live geometry
    pub fn acquire_by_id(&mut self, id: GeometryId) -> Option<GeometryId> {
        let slot = self.slots.get_mut(id.index()).and_then(Option::as_mut)?;
        slot.reference_count += 1;
        Some(id)
    }

    /// Drop a reference. At zero an auto-release geometry frees its buffer
    /// regions and releases its material.
    pub fn release(&mut self, ctx: &mut MaterialContext<'_>, materials: &mut MaterialSystem, id: GeometryId) {
        if id == self.default_geometry || id == self.default_geometry_2d {
            return;
        }
        let Some(slot) = self.slots.get_mut(id.index()).and_then(Option::as_mut) else {
            log::warn!("[GEOMETRY] Release of unknown geometry #{}", id.0);
            return;
        };
        slot.reference_count = slot.reference_count.saturating_sub(1);
        if slot.reference_count > 0 || !slot.auto_release {
            return;
        }
        if let Some(slot) = self.slots[id.index()].take() {
            destroy_slot(ctx, materials, slot);
        }
    }

    /// Geometry in slot `id`
    pub fn get(&self, id: GeometryId) -> Option<&Geometry> {
        self.slots.get(id.index()).and_then(Option::as_ref).map(|slot| &slot.geometry)
    }

    /// Current reference count of a geometry
    pub fn reference_count(&self, id: GeometryId) -> Option<u64> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .map(|slot| slot.reference_count)
    }

    /// Destroy every geometry, defaults included
    pub fn shutdown(&mut self, ctx: &mut MaterialContext<'_>, materials: &mut MaterialSystem) {
        for slot in self.slots.iter_mut().filter_map(Option::take) {
            destroy_slot(ctx, materials, slot);
        }
    }
}

fn upload(
    ctx: &mut MaterialContext<'_>,
    id: GeometryId,
    config: &GeometryConfig,
    material: MaterialId,
    material_name: Option<String>,
    auto_release: bool,
) -> RenderResult<GeometrySlot> {
    let handle = ctx.backend.geometry_create(config)?;
    log::debug!(
        "[GEOMETRY] '{}' uploaded: {} vertices, {} indices",
        config.name,
        config.vertex_count,
        config.indices.len()
    );
    Ok(GeometrySlot {
        geometry: Geometry {
            id,
            name: config.name.clone(),
            generation: 0,
            internal: Some(handle),
            material,
            center: config.center,
            extents: config.extents,
        },
        reference_count: 1,
        auto_release,
        material_name,
    })
}

fn destroy_slot(ctx: &mut MaterialContext<'_>, materials: &mut MaterialSystem, slot: GeometrySlot) {
    if let Some(handle) = slot.geometry.internal {
        ctx.backend.geometry_destroy(handle);
    }
    if let Some(name) = &slot.material_name {
        materials.release(ctx, name);
    }
    log::debug!("[GEOMETRY] Destroyed '{}'", slot.geometry.name);
}

/// XY plane facing +Z, centred on the origin.
///
/// Zero dimensions or segment counts are clamped to one; zero tiling to one.
#[allow(clippy::too_many_arguments)]
pub fn plane(
    width: f32,
    height: f32,
    x_segments: u32,
    y_segments: u32,
    tile_x: f32,
    tile_y: f32,
    name: &str,
    material_name: Option<String>,
) -> GeometryConfig {
    let width = if width == 0.0 { 1.0 } else { width };
    let height = if height == 0.0 { 1.0 } else { height };
    let x_segments = x_segments.max(1);
    let y_segments = y_segments.max(1);
    let tile_x = if tile_x == 0.0 { 1.0 } else { tile_x };
    let tile_y = if tile_y == 0.0 { 1.0 } else { tile_y };

    let seg_width = width / x_segments as f32;
    let seg_height = height / y_segments as f32;
    let half_width = width * 0.5;
    let half_height = height * 0.5;

    let mut vertices = Vec::with_capacity((x_segments * y_segments * 4) as usize);
    let mut indices = Vec::with_capacity((x_segments * y_segments * 6) as usize);
    for y in 0..y_segments {
        for x in 0..x_segments {
            let min_x = x as f32 * seg_width - half_width;
            let min_y = y as f32 * seg_height - half_height;
            let max_x = min_x + seg_width;
            let max_y = min_y + seg_height;
            let min_u = x as f32 / x_segments as f32 * tile_x;
            let min_v = y as f32 / y_segments as f32 * tile_y;
            let max_u = (x + 1) as f32 / x_segments as f32 * tile_x;
            let max_v = (y + 1) as f32 / y_segments as f32 * tile_y;

            let base = vertices.len() as u32;
            vertices.push(Vertex3D::new(Vec3::new(min_x, min_y, 0.0), Vec3::z(), Vec2::new(min_u, min_v)));
            vertices.push(Vertex3D::new(Vec3::new(max_x, max_y, 0.0), Vec3::z(), Vec2::new(max_u, max_v)));
            vertices.push(Vertex3D::new(Vec3::new(min_x, max_y, 0.0), Vec3::z(), Vec2::new(min_u, max_v)));
            vertices.push(Vertex3D::new(Vec3::new(max_x, min_y, 0.0), Vec3::z(), Vec2::new(max_u, min_v)));
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 3, base + 1]);
        }
    }
    GeometryConfig::from_vertices_3d(name, &vertices, indices, material_name)
}

/// Axis-aligned box centred on the origin, 24 vertices with per-face normals
pub fn cube(
    width: f32,
    height: f32,
    depth: f32,
    tile_x: f32,
    tile_y: f32,
    name: &str,
    material_name: Option<String>,
) -> GeometryConfig {
    let hw = if width == 0.0 { 0.5 } else { width * 0.5 };
    let hh = if height == 0.0 { 0.5 } else { height * 0.5 };
    let hd = if depth == 0.0 { 0.5 } else { depth * 0.5 };
    let tile_x = if tile_x == 0.0 { 1.0 } else { tile_x };
    let tile_y = if tile_y == 0.0 { 1.0 } else { tile_y };

    // (normal, u axis, v axis) per face
    let faces = [
        (Vec3::z(), Vec3::x(), Vec3::y()),
        (-Vec3::z(), -Vec3::x(), Vec3::y()),
        (Vec3::x(), -Vec3::z(), Vec3::y()),
        (-Vec3::x(), Vec3::z(), Vec3::y()),
        (Vec3::y(), Vec3::x(), -Vec3::z()),
        (-Vec3::y(), Vec3::x(), Vec3::z()),
    ];
    let half = Vec3::new(hw, hh, hd);

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u_axis, v_axis) in faces {
        let base = vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = (normal + u_axis * su + v_axis * sv).component_mul(&half);
            let texcoord = Vec2::new((su + 1.0) * 0.5 * tile_x, (1.0 - sv) * 0.5 * tile_y);
            vertices.push(Vertex3D::new(position, normal, texcoord));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    GeometryConfig::from_vertices_3d(name, &vertices, indices, material_name)
}

/// Screen-space quad from the origin to `size`
pub fn quad_2d(name: &str, size: Vec2, material_name: Option<String>) -> GeometryConfig {
    let vertices = [
        Vertex2D::new(Vec2::new(0.0, 0.0), Vec2::new(0.0, 0.0)),
        Vertex2D::new(Vec2::new(size.x, size.y), Vec2::new(1.0, 1.0)),
        Vertex2D::new(Vec2::new(0.0, size.y), Vec2::new(0.0, 1.0)),
        Vertex2D::new(Vec2::new(size.x, 0.0), Vec2::new(1.0, 0.0)),
    ];
    GeometryConfig::from_vertices_2d(name, &vertices, vec![0, 1, 2, 0, 3, 1], material_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::RendererBackend;
    use crate::render::null::NullBackend;
    use crate::render::shader::ShaderLimits;
    use crate::render::systems::shader::ShaderSystem;
    use crate::render::systems::texture::TextureSystem;
    use crate::render::types::{RenderPassClearFlags, RenderPassConfig};
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;
    use std::path::PathBuf;

    #[test]
    fn test_plane_counts_and_bounds() {
        let config = plane(4.0, 2.0, 2, 3, 1.0, 1.0, "floor", None);
        assert_eq!(config.vertex_count, 2 * 3 * 4);
        assert_eq!(config.indices.len(), 2 * 3 * 6);
        assert_relative_eq!(config.extents.min, Vec3::new(-2.0, -1.0, 0.0));
        assert_relative_eq!(config.extents.max, Vec3::new(2.0, 1.0, 0.0));
        assert_relative_eq!(config.center, Vec3::zeros());
    }

    #[test]
    fn test_plane_clamps_degenerate_input() {
        let config = plane(0.0, 0.0, 0, 0, 0.0, 0.0, "degenerate", None);
        assert_eq!(config.vertex_count, 4);
        assert_relative_eq!(config.extents.max, Vec3::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn test_cube_normals_point_outward() {
        let config = cube(2.0, 2.0, 2.0, 1.0, 1.0, "box", None);
        assert_eq!(config.vertex_count, 24);
        assert_eq!(config.indices.len(), 36);
        for vertex in config.vertices_3d().unwrap() {
            let position = Vec3::from(vertex.position);
            let normal = Vec3::from(vertex.normal);
            assert_relative_eq!(position.dot(&normal), 1.0);
        }
        assert_relative_eq!(config.extents.min, Vec3::repeat(-1.0));
    }

    fn fixture() -> (NullBackend, TextureSystem, ShaderSystem) {
        let mut backend = NullBackend::new(800, 600);
        for name in ["Renderpass.Builtin.World", "Renderpass.Builtin.UI", "Renderpass.Builtin.Skybox"] {
            backend
                .renderpass_create(&RenderPassConfig {
                    name: name.to_string(),
                    prev_name: None,
                    next_name: None,
                    render_area: Vec4::new(0.0, 0.0, 800.0, 600.0),
                    clear_colour: Vec4::zeros(),
                    clear_flags: RenderPassClearFlags::empty(),
                })
                .unwrap();
        }
        let textures = TextureSystem::new(&mut backend, 8, PathBuf::new()).unwrap();
        let mut shaders = ShaderSystem::new(4, 8, ShaderLimits::default(), PathBuf::new());
        shaders.create_builtins(&mut backend).unwrap();
        (backend, textures, shaders)
    }

    #[test]
    fn test_release_frees_backend_geometry() {
        let (mut backend, mut textures, mut shaders) = fixture();
        let mut ctx = MaterialContext {
            backend: &mut backend,
            textures: &mut textures,
            shaders: &mut shaders,
        };
        let mut materials = MaterialSystem::new(&mut ctx, 8, PathBuf::new()).unwrap();
        let mut geometries = GeometrySystem::new(&mut ctx, &mut materials, 8).unwrap();

        let config = cube(1.0, 1.0, 1.0, 1.0, 1.0, "box", None);
        let id = geometries
            .acquire_from_config(&mut ctx, &mut materials, &config, true)
            .unwrap();
        assert_eq!(geometries.acquire_by_id(id), Some(id));
        assert_eq!(geometries.reference_count(id), Some(2));

        geometries.release(&mut ctx, &mut materials, id);
        assert!(geometries.get(id).is_some());
        geometries.release(&mut ctx, &mut materials, id);
        assert!(geometries.get(id).is_none());
        drop(ctx);
        assert_eq!(backend.live_objects().1, 2);
    }

    #[test]
    fn test_defaults_survive_release() {
        let (mut backend, mut textures, mut shaders) = fixture();
        let mut ctx = MaterialContext {
            backend: &mut backend,
            textures: &mut textures,
            shaders: &mut shaders,
        };
        let mut materials = MaterialSystem::new(&mut ctx, 8, PathBuf::new()).unwrap();
        let mut geometries = GeometrySystem::new(&mut ctx, &mut materials, 8).unwrap();
        let id = geometries.default_geometry();
        geometries.release(&mut ctx, &mut materials, id);
        assert!(geometries.get(id).is_some());
        assert_eq!(geometries.get(id).unwrap().material, materials.default_material());
    }
}

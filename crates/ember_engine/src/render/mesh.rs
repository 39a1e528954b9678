//! Meshes: named groups of geometry placed with one transform

use super::backend::RendererBackend;
use super::packet::GeometryRenderData;
use super::systems::RenderResources;
use super::types::{GeometryId, INVALID_ID};
use super::RenderResult;
use crate::assets::MeshData;
use crate::foundation::math::Transform;

/// A drawable group of geometries
#[derive(Debug, Clone)]
pub struct Mesh {
    /// Mesh (asset) name
    pub name: String,
    /// World placement
    pub transform: Transform,
    /// Uploaded geometries
    pub geometries: Vec<GeometryId>,
    /// `INVALID_ID` until the geometry is uploaded
    pub generation: u32,
}

impl Mesh {
    /// Empty mesh waiting for its geometry
    pub fn new(name: impl Into<String>, transform: Transform) -> Self {
        Self {
            name: name.into(),
            transform,
            geometries: Vec::new(),
            generation: INVALID_ID,
        }
    }

    /// Whether the mesh has geometry to draw
    pub fn is_loaded(&self) -> bool {
        self.generation != INVALID_ID
    }

    /// Mesh built from geometries that already exist
    pub fn with_geometries(name: impl Into<String>, transform: Transform, geometries: Vec<GeometryId>) -> Self {
        Self {
            name: name.into(),
            transform,
            geometries,
            generation: 0,
        }
    }

    /// Upload every geometry in `data`, replacing any previous upload.
    ///
    /// A geometry that fails to upload is skipped with an error log; the
    /// mesh counts as loaded if at least one geometry made it.
    pub fn upload(
        &mut self,
        resources: &mut RenderResources,
        backend: &mut dyn RendererBackend,
        data: &MeshData,
    ) -> RenderResult<()> {
        self.unload(resources, backend);
        let (mut ctx, materials, geometries) = resources.split(backend);
        for config in &data.geometries {
            match geometries.acquire_from_config(&mut ctx, materials, config, true) {
                Ok(id) => self.geometries.push(id),
                Err(e) => log::error!("[MESH] '{}': geometry '{}' failed: {}", self.name, config.name, e),
            }
        }
        if self.geometries.is_empty() && !data.geometries.is_empty() {
            return Err(super::RenderError::ResourceCreationFailed(format!(
                "mesh '{}' has no usable geometry",
                self.name
            )));
        }
        self.generation = if self.generation == INVALID_ID {
            0
        } else {
            self.generation.wrapping_add(1)
        };
        log::info!("[MESH] '{}' loaded with {} geometries", self.name, self.geometries.len());
        Ok(())
    }

    /// Release the mesh's geometry
    pub fn unload(&mut self, resources: &mut RenderResources, backend: &mut dyn RendererBackend) {
        let (mut ctx, materials, geometries) = resources.split(backend);
        for id in self.geometries.drain(..) {
            geometries.release(&mut ctx, materials, id);
        }
    }

    /// Draw entries for every geometry of the mesh
    pub fn render_data(&self) -> impl Iterator<Item = GeometryRenderData> + '_ {
        let model = self.transform.to_matrix();
        self.geometries
            .iter()
            .map(move |geometry| GeometryRenderData::new(*geometry, model))
    }
}

//! Render views
//!
//! A view turns scene data into a [`RenderViewPacket`] and later renders that
//! packet inside its render pass. Views are trait objects registered by name
//! in a [`RenderViewSystem`].

pub mod skybox;
pub mod ui;
pub mod world;

pub use skybox::SkyboxView;
pub use ui::UiView;
pub use world::WorldView;

use super::backend::RendererBackend;
use super::camera::Camera;
use super::frontend::FrameContext;
use super::mesh::Mesh;
use super::packet::{GeometryRenderData, RenderViewPacket, SkyboxRenderData};
use super::systems::{MaterialSystem, RenderResources};
use super::{RenderError, RenderResult};
use std::collections::HashMap;

/// Scene data a view builds its packet from
#[derive(Debug, Clone, Copy)]
pub enum PacketData<'a> {
    /// Meshes seen through a perspective camera
    World {
        /// Meshes to draw
        meshes: &'a [Mesh],
        /// Camera
        camera: &'a Camera,
    },
    /// Screen-space meshes
    Ui {
        /// Meshes to draw
        meshes: &'a [Mesh],
    },
    /// A skybox around the camera
    Skybox {
        /// Skybox resources
        skybox: &'a SkyboxRenderData,
        /// Camera
        camera: &'a Camera,
    },
}

/// A render view
pub trait RenderView {
    /// Unique view name, matched against packet view names
    fn name(&self) -> &str;

    /// Called once when the view is registered
    fn on_create(&mut self, _resources: &mut RenderResources, _backend: &mut dyn RendererBackend) -> RenderResult<()> {
        Ok(())
    }

    /// Called once when the view system shuts down
    fn on_destroy(&mut self, _resources: &mut RenderResources, _backend: &mut dyn RendererBackend) {}

    /// The framebuffer changed size
    fn on_resize(&mut self, width: u32, height: u32);

    /// Build this frame's packet
    fn on_build_packet(&self, resources: &RenderResources, data: &PacketData<'_>) -> RenderResult<RenderViewPacket>;

    /// Release a packet after it was rendered
    fn on_destroy_packet(&self, packet: RenderViewPacket) {
        drop(packet);
    }

    /// Record the packet's draws
    fn on_render(
        &mut self,
        packet: &RenderViewPacket,
        frame: &mut FrameContext<'_>,
        resources: &mut RenderResources,
    ) -> RenderResult<()>;
}

/// Registered views by name
#[derive(Default)]
pub struct RenderViewSystem {
    views: Vec<Box<dyn RenderView>>,
    lookup: HashMap<String, usize>,
}

impl RenderViewSystem {
    /// No views
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and create a view. Names must be unique.
    pub fn register(
        &mut self,
        mut view: Box<dyn RenderView>,
        resources: &mut RenderResources,
        backend: &mut dyn RendererBackend,
    ) -> RenderResult<()> {
        let name = view.name().to_string();
        if self.lookup.contains_key(&name) {
            return Err(RenderError::InitializationFailed(format!("render view '{name}' already registered")));
        }
        view.on_create(resources, backend)?;
        self.lookup.insert(name.clone(), self.views.len());
        self.views.push(view);
        log::info!("[VIEWS] Registered '{}'", name);
        Ok(())
    }

    /// View by name
    pub fn get(&self, name: &str) -> Option<&dyn RenderView> {
        self.lookup.get(name).map(|&index| self.views[index].as_ref())
    }

    fn get_mut(&mut self, name: &str) -> RenderResult<&mut Box<dyn RenderView>> {
        let index = *self
            .lookup
            .get(name)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("render view '{name}'")))?;
        Ok(&mut self.views[index])
    }

    /// Number of registered views
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Whether no view is registered
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Build a packet with the named view
    pub fn build_packet(
        &self,
        name: &str,
        resources: &RenderResources,
        data: &PacketData<'_>,
    ) -> RenderResult<RenderViewPacket> {
        self.get(name)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("render view '{name}'")))?
            .on_build_packet(resources, data)
    }

    /// Render a packet with the view that built it
    pub fn render(
        &mut self,
        packet: &RenderViewPacket,
        frame: &mut FrameContext<'_>,
        resources: &mut RenderResources,
    ) -> RenderResult<()> {
        self.get_mut(&packet.view_name)?.on_render(packet, frame, resources)
    }

    /// Hand a rendered packet back to its view
    pub fn destroy_packet(&self, packet: RenderViewPacket) {
        match self.get(&packet.view_name) {
            Some(view) => view.on_destroy_packet(packet),
            None => drop(packet),
        }
    }

    /// Forward a framebuffer size change to every view
    pub fn on_resize(&mut self, width: u32, height: u32) {
        for view in &mut self.views {
            view.on_resize(width, height);
        }
    }

    /// Destroy every view
    pub fn shutdown(&mut self, resources: &mut RenderResources, backend: &mut dyn RendererBackend) {
        for view in &mut self.views {
            view.on_destroy(resources, backend);
        }
        self.views.clear();
        self.lookup.clear();
    }
}

/// Draw material-backed geometry with whatever shader each material uses,
/// switching shaders and uploading their globals as needed
pub(crate) fn draw_material_geometries(
    packet: &RenderViewPacket,
    frame: &mut FrameContext<'_>,
    resources: &mut RenderResources,
) -> RenderResult<()> {
    let mut current_shader = None;
    for draw in &packet.geometries {
        let Some(geometry) = resources.geometries.get(draw.geometry) else {
            log::warn!("[VIEWS] Skipping unknown geometry #{}", draw.geometry.0);
            continue;
        };
        let Some(handle) = geometry.internal else {
            continue;
        };
        let material_id = geometry.material;
        let shader_id = resources.materials.get_or_default(material_id)?.shader_id;

        if current_shader != Some(shader_id) {
            resources.shaders.use_shader(frame.backend, shader_id)?;
            MaterialSystem::apply_global(
                frame.backend,
                &mut resources.shaders,
                shader_id,
                &packet.projection,
                &packet.view,
                &packet.ambient_colour,
                frame.frame_number,
            )?;
            current_shader = Some(shader_id);
        }

        let needs_update = resources.materials.mark_rendered(material_id, frame.frame_number);
        resources.materials.apply_instance(
            frame.backend,
            &mut resources.shaders,
            &resources.textures,
            material_id,
            needs_update,
        )?;
        resources
            .materials
            .apply_local(frame.backend, &mut resources.shaders, material_id, &draw.model)?;
        frame.backend.geometry_draw(handle)?;
    }
    Ok(())
}

/// Draw entries for every loaded mesh
pub(crate) fn mesh_draws(meshes: &[Mesh]) -> impl Iterator<Item = GeometryRenderData> + '_ {
    meshes
        .iter()
        .filter(|mesh| mesh.is_loaded())
        .flat_map(Mesh::render_data)
}

//! Skybox view and skybox resources

use super::{PacketData, RenderView};
use crate::core::RendererConfig;
use crate::foundation::math::{deg_to_rad, perspective, Mat4};
use crate::render::backend::{RendererBackend, UniformValue};
use crate::render::frontend::{FrameContext, BUILTIN_SKYBOX_PASS};
use crate::render::packet::{RenderViewPacket, SkyboxRenderData};
use crate::render::systems::{geometry, RenderResources, BUILTIN_SKYBOX_SHADER};
use crate::render::types::ShaderId;
use crate::render::{RenderError, RenderResult};

/// Acquire the cube texture, cube geometry and shader instance of a skybox
pub fn create_skybox(
    resources: &mut RenderResources,
    backend: &mut dyn RendererBackend,
    cubemap_name: &str,
) -> RenderResult<SkyboxRenderData> {
    let shader_id = skybox_shader(resources)?;
    let cubemap = resources.textures.acquire_cube(cubemap_name, true);
    let config = geometry::cube(10.0, 10.0, 10.0, 1.0, 1.0, &format!("{cubemap_name}_skybox"), None);
    let (mut ctx, materials, geometries) = resources.split(backend);
    let geometry = geometries.acquire_from_config(&mut ctx, materials, &config, true)?;

    let seed = resources.textures.bound(cubemap)?;
    let instance_id = resources
        .shaders
        .acquire_instance_resources(backend, shader_id, &[seed])?;
    log::info!("[SKYBOX] Created '{}'", cubemap_name);
    Ok(SkyboxRenderData {
        cubemap,
        geometry,
        instance_id,
    })
}

/// Release everything [`create_skybox`] acquired
pub fn destroy_skybox(resources: &mut RenderResources, backend: &mut dyn RendererBackend, skybox: &SkyboxRenderData) {
    if let Ok(shader_id) = skybox_shader(resources) {
        if let Err(e) = resources
            .shaders
            .release_instance_resources(backend, shader_id, skybox.instance_id)
        {
            log::warn!("[SKYBOX] {}", e);
        }
    }
    let (mut ctx, materials, geometries) = resources.split(backend);
    geometries.release(&mut ctx, materials, skybox.geometry);
    let name = resources.textures.get(skybox.cubemap).map(|texture| texture.name.clone());
    if let Some(name) = name {
        resources.textures.release(backend, &name);
    }
}

fn skybox_shader(resources: &RenderResources) -> RenderResult<ShaderId> {
    resources
        .shaders
        .get_id(BUILTIN_SKYBOX_SHADER)
        .ok_or_else(|| RenderError::ResourceNotFound(format!("shader '{BUILTIN_SKYBOX_SHADER}'")))
}

/// Cube-mapped background drawn before the world
#[derive(Debug, Clone)]
pub struct SkyboxView {
    name: String,
    fov_radians: f32,
    near_clip: f32,
    far_clip: f32,
    projection: Mat4,
    render_frame_number: u64,
}

impl SkyboxView {
    /// View named `name` with the renderer's projection settings
    pub fn new(name: impl Into<String>, config: &RendererConfig, width: u32, height: u32) -> Self {
        let mut view = Self {
            name: name.into(),
            fov_radians: deg_to_rad(config.field_of_view),
            near_clip: config.near_clip,
            far_clip: config.far_clip,
            projection: Mat4::identity(),
            render_frame_number: u64::MAX,
        };
        view.on_resize(width, height);
        view
    }
}

impl RenderView for SkyboxView {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let aspect = width as f32 / height as f32;
        self.projection = perspective(self.fov_radians, aspect, self.near_clip, self.far_clip);
    }

    fn on_build_packet(&self, _resources: &RenderResources, data: &PacketData<'_>) -> RenderResult<RenderViewPacket> {
        let PacketData::Skybox { skybox, camera } = data else {
            return Err(RenderError::RenderingFailed(format!(
                "view '{}' expects skybox packet data",
                self.name
            )));
        };
        let mut packet = RenderViewPacket::new(self.name.clone(), self.projection, camera.rotation_only_view());
        packet.view_position = camera.position();
        packet.skybox = Some(**skybox);
        Ok(packet)
    }

    fn on_render(
        &mut self,
        packet: &RenderViewPacket,
        frame: &mut FrameContext<'_>,
        resources: &mut RenderResources,
    ) -> RenderResult<()> {
        frame.begin_pass(BUILTIN_SKYBOX_PASS)?;
        if let Some(skybox) = &packet.skybox {
            self.draw(packet, skybox, frame, resources)?;
        }
        frame.end_pass(BUILTIN_SKYBOX_PASS)
    }
}

impl SkyboxView {
    fn draw(
        &mut self,
        packet: &RenderViewPacket,
        skybox: &SkyboxRenderData,
        frame: &mut FrameContext<'_>,
        resources: &mut RenderResources,
    ) -> RenderResult<()> {
        // Nothing to sample until the six faces are uploaded
        if !resources.textures.get(skybox.cubemap).is_some_and(|texture| texture.is_loaded()) {
            return Ok(());
        }
        let Some(handle) = resources.geometries.get(skybox.geometry).and_then(|geometry| geometry.internal) else {
            return Ok(());
        };
        let shader_id = skybox_shader(resources)?;
        let shaders = &mut resources.shaders;

        shaders.use_shader(frame.backend, shader_id)?;
        shaders.bind_globals(frame.backend, shader_id)?;
        shaders.set_uniform(
            frame.backend,
            shader_id,
            "projection",
            UniformValue::Bytes(bytemuck::cast_slice(packet.projection.as_slice())),
        )?;
        shaders.set_uniform(
            frame.backend,
            shader_id,
            "view",
            UniformValue::Bytes(bytemuck::cast_slice(packet.view.as_slice())),
        )?;
        shaders.apply_globals(frame.backend, shader_id)?;

        let needs_update = self.render_frame_number != frame.frame_number;
        shaders.bind_instance(frame.backend, shader_id, skybox.instance_id)?;
        if needs_update {
            let texture = resources.textures.bound(skybox.cubemap)?;
            shaders.set_sampler(frame.backend, shader_id, "cube_texture", texture)?;
        }
        shaders.apply_instance(frame.backend, shader_id, needs_update)?;
        self.render_frame_number = frame.frame_number;

        frame.backend.geometry_draw(handle)
    }
}

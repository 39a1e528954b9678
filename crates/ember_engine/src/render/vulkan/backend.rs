//! Vulkan implementation of [`RendererBackend`]
//!
//! Frame pacing uses one `image_available` semaphore and one fence per frame
//! in flight, and one `render_complete` semaphore and command buffer per
//! swapchain image. `images_in_flight` remembers which frame last used an
//! image so a frame never records into an image the GPU still reads.

use super::buffer::VulkanBuffer;
use super::commands::CommandBuffer;
use super::context::{SurfaceProvider, VulkanInstance, VulkanSurface};
use super::device::{DeviceRequirements, VulkanDevice};
use super::image::VulkanTexture;
use super::render_pass::{VulkanRenderPass, VulkanRenderTarget};
use super::shader::VulkanShader;
use super::swapchain::VulkanSwapchain;
use super::sync::{Fence, Semaphore};
use super::{VulkanError, VulkanResult};
use crate::core::config::RendererConfig;
use crate::foundation::freelist::FreeList;
use crate::foundation::math::Vec4;
use crate::render::backend::{
    BoundTexture, GeometryHandle, RenderPassId, RenderTargetAttachment, RenderTargetId, RendererBackend,
    ShaderHandle, TextureDesc, TextureHandle, UniformValue,
};
use crate::render::shader::{Shader, ShaderState, ShaderUniform};
use crate::render::types::{GeometryConfig, RenderPassConfig, ShaderScope, TextureFlags};
use crate::render::{RenderError, RenderResult};
use ash::vk;
use slotmap::SlotMap;
use std::any::Any;

#[derive(Debug, Clone, Copy)]
struct VulkanGeometry {
    vertex_offset: u64,
    vertex_bytes: u64,
    vertex_count: u32,
    index_offset: u64,
    index_count: u32,
}

impl VulkanGeometry {
    fn index_bytes(&self) -> u64 {
        u64::from(self.index_count) * std::mem::size_of::<u32>() as u64
    }
}

/// Per-image and per-frame command buffers and sync objects
struct FrameResources {
    command_buffers: Vec<CommandBuffer>,
    image_available: Vec<Semaphore>,
    render_complete: Vec<Semaphore>,
    in_flight: Vec<Fence>,
    images_in_flight: Vec<Option<usize>>,
}

impl FrameResources {
    fn new(device: &VulkanDevice, image_count: usize, frames_in_flight: usize) -> VulkanResult<Self> {
        let raw = &device.device;
        let command_buffers = (0..image_count)
            .map(|_| CommandBuffer::allocate(raw, device.graphics_command_pool))
            .collect::<VulkanResult<Vec<_>>>()?;
        let render_complete = (0..image_count)
            .map(|_| Semaphore::new(raw))
            .collect::<VulkanResult<Vec<_>>>()?;
        let image_available = (0..frames_in_flight)
            .map(|_| Semaphore::new(raw))
            .collect::<VulkanResult<Vec<_>>>()?;
        // Signalled so the first wait on each frame returns at once
        let in_flight = (0..frames_in_flight)
            .map(|_| Fence::new(raw, true))
            .collect::<VulkanResult<Vec<_>>>()?;
        log::debug!(
            "[VULKAN] Frame resources: {} images, {} frames in flight",
            image_count,
            frames_in_flight
        );
        Ok(Self {
            command_buffers,
            image_available,
            render_complete,
            in_flight,
            images_in_flight: vec![None; image_count],
        })
    }
}

/// Renderer backend on a Vulkan device and window surface.
///
/// Fields drop in declaration order: resources, then frame objects, the
/// swapchain, the device, the surface and finally the instance.
pub struct VulkanBackend {
    shaders: SlotMap<ShaderHandle, VulkanShader>,
    geometries: SlotMap<GeometryHandle, VulkanGeometry>,
    textures: SlotMap<TextureHandle, VulkanTexture>,
    targets: SlotMap<RenderTargetId, VulkanRenderTarget>,
    passes: SlotMap<RenderPassId, VulkanRenderPass>,
    vertex_buffer: VulkanBuffer,
    index_buffer: VulkanBuffer,
    vertex_space: FreeList,
    index_space: FreeList,
    frames: FrameResources,
    swapchain: VulkanSwapchain,
    device: VulkanDevice,
    surface: VulkanSurface,
    _instance: VulkanInstance,
    width: u32,
    height: u32,
    image_index: usize,
    current_frame: usize,
    frame_active: bool,
    active_pass: Option<RenderPassId>,
    bound_shader: Option<ShaderHandle>,
    refresh_requested: bool,
}

impl VulkanBackend {
    /// Bring up instance, surface, device, swapchain and the shared geometry
    /// buffers for the window behind `provider`
    pub fn new(provider: &mut dyn SurfaceProvider, config: &RendererConfig) -> RenderResult<Self> {
        log::info!("[VULKAN] Initializing backend for '{}'", config.application_name);
        let instance = VulkanInstance::new(&*provider, &config.application_name, config.validation_enabled())?;
        let surface = VulkanSurface::new(&instance, provider)?;
        let requirements = DeviceRequirements {
            discrete_gpu: config.require_discrete_gpu,
            ..DeviceRequirements::default()
        };
        let device = VulkanDevice::new(&instance, &surface, &requirements)?;

        let (width, height) = provider.framebuffer_size();
        let swapchain = VulkanSwapchain::new(&device, &surface, width, height)?;
        let frames = FrameResources::new(
            &device,
            swapchain.image_count(),
            swapchain.max_frames_in_flight() as usize,
        )?;

        let geometry_usage = vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC;
        let vertex_buffer = VulkanBuffer::new(
            &device,
            config.vertex_buffer_size,
            geometry_usage | vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let index_buffer = VulkanBuffer::new(
            &device,
            config.index_buffer_size,
            geometry_usage | vk::BufferUsageFlags::INDEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        log::info!(
            "[VULKAN] Backend ready: {}x{}, {} swapchain images, present mode {:?}",
            width,
            height,
            swapchain.image_count(),
            swapchain.present_mode()
        );
        Ok(Self {
            shaders: SlotMap::with_key(),
            geometries: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            targets: SlotMap::with_key(),
            passes: SlotMap::with_key(),
            vertex_buffer,
            index_buffer,
            vertex_space: FreeList::new(config.vertex_buffer_size),
            index_space: FreeList::new(config.index_buffer_size),
            frames,
            swapchain,
            device,
            surface,
            _instance: instance,
            width,
            height,
            image_index: 0,
            current_frame: 0,
            frame_active: false,
            active_pass: None,
            bound_shader: None,
            refresh_requested: false,
        })
    }

    /// Current swapchain extent
    pub fn extent(&self) -> (u32, u32) {
        let extent = self.swapchain.extent();
        (extent.width, extent.height)
    }

    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        self.device.wait_idle();
        self.swapchain
            .recreate(&self.device, &self.surface, self.width, self.height)?;
        // Image count can change with the swapchain
        self.frames = FrameResources::new(
            &self.device,
            self.swapchain.image_count(),
            self.swapchain.max_frames_in_flight() as usize,
        )?;
        self.current_frame = 0;
        self.image_index = 0;
        Ok(())
    }

    fn require_frame(&self, operation: &str) -> RenderResult<()> {
        if self.frame_active {
            Ok(())
        } else {
            Err(RenderError::RenderingFailed(format!("{operation} outside a frame")))
        }
    }

    fn command_buffer(&self) -> RenderResult<&CommandBuffer> {
        self.frames
            .command_buffers
            .get(self.image_index)
            .ok_or_else(|| RenderError::RenderingFailed("no command buffer for image".to_string()))
    }

    fn set_viewport(&self, command_buffer: &CommandBuffer) {
        let extent = self.swapchain.extent();
        let viewport = vk::Viewport {
            x: 0.0,
            y: extent.height as f32,
            width: extent.width as f32,
            height: -(extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device
                .device
                .cmd_set_viewport(command_buffer.handle(), 0, &[viewport]);
            self.device.device.cmd_set_scissor(command_buffer.handle(), 0, &[scissor]);
        }
    }
}

fn shader_entry(
    shaders: &mut SlotMap<ShaderHandle, VulkanShader>,
    handle: Option<ShaderHandle>,
) -> RenderResult<&mut VulkanShader> {
    handle
        .and_then(|handle| shaders.get_mut(handle))
        .ok_or_else(|| RenderError::ResourceNotFound("shader".to_string()))
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.device.wait_idle();
    }
}

impl RendererBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "vulkan"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn shutdown(&mut self) {
        log::info!("[VULKAN] Shutdown");
        self.device.wait_idle();
        self.shaders.clear();
        self.geometries.clear();
        self.textures.clear();
        self.targets.clear();
        self.passes.clear();
        self.vertex_space.clear();
        self.index_space.clear();
        self.frame_active = false;
        self.active_pass = None;
        self.bound_shader = None;
    }

    fn resized(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.width = width;
        self.height = height;
        if width > 0 && height > 0 {
            log::debug!("[VULKAN] Resized to {}x{}", width, height);
            self.recreate_swapchain()?;
            // Caller rebuilds targets right away
            self.refresh_requested = false;
        }
        Ok(())
    }

    fn begin_frame(&mut self, _delta_time: f32) -> RenderResult<bool> {
        if self.width == 0 || self.height == 0 {
            return Ok(false);
        }
        let frame = self.current_frame;
        if !self.frames.in_flight[frame].wait(u64::MAX)? {
            return Ok(false);
        }

        let acquired = self.swapchain.acquire_next_image(
            u64::MAX,
            self.frames.image_available[frame].handle(),
            vk::Fence::null(),
        )?;
        let Some(image) = acquired else {
            log::debug!("[VULKAN] Swapchain out of date, recreating");
            self.recreate_swapchain()?;
            self.refresh_requested = true;
            return Ok(false);
        };
        let image = image as usize;

        if let Some(previous) = self.frames.images_in_flight[image] {
            if previous != frame {
                self.frames.in_flight[previous].wait(u64::MAX)?;
            }
        }

        self.image_index = image;
        let command_buffer = &mut self.frames.command_buffers[image];
        command_buffer.reset()?;
        command_buffer.begin(false, false, false)?;
        self.set_viewport(&self.frames.command_buffers[image]);

        self.frame_active = true;
        self.bound_shader = None;
        Ok(true)
    }

    fn end_frame(&mut self, _delta_time: f32) -> RenderResult<bool> {
        self.require_frame("end_frame")?;
        self.frame_active = false;
        let frame = self.current_frame;
        let image = self.image_index;

        if let Some(pass) = self.active_pass.take() {
            log::warn!("[VULKAN] Render pass still active at end of frame");
            if let Some(pass) = self.passes.get(pass) {
                pass.end(&mut self.frames.command_buffers[image])?;
            }
        }
        self.frames.command_buffers[image].end()?;

        self.frames.images_in_flight[image] = Some(frame);
        self.frames.in_flight[frame].reset()?;

        let wait_semaphores = [self.frames.image_available[frame].handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.frames.render_complete[image].handle()];
        let command_buffers = [self.frames.command_buffers[image].handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        unsafe {
            self.device
                .device
                .queue_submit(
                    self.device.graphics_queue,
                    &[submit_info],
                    self.frames.in_flight[frame].handle(),
                )
                .map_err(VulkanError::Api)?;
        }
        self.frames.command_buffers[image].mark_submitted()?;

        let presented = self.swapchain.present(
            self.device.present_queue,
            self.frames.render_complete[image].handle(),
            image as u32,
        )?;
        self.current_frame = (frame + 1) % self.frames.in_flight.len();
        if !presented {
            log::debug!("[VULKAN] Present reported stale swapchain, recreating");
            self.recreate_swapchain()?;
            self.refresh_requested = true;
        }
        Ok(presented)
    }

    fn take_render_target_refresh_request(&mut self) -> bool {
        std::mem::take(&mut self.refresh_requested)
    }

    fn min_uniform_alignment(&self) -> u64 {
        self.device.min_uniform_alignment()
    }

    fn renderpass_create(&mut self, config: &RenderPassConfig) -> RenderResult<RenderPassId> {
        if self.renderpass_get(&config.name).is_some() {
            return Err(RenderError::ResourceCreationFailed(format!(
                "render pass '{}' already exists",
                config.name
            )));
        }
        let pass = VulkanRenderPass::new(
            &self.device.device,
            config,
            self.swapchain.format().format,
            self.device.depth_format,
        )?;
        Ok(self.passes.insert(pass))
    }

    fn renderpass_destroy(&mut self, pass: RenderPassId) {
        if self.passes.contains_key(pass) {
            self.device.wait_idle();
            self.passes.remove(pass);
        }
    }

    fn renderpass_get(&self, name: &str) -> Option<RenderPassId> {
        self.passes
            .iter()
            .find(|(_, pass)| pass.config().name == name)
            .map(|(id, _)| id)
    }

    fn renderpass_set_render_area(&mut self, pass: RenderPassId, area: Vec4) -> RenderResult<()> {
        self.passes
            .get_mut(pass)
            .ok_or_else(|| RenderError::ResourceNotFound("render pass".to_string()))?
            .set_render_area(area);
        Ok(())
    }

    fn renderpass_begin(&mut self, pass: RenderPassId, target: RenderTargetId) -> RenderResult<()> {
        self.require_frame("renderpass_begin")?;
        if self.active_pass.is_some() {
            return Err(RenderError::RenderingFailed("a render pass is already active".to_string()));
        }
        let framebuffer = match self.targets.get(target) {
            Some(t) if t.pass() == pass => t.framebuffer(),
            _ => return Err(RenderError::ResourceNotFound("render target for pass".to_string())),
        };
        let render_pass = self
            .passes
            .get(pass)
            .ok_or_else(|| RenderError::ResourceNotFound("render pass".to_string()))?;
        render_pass.begin(&mut self.frames.command_buffers[self.image_index], framebuffer)?;
        self.active_pass = Some(pass);
        Ok(())
    }

    fn renderpass_end(&mut self, pass: RenderPassId) -> RenderResult<()> {
        if self.active_pass != Some(pass) {
            return Err(RenderError::RenderingFailed("render pass is not active".to_string()));
        }
        let render_pass = self
            .passes
            .get(pass)
            .ok_or_else(|| RenderError::ResourceNotFound("render pass".to_string()))?;
        render_pass.end(&mut self.frames.command_buffers[self.image_index])?;
        self.active_pass = None;
        Ok(())
    }

    fn window_attachment_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn window_attachment_index(&self) -> usize {
        self.image_index
    }

    fn render_target_create(
        &mut self,
        pass: RenderPassId,
        attachments: &[RenderTargetAttachment],
        width: u32,
        height: u32,
    ) -> RenderResult<RenderTargetId> {
        let render_pass = self
            .passes
            .get(pass)
            .ok_or_else(|| RenderError::ResourceNotFound("render pass".to_string()))?
            .handle();
        let views = attachments
            .iter()
            .map(|attachment| match *attachment {
                RenderTargetAttachment::WindowColour(index) => self
                    .swapchain
                    .image_view(index)
                    .ok_or_else(|| RenderError::ResourceNotFound(format!("swapchain image {index}"))),
                RenderTargetAttachment::Depth => Ok(self.swapchain.depth_view()),
                RenderTargetAttachment::Texture(handle) => self
                    .textures
                    .get(handle)
                    .map(|texture| texture.image().view())
                    .ok_or_else(|| RenderError::ResourceNotFound("attachment texture".to_string())),
            })
            .collect::<RenderResult<Vec<_>>>()?;
        let target = VulkanRenderTarget::new(
            &self.device.device,
            pass,
            render_pass,
            attachments,
            &views,
            width,
            height,
        )?;
        Ok(self.targets.insert(target))
    }

    fn render_target_destroy(&mut self, target: RenderTargetId) {
        if self.targets.contains_key(target) {
            self.device.wait_idle();
            self.targets.remove(target);
        }
    }

    fn texture_create(&mut self, desc: &TextureDesc, pixels: &[u8]) -> RenderResult<TextureHandle> {
        let texture = VulkanTexture::new(&self.device, desc, pixels)?;
        Ok(self.textures.insert(texture))
    }

    fn texture_write_data(&mut self, texture: TextureHandle, offset: u32, pixels: &[u8]) -> RenderResult<()> {
        let texture = self
            .textures
            .get_mut(texture)
            .ok_or_else(|| RenderError::ResourceNotFound("texture".to_string()))?;
        if !texture.desc().flags.contains(TextureFlags::IS_WRITABLE) {
            return Err(RenderError::RenderingFailed(format!(
                "texture '{}' is not writable",
                texture.desc().name
            )));
        }
        if offset != 0 {
            return Err(RenderError::RenderingFailed(format!(
                "texture '{}' only supports whole-image writes",
                texture.desc().name
            )));
        }
        texture.write(&self.device, pixels)?;
        Ok(())
    }

    fn texture_destroy(&mut self, texture: TextureHandle) {
        if self.textures.contains_key(texture) {
            self.device.wait_idle();
            self.textures.remove(texture);
        }
    }

    fn geometry_create(&mut self, config: &GeometryConfig) -> RenderResult<GeometryHandle> {
        let vertex_bytes = config.vertices.len() as u64;
        if vertex_bytes == 0 {
            return Err(RenderError::ResourceCreationFailed(format!(
                "geometry '{}' has no vertices",
                config.name
            )));
        }
        let index_bytes = (config.indices.len() * std::mem::size_of::<u32>()) as u64;

        let vertex_offset = self
            .vertex_space
            .allocate(vertex_bytes)
            .map_err(|e| RenderError::ResourceCreationFailed(e.to_string()))?;
        let index_offset = if index_bytes > 0 {
            match self.index_space.allocate(index_bytes) {
                Ok(offset) => offset,
                Err(e) => {
                    let _ = self.vertex_space.free(vertex_offset, vertex_bytes);
                    return Err(RenderError::ResourceCreationFailed(e.to_string()));
                }
            }
        } else {
            0
        };
        let geometry = VulkanGeometry {
            vertex_offset,
            vertex_bytes,
            vertex_count: config.vertex_count,
            index_offset,
            index_count: config.indices.len() as u32,
        };

        let pool = self.device.graphics_command_pool;
        let queue = self.device.graphics_queue;
        let uploaded = self
            .vertex_buffer
            .upload(&self.device, pool, queue, vertex_offset, &config.vertices)
            .and_then(|()| {
                self.index_buffer.upload(
                    &self.device,
                    pool,
                    queue,
                    index_offset,
                    bytemuck::cast_slice(&config.indices),
                )
            });
        if let Err(e) = uploaded {
            let _ = self.vertex_space.free(vertex_offset, vertex_bytes);
            if index_bytes > 0 {
                let _ = self.index_space.free(index_offset, index_bytes);
            }
            return Err(e.into());
        }

        log::debug!(
            "[VULKAN] Geometry '{}': {} vertices, {} indices",
            config.name,
            config.vertex_count,
            config.indices.len()
        );
        Ok(self.geometries.insert(geometry))
    }

    fn geometry_destroy(&mut self, geometry: GeometryHandle) {
        if let Some(g) = self.geometries.remove(geometry) {
            self.device.wait_idle();
            let _ = self.vertex_space.free(g.vertex_offset, g.vertex_bytes);
            if g.index_count > 0 {
                let _ = self.index_space.free(g.index_offset, g.index_bytes());
            }
        }
    }

    fn geometry_draw(&mut self, geometry: GeometryHandle) -> RenderResult<()> {
        self.require_frame("geometry_draw")?;
        if self.active_pass.is_none() {
            return Err(RenderError::RenderingFailed("draw outside a render pass".to_string()));
        }
        if self.bound_shader.is_none() {
            return Err(RenderError::RenderingFailed("draw without a pipeline".to_string()));
        }
        let g = *self
            .geometries
            .get(geometry)
            .ok_or_else(|| RenderError::ResourceNotFound("geometry".to_string()))?;
        let command_buffer = self.command_buffer()?.handle();
        let device = &self.device.device;
        unsafe {
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[self.vertex_buffer.handle()], &[g.vertex_offset]);
            if g.index_count > 0 {
                device.cmd_bind_index_buffer(
                    command_buffer,
                    self.index_buffer.handle(),
                    g.index_offset,
                    vk::IndexType::UINT32,
                );
                device.cmd_draw_indexed(command_buffer, g.index_count, 1, 0, 0, 0);
            } else {
                device.cmd_draw(command_buffer, g.vertex_count, 1, 0, 0);
            }
        }
        Ok(())
    }

    fn shader_create(&mut self, shader: &Shader, pass: RenderPassId) -> RenderResult<ShaderHandle> {
        let render_pass = self
            .passes
            .get(pass)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("render pass for shader '{}'", shader.name)))?
            .handle();
        let vulkan_shader = VulkanShader::new(&self.device.device, shader, render_pass)?;
        Ok(self.shaders.insert(vulkan_shader))
    }

    fn shader_destroy(&mut self, handle: ShaderHandle) {
        if self.shaders.contains_key(handle) {
            self.device.wait_idle();
            self.shaders.remove(handle);
            if self.bound_shader == Some(handle) {
                self.bound_shader = None;
            }
        }
    }

    fn shader_initialize(&mut self, shader: &mut Shader) -> RenderResult<()> {
        shader.expect_state(ShaderState::Uninitialized, "initialize")?;
        let image_count = self.swapchain.image_count();
        let extent = self.swapchain.extent();
        let vulkan_shader = shader_entry(&mut self.shaders, shader.internal)?;
        vulkan_shader.initialize(&self.device, shader, image_count, extent)?;
        Ok(())
    }

    fn shader_use(&mut self, shader: &Shader) -> RenderResult<()> {
        self.require_frame("shader_use")?;
        shader.expect_state(ShaderState::Initialized, "use")?;
        let command_buffer = &self.frames.command_buffers[self.image_index];
        shader_entry(&mut self.shaders, shader.internal)?.bind(command_buffer)?;
        self.bound_shader = shader.internal;
        Ok(())
    }

    fn shader_bind_instance(&mut self, shader: &mut Shader, instance_id: u32) -> RenderResult<()> {
        let offset = shader_entry(&mut self.shaders, shader.internal)?.instance_offset(instance_id)?;
        shader.bind_instance(instance_id, offset);
        Ok(())
    }

    fn shader_apply_globals(&mut self, shader: &Shader) -> RenderResult<()> {
        self.require_frame("shader_apply_globals")?;
        let command_buffer = &self.frames.command_buffers[self.image_index];
        shader_entry(&mut self.shaders, shader.internal)?.apply_globals(
            command_buffer,
            self.image_index,
            &self.textures,
        )?;
        Ok(())
    }

    fn shader_apply_instance(&mut self, shader: &Shader, needs_update: bool) -> RenderResult<()> {
        self.require_frame("shader_apply_instance")?;
        let instance_id = shader
            .bound_instance_id()
            .ok_or_else(|| RenderError::RenderingFailed("no instance bound".to_string()))?;
        let command_buffer = &self.frames.command_buffers[self.image_index];
        shader_entry(&mut self.shaders, shader.internal)?.apply_instance(
            command_buffer,
            self.image_index,
            instance_id,
            needs_update,
            &self.textures,
        )?;
        Ok(())
    }

    fn shader_acquire_instance_resources(&mut self, shader: &Shader, textures: &[BoundTexture]) -> RenderResult<u32> {
        let expected = shader.instance_texture_count() as usize;
        if textures.len() != expected {
            return Err(RenderError::ResourceCreationFailed(format!(
                "shader '{}' needs {} instance textures, got {}",
                shader.name,
                expected,
                textures.len()
            )));
        }
        let image_count = self.swapchain.image_count();
        let id = shader_entry(&mut self.shaders, shader.internal)?
            .acquire_instance(textures, image_count)
            .map_err(|e| RenderError::ResourceCreationFailed(format!("shader '{}': {}", shader.name, e)))?;
        Ok(id)
    }

    fn shader_release_instance_resources(&mut self, shader: &Shader, instance_id: u32) -> RenderResult<()> {
        // Descriptor sets may still be referenced by frames in flight
        self.device.wait_idle();
        shader_entry(&mut self.shaders, shader.internal)?.release_instance(instance_id)?;
        Ok(())
    }

    fn shader_set_uniform(
        &mut self,
        shader: &Shader,
        uniform: &ShaderUniform,
        value: UniformValue<'_>,
    ) -> RenderResult<()> {
        let bound_offset = shader.bound_ubo_offset();
        let bound_instance = shader.bound_instance_id();
        let vulkan_shader = shader_entry(&mut self.shaders, shader.internal)?;
        match value {
            UniformValue::Sampler(texture) => {
                let slot = usize::from(uniform.location);
                match uniform.scope {
                    ShaderScope::Global => vulkan_shader.set_global_texture(slot, texture)?,
                    _ => {
                        let instance_id = bound_instance
                            .ok_or_else(|| RenderError::RenderingFailed("no instance bound".to_string()))?;
                        vulkan_shader.set_instance_texture(instance_id, slot, texture)?;
                    }
                }
                Ok(())
            }
            UniformValue::Bytes(bytes) if uniform.scope == ShaderScope::Local => {
                if !self.frame_active {
                    return Err(RenderError::RenderingFailed(format!(
                        "push constant '{}' outside a frame",
                        uniform.name
                    )));
                }
                let command_buffer = &self.frames.command_buffers[self.image_index];
                vulkan_shader.push_constants(command_buffer, uniform.offset as u32, bytes)?;
                Ok(())
            }
            UniformValue::Bytes(bytes) => {
                vulkan_shader.write_uniform(bound_offset + uniform.offset, bytes)?;
                Ok(())
            }
        }
    }
}

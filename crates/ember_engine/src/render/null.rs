//! Headless backend
//!
//! Implements [`RendererBackend`] without a GPU. Resources live in host
//! memory and every GPU-visible action is counted, so frame logic can be
//! exercised in tests and on machines without Vulkan.

use super::backend::{
    BoundTexture, GeometryHandle, RenderPassId, RenderTargetAttachment, RenderTargetId, RendererBackend,
    ShaderHandle, TextureDesc, TextureHandle, UniformValue,
};
use super::shader::{Shader, ShaderState, ShaderUniform};
use super::types::{GeometryConfig, RenderPassConfig, ShaderScope, TextureFlags};
use super::{RenderError, RenderResult};
use crate::foundation::freelist::FreeList;
use crate::foundation::math::Vec4;
use slotmap::SlotMap;
use std::any::Any;

/// Counters of the work a GPU would have done
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NullBackendStats {
    /// `begin_frame` calls that returned true
    pub frames_begun: u64,
    /// Frames submitted
    pub frames_ended: u64,
    /// Indexed draws
    pub draw_calls: u64,
    /// Global descriptor set updates
    pub global_descriptor_writes: u64,
    /// Instance descriptor set updates
    pub instance_descriptor_writes: u64,
    /// Pipeline binds
    pub pipeline_binds: u64,
    /// Push constant updates
    pub push_constant_writes: u64,
    /// Render passes begun
    pub renderpass_begins: u64,
    /// Render targets created
    pub render_targets_created: u64,
    /// Render targets destroyed
    pub render_targets_destroyed: u64,
    /// Swapchain rebuilds
    pub swapchain_recreations: u64,
}

#[derive(Debug)]
struct NullRenderPass {
    config: RenderPassConfig,
}

#[derive(Debug)]
#[allow(dead_code)]
struct NullRenderTarget {
    pass: RenderPassId,
    attachments: Vec<RenderTargetAttachment>,
    width: u32,
    height: u32,
}

#[derive(Debug)]
struct NullTexture {
    desc: TextureDesc,
    pixels: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct NullGeometry {
    vertex_offset: u64,
    vertex_bytes: u64,
    index_offset: u64,
    index_count: u32,
}

#[derive(Debug)]
struct NullInstance {
    offset: u64,
    textures: Vec<BoundTexture>,
    written_textures: Vec<Option<BoundTexture>>,
    ubo_written: bool,
}

#[derive(Debug)]
struct NullShader {
    name: String,
    pipeline: u64,
    initialized: bool,
    uniform_buffer: Vec<u8>,
    ubo_space: FreeList,
    ubo_stride: u64,
    global_textures: Vec<Option<BoundTexture>>,
    instances: Vec<Option<NullInstance>>,
    push_constants: [u8; 128],
}

/// Backend that renders nothing and records everything
pub struct NullBackend {
    width: u32,
    height: u32,
    image_count: usize,
    image_index: usize,
    min_uniform_alignment: u64,
    frame_active: bool,
    active_pass: Option<RenderPassId>,
    stale: bool,
    refresh_requested: bool,
    next_pipeline: u64,
    bound_pipeline: Option<u64>,
    passes: SlotMap<RenderPassId, NullRenderPass>,
    targets: SlotMap<RenderTargetId, NullRenderTarget>,
    textures: SlotMap<TextureHandle, NullTexture>,
    geometries: SlotMap<GeometryHandle, NullGeometry>,
    shaders: SlotMap<ShaderHandle, NullShader>,
    vertex_space: FreeList,
    index_space: FreeList,
    stats: NullBackendStats,
}

impl NullBackend {
    /// Headless backend with a window of `width` x `height` and three images
    pub fn new(width: u32, height: u32) -> Self {
        log::info!("[NULL] Headless backend {}x{}", width, height);
        Self {
            width,
            height,
            image_count: 3,
            image_index: 0,
            min_uniform_alignment: 256,
            frame_active: false,
            active_pass: None,
            stale: false,
            refresh_requested: false,
            next_pipeline: 1,
            bound_pipeline: None,
            passes: SlotMap::with_key(),
            targets: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            geometries: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            vertex_space: FreeList::new(64 * 1024 * 1024),
            index_space: FreeList::new(16 * 1024 * 1024),
            stats: NullBackendStats::default(),
        }
    }

    /// Use a different uniform buffer alignment
    pub fn with_uniform_alignment(mut self, alignment: u64) -> Self {
        self.min_uniform_alignment = alignment;
        self
    }

    /// Work recorded so far
    pub fn stats(&self) -> &NullBackendStats {
        &self.stats
    }

    /// Current window size
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pipeline bound by the last `shader_use`
    pub fn bound_pipeline(&self) -> Option<u64> {
        self.bound_pipeline
    }

    /// Pipeline built for a shader by `shader_initialize`
    pub fn shader_pipeline(&self, handle: ShaderHandle) -> Option<u64> {
        self.shaders
            .get(handle)
            .filter(|shader| shader.initialized)
            .map(|shader| shader.pipeline)
    }

    /// Bytes of a shader's uniform buffer
    pub fn uniform_bytes(&self, handle: ShaderHandle, offset: u64, len: usize) -> Option<&[u8]> {
        let shader = self.shaders.get(handle)?;
        let start = usize::try_from(offset).ok()?;
        shader.uniform_buffer.get(start..start + len)
    }

    /// Bytes last pushed as constants for a shader
    pub fn push_constant_bytes(&self, handle: ShaderHandle, offset: u32, len: usize) -> Option<&[u8]> {
        let start = offset as usize;
        self.shaders.get(handle)?.push_constants.get(start..start + len)
    }

    /// Pixels of a texture
    pub fn texture_pixels(&self, handle: TextureHandle) -> Option<&[u8]> {
        self.textures.get(handle).map(|texture| texture.pixels.as_slice())
    }

    /// Live object counts: textures, geometries, shaders, render targets
    pub fn live_objects(&self) -> (usize, usize, usize, usize) {
        (
            self.textures.len(),
            self.geometries.len(),
            self.shaders.len(),
            self.targets.len(),
        )
    }

    /// Make the next `begin_frame` see an out-of-date swapchain
    pub fn mark_swapchain_stale(&mut self) {
        self.stale = true;
    }

    fn recreate_swapchain(&mut self) {
        self.stats.swapchain_recreations += 1;
        self.image_index = 0;
        self.refresh_requested = true;
    }

    fn shader_mut(&mut self, handle: Option<ShaderHandle>) -> RenderResult<&mut NullShader> {
        handle
            .and_then(|handle| self.shaders.get_mut(handle))
            .ok_or_else(|| RenderError::ResourceNotFound("shader".to_string()))
    }

    fn require_frame(&self, operation: &str) -> RenderResult<()> {
        if self.frame_active {
            Ok(())
        } else {
            Err(RenderError::RenderingFailed(format!("{operation} outside a frame")))
        }
    }
}

impl RendererBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn shutdown(&mut self) {
        log::info!("[NULL] Shutdown");
        self.shaders.clear();
        self.geometries.clear();
        self.textures.clear();
        self.targets.clear();
        self.passes.clear();
        self.vertex_space.clear();
        self.index_space.clear();
        self.frame_active = false;
    }

    fn resized(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.width = width;
        self.height = height;
        if width > 0 && height > 0 {
            self.recreate_swapchain();
            // Caller rebuilds targets right away
            self.refresh_requested = false;
        }
        Ok(())
    }

    fn begin_frame(&mut self, _delta_time: f32) -> RenderResult<bool> {
        if self.width == 0 || self.height == 0 {
            return Ok(false);
        }
        if self.stale {
            self.stale = false;
            self.recreate_swapchain();
            return Ok(false);
        }
        self.frame_active = true;
        self.stats.frames_begun += 1;
        Ok(true)
    }

    fn end_frame(&mut self, _delta_time: f32) -> RenderResult<bool> {
        self.require_frame("end_frame")?;
        self.frame_active = false;
        self.active_pass = None;
        self.stats.frames_ended += 1;
        self.image_index = (self.image_index + 1) % self.image_count;
        Ok(true)
    }

    fn take_render_target_refresh_request(&mut self) -> bool {
        std::mem::take(&mut self.refresh_requested)
    }

    fn min_uniform_alignment(&self) -> u64 {
        self.min_uniform_alignment
    }

    fn renderpass_create(&mut self, config: &RenderPassConfig) -> RenderResult<RenderPassId> {
        if self.renderpass_get(&config.name).is_some() {
            return Err(RenderError::ResourceCreationFailed(format!(
                "render pass '{}' already exists",
                config.name
            )));
        }
        Ok(self.passes.insert(NullRenderPass { config: config.clone() }))
    }

    fn renderpass_destroy(&mut self, pass: RenderPassId) {
        self.passes.remove(pass);
    }

    fn renderpass_get(&self, name: &str) -> Option<RenderPassId> {
        self.passes
            .iter()
            .find(|(_, pass)| pass.config.name == name)
            .map(|(id, _)| id)
    }

    fn renderpass_set_render_area(&mut self, pass: RenderPassId, area: Vec4) -> RenderResult<()> {
        let pass = self
            .passes
            .get_mut(pass)
            .ok_or_else(|| RenderError::ResourceNotFound("render pass".to_string()))?;
        pass.config.render_area = area;
        Ok(())
    }

    fn renderpass_begin(&mut self, pass: RenderPassId, target: RenderTargetId) -> RenderResult<()> {
        self.require_frame("renderpass_begin")?;
        if self.active_pass.is_some() {
            return Err(RenderError::RenderingFailed("a render pass is already active".to_string()));
        }
        match self.targets.get(target) {
            Some(t) if t.pass == pass => {}
            _ => return Err(RenderError::ResourceNotFound("render target for pass".to_string())),
        }
        self.active_pass = Some(pass);
        self.stats.renderpass_begins += 1;
        Ok(())
    }

    fn renderpass_end(&mut self, pass: RenderPassId) -> RenderResult<()> {
        if self.active_pass != Some(pass) {
            return Err(RenderError::RenderingFailed("render pass is not active".to_string()));
        }
        self.active_pass = None;
        Ok(())
    }

    fn window_attachment_count(&self) -> usize {
        self.image_count
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
        if !self.passes.contains_key(pass) {
            return Err(RenderError::ResourceNotFound("render pass".to_string()));
        }
        self.stats.render_targets_created += 1;
        Ok(self.targets.insert(NullRenderTarget {
            pass,
            attachments: attachments.to_vec(),
            width,
            height,
        }))
    }

    fn render_target_destroy(&mut self, target: RenderTargetId) {
        if self.targets.remove(target).is_some() {
            self.stats.render_targets_destroyed += 1;
        }
    }

    fn texture_create(&mut self, desc: &TextureDesc, pixels: &[u8]) -> RenderResult<TextureHandle> {
        if pixels.len() != desc.byte_size() {
            return Err(RenderError::ResourceCreationFailed(format!(
                "texture '{}' expects {} bytes, got {}",
                desc.name,
                desc.byte_size(),
                pixels.len()
            )));
        }
        Ok(self.textures.insert(NullTexture {
            desc: desc.clone(),
            pixels: pixels.to_vec(),
        }))
    }

    fn texture_write_data(&mut self, texture: TextureHandle, offset: u32, pixels: &[u8]) -> RenderResult<()> {
        let texture = self
            .textures
            .get_mut(texture)
            .ok_or_else(|| RenderError::ResourceNotFound("texture".to_string()))?;
        if !texture.desc.flags.contains(TextureFlags::IS_WRITABLE) {
            return Err(RenderError::RenderingFailed(format!(
                "texture '{}' is not writable",
                texture.desc.name
            )));
        }
        let start = offset as usize;
        let end = start + pixels.len();
        let target = texture
            .pixels
            .get_mut(start..end)
            .ok_or_else(|| RenderError::RenderingFailed("texture write out of range".to_string()))?;
        target.copy_from_slice(pixels);
        Ok(())
    }

    fn texture_destroy(&mut self, texture: TextureHandle) {
        self.textures.remove(texture);
    }

    fn geometry_create(&mut self, config: &GeometryConfig) -> RenderResult<GeometryHandle> {
        let vertex_bytes = config.vertices.len() as u64;
        let index_bytes = (config.indices.len() * std::mem::size_of::<u32>()) as u64;
        let vertex_offset = self
            .vertex_space
            .allocate(vertex_bytes)
            .map_err(|e| RenderError::ResourceCreationFailed(e.to_string()))?;
        let index_offset = match self.index_space.allocate(index_bytes) {
            Ok(offset) => offset,
            Err(e) => {
                let _ = self.vertex_space.free(vertex_offset, vertex_bytes);
                return Err(RenderError::ResourceCreationFailed(e.to_string()));
            }
        };
        Ok(self.geometries.insert(NullGeometry {
            vertex_offset,
            vertex_bytes,
            index_offset,
            index_count: config.indices.len() as u32,
        }))
    }

    fn geometry_destroy(&mut self, geometry: GeometryHandle) {
        if let Some(g) = self.geometries.remove(geometry) {
            let _ = self.vertex_space.free(g.vertex_offset, g.vertex_bytes);
            let index_bytes = u64::from(g.index_count) * std::mem::size_of::<u32>() as u64;
            let _ = self.index_space.free(g.index_offset, index_bytes);
        }
    }

    fn geometry_draw(&mut self, geometry: GeometryHandle) -> RenderResult<()> {
        self.require_frame("geometry_draw")?;
        if self.active_pass.is_none() {
            return Err(RenderError::RenderingFailed("draw outside a render pass".to_string()));
        }
        if !self.geometries.contains_key(geometry) {
            return Err(RenderError::ResourceNotFound("geometry".to_string()));
        }
        if self.bound_pipeline.is_none() {
            return Err(RenderError::RenderingFailed("draw without a pipeline".to_string()));
        }
        self.stats.draw_calls += 1;
        Ok(())
    }

    fn shader_create(&mut self, shader: &Shader, pass: RenderPassId) -> RenderResult<ShaderHandle> {
        if !self.passes.contains_key(pass) {
            return Err(RenderError::ResourceNotFound(format!(
                "render pass for shader '{}'",
                shader.name
            )));
        }
        let pipeline = self.next_pipeline;
        self.next_pipeline += 1;
        Ok(self.shaders.insert(NullShader {
            name: shader.name.clone(),
            pipeline,
            initialized: false,
            uniform_buffer: Vec::new(),
            ubo_space: FreeList::new(0),
            ubo_stride: 0,
            global_textures: Vec::new(),
            instances: Vec::new(),
            push_constants: [0; 128],
        }))
    }

    fn shader_destroy(&mut self, handle: ShaderHandle) {
        if let Some(shader) = self.shaders.remove(handle) {
            log::debug!("[NULL] Destroyed shader '{}'", shader.name);
        }
    }

    fn shader_initialize(&mut self, shader: &mut Shader) -> RenderResult<()> {
        shader.expect_state(ShaderState::Uninitialized, "initialize")?;
        let alignment = self.min_uniform_alignment;
        let size = shader.compute_strides(alignment);
        let global_stride = shader.global_ubo_stride();
        let ubo_stride = shader.ubo_stride();
        let global_textures = shader.global_texture_count() as usize;

        let backend = self.shader_mut(shader.internal)?;
        backend.uniform_buffer = vec![0; size as usize];
        backend.ubo_space = FreeList::new(size);
        backend.ubo_stride = ubo_stride;
        backend.global_textures = vec![None; global_textures];
        let global_offset = if global_stride > 0 {
            backend
                .ubo_space
                .allocate(global_stride)
                .map_err(|e| RenderError::ResourceCreationFailed(e.to_string()))?
        } else {
            0
        };
        backend.initialized = true;
        shader.set_global_ubo_offset(global_offset);
        Ok(())
    }

    fn shader_use(&mut self, shader: &Shader) -> RenderResult<()> {
        self.require_frame("shader_use")?;
        shader.expect_state(ShaderState::Initialized, "use")?;
        let pipeline = self.shader_mut(shader.internal)?.pipeline;
        self.bound_pipeline = Some(pipeline);
        self.stats.pipeline_binds += 1;
        Ok(())
    }

    fn shader_bind_instance(&mut self, shader: &mut Shader, instance_id: u32) -> RenderResult<()> {
        let backend = self.shader_mut(shader.internal)?;
        let offset = backend
            .instances
            .get(instance_id as usize)
            .and_then(Option::as_ref)
            .map(|instance| instance.offset)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("shader instance {instance_id}")))?;
        shader.bind_instance(instance_id, offset);
        Ok(())
    }

    fn shader_apply_globals(&mut self, shader: &Shader) -> RenderResult<()> {
        self.require_frame("shader_apply_globals")?;
        self.shader_mut(shader.internal)?;
        self.stats.global_descriptor_writes += 1;
        Ok(())
    }

    fn shader_apply_instance(&mut self, shader: &Shader, needs_update: bool) -> RenderResult<()> {
        self.require_frame("shader_apply_instance")?;
        let instance_id = shader
            .bound_instance_id()
            .ok_or_else(|| RenderError::RenderingFailed("no instance bound".to_string()))?;
        let backend = self.shader_mut(shader.internal)?;
        let instance = backend
            .instances
            .get_mut(instance_id as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("shader instance {instance_id}")))?;

        let mut wrote = false;
        if needs_update {
            if !instance.ubo_written {
                instance.ubo_written = true;
                wrote = true;
            }
            for (texture, written) in instance.textures.iter().zip(&mut instance.written_textures) {
                if written.as_ref() != Some(texture) {
                    *written = Some(*texture);
                    wrote = true;
                }
            }
        }
        if wrote {
            self.stats.instance_descriptor_writes += 1;
        }
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
        let max_instances = shader.max_instances as usize;
        let backend = self.shader_mut(shader.internal)?;
        let slot = match backend.instances.iter().position(Option::is_none) {
            Some(slot) => slot,
            None if backend.instances.len() < max_instances => {
                backend.instances.push(None);
                backend.instances.len() - 1
            }
            None => {
                return Err(RenderError::ResourceCreationFailed(format!(
                    "shader '{}' has no free instance slots",
                    backend.name
                )))
            }
        };
        let offset = if backend.ubo_stride > 0 {
            backend
                .ubo_space
                .allocate(backend.ubo_stride)
                .map_err(|e| RenderError::ResourceCreationFailed(e.to_string()))?
        } else {
            0
        };
        backend.instances[slot] = Some(NullInstance {
            offset,
            textures: textures.to_vec(),
            written_textures: vec![None; textures.len()],
            ubo_written: false,
        });
        Ok(slot as u32)
    }

    fn shader_release_instance_resources(&mut self, shader: &Shader, instance_id: u32) -> RenderResult<()> {
        let backend = self.shader_mut(shader.internal)?;
        let instance = backend
            .instances
            .get_mut(instance_id as usize)
            .and_then(Option::take)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("shader instance {instance_id}")))?;
        if backend.ubo_stride > 0 {
            backend
                .ubo_space
                .free(instance.offset, backend.ubo_stride)
                .map_err(|e| RenderError::RenderingFailed(e.to_string()))?;
        }
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
        let backend = self.shader_mut(shader.internal)?;
        match value {
            UniformValue::Sampler(texture) => {
                let slot = usize::from(uniform.location);
                let target = match uniform.scope {
                    ShaderScope::Global => backend.global_textures.get_mut(slot).map(|t| *t = Some(texture)),
                    _ => bound_instance
                        .and_then(|id| backend.instances.get_mut(id as usize))
                        .and_then(Option::as_mut)
                        .and_then(|instance| instance.textures.get_mut(slot))
                        .map(|t| *t = texture),
                };
                target.ok_or_else(|| RenderError::RenderingFailed(format!("sampler slot '{}' unavailable", uniform.name)))
            }
            UniformValue::Bytes(bytes) if uniform.scope == ShaderScope::Local => {
                let start = uniform.offset as usize;
                let target = backend
                    .push_constants
                    .get_mut(start..start + bytes.len())
                    .ok_or_else(|| RenderError::RenderingFailed(format!("push constant '{}' out of range", uniform.name)))?;
                target.copy_from_slice(bytes);
                self.stats.push_constant_writes += 1;
                Ok(())
            }
            UniformValue::Bytes(bytes) => {
                let start = (bound_offset + uniform.offset) as usize;
                let target = backend
                    .uniform_buffer
                    .get_mut(start..start + bytes.len())
                    .ok_or_else(|| RenderError::RenderingFailed(format!("uniform '{}' out of range", uniform.name)))?;
                target.copy_from_slice(bytes);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::types::{RenderPassClearFlags, TextureType};

    fn pass_config(name: &str) -> RenderPassConfig {
        RenderPassConfig {
            name: name.to_string(),
            prev_name: None,
            next_name: None,
            render_area: Vec4::new(0.0, 0.0, 800.0, 600.0),
            clear_colour: Vec4::zeros(),
            clear_flags: RenderPassClearFlags::COLOUR_BUFFER,
        }
    }

    #[test]
    fn test_stale_swapchain_skips_frame_and_requests_refresh() {
        let mut backend = NullBackend::new(800, 600);
        backend.mark_swapchain_stale();
        assert!(!backend.begin_frame(0.016).unwrap());
        assert!(backend.take_render_target_refresh_request());
        assert!(!backend.take_render_target_refresh_request());
        assert!(backend.begin_frame(0.016).unwrap());
        assert!(backend.end_frame(0.016).unwrap());
        assert_eq!(backend.window_attachment_index(), 1);
    }

    #[test]
    fn test_minimized_window_skips_frames() {
        let mut backend = NullBackend::new(800, 600);
        backend.resized(0, 0).unwrap();
        assert!(!backend.begin_frame(0.016).unwrap());
        assert_eq!(backend.stats().frames_begun, 0);
    }

    #[test]
    fn test_duplicate_pass_name_rejected() {
        let mut backend = NullBackend::new(800, 600);
        backend.renderpass_create(&pass_config("world")).unwrap();
        assert!(backend.renderpass_create(&pass_config("world")).is_err());
        assert!(backend.renderpass_get("world").is_some());
        assert!(backend.renderpass_get("ui").is_none());
    }

    #[test]
    fn test_texture_size_checked() {
        let mut backend = NullBackend::new(800, 600);
        let desc = TextureDesc {
            name: "t".to_string(),
            width: 2,
            height: 2,
            channel_count: 4,
            texture_type: TextureType::TwoD,
            flags: TextureFlags::IS_WRITABLE,
        };
        assert!(backend.texture_create(&desc, &[0; 15]).is_err());
        let handle = backend.texture_create(&desc, &[0; 16]).unwrap();
        backend.texture_write_data(handle, 4, &[9; 4]).unwrap();
        assert_eq!(&backend.texture_pixels(handle).unwrap()[4..8], &[9; 4]);
        assert!(backend.texture_write_data(handle, 14, &[1; 4]).is_err());
    }

    #[test]
    fn test_geometry_space_reused() {
        let mut backend = NullBackend::new(800, 600);
        let config = GeometryConfig {
            vertex_size: 4,
            vertex_count: 4,
            vertices: vec![0; 16],
            indices: vec![0, 1, 2],
            center: Default::default(),
            extents: Default::default(),
            name: "g".to_string(),
            material_name: None,
        };
        let first = backend.geometry_create(&config).unwrap();
        backend.geometry_destroy(first);
        let second = backend.geometry_create(&config).unwrap();
        assert_eq!(backend.geometries[second].vertex_offset, 0);
        assert_eq!(backend.live_objects().1, 1);
    }
}

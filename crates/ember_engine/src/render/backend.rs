//! Backend contract
//!
//! Everything the frontend and resource systems need from a graphics API.
//! Backend objects are addressed by slotmap keys; the systems keep their own
//! name tables and reference counts on top.

use super::shader::{Shader, ShaderUniform};
use super::types::{GeometryConfig, RenderPassConfig, TextureFlags, TextureType};
use super::RenderResult;
use crate::foundation::math::Vec4;
use slotmap::new_key_type;
use std::any::Any;

new_key_type! {
    /// Backend texture object
    pub struct TextureHandle;
    /// Backend geometry buffers region
    pub struct GeometryHandle;
    /// Backend shader (pipeline, descriptors, uniform buffer)
    pub struct ShaderHandle;
    /// Backend render pass
    pub struct RenderPassId;
    /// Backend render target (framebuffer)
    pub struct RenderTargetId;
}

/// Texture creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    /// Debug name
    pub name: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per pixel
    pub channel_count: u8,
    /// 2D or cube
    pub texture_type: TextureType,
    /// Flags
    pub flags: TextureFlags,
}

impl TextureDesc {
    /// Expected pixel byte count for all layers
    pub fn byte_size(&self) -> usize {
        self.width as usize
            * self.height as usize
            * usize::from(self.channel_count)
            * self.texture_type.layer_count() as usize
    }
}

/// Image bound to one slot of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTargetAttachment {
    /// Swapchain colour image `n`
    WindowColour(usize),
    /// The swapchain's depth image
    Depth,
    /// Any backend texture
    Texture(TextureHandle),
}

/// Texture bound to a sampler slot, with the generation it was loaded at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundTexture {
    /// Backend texture
    pub handle: TextureHandle,
    /// Generation of the texture contents
    pub generation: u32,
}

/// Value written by `shader_set_uniform`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue<'a> {
    /// Raw bytes of a uniform or push constant
    Bytes(&'a [u8]),
    /// Texture for a sampler slot
    Sampler(BoundTexture),
}

impl UniformValue<'_> {
    /// Byte size as checked against the declared uniform; samplers are 0
    pub fn size(&self) -> usize {
        match self {
            Self::Bytes(bytes) => bytes.len(),
            Self::Sampler(_) => 0,
        }
    }
}

/// Graphics API backend driven by the renderer frontend
pub trait RendererBackend {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Concrete backend, for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Concrete backend, mutably
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Release every GPU object; the backend is unusable afterwards
    fn shutdown(&mut self);

    /// The window changed size
    fn resized(&mut self, width: u32, height: u32) -> RenderResult<()>;

    /// Start recording a frame. `false` means skip this frame.
    fn begin_frame(&mut self, delta_time: f32) -> RenderResult<bool>;

    /// Submit and present the frame. `false` means it was not presented.
    fn end_frame(&mut self, delta_time: f32) -> RenderResult<bool>;

    /// Whether render targets must be rebuilt since the last call (the
    /// swapchain was recreated internally)
    fn take_render_target_refresh_request(&mut self) -> bool;

    /// Alignment uniform buffer regions must respect
    fn min_uniform_alignment(&self) -> u64;

    /// Create a render pass
    fn renderpass_create(&mut self, config: &RenderPassConfig) -> RenderResult<RenderPassId>;

    /// Destroy a render pass
    fn renderpass_destroy(&mut self, pass: RenderPassId);

    /// Look up a render pass by name
    fn renderpass_get(&self, name: &str) -> Option<RenderPassId>;

    /// Update a pass's render area (x, y, width, height)
    fn renderpass_set_render_area(&mut self, pass: RenderPassId, area: Vec4) -> RenderResult<()>;

    /// Begin `pass` on `target` in the current frame
    fn renderpass_begin(&mut self, pass: RenderPassId, target: RenderTargetId) -> RenderResult<()>;

    /// End `pass`
    fn renderpass_end(&mut self, pass: RenderPassId) -> RenderResult<()>;

    /// Number of swapchain images
    fn window_attachment_count(&self) -> usize;

    /// Swapchain image being rendered this frame
    fn window_attachment_index(&self) -> usize;

    /// Bind attachments to a pass at a fixed size
    fn render_target_create(
        &mut self,
        pass: RenderPassId,
        attachments: &[RenderTargetAttachment],
        width: u32,
        height: u32,
    ) -> RenderResult<RenderTargetId>;

    /// Destroy a render target
    fn render_target_destroy(&mut self, target: RenderTargetId);

    /// Create a texture and upload `pixels` (all layers)
    fn texture_create(&mut self, desc: &TextureDesc, pixels: &[u8]) -> RenderResult<TextureHandle>;

    /// Overwrite the contents of a writable texture
    fn texture_write_data(&mut self, texture: TextureHandle, offset: u32, pixels: &[u8]) -> RenderResult<()>;

    /// Destroy a texture
    fn texture_destroy(&mut self, texture: TextureHandle);

    /// Upload geometry into the shared vertex and index buffers
    fn geometry_create(&mut self, config: &GeometryConfig) -> RenderResult<GeometryHandle>;

    /// Free a geometry's buffer regions
    fn geometry_destroy(&mut self, geometry: GeometryHandle);

    /// Draw a geometry with the bound pipeline
    fn geometry_draw(&mut self, geometry: GeometryHandle) -> RenderResult<()>;

    /// Build the structural objects for a shader (`NotCreated` -> `Uninitialized`)
    fn shader_create(&mut self, shader: &Shader, pass: RenderPassId) -> RenderResult<ShaderHandle>;

    /// Destroy everything the backend built for a shader
    fn shader_destroy(&mut self, handle: ShaderHandle);

    /// Build pipeline, descriptors and uniform buffer from the declared layout.
    /// Sets the shader's strides and global offset.
    fn shader_initialize(&mut self, shader: &mut Shader) -> RenderResult<()>;

    /// Bind the shader's pipeline for the current frame
    fn shader_use(&mut self, shader: &Shader) -> RenderResult<()>;

    /// Target the global region with subsequent uniform writes
    fn shader_bind_globals(&mut self, shader: &mut Shader) -> RenderResult<()> {
        shader.bind_globals();
        Ok(())
    }

    /// Target an instance region with subsequent uniform writes
    fn shader_bind_instance(&mut self, shader: &mut Shader, instance_id: u32) -> RenderResult<()>;

    /// Write and bind the global descriptor set
    fn shader_apply_globals(&mut self, shader: &Shader) -> RenderResult<()>;

    /// Write (if `needs_update`) and bind the bound instance's descriptor set
    fn shader_apply_instance(&mut self, shader: &Shader, needs_update: bool) -> RenderResult<()>;

    /// Reserve an instance slot, with one initial texture per instance sampler
    fn shader_acquire_instance_resources(&mut self, shader: &Shader, textures: &[BoundTexture]) -> RenderResult<u32>;

    /// Return an instance slot
    fn shader_release_instance_resources(&mut self, shader: &Shader, instance_id: u32) -> RenderResult<()>;

    /// Write a validated uniform value at the bound offset, push it as a
    /// constant, or assign a sampler
    fn shader_set_uniform(
        &mut self,
        shader: &Shader,
        uniform: &ShaderUniform,
        value: UniformValue<'_>,
    ) -> RenderResult<()>;
}

//! Shader objects
//!
//! A [`VulkanShader`] owns the stage modules from creation on. Initialization
//! builds everything else from the shader's declared layout in one go:
//!
//! - set 0 (global): the UBO at binding 0, samplers at binding 1
//! - set 1 (instance): the UBO at binding 0, samplers at binding 1
//! - one host-visible uniform buffer, mapped for the shader's life, split into
//!   the global region and one stride per instance
//! - a descriptor set per swapchain image for the globals and for each instance
//!
//! If any step fails the partly built objects drop together and the shader
//! stays uninitialized.

use super::buffer::VulkanBuffer;
use super::commands::CommandBuffer;
use super::device::VulkanDevice;
use super::image::VulkanTexture;
use super::pipeline::{PipelineConfig, VulkanPipeline};
use super::{VulkanError, VulkanResult};
use crate::assets::load_spirv;
use crate::foundation::freelist::FreeList;
use crate::render::backend::{BoundTexture, TextureHandle};
use crate::render::shader::{Shader, GLOBAL_SET_INDEX, INSTANCE_SET_INDEX, SAMPLER_BINDING, UBO_BINDING};
use crate::render::types::{ShaderAttributeType, ShaderStageFlags};
use ash::{vk, Device};
use slotmap::SlotMap;
use std::ffi::CString;
use std::path::Path;

/// Uniform buffer descriptors a shader's pool can hand out
pub const POOL_UNIFORM_BUFFERS: u32 = 1024;

/// Combined image sampler descriptors a shader's pool can hand out
pub const POOL_IMAGE_SAMPLERS: u32 = 4096;

/// Stages push constants are visible to
pub const PUSH_CONSTANT_STAGES: vk::ShaderStageFlags = vk::ShaderStageFlags::from_raw(
    vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw(),
);

/// Vertex format of an attribute type
pub fn attribute_format(attribute_type: ShaderAttributeType) -> vk::Format {
    match attribute_type {
        ShaderAttributeType::Float32 => vk::Format::R32_SFLOAT,
        ShaderAttributeType::Float32x2 => vk::Format::R32G32_SFLOAT,
        ShaderAttributeType::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        ShaderAttributeType::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
        ShaderAttributeType::Int8 => vk::Format::R8_SINT,
        ShaderAttributeType::Int16 => vk::Format::R16_SINT,
        ShaderAttributeType::Int32 => vk::Format::R32_SINT,
        ShaderAttributeType::UInt8 => vk::Format::R8_UINT,
        ShaderAttributeType::UInt16 => vk::Format::R16_UINT,
        ShaderAttributeType::UInt32 => vk::Format::R32_UINT,
    }
}

/// Vulkan stage of a declared stage; only vertex and fragment are supported
pub fn stage_flags(stage: ShaderStageFlags) -> Option<vk::ShaderStageFlags> {
    if stage == ShaderStageFlags::VERTEX {
        Some(vk::ShaderStageFlags::VERTEX)
    } else if stage == ShaderStageFlags::FRAGMENT {
        Some(vk::ShaderStageFlags::FRAGMENT)
    } else {
        None
    }
}

/// Pool sizes and set count for a shader
pub fn descriptor_pool_plan(image_count: u32, max_instances: u32) -> ([vk::DescriptorPoolSize; 2], u32) {
    let sizes = [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: POOL_UNIFORM_BUFFERS,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: POOL_IMAGE_SAMPLERS,
        },
    ];
    (sizes, image_count * (1 + max_instances))
}

/// Bindings of one descriptor set layout
pub fn set_layout_bindings(has_ubo: bool, sampler_count: u32) -> Vec<vk::DescriptorSetLayoutBinding> {
    let mut bindings = Vec::with_capacity(2);
    if has_ubo {
        bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(UBO_BINDING)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(PUSH_CONSTANT_STAGES)
                .build(),
        );
    }
    if sampler_count > 0 {
        bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(SAMPLER_BINDING)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(sampler_count)
                .stage_flags(PUSH_CONSTANT_STAGES)
                .build(),
        );
    }
    bindings
}

/// Slots whose descriptor is stale, given the textures last written.
/// A slot is stale when its handle or its generation changed.
pub fn stale_sampler_slots(textures: &[BoundTexture], written: &[Option<BoundTexture>]) -> Vec<usize> {
    textures
        .iter()
        .zip(written)
        .enumerate()
        .filter(|(_, (texture, written))| written.as_ref() != Some(*texture))
        .map(|(slot, _)| slot)
        .collect()
}

/// SPIR-V module for one stage
struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
}

impl ShaderModule {
    fn from_file(device: &Device, path: &Path, stage: vk::ShaderStageFlags) -> VulkanResult<Self> {
        let words = load_spirv(path).map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe { device.create_shader_module(&create_info, None).map_err(VulkanError::Api)? };
        Ok(Self {
            device: device.clone(),
            module,
            stage,
        })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}

struct DescriptorSetLayout {
    device: Device,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    fn new(device: &Device, bindings: &[vk::DescriptorSetLayoutBinding]) -> VulkanResult<Self> {
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&info, None).map_err(VulkanError::Api)? };
        Ok(Self {
            device: device.clone(),
            layout,
        })
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_set_layout(self.layout, None) };
    }
}

struct DescriptorPool {
    device: Device,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    fn new(device: &Device, image_count: u32, max_instances: u32) -> VulkanResult<Self> {
        let (sizes, max_sets) = descriptor_pool_plan(image_count, max_instances);
        let info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&sizes);
        let pool = unsafe { device.create_descriptor_pool(&info, None).map_err(VulkanError::Api)? };
        Ok(Self {
            device: device.clone(),
            pool,
        })
    }

    fn allocate(&self, layout: vk::DescriptorSetLayout, count: usize) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        unsafe { self.device.allocate_descriptor_sets(&info).map_err(VulkanError::Api) }
    }

    fn free(&self, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        if sets.is_empty() {
            return Ok(());
        }
        unsafe { self.device.free_descriptor_sets(self.pool, sets).map_err(VulkanError::Api) }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.destroy_descriptor_pool(self.pool, None) };
    }
}

struct ShaderInstance {
    offset: u64,
    sets: Vec<vk::DescriptorSet>,
    textures: Vec<BoundTexture>,
    // Per image, per sampler slot
    written_textures: Vec<Vec<Option<BoundTexture>>>,
    ubo_written: Vec<bool>,
}

/// Objects built by initialization; fields drop in declaration order
struct ShaderResources {
    pipeline: VulkanPipeline,
    pool: DescriptorPool,
    _global_layout: DescriptorSetLayout,
    instance_layout: Option<DescriptorSetLayout>,
    uniform_buffer: VulkanBuffer,
    ubo_space: FreeList,
    global_ubo_offset: u64,
    global_ubo_stride: u64,
    ubo_stride: u64,
    global_sets: Vec<vk::DescriptorSet>,
    global_textures: Vec<Option<BoundTexture>>,
    instances: Vec<Option<ShaderInstance>>,
    max_instances: usize,
}

/// Backend half of a [`Shader`]
pub struct VulkanShader {
    device: Device,
    name: String,
    render_pass: vk::RenderPass,
    resources: Option<ShaderResources>,
    modules: Vec<ShaderModule>,
}

impl VulkanShader {
    /// Load the stage modules for `shader`, which will render in `render_pass`
    pub fn new(device: &Device, shader: &Shader, render_pass: vk::RenderPass) -> VulkanResult<Self> {
        let mut modules = Vec::with_capacity(shader.stages.len());
        for (stage, file) in shader.stages.iter().zip(&shader.stage_files) {
            let Some(flags) = stage_flags(*stage) else {
                log::warn!("[SHADER] '{}': unsupported stage {:?} skipped", shader.name, stage);
                continue;
            };
            modules.push(ShaderModule::from_file(device, Path::new(file), flags)?);
        }
        if modules.is_empty() {
            return Err(VulkanError::InitializationFailed(format!(
                "shader '{}' has no usable stages",
                shader.name
            )));
        }
        log::debug!("[SHADER] '{}': {} stage modules loaded", shader.name, modules.len());
        Ok(Self {
            device: device.clone(),
            name: shader.name.clone(),
            render_pass,
            resources: None,
            modules,
        })
    }

    /// Whether `initialize` has succeeded
    pub fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    /// Build pipeline, descriptors and uniform buffer. Sets the shader's
    /// strides and global offset.
    pub fn initialize(
        &mut self,
        device: &VulkanDevice,
        shader: &mut Shader,
        image_count: usize,
        extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        if self.resources.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("shader '{}' is already initialized", self.name),
            });
        }
        let raw = &device.device;
        let size = shader.compute_strides(device.min_uniform_alignment());
        let global_stride = shader.global_ubo_stride();
        let ubo_stride = shader.ubo_stride();
        let global_texture_count = shader.global_texture_count();
        let instance_texture_count = shader.instance_texture_count();

        let pool = DescriptorPool::new(raw, image_count as u32, shader.max_instances)?;
        let global_layout = DescriptorSetLayout::new(raw, &set_layout_bindings(global_stride > 0, global_texture_count))?;
        let instance_layout = if shader.use_instances {
            Some(DescriptorSetLayout::new(
                raw,
                &set_layout_bindings(shader.ubo_size() > 0, instance_texture_count),
            )?)
        } else {
            None
        };

        let mut set_layouts = vec![global_layout.layout];
        if let Some(layout) = &instance_layout {
            set_layouts.push(layout.layout);
        }
        debug_assert_eq!(set_layouts.len() > usize::from(INSTANCE_SET_INDEX), shader.use_instances);

        let attributes: Vec<vk::VertexInputAttributeDescription> = shader
            .attributes()
            .iter()
            .enumerate()
            .map(|(location, attribute)| vk::VertexInputAttributeDescription {
                location: location as u32,
                binding: 0,
                format: attribute_format(attribute.attribute_type),
                offset: attribute.offset,
            })
            .collect();
        let push_constant_ranges: Vec<vk::PushConstantRange> = shader
            .push_constant_ranges()
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: PUSH_CONSTANT_STAGES,
                offset: range.offset,
                size: range.size,
            })
            .collect();

        let entry_point = CString::new("main").map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = self
            .modules
            .iter()
            .map(|module| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(module.stage)
                    .module(module.module)
                    .name(&entry_point)
                    .build()
            })
            .collect();

        // Flipped so +y is up in clip space
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
        let pipeline = VulkanPipeline::new(
            raw,
            &PipelineConfig {
                render_pass: self.render_pass,
                vertex_stride: shader.attribute_stride(),
                attributes: &attributes,
                descriptor_set_layouts: &set_layouts,
                stages: &stages,
                viewport,
                scissor,
                cull_mode: shader.cull_mode,
                wireframe: shader.wireframe,
                depth_test: shader.depth_test,
                push_constant_ranges: &push_constant_ranges,
            },
        )?;

        let mut uniform_buffer = VulkanBuffer::new(
            device,
            size.max(1),
            vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        uniform_buffer.map()?;

        let mut ubo_space = FreeList::new(size);
        let global_ubo_offset = if global_stride > 0 {
            ubo_space
                .allocate(global_stride)
                .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?
        } else {
            0
        };
        let global_sets = pool.allocate(global_layout.layout, image_count)?;

        shader.set_global_ubo_offset(global_ubo_offset);
        self.resources = Some(ShaderResources {
            pipeline,
            pool,
            _global_layout: global_layout,
            instance_layout,
            uniform_buffer,
            ubo_space,
            global_ubo_offset,
            global_ubo_stride: global_stride,
            ubo_stride,
            global_sets,
            global_textures: vec![None; global_texture_count as usize],
            instances: Vec::new(),
            max_instances: shader.max_instances as usize,
        });
        log::info!(
            "[SHADER] '{}' initialized: uniform buffer {} bytes, {} images",
            self.name,
            size,
            image_count
        );
        Ok(())
    }

    fn resources(&self) -> VulkanResult<&ShaderResources> {
        self.resources.as_ref().ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("shader '{}' is not initialized", self.name),
        })
    }

    fn resources_mut(&mut self) -> VulkanResult<&mut ShaderResources> {
        let name = &self.name;
        self.resources.as_mut().ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("shader '{name}' is not initialized"),
        })
    }

    /// Bind the pipeline
    pub fn bind(&self, command_buffer: &CommandBuffer) -> VulkanResult<()> {
        self.resources()?.pipeline.bind(command_buffer);
        Ok(())
    }

    /// Uniform buffer offset of an instance
    pub fn instance_offset(&self, instance_id: u32) -> VulkanResult<u64> {
        self.resources()?
            .instances
            .get(instance_id as usize)
            .and_then(Option::as_ref)
            .map(|instance| instance.offset)
            .ok_or(VulkanError::ResourceNotFound {
                id: u64::from(instance_id),
            })
    }

    /// Write this image's global set and bind it
    pub fn apply_globals(
        &self,
        command_buffer: &CommandBuffer,
        image_index: usize,
        textures: &SlotMap<TextureHandle, VulkanTexture>,
    ) -> VulkanResult<()> {
        let resources = self.resources()?;
        let set = *resources
            .global_sets
            .get(image_index)
            .ok_or(VulkanError::ResourceNotFound { id: image_index as u64 })?;

        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: resources.uniform_buffer.handle(),
            offset: resources.global_ubo_offset,
            range: resources.global_ubo_stride,
        }];
        let mut image_infos = Vec::with_capacity(resources.global_textures.len());
        for (slot, texture) in resources.global_textures.iter().enumerate() {
            let info = texture
                .and_then(|texture| textures.get(texture.handle))
                .map(VulkanTexture::descriptor_info)
                .ok_or_else(|| VulkanError::InvalidOperation {
                    reason: format!("shader '{}' global sampler {} has no texture", self.name, slot),
                })?;
            image_infos.push(info);
        }

        let mut writes = Vec::with_capacity(2);
        if resources.global_ubo_stride > 0 {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(UBO_BINDING)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_info)
                    .build(),
            );
        }
        if !image_infos.is_empty() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(SAMPLER_BINDING)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_infos)
                    .build(),
            );
        }
        unsafe {
            if !writes.is_empty() {
                self.device.update_descriptor_sets(&writes, &[]);
            }
            self.device.cmd_bind_descriptor_sets(
                command_buffer.handle(),
                vk::PipelineBindPoint::GRAPHICS,
                resources.pipeline.layout(),
                u32::from(GLOBAL_SET_INDEX),
                &[set],
                &[],
            );
        }
        Ok(())
    }

    /// Write stale descriptors of an instance's set for this image (only if
    /// `needs_update`) and bind it
    pub fn apply_instance(
        &mut self,
        command_buffer: &CommandBuffer,
        image_index: usize,
        instance_id: u32,
        needs_update: bool,
        textures: &SlotMap<TextureHandle, VulkanTexture>,
    ) -> VulkanResult<()> {
        let device = self.device.clone();
        let name = self.name.clone();
        let resources = self.resources_mut()?;
        let buffer = resources.uniform_buffer.handle();
        let ubo_stride = resources.ubo_stride;
        let layout = resources.pipeline.layout();
        let instance = resources
            .instances
            .get_mut(instance_id as usize)
            .and_then(Option::as_mut)
            .ok_or(VulkanError::ResourceNotFound {
                id: u64::from(instance_id),
            })?;
        let set = *instance
            .sets
            .get(image_index)
            .ok_or(VulkanError::ResourceNotFound { id: image_index as u64 })?;

        if needs_update {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer,
                offset: instance.offset,
                range: ubo_stride,
            }];
            let write_ubo = ubo_stride > 0 && !instance.ubo_written[image_index];

            let stale = stale_sampler_slots(&instance.textures, &instance.written_textures[image_index]);
            let mut image_infos = Vec::with_capacity(stale.len());
            for &slot in &stale {
                let texture = instance.textures[slot];
                let info = textures
                    .get(texture.handle)
                    .map(VulkanTexture::descriptor_info)
                    .ok_or_else(|| VulkanError::InvalidOperation {
                        reason: format!("shader '{name}' instance {instance_id} sampler {slot} has no texture"),
                    })?;
                image_infos.push([info]);
            }

            let mut writes = Vec::with_capacity(1 + stale.len());
            if write_ubo {
                writes.push(
                    vk::WriteDescriptorSet::builder()
                        .dst_set(set)
                        .dst_binding(UBO_BINDING)
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(&buffer_info)
                        .build(),
                );
            }
            for (&slot, info) in stale.iter().zip(&image_infos) {
                writes.push(
                    vk::WriteDescriptorSet::builder()
                        .dst_set(set)
                        .dst_binding(SAMPLER_BINDING)
                        .dst_array_element(slot as u32)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(info)
                        .build(),
                );
            }
            if !writes.is_empty() {
                unsafe { device.update_descriptor_sets(&writes, &[]) };
            }
            if write_ubo {
                instance.ubo_written[image_index] = true;
            }
            for slot in stale {
                instance.written_textures[image_index][slot] = Some(instance.textures[slot]);
            }
        }

        unsafe {
            device.cmd_bind_descriptor_sets(
                command_buffer.handle(),
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                u32::from(INSTANCE_SET_INDEX),
                &[set],
                &[],
            );
        }
        Ok(())
    }

    /// Reserve an instance slot with its uniform region and descriptor sets
    pub fn acquire_instance(&mut self, textures: &[BoundTexture], image_count: usize) -> VulkanResult<u32> {
        let resources = self.resources_mut()?;
        let Some(layout) = resources.instance_layout.as_ref().map(|layout| layout.layout) else {
            return Err(VulkanError::InvalidOperation {
                reason: "shader does not use instances".to_string(),
            });
        };
        let slot = match resources.instances.iter().position(Option::is_none) {
            Some(slot) => slot,
            None if resources.instances.len() < resources.max_instances => {
                resources.instances.push(None);
                resources.instances.len() - 1
            }
            None => {
                return Err(VulkanError::OutOfMemory {
                    requested: resources.ubo_stride as usize,
                })
            }
        };
        let offset = if resources.ubo_stride > 0 {
            resources
                .ubo_space
                .allocate(resources.ubo_stride)
                .map_err(|_| VulkanError::OutOfMemory {
                    requested: resources.ubo_stride as usize,
                })?
        } else {
            0
        };
        let sets = match resources.pool.allocate(layout, image_count) {
            Ok(sets) => sets,
            Err(e) => {
                if resources.ubo_stride > 0 {
                    let _ = resources.ubo_space.free(offset, resources.ubo_stride);
                }
                return Err(e);
            }
        };
        resources.instances[slot] = Some(ShaderInstance {
            offset,
            sets,
            textures: textures.to_vec(),
            written_textures: vec![vec![None; textures.len()]; image_count],
            ubo_written: vec![false; image_count],
        });
        Ok(slot as u32)
    }

    /// Free an instance's descriptor sets and uniform region
    pub fn release_instance(&mut self, instance_id: u32) -> VulkanResult<()> {
        let resources = self.resources_mut()?;
        let instance = resources
            .instances
            .get_mut(instance_id as usize)
            .and_then(Option::take)
            .ok_or(VulkanError::ResourceNotFound {
                id: u64::from(instance_id),
            })?;
        resources.pool.free(&instance.sets)?;
        if resources.ubo_stride > 0 {
            resources
                .ubo_space
                .free(instance.offset, resources.ubo_stride)
                .map_err(|e| VulkanError::InvalidOperation { reason: e.to_string() })?;
        }
        Ok(())
    }

    /// Copy uniform bytes into the mapped buffer at `offset`
    pub fn write_uniform(&mut self, offset: u64, bytes: &[u8]) -> VulkanResult<()> {
        self.resources_mut()?.uniform_buffer.load_data(offset, bytes)
    }

    /// Record a push constant write
    pub fn push_constants(&self, command_buffer: &CommandBuffer, offset: u32, bytes: &[u8]) -> VulkanResult<()> {
        let layout = self.resources()?.pipeline.layout();
        unsafe {
            self.device
                .cmd_push_constants(command_buffer.handle(), layout, PUSH_CONSTANT_STAGES, offset, bytes);
        }
        Ok(())
    }

    /// Assign a global sampler slot
    pub fn set_global_texture(&mut self, slot: usize, texture: BoundTexture) -> VulkanResult<()> {
        let target = self
            .resources_mut()?
            .global_textures
            .get_mut(slot)
            .ok_or(VulkanError::ResourceNotFound { id: slot as u64 })?;
        *target = Some(texture);
        Ok(())
    }

    /// Assign a sampler slot of an instance
    pub fn set_instance_texture(&mut self, instance_id: u32, slot: usize, texture: BoundTexture) -> VulkanResult<()> {
        let target = self
            .resources_mut()?
            .instances
            .get_mut(instance_id as usize)
            .and_then(Option::as_mut)
            .and_then(|instance| instance.textures.get_mut(slot))
            .ok_or(VulkanError::ResourceNotFound { id: slot as u64 })?;
        *target = texture;
        Ok(())
    }
}

impl Drop for VulkanShader {
    fn drop(&mut self) {
        log::debug!("[SHADER] Destroying '{}'", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_formats() {
        assert_eq!(attribute_format(ShaderAttributeType::Float32), vk::Format::R32_SFLOAT);
        assert_eq!(attribute_format(ShaderAttributeType::Float32x3), vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attribute_format(ShaderAttributeType::Int16), vk::Format::R16_SINT);
        assert_eq!(attribute_format(ShaderAttributeType::UInt32), vk::Format::R32_UINT);
    }

    #[test]
    fn test_only_vertex_and_fragment_stages() {
        assert_eq!(stage_flags(ShaderStageFlags::VERTEX), Some(vk::ShaderStageFlags::VERTEX));
        assert_eq!(stage_flags(ShaderStageFlags::FRAGMENT), Some(vk::ShaderStageFlags::FRAGMENT));
        assert_eq!(stage_flags(ShaderStageFlags::GEOMETRY), None);
        assert_eq!(stage_flags(ShaderStageFlags::COMPUTE), None);
    }

    #[test]
    fn test_pool_plan_covers_every_image() {
        let (sizes, max_sets) = descriptor_pool_plan(3, 1024);
        assert_eq!(max_sets, 3 * 1025);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 1024);
        assert_eq!(sizes[1].descriptor_count, 4096);
    }

    #[test]
    fn test_layout_bindings() {
        let both = set_layout_bindings(true, 2);
        assert_eq!(both.len(), 2);
        assert_eq!(both[0].binding, UBO_BINDING);
        assert_eq!(both[1].binding, SAMPLER_BINDING);
        assert_eq!(both[1].descriptor_count, 2);

        let samplers_only = set_layout_bindings(false, 1);
        assert_eq!(samplers_only.len(), 1);
        assert_eq!(samplers_only[0].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert!(set_layout_bindings(false, 0).is_empty());
    }

    #[test]
    fn test_stale_slots_follow_generations() {
        let mut handles: SlotMap<TextureHandle, ()> = SlotMap::with_key();
        let a = handles.insert(());
        let textures = [
            BoundTexture { handle: a, generation: 0 },
            BoundTexture { handle: a, generation: 2 },
        ];
        let old = BoundTexture { handle: a, generation: 1 };
        assert_eq!(stale_sampler_slots(&textures, &[None, None]), vec![0, 1]);
        assert_eq!(stale_sampler_slots(&textures, &[Some(textures[0]), Some(old)]), vec![1]);
        assert!(stale_sampler_slots(&textures, &[Some(textures[0]), Some(textures[1])]).is_empty());
    }

    #[test]
    fn test_stale_slots_follow_handles() {
        let mut handles: SlotMap<TextureHandle, ()> = SlotMap::with_key();
        let default = handles.insert(());
        let loaded = handles.insert(());
        // The default texture and a freshly loaded one both sit at generation 0
        let written = [Some(BoundTexture { handle: default, generation: 0 })];
        let textures = [BoundTexture { handle: loaded, generation: 0 }];
        assert_eq!(stale_sampler_slots(&textures, &written), vec![0]);
    }
}

//! Images, views and sampled textures

use super::buffer::VulkanBuffer;
use super::commands::CommandBuffer;
use super::device::VulkanDevice;
use super::{VulkanError, VulkanResult};
use crate::render::backend::TextureDesc;
use crate::render::types::TextureType;
use ash::{vk, Device};

const MAX_ANISOTROPY: f32 = 16.0;

/// Image creation parameters
#[derive(Debug, Clone, Copy)]
pub struct ImageSpec {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Aspect of the view
    pub aspect: vk::ImageAspectFlags,
    /// Six layers viewed as a cube
    pub cube: bool,
}

/// Access masks and stages of a layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    /// Access before the barrier
    pub src_access: vk::AccessFlags,
    /// Access after the barrier
    pub dst_access: vk::AccessFlags,
    /// Stage before the barrier
    pub src_stage: vk::PipelineStageFlags,
    /// Stage after the barrier
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier masks for the layout changes textures go through
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Option<TransitionMasks> {
    use vk::ImageLayout as L;
    let masks = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        },
        (L::SHADER_READ_ONLY_OPTIMAL, L::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::SHADER_READ,
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        _ => return None,
    };
    Some(masks)
}

/// Pixel format for a channel count
pub fn texture_format(channel_count: u8) -> Option<vk::Format> {
    match channel_count {
        1 => Some(vk::Format::R8_UNORM),
        2 => Some(vk::Format::R8G8_UNORM),
        4 => Some(vk::Format::R8G8B8A8_UNORM),
        _ => None,
    }
}

/// Image, its memory and one view over all layers
pub struct VulkanImage {
    device: Device,
    handle: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    spec: ImageSpec,
}

impl VulkanImage {
    /// Create an optimally tiled, device-local image with a view
    pub fn new(device: &VulkanDevice, spec: ImageSpec) -> VulkanResult<Self> {
        let raw = &device.device;
        let layers = if spec.cube { 6 } else { 1 };
        let flags = if spec.cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let image_info = vk::ImageCreateInfo::builder()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: spec.width,
                height: spec.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(layers)
            .format(spec.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(spec.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let handle = unsafe { raw.create_image(&image_info, None).map_err(VulkanError::Api)? };

        let requirements = unsafe { raw.get_image_memory_requirements(handle) };
        let memory = device
            .find_memory_index(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .and_then(|memory_type| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type);
                unsafe { raw.allocate_memory(&alloc_info, None).map_err(VulkanError::Api) }
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { raw.destroy_image(handle, None) };
                return Err(e);
            }
        };

        let mut image = Self {
            device: raw.clone(),
            handle,
            memory,
            view: vk::ImageView::null(),
            spec,
        };
        unsafe {
            raw.bind_image_memory(handle, memory, 0).map_err(VulkanError::Api)?;
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(handle)
            .view_type(if spec.cube {
                vk::ImageViewType::CUBE
            } else {
                vk::ImageViewType::TYPE_2D
            })
            .format(spec.format)
            .subresource_range(image.subresource_range());
        image.view = unsafe { raw.create_image_view(&view_info, None).map_err(VulkanError::Api)? };
        Ok(image)
    }

    fn layer_count(&self) -> u32 {
        if self.spec.cube {
            6
        } else {
            1
        }
    }

    fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.spec.aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: self.layer_count(),
        }
    }

    /// Record a layout transition of every layer
    pub fn transition_layout(
        &self,
        command_buffer: &CommandBuffer,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> VulkanResult<()> {
        let masks = transition_masks(old, new).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("unsupported layout transition {old:?} -> {new:?}"),
        })?;
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.handle)
            .subresource_range(self.subresource_range())
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access)
            .build();
        unsafe {
            self.device.cmd_pipeline_barrier(
                command_buffer.handle(),
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        Ok(())
    }

    /// Record a copy of tightly packed layers from `buffer`
    pub fn copy_from_buffer(&self, command_buffer: &CommandBuffer, buffer: vk::Buffer) {
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: self.spec.aspect,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: self.layer_count(),
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: self.spec.width,
                height: self.spec.height,
                depth: 1,
            })
            .build();
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                command_buffer.handle(),
                buffer,
                self.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    /// Image handle
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    /// View over all layers
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Creation parameters
    pub fn spec(&self) -> &ImageSpec {
        &self.spec
    }
}

impl Drop for VulkanImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.handle, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Sampled texture: image, view and sampler
pub struct VulkanTexture {
    device: Device,
    image: VulkanImage,
    sampler: vk::Sampler,
    desc: TextureDesc,
}

impl VulkanTexture {
    /// Create the texture and upload `pixels` (every layer)
    pub fn new(device: &VulkanDevice, desc: &TextureDesc, pixels: &[u8]) -> VulkanResult<Self> {
        let format = texture_format(desc.channel_count).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("texture '{}' has unsupported channel count {}", desc.name, desc.channel_count),
        })?;
        if pixels.len() != desc.byte_size() {
            return Err(VulkanError::InvalidOperation {
                reason: format!("texture '{}' expects {} bytes, got {}", desc.name, desc.byte_size(), pixels.len()),
            });
        }

        let cube = desc.texture_type == TextureType::Cube;
        let image = VulkanImage::new(
            device,
            ImageSpec {
                width: desc.width,
                height: desc.height,
                format,
                usage: vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                aspect: vk::ImageAspectFlags::COLOR,
                cube,
            },
        )?;
        Self::upload(device, &image, pixels, vk::ImageLayout::UNDEFINED)?;

        let address_mode = if cube {
            vk::SamplerAddressMode::CLAMP_TO_EDGE
        } else {
            vk::SamplerAddressMode::REPEAT
        };
        let max_anisotropy = MAX_ANISOTROPY.min(device.properties.limits.max_sampler_anisotropy);
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .anisotropy_enable(true)
            .max_anisotropy(max_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);
        let sampler = unsafe {
            device
                .device
                .create_sampler(&sampler_info, None)
                .map_err(VulkanError::Api)?
        };

        log::debug!("[TEXTURE] Created '{}' {}x{}", desc.name, desc.width, desc.height);
        Ok(Self {
            device: device.device.clone(),
            image,
            sampler,
            desc: desc.clone(),
        })
    }

    fn upload(device: &VulkanDevice, image: &VulkanImage, pixels: &[u8], from: vk::ImageLayout) -> VulkanResult<()> {
        let mut staging = VulkanBuffer::staging(device, pixels.len() as vk::DeviceSize)?;
        staging.load_data(0, pixels)?;

        let command_buffer = CommandBuffer::begin_single_use(&device.device, device.graphics_command_pool)?;
        image.transition_layout(&command_buffer, from, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        image.copy_from_buffer(&command_buffer, staging.handle());
        image.transition_layout(
            &command_buffer,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        command_buffer.end_single_use(device.graphics_queue)
    }

    /// Replace the full contents
    pub fn write(&mut self, device: &VulkanDevice, pixels: &[u8]) -> VulkanResult<()> {
        if pixels.len() != self.desc.byte_size() {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "texture '{}' writes must cover all {} bytes",
                    self.desc.name,
                    self.desc.byte_size()
                ),
            });
        }
        Self::upload(device, &self.image, pixels, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }

    /// Descriptor for a combined image sampler binding
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.image.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// Creation parameters
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    /// Underlying image
    pub fn image(&self) -> &VulkanImage {
        &self.image
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transitions() {
        let to_transfer =
            transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(to_transfer.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(to_transfer.dst_access, vk::AccessFlags::TRANSFER_WRITE);

        let to_read =
            transition_masks(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .unwrap();
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        assert!(transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::PRESENT_SRC_KHR).is_none());
    }

    #[test]
    fn test_texture_formats() {
        assert_eq!(texture_format(4), Some(vk::Format::R8G8B8A8_UNORM));
        assert_eq!(texture_format(1), Some(vk::Format::R8_UNORM));
        assert_eq!(texture_format(3), None);
    }
}

//! Buffers
//!
//! Device-local buffers are filled through a host-visible staging buffer and
//! a single-use command buffer. Host-visible buffers can stay mapped for
//! their whole life.

use super::commands::CommandBuffer;
use super::device::VulkanDevice;
use super::{VulkanError, VulkanResult};
use ash::{vk, Device};
use std::ptr::NonNull;

/// Buffer wrapper with memory management
pub struct VulkanBuffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    mapped: Option<NonNull<u8>>,
}

impl VulkanBuffer {
    /// Create a buffer and bind fresh memory to it
    pub fn new(
        device: &VulkanDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let raw = &device.device;
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { raw.create_buffer(&buffer_info, None).map_err(VulkanError::Api)? };

        let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };
        let memory_type = match device.find_memory_index(requirements.memory_type_bits, properties) {
            Ok(index) => index,
            Err(e) => {
                unsafe { raw.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        let memory = match unsafe { raw.allocate_memory(&alloc_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { raw.destroy_buffer(buffer, None) };
                log::error!("[BUFFER] Allocation of {} bytes failed: {:?}", requirements.size, e);
                return Err(match e {
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                        VulkanError::OutOfMemory {
                            requested: requirements.size as usize,
                        }
                    }
                    other => VulkanError::Api(other),
                });
            }
        };

        // Owned from here on, so Drop cleans up on failure
        let buffer = Self {
            device: raw.clone(),
            buffer,
            memory,
            size,
            usage,
            mapped: None,
        };
        unsafe {
            raw.bind_buffer_memory(buffer.buffer, buffer.memory, 0)
                .map_err(VulkanError::Api)?;
        }
        Ok(buffer)
    }

    /// Host-visible, coherent transfer source
    pub fn staging(device: &VulkanDevice, size: vk::DeviceSize) -> VulkanResult<Self> {
        Self::new(
            device,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Map the whole buffer until [`unmap`](Self::unmap) or drop
    pub fn map(&mut self) -> VulkanResult<()> {
        if self.mapped.is_none() {
            let ptr = unsafe {
                self.device
                    .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                    .map_err(VulkanError::Api)?
            };
            self.mapped = NonNull::new(ptr.cast::<u8>());
        }
        Ok(())
    }

    /// Unmap a mapped buffer
    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            unsafe { self.device.unmap_memory(self.memory) };
        }
    }

    /// Copy `data` to `offset`, mapping temporarily if needed
    pub fn load_data(&mut self, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let end = offset + data.len() as vk::DeviceSize;
        if end > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes at {} exceeds buffer of {}", data.len(), offset, self.size),
            });
        }
        let was_mapped = self.mapped.is_some();
        self.map()?;
        if let Some(base) = self.mapped {
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), base.as_ptr().add(offset as usize), data.len());
            }
        }
        if !was_mapped {
            self.unmap();
        }
        Ok(())
    }

    /// Record a copy of `size` bytes into `dst`
    pub fn record_copy_to(
        &self,
        command_buffer: &CommandBuffer,
        dst: vk::Buffer,
        src_offset: vk::DeviceSize,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) {
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.device
                .cmd_copy_buffer(command_buffer.handle(), self.buffer, dst, &[region]);
        }
    }

    /// Upload `data` at `offset` through a staging buffer, waiting on `queue`
    pub fn upload(
        &self,
        device: &VulkanDevice,
        pool: vk::CommandPool,
        queue: vk::Queue,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VulkanResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let size = data.len() as vk::DeviceSize;
        let mut staging = Self::staging(device, size)?;
        staging.load_data(0, data)?;

        let command_buffer = CommandBuffer::begin_single_use(&device.device, pool)?;
        staging.record_copy_to(&command_buffer, self.buffer, 0, offset, size);
        command_buffer.end_single_use(queue)
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        self.unmap();
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

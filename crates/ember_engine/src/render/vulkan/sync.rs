//! Semaphores and fences

use super::{VulkanError, VulkanResult};
use ash::{vk, Device};

/// GPU-GPU synchronization primitive with automatic cleanup
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: &Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { device.create_semaphore(&create_info, None).map_err(VulkanError::Api)? };
        Ok(Self {
            device: device.clone(),
            semaphore,
        })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence that remembers whether it is known to be signalled
pub struct Fence {
    device: Device,
    fence: vk::Fence,
    is_signaled: bool,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: &Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { device.create_fence(&create_info, None).map_err(VulkanError::Api)? };
        Ok(Self {
            device: device.clone(),
            fence,
            is_signaled: signaled,
        })
    }

    /// Wait up to `timeout_ns`. `Ok(false)` on timeout; device loss and
    /// memory exhaustion are errors.
    pub fn wait(&mut self, timeout_ns: u64) -> VulkanResult<bool> {
        if self.is_signaled {
            return Ok(true);
        }
        match unsafe { self.device.wait_for_fences(&[self.fence], true, timeout_ns) } {
            Ok(()) => {
                self.is_signaled = true;
                Ok(true)
            }
            Err(vk::Result::TIMEOUT) => {
                log::warn!("[SYNC] Fence wait timed out after {} ns", timeout_ns);
                Ok(false)
            }
            Err(e) => {
                log::error!("[SYNC] Fence wait failed: {:?}", e);
                Err(VulkanError::Api(e))
            }
        }
    }

    /// Unsignal the fence; a no-op when it is not signalled
    pub fn reset(&mut self) -> VulkanResult<()> {
        if self.is_signaled {
            unsafe { self.device.reset_fences(&[self.fence]).map_err(VulkanError::Api)? };
            self.is_signaled = false;
        }
        Ok(())
    }

    /// Whether the fence is known to be signalled
    pub fn is_signaled(&self) -> bool {
        self.is_signaled
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

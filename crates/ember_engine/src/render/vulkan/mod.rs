//! Vulkan backend
//!
//! RAII wrappers over `ash` objects plus [`VulkanBackend`], the
//! [`RendererBackend`](crate::render::backend::RendererBackend) implementation
//! that drives them. Every wrapper keeps a clone of the `ash::Device` and
//! destroys its handles on drop.

pub mod backend;
pub mod buffer;
pub mod commands;
pub mod context;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;

use ash::vk;
use thiserror::Error;

pub use backend::VulkanBackend;
pub use context::{SurfaceProvider, VulkanInstance, VulkanSurface};
pub use device::{DeviceRequirements, VulkanDevice};

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Resource with specified ID could not be found
    #[error("Resource not found: {id}")]
    ResourceNotFound {
        /// The unique identifier of the resource
        id: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: usize,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Block until the device has no work in flight
pub(crate) fn wait_idle(device: &ash::Device) {
    if let Err(e) = unsafe { device.device_wait_idle() } {
        log::error!("[VULKAN] device_wait_idle failed: {:?}", e);
    }
}

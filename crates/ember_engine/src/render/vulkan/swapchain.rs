//! Swapchain and its depth attachment

use super::context::VulkanSurface;
use super::device::VulkanDevice;
use super::image::{ImageSpec, VulkanImage};
use super::{VulkanError, VulkanResult};
use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

/// Preferred format, falling back to the first one reported
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_UNORM && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// Mailbox when available, FIFO otherwise
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent when defined, else the window size clamped
/// to the supported range
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        height: height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    }
}

/// One more than the minimum, capped at the maximum when there is one
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Frames recorded ahead of the GPU: one less than the images, at least one
pub fn max_frames_in_flight(image_count: u32) -> u32 {
    image_count.saturating_sub(1).max(1)
}

/// Swapchain images, their views and a shared depth image
pub struct VulkanSwapchain {
    device: Device,
    loader: SwapchainLoader,
    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: VulkanImage,
    max_frames_in_flight: u32,
}

impl VulkanSwapchain {
    /// Create a swapchain for a `width` x `height` window
    pub fn new(device: &VulkanDevice, surface: &VulkanSurface, width: u32, height: u32) -> VulkanResult<Self> {
        Self::build(device, surface, width, height, vk::SwapchainKHR::null())
    }

    fn build(
        device: &VulkanDevice,
        surface: &VulkanSurface,
        width: u32,
        height: u32,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let support = device.swapchain_support(surface)?;
        let format = choose_surface_format(&support.formats)
            .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = choose_image_count(&support.capabilities);

        let families = [device.graphics_family, device.present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        create_info = if device.graphics_family == device.present_family {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        };

        let loader = device.swapchain_loader.clone();
        let handle = unsafe { loader.create_swapchain(&create_info, None).map_err(VulkanError::Api)? };
        let destroy_handle = |e: VulkanError| {
            unsafe { loader.destroy_swapchain(handle, None) };
            e
        };

        let images = unsafe { loader.get_swapchain_images(handle) }
            .map_err(VulkanError::Api)
            .map_err(destroy_handle)?;

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            match unsafe { device.device.create_image_view(&view_info, None) } {
                Ok(view) => views.push(view),
                Err(e) => {
                    for view in views {
                        unsafe { device.device.destroy_image_view(view, None) };
                    }
                    return Err(destroy_handle(VulkanError::Api(e)));
                }
            }
        }

        let depth = VulkanImage::new(
            device,
            ImageSpec {
                width: extent.width,
                height: extent.height,
                format: device.depth_format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                aspect: vk::ImageAspectFlags::DEPTH,
                cube: false,
            },
        );
        let depth = match depth {
            Ok(depth) => depth,
            Err(e) => {
                for view in views {
                    unsafe { device.device.destroy_image_view(view, None) };
                }
                return Err(destroy_handle(e));
            }
        };

        let max_frames_in_flight = max_frames_in_flight(images.len() as u32);
        log::info!(
            "[SWAPCHAIN] {}x{} {:?} {:?}, {} images, {} frame(s) in flight",
            extent.width,
            extent.height,
            format.format,
            present_mode,
            images.len(),
            max_frames_in_flight
        );

        Ok(Self {
            device: device.device.clone(),
            loader,
            handle,
            format,
            present_mode,
            extent,
            images,
            views,
            depth,
            max_frames_in_flight,
        })
    }

    /// Replace this swapchain with one sized `width` x `height`, handing the
    /// old handle to the driver
    pub fn recreate(
        &mut self,
        device: &VulkanDevice,
        surface: &VulkanSurface,
        width: u32,
        height: u32,
    ) -> VulkanResult<()> {
        device.wait_idle();
        let replacement = Self::build(device, surface, width, height, self.handle)?;
        // Dropping the old value releases its views, depth image and handle
        drop(std::mem::replace(self, replacement));
        Ok(())
    }

    /// Acquire the next image. `None` means the swapchain is out of date and
    /// must be recreated before rendering.
    pub fn acquire_next_image(
        &self,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> VulkanResult<Option<u32>> {
        match unsafe { self.loader.acquire_next_image(self.handle, timeout_ns, semaphore, fence) } {
            Ok((index, _suboptimal)) => Ok(Some(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(None),
            Err(e) => {
                log::error!("[SWAPCHAIN] Failed to acquire image: {:?}", e);
                Err(VulkanError::Api(e))
            }
        }
    }

    /// Queue `image_index` for presentation. `false` means out of date or
    /// suboptimal and the swapchain should be recreated.
    pub fn present(&self, queue: vk::Queue, wait_semaphore: vk::Semaphore, image_index: u32) -> VulkanResult<bool> {
        let wait = [wait_semaphore];
        let swapchains = [self.handle];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(true),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR) => Ok(false),
            Err(e) => {
                log::error!("[SWAPCHAIN] Failed to present: {:?}", e);
                Err(VulkanError::Api(e))
            }
        }
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Present mode in use
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Number of images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// View of image `index`
    pub fn image_view(&self, index: usize) -> Option<vk::ImageView> {
        self.views.get(index).copied()
    }

    /// Depth attachment view
    pub fn depth_view(&self) -> vk::ImageView {
        self.depth.view()
    }

    /// Frames that may be recorded while earlier ones are still on the GPU
    pub fn max_frames_in_flight(&self) -> u32 {
        self.max_frames_in_flight
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_image_count_and_frames_in_flight() {
        for (min, max) in [(1, 1), (1, 0), (2, 3), (2, 8), (3, 3), (2, 0)] {
            let caps = capabilities(min, max);
            let count = choose_image_count(&caps);
            assert!(count >= min);
            if max > 0 {
                assert!(count <= max);
            }
            let in_flight = max_frames_in_flight(count);
            assert!(in_flight >= 1);
            assert!(in_flight <= count);
        }
        assert_eq!(choose_image_count(&capabilities(2, 3)), 3);
        assert_eq!(max_frames_in_flight(3), 2);
        assert_eq!(max_frames_in_flight(1), 1);
    }

    #[test]
    fn test_surface_format_preference() {
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let preferred = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[srgb, preferred]), Some(preferred));
        assert_eq!(choose_surface_format(&[srgb]), Some(srgb));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn test_present_mode_preference() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_clamped_unless_defined() {
        let caps = capabilities(2, 3);
        assert_eq!(choose_extent(&caps, 8000, 0), vk::Extent2D { width: 4096, height: 1 });

        let mut fixed = caps;
        fixed.current_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        assert_eq!(choose_extent(&fixed, 800, 600), fixed.current_extent);
    }
}

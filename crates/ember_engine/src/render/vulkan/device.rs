//! Physical device selection and logical device
//!
//! Selection is split into pure functions over [`DeviceCandidate`]s so the
//! ranking can be checked without a GPU. [`VulkanDevice::new`] only gathers
//! the candidate data and creates the chosen device.

use super::context::{VulkanInstance, VulkanSurface};
use super::{VulkanError, VulkanResult};
use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};

/// Depth formats probed in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// One queue family as seen by the selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    /// Capability bits
    pub flags: vk::QueueFlags,
    /// Whether the family can present to the surface
    pub present: bool,
}

/// Queue families picked for each role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueFamilyIndices {
    /// Graphics family
    pub graphics: Option<u32>,
    /// Present family
    pub present: Option<u32>,
    /// Compute family
    pub compute: Option<u32>,
    /// Transfer family, preferring the least shared one
    pub transfer: Option<u32>,
}

/// Pick a family for each queue role.
///
/// Graphics is the first graphics family, which also becomes the present
/// family when it can present. Transfer goes to the transfer family with the
/// fewest other capabilities; ties go to the later family. Present falls back
/// to the first family that can present.
pub fn find_queue_families(families: &[QueueFamilyInfo]) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();
    let mut min_transfer_score = u32::MAX;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        let mut score = 0;

        if family.flags.contains(vk::QueueFlags::GRAPHICS) {
            if indices.graphics.is_none() {
                indices.graphics = Some(index);
                if family.present {
                    indices.present = Some(index);
                    score += 1;
                }
            }
            score += 1;
        }

        if family.flags.contains(vk::QueueFlags::COMPUTE) {
            indices.compute.get_or_insert(index);
            score += 1;
        }

        if family.flags.contains(vk::QueueFlags::TRANSFER) && score <= min_transfer_score {
            min_transfer_score = score;
            indices.transfer = Some(index);
        }
    }

    if indices.present.is_none() {
        indices.present = families.iter().position(|family| family.present).map(|index| index as u32);
    }
    indices
}

/// What a device must offer to be selected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequirements {
    /// Needs a graphics queue
    pub graphics: bool,
    /// Needs a present queue
    pub present: bool,
    /// Needs a compute queue
    pub compute: bool,
    /// Needs a transfer queue
    pub transfer: bool,
    /// Only accept discrete GPUs
    pub discrete_gpu: bool,
    /// Needs anisotropic filtering
    pub sampler_anisotropy: bool,
    /// Device extensions that must be present
    pub extensions: Vec<String>,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            graphics: true,
            present: true,
            compute: false,
            transfer: true,
            discrete_gpu: false,
            sampler_anisotropy: true,
            extensions: vec!["VK_KHR_swapchain".to_string()],
        }
    }
}

/// Everything the selector needs to know about one physical device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    /// Device name for logs
    pub name: String,
    /// Device category
    pub device_type: vk::PhysicalDeviceType,
    /// Queue families
    pub families: Vec<QueueFamilyInfo>,
    /// Supported extension names
    pub extensions: Vec<String>,
    /// Anisotropic filtering support
    pub sampler_anisotropy: bool,
    /// Surface formats available
    pub format_count: usize,
    /// Present modes available
    pub present_mode_count: usize,
}

/// Ranking of a device category, higher is better
pub fn device_type_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 4,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 1,
        _ => 0,
    }
}

/// Queue families of `candidate` if it meets `requirements`
pub fn evaluate(candidate: &DeviceCandidate, requirements: &DeviceRequirements) -> Option<QueueFamilyIndices> {
    let reject = |reason: &str| {
        log::debug!("[DEVICE] Rejecting '{}': {}", candidate.name, reason);
        None
    };

    if requirements.discrete_gpu && candidate.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
        return reject("not a discrete GPU");
    }

    let indices = find_queue_families(&candidate.families);
    if (requirements.graphics && indices.graphics.is_none())
        || (requirements.present && indices.present.is_none())
        || (requirements.compute && indices.compute.is_none())
        || (requirements.transfer && indices.transfer.is_none())
    {
        return reject("missing a required queue family");
    }

    if let Some(missing) = requirements
        .extensions
        .iter()
        .find(|wanted| !candidate.extensions.iter().any(|available| available == *wanted))
    {
        return reject(&format!("missing extension {missing}"));
    }

    if requirements.sampler_anisotropy && !candidate.sampler_anisotropy {
        return reject("no sampler anisotropy");
    }

    if candidate.format_count == 0 || candidate.present_mode_count == 0 {
        return reject("no surface formats or present modes");
    }

    Some(indices)
}

/// Index of the best candidate and its queue families. The first of
/// equally scored candidates wins.
pub fn select_device(
    candidates: &[DeviceCandidate],
    requirements: &DeviceRequirements,
) -> Option<(usize, QueueFamilyIndices)> {
    let mut best: Option<(usize, QueueFamilyIndices, u32)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let Some(indices) = evaluate(candidate, requirements) else {
            continue;
        };
        let score = device_type_score(candidate.device_type);
        if best.map_or(true, |(_, _, best_score)| score > best_score) {
            best = Some((index, indices, score));
        }
    }
    best.map(|(index, indices, _)| (index, indices))
}

/// First depth format usable as a depth-stencil attachment
pub fn choose_depth_format(properties: impl Fn(vk::Format) -> vk::FormatProperties) -> Option<vk::Format> {
    DEPTH_FORMAT_CANDIDATES.into_iter().find(|&format| {
        let props = properties(format);
        let usage = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        props.linear_tiling_features.contains(usage) || props.optimal_tiling_features.contains(usage)
    })
}

/// Surface capabilities, formats and present modes of a device
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupport {
    /// Surface capabilities
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// Query support of `physical_device` for `surface`
    pub fn query(physical_device: vk::PhysicalDevice, surface: &VulkanSurface) -> VulkanResult<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, surface.handle)
                    .map_err(VulkanError::Api)?,
                formats: surface
                    .loader
                    .get_physical_device_surface_formats(physical_device, surface.handle)
                    .map_err(VulkanError::Api)?,
                present_modes: surface
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, surface.handle)
                    .map_err(VulkanError::Api)?,
            })
        }
    }
}

/// Logical device, its queues and the graphics command pool
pub struct VulkanDevice {
    /// Selected physical device
    pub physical_device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Logical device
    pub device: Device,
    /// Graphics queue family
    pub graphics_family: u32,
    /// Present queue family
    pub present_family: u32,
    /// Transfer queue family
    pub transfer_family: u32,
    /// Compute queue family, when the device has one
    pub compute_family: Option<u32>,
    /// Graphics queue
    pub graphics_queue: vk::Queue,
    /// Present queue
    pub present_queue: vk::Queue,
    /// Transfer queue
    pub transfer_queue: vk::Queue,
    /// Pool for graphics command buffers
    pub graphics_command_pool: vk::CommandPool,
    /// Depth attachment format
    pub depth_format: vk::Format,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl VulkanDevice {
    /// Select the best physical device for `surface` and create the logical device
    pub fn new(
        instance: &VulkanInstance,
        surface: &VulkanSurface,
        requirements: &DeviceRequirements,
    ) -> VulkanResult<Self> {
        let instance_ref = &instance.instance;
        let physical_devices = unsafe { instance_ref.enumerate_physical_devices().map_err(VulkanError::Api)? };
        let candidates = physical_devices
            .iter()
            .map(|&physical_device| Self::describe(instance, surface, physical_device))
            .collect::<VulkanResult<Vec<_>>>()?;

        let (chosen, indices) = select_device(&candidates, requirements).ok_or_else(|| {
            log::error!("[DEVICE] No suitable GPU among {} device(s)", candidates.len());
            VulkanError::InitializationFailed("No suitable GPU found".to_string())
        })?;
        let physical_device = physical_devices[chosen];
        log::info!(
            "[DEVICE] Selected '{}' ({:?}) graphics={:?} present={:?} transfer={:?} compute={:?}",
            candidates[chosen].name,
            candidates[chosen].device_type,
            indices.graphics,
            indices.present,
            indices.transfer,
            indices.compute
        );

        let missing = |role: &str| VulkanError::InitializationFailed(format!("No {role} queue family"));
        let graphics_family = indices.graphics.ok_or_else(|| missing("graphics"))?;
        let present_family = indices.present.ok_or_else(|| missing("present"))?;
        let transfer_family = indices.transfer.unwrap_or(graphics_family);

        let depth_format = choose_depth_format(|format| unsafe {
            instance_ref.get_physical_device_format_properties(physical_device, format)
        })
        .ok_or_else(|| VulkanError::InitializationFailed("No supported depth format".to_string()))?;

        let unique_families: BTreeSet<u32> = [Some(graphics_family), Some(present_family), Some(transfer_family), indices.compute]
            .into_iter()
            .flatten()
            .collect();
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extension_names = requirements
            .extensions
            .iter()
            .map(|name| CString::new(name.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let extensions: Vec<*const c_char> = extension_names.iter().map(|name| name.as_ptr()).collect();

        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(requirements.sampler_anisotropy)
            .build();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe {
            instance_ref
                .create_device(physical_device, &create_info, None)
                .map_err(VulkanError::Api)?
        };

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(graphics_family);
        let graphics_command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(VulkanError::Api(e));
            }
        };

        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(graphics_family, 0),
                device.get_device_queue(present_family, 0),
                device.get_device_queue(transfer_family, 0),
            )
        };

        let properties = unsafe { instance_ref.get_physical_device_properties(physical_device) };
        let memory_properties = unsafe { instance_ref.get_physical_device_memory_properties(physical_device) };
        let swapchain_loader = SwapchainLoader::new(instance_ref, &device);

        Ok(Self {
            physical_device,
            properties,
            memory_properties,
            device,
            graphics_family,
            present_family,
            transfer_family,
            compute_family: indices.compute,
            graphics_queue,
            present_queue,
            transfer_queue,
            graphics_command_pool,
            depth_format,
            swapchain_loader,
        })
    }

    fn describe(
        instance: &VulkanInstance,
        surface: &VulkanSurface,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<DeviceCandidate> {
        let instance = &instance.instance;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let features = unsafe { instance.get_physical_device_features(physical_device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let families = queue_families
            .iter()
            .enumerate()
            .map(|(index, family)| {
                let present = unsafe {
                    surface
                        .loader
                        .get_physical_device_surface_support(physical_device, index as u32, surface.handle)
                        .map_err(VulkanError::Api)?
                };
                Ok(QueueFamilyInfo {
                    flags: family.queue_flags,
                    present,
                })
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(physical_device)
                .map_err(VulkanError::Api)?
        }
        .iter()
        .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_string_lossy().into_owned())
        .collect();

        let support = SwapchainSupport::query(physical_device, surface)?;

        Ok(DeviceCandidate {
            name: unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned(),
            device_type: properties.device_type,
            families,
            extensions,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            format_count: support.formats.len(),
            present_mode_count: support.present_modes.len(),
        })
    }

    /// Memory type index satisfying `type_bits` and `flags`
    pub fn find_memory_index(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        let props = &self.memory_properties;
        (0..props.memory_type_count)
            .find(|&i| {
                type_bits & (1 << i) != 0 && props.memory_types[i as usize].property_flags.contains(flags)
            })
            .ok_or(VulkanError::NoSuitableMemoryType)
    }

    /// Current swapchain support for `surface`
    pub fn swapchain_support(&self, surface: &VulkanSurface) -> VulkanResult<SwapchainSupport> {
        SwapchainSupport::query(self.physical_device, surface)
    }

    /// Alignment of uniform buffer offsets
    pub fn min_uniform_alignment(&self) -> u64 {
        self.properties.limits.min_uniform_buffer_offset_alignment.max(1)
    }

    /// Block until the device is idle
    pub fn wait_idle(&self) {
        super::wait_idle(&self.device);
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.graphics_command_pool, None);
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, present: bool) -> QueueFamilyInfo {
        QueueFamilyInfo { flags, present }
    }

    fn candidate(name: &str, device_type: vk::PhysicalDeviceType) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_string(),
            device_type,
            families: vec![family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                true,
            )],
            extensions: vec!["VK_KHR_swapchain".to_string()],
            sampler_anisotropy: true,
            format_count: 2,
            present_mode_count: 1,
        }
    }

    #[test]
    fn test_dedicated_transfer_family_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, true),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, false),
            family(vk::QueueFlags::TRANSFER, false),
        ];
        let indices = find_queue_families(&families);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.compute, Some(0));
        assert_eq!(indices.transfer, Some(2));
    }

    #[test]
    fn test_transfer_ties_go_to_later_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, true),
            family(vk::QueueFlags::TRANSFER, false),
            family(vk::QueueFlags::TRANSFER, false),
        ];
        assert_eq!(find_queue_families(&families).transfer, Some(2));
    }

    #[test]
    fn test_present_falls_back_to_first_presenting_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, false),
            family(vk::QueueFlags::COMPUTE, true),
            family(vk::QueueFlags::TRANSFER, true),
        ];
        let indices = find_queue_families(&families);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
    }

    #[test]
    fn test_selection_prefers_discrete_and_is_deterministic() {
        let candidates = vec![
            candidate("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU),
            candidate("discrete-a", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("discrete-b", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("cpu", vk::PhysicalDeviceType::CPU),
        ];
        let requirements = DeviceRequirements::default();
        for _ in 0..3 {
            let (index, _) = select_device(&candidates, &requirements).unwrap();
            assert_eq!(candidates[index].name, "discrete-a");
        }
    }

    #[test]
    fn test_unsuitable_devices_rejected() {
        let requirements = DeviceRequirements::default();

        let mut no_swapchain = candidate("a", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_swapchain.extensions.clear();
        let mut no_formats = candidate("b", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_formats.format_count = 0;
        let mut no_aniso = candidate("c", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_aniso.sampler_anisotropy = false;
        let virtual_gpu = candidate("d", vk::PhysicalDeviceType::VIRTUAL_GPU);

        let candidates = vec![no_swapchain, no_formats, no_aniso, virtual_gpu];
        let (index, _) = select_device(&candidates, &requirements).unwrap();
        assert_eq!(index, 3);

        let discrete_only = DeviceRequirements {
            discrete_gpu: true,
            ..DeviceRequirements::default()
        };
        assert!(select_device(&candidates, &discrete_only).is_none());
    }

    #[test]
    fn test_compute_requirement() {
        let mut device = candidate("gpu", vk::PhysicalDeviceType::INTEGRATED_GPU);
        device.families = vec![family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, true)];
        let requirements = DeviceRequirements {
            compute: true,
            ..DeviceRequirements::default()
        };
        assert!(evaluate(&device, &requirements).is_none());
        assert!(evaluate(&device, &DeviceRequirements::default()).is_some());
    }

    #[test]
    fn test_depth_format_probe_order() {
        let supported = |wanted: vk::Format| {
            move |format: vk::Format| {
                let mut props = vk::FormatProperties::default();
                if format == wanted {
                    props.optimal_tiling_features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
                }
                props
            }
        };
        assert_eq!(
            choose_depth_format(supported(vk::Format::D24_UNORM_S8_UINT)),
            Some(vk::Format::D24_UNORM_S8_UINT)
        );
        assert_eq!(choose_depth_format(|_| vk::FormatProperties::default()), None);

        let all = |_: vk::Format| vk::FormatProperties {
            linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            ..Default::default()
        };
        assert_eq!(choose_depth_format(all), Some(vk::Format::D32_SFLOAT));
    }
}

//! Instance, validation messenger and surface
//!
//! The engine never talks to the windowing library directly: the window is
//! reached through [`SurfaceProvider`], which the application implements on
//! top of GLFW (or anything else that can make a `VkSurfaceKHR`).

use super::{VulkanError, VulkanResult};
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Surface;
use ash::{vk, Entry, Instance};
use std::ffi::{c_char, CStr, CString};

const VALIDATION_LAYER: &[u8] = b"VK_LAYER_KHRONOS_validation\0";
const ENGINE_NAME: &[u8] = b"Ember Engine\0";

/// Window side of the Vulkan backend
pub trait SurfaceProvider {
    /// Instance extensions the window system needs
    fn required_instance_extensions(&self) -> VulkanResult<Vec<String>>;

    /// Create a surface for `instance`
    fn create_surface(&mut self, instance: vk::Instance) -> VulkanResult<vk::SurfaceKHR>;

    /// Current framebuffer size in pixels
    fn framebuffer_size(&self) -> (u32, u32);
}

fn c_str(bytes: &'static [u8]) -> VulkanResult<&'static CStr> {
    CStr::from_bytes_with_nul(bytes).map_err(|e| VulkanError::InitializationFailed(e.to_string()))
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    /// Debug utilities extension (validation enabled)
    pub debug_utils: Option<DebugUtils>,
    /// Debug messenger handle (validation enabled)
    pub debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Create the instance. Validation is only honoured in debug builds and
    /// silently dropped when the layer is not installed.
    pub fn new(provider: &dyn SurfaceProvider, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e:?}")))?;

        let app_name = CString::new(app_name).map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let engine_name = c_str(ENGINE_NAME)?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let required = provider.required_instance_extensions()?;
        let extension_names = required
            .iter()
            .map(|name| CString::new(name.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VulkanError::InitializationFailed(e.to_string()))?;
        let mut extensions: Vec<*const c_char> = extension_names.iter().map(|name| name.as_ptr()).collect();

        let validation = cfg!(debug_assertions) && enable_validation && Self::validation_available(&entry)?;
        let mut layers: Vec<*const c_char> = Vec::new();
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
            layers.push(c_str(VALIDATION_LAYER)?.as_ptr());
            log::info!("[VULKAN] Validation layer enabled");
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };

        let (debug_utils, debug_messenger) = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => (Some(debug_utils), Some(messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            (None, None)
        };

        log::info!("[VULKAN] Instance created ({} extensions)", extensions.len());
        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    fn validation_available(entry: &Entry) -> VulkanResult<bool> {
        let wanted = c_str(VALIDATION_LAYER)?;
        let layers = entry.enumerate_instance_layer_properties().map_err(VulkanError::Api)?;
        let found = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == wanted);
        if !found {
            log::warn!("[VULKAN] Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }
        Ok(found)
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Routes validation messages into `log`
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Presentation surface with its extension loader
pub struct VulkanSurface {
    /// Surface extension loader
    pub loader: Surface,
    /// Surface handle
    pub handle: vk::SurfaceKHR,
}

impl VulkanSurface {
    /// Ask the provider for a surface on `instance`
    pub fn new(instance: &VulkanInstance, provider: &mut dyn SurfaceProvider) -> VulkanResult<Self> {
        let loader = Surface::new(&instance.entry, &instance.instance);
        let handle = provider.create_surface(instance.instance.handle())?;
        Ok(Self { loader, handle })
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}

//! GLFW window that hands the renderer a Vulkan surface

use ash::vk;
use ember_engine::render::vulkan::SurfaceProvider;
use ember_engine::render::{VulkanError, VulkanResult};
use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialized
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Resizable window without a client API
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Open a window
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self { glfw, window, events })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request the window to close
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Poll and collect pending events
    pub fn poll_events(&mut self) -> Vec<glfw::WindowEvent> {
        self.glfw.poll_events();
        glfw::flush_messages(&self.events).map(|(_, event)| event).collect()
    }

    /// Whether `key` is held down
    pub fn is_key_down(&self, key: glfw::Key) -> bool {
        matches!(self.window.get_key(key), glfw::Action::Press | glfw::Action::Repeat)
    }
}

impl SurfaceProvider for Window {
    fn required_instance_extensions(&self) -> VulkanResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| VulkanError::InitializationFailed("GLFW reports no Vulkan support".to_string()))
    }

    fn create_surface(&mut self, instance: vk::Instance) -> VulkanResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);
        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(VulkanError::Api(result))
        }
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }
}

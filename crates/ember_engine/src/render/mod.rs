//! Rendering
//!
//! The frontend drives a [`backend::RendererBackend`] (Vulkan, or the null
//! backend used headless) through render views. Resource systems hand the
//! frontend textures, materials, geometry and shaders by id.

pub mod backend;
pub mod camera;
pub mod frontend;
pub mod mesh;
pub mod null;
pub mod packet;
pub mod shader;
pub mod systems;
pub mod types;
pub mod views;
pub mod vulkan;

use crate::assets::AssetError;
use thiserror::Error;

pub use backend::{
    GeometryHandle, RenderPassId, RenderTargetAttachment, RenderTargetId, RendererBackend, ShaderHandle,
    TextureDesc, TextureHandle, UniformValue,
};
pub use camera::Camera;
pub use frontend::{FrameContext, RendererFrontend, BUILTIN_SKYBOX_PASS, BUILTIN_UI_PASS, BUILTIN_WORLD_PASS};
pub use mesh::Mesh;
pub use packet::{GeometryRenderData, RenderPacket, RenderViewPacket};
pub use shader::{Shader, ShaderError, ShaderState};
pub use systems::RenderResources;
pub use views::{PacketData, RenderView, RenderViewSystem, SkyboxView, UiView, WorldView};
pub use vulkan::{VulkanError, VulkanResult};

/// Renderer errors
#[derive(Error, Debug)]
pub enum RenderError {
    /// Renderer or backend initialization failed
    #[error("Renderer initialization failed: {0}")]
    InitializationFailed(String),

    /// A frame could not be recorded or submitted
    #[error("Rendering failed: {0}")]
    RenderingFailed(String),

    /// A GPU resource could not be created
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// A handle or name did not resolve
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Shader declaration or binding error
    #[error(transparent)]
    Shader(#[from] ShaderError),

    /// Vulkan backend error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] VulkanError),

    /// Asset loading error
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),
}

/// Result type for renderer operations
pub type RenderResult<T> = Result<T, RenderError>;

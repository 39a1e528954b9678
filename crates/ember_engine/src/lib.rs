//! # Ember Engine
//!
//! Rendering core of a small real-time 3D engine with a Vulkan backend.
//!
//! ## Features
//!
//! - **Renderer frontend**: backend-agnostic frame loop driving named render passes
//! - **Vulkan backend**: swapchain, frames in flight, shaders, pipelines and buffers
//! - **Resource systems**: reference-counted textures, materials, geometry and shaders
//! - **Render views**: world, UI and skybox views that build and render per-frame packets
//! - **Job system**: worker threads for asset loading with main-thread callbacks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ember_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ApplicationConfig::new("Example");
//!     let mut engine = Engine::headless(config, 1280, 720)?;
//!     let world = WorldView::new("world", &engine.config().renderer, 1280, 720);
//!     engine.register_view(Box::new(world))?;
//!     let camera = Camera::default();
//!     let cube = engine.load_mesh("cube", Transform::default())?;
//!     loop {
//!         engine.update();
//!         let mut packet = RenderPacket::new(1.0 / 60.0);
//!         packet.views.push(engine.build_packet(
//!             "world",
//!             &PacketData::World { meshes: engine.meshes(), camera: &camera },
//!         )?);
//!         engine.render(packet)?;
//!         # let _ = cube;
//!         # break;
//!     }
//!     engine.shutdown();
//!     Ok(())
//! }
//! ```

pub mod assets;
pub mod config;
pub mod core;
pub mod foundation;
pub mod jobs;
pub mod render;

mod engine;

pub use engine::{create_backend, Engine, EngineError, MeshId, MeshLayer, RenderContext};

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        assets::MeshData,
        config::Config,
        core::{ApplicationConfig, AssetConfig, BackendKind, RendererConfig},
        foundation::math::{Mat4, Quat, Transform, Vec2, Vec3, Vec4},
        jobs::{JobInfo, JobPriority, JobType},
        render::{
            Camera, Mesh, PacketData, RenderPacket, RenderResources, RenderView, RenderViewPacket, RendererBackend,
            RendererFrontend, SkyboxView, UiView, WorldView,
        },
        Engine, EngineError, MeshId, MeshLayer, RenderContext,
    };
}

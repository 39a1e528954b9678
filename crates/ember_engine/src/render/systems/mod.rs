//! Resource systems
//!
//! Textures, materials, geometry and shaders, each a fixed-capacity table
//! addressed by id and shared by name with reference counting.

pub mod geometry;
pub mod material;
pub mod shader;
pub mod texture;

pub use geometry::{Geometry, GeometrySystem};
pub use material::{Material, MaterialContext, MaterialSystem};
pub use shader::{ShaderSystem, BUILTIN_MATERIAL_SHADER, BUILTIN_SKYBOX_SHADER, BUILTIN_UI_SHADER};
pub use texture::{Texture, TextureSystem};

use super::backend::RendererBackend;
use super::shader::ShaderLimits;
use super::RenderResult;
use crate::core::{AssetConfig, RendererConfig};

/// Every resource system, created once the built-in render passes exist
pub struct RenderResources {
    /// Textures
    pub textures: TextureSystem,
    /// Materials
    pub materials: MaterialSystem,
    /// Geometry
    pub geometries: GeometrySystem,
    /// Shaders
    pub shaders: ShaderSystem,
}

impl RenderResources {
    /// Create the systems in dependency order: shaders, textures, materials,
    /// geometry
    pub fn new(backend: &mut dyn RendererBackend, config: &RendererConfig, assets: &AssetConfig) -> RenderResult<Self> {
        let limits = ShaderLimits {
            max_uniforms: config.max_uniforms,
            max_global_textures: config.max_global_textures,
            max_instance_textures: config.max_instance_textures,
        };
        let mut shaders = ShaderSystem::new(config.max_shaders, config.max_shader_instances, limits, assets.shaders_dir());
        shaders.create_builtins(backend)?;

        let mut textures = TextureSystem::new(backend, config.max_textures, assets.textures_dir())?;
        let mut ctx = MaterialContext {
            backend,
            textures: &mut textures,
            shaders: &mut shaders,
        };
        let mut materials = MaterialSystem::new(&mut ctx, config.max_materials, assets.materials_dir())?;
        let geometries = GeometrySystem::new(&mut ctx, &mut materials, config.max_geometries)?;

        Ok(Self {
            textures,
            materials,
            geometries,
            shaders,
        })
    }

    /// Borrow the systems a material or geometry operation needs
    pub fn split<'a>(
        &'a mut self,
        backend: &'a mut dyn RendererBackend,
    ) -> (MaterialContext<'a>, &'a mut MaterialSystem, &'a mut GeometrySystem) {
        let Self {
            textures,
            materials,
            geometries,
            shaders,
        } = self;
        (
            MaterialContext {
                backend,
                textures,
                shaders,
            },
            materials,
            geometries,
        )
    }

    /// Destroy everything in reverse creation order
    pub fn shutdown(&mut self, backend: &mut dyn RendererBackend) {
        let (mut ctx, materials, geometries) = self.split(backend);
        geometries.shutdown(&mut ctx, materials);
        materials.shutdown(&mut ctx);
        drop(ctx);
        self.textures.shutdown(backend);
        self.shaders.shutdown(backend);
        log::info!("[RENDERER] Resource systems shut down");
    }
}

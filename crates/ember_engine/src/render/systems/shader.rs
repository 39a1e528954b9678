//! Shader system
//!
//! Owns every [`Shader`] by name and id, drives the backend through the shader
//! lifecycle and forwards uniform writes after validating them.

use crate::assets::ShaderConfig;
use crate::render::backend::{BoundTexture, RendererBackend, UniformValue};
use crate::render::shader::{Shader, ShaderError, ShaderLimits, ShaderState};
use crate::render::types::{ShaderId, ShaderScope};
use crate::render::{RenderError, RenderResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Built-in world material shader
pub const BUILTIN_MATERIAL_SHADER: &str = "Shader.Builtin.Material";

/// Built-in UI shader
pub const BUILTIN_UI_SHADER: &str = "Shader.Builtin.UI";

/// Built-in skybox shader
pub const BUILTIN_SKYBOX_SHADER: &str = "Shader.Builtin.Skybox";

const BUILTIN_CONFIGS: [(&str, &str); 3] = [
    (
        BUILTIN_MATERIAL_SHADER,
        include_str!("../../../resources/shaders/Builtin.MaterialShader.shadercfg"),
    ),
    (
        BUILTIN_UI_SHADER,
        include_str!("../../../resources/shaders/Builtin.UIShader.shadercfg"),
    ),
    (
        BUILTIN_SKYBOX_SHADER,
        include_str!("../../../resources/shaders/Builtin.SkyboxShader.shadercfg"),
    ),
];

/// Parsed config of a built-in shader, stage files resolved against `shaders_dir`
pub fn builtin_config(name: &str, shaders_dir: &Path) -> RenderResult<ShaderConfig> {
    let (_, text) = BUILTIN_CONFIGS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .ok_or_else(|| RenderError::ResourceNotFound(format!("built-in shader '{name}'")))?;
    let mut config = ShaderConfig::parse(text, name)?;
    resolve_stage_files(&mut config, shaders_dir);
    Ok(config)
}

fn resolve_stage_files(config: &mut ShaderConfig, shaders_dir: &Path) {
    for file in &mut config.stage_files {
        let path = Path::new(file.as_str());
        if path.is_relative() {
            *file = shaders_dir.join(path).display().to_string();
        }
    }
}

/// Name- and id-keyed shader table
pub struct ShaderSystem {
    shaders: Vec<Option<Shader>>,
    lookup: HashMap<String, ShaderId>,
    limits: ShaderLimits,
    max_instances: u32,
    shaders_dir: PathBuf,
}

impl ShaderSystem {
    /// Empty system with `max_shaders` slots
    pub fn new(max_shaders: u32, max_instances: u32, limits: ShaderLimits, shaders_dir: PathBuf) -> Self {
        Self {
            shaders: (0..max_shaders).map(|_| None).collect(),
            lookup: HashMap::new(),
            limits,
            max_instances,
            shaders_dir,
        }
    }

    /// Create the three built-in shaders
    pub fn create_builtins(&mut self, backend: &mut dyn RendererBackend) -> RenderResult<()> {
        for (name, _) in BUILTIN_CONFIGS {
            let config = builtin_config(name, &self.shaders_dir)?;
            self.create(backend, &config)?;
        }
        Ok(())
    }

    /// Load `<shaders_dir>/<name>.shadercfg` and create the shader
    pub fn load(&mut self, backend: &mut dyn RendererBackend, name: &str) -> RenderResult<ShaderId> {
        let path = self.shaders_dir.join(format!("{name}.shadercfg"));
        let mut config = ShaderConfig::load(&path)?;
        resolve_stage_files(&mut config, &self.shaders_dir);
        self.create(backend, &config)
    }

    /// Build a shader end to end: backend create, declarations, initialize.
    ///
    /// On any failure the backend objects are destroyed and the name stays free.
    pub fn create(&mut self, backend: &mut dyn RendererBackend, config: &ShaderConfig) -> RenderResult<ShaderId> {
        if self.lookup.contains_key(&config.name) {
            return Err(ShaderError::AlreadyExists(config.name.clone()).into());
        }
        let id = self
            .shaders
            .iter()
            .position(Option::is_none)
            .map(|index| ShaderId(index as u32))
            .ok_or_else(|| RenderError::ResourceCreationFailed(format!("no free shader slot for '{}'", config.name)))?;

        let pass = backend
            .renderpass_get(&config.renderpass_name)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("render pass '{}'", config.renderpass_name)))?;

        let mut shader = Shader::new(id, config, self.limits, self.max_instances);
        shader.renderpass = Some(pass);
        let handle = backend.shader_create(&shader, pass)?;

        let built = shader
            .mark_created(handle)
            .map_err(RenderError::from)
            .and_then(|()| shader.declare_from_config(config).map_err(RenderError::from))
            .and_then(|()| backend.shader_initialize(&mut shader))
            .and_then(|()| shader.mark_initialized().map_err(RenderError::from));
        if let Err(e) = built {
            log::error!("[SHADER] Failed to build '{}': {}", config.name, e);
            backend.shader_destroy(handle);
            return Err(e);
        }

        log::info!(
            "[SHADER] Created '{}' (stride {}, ubo {} bytes)",
            shader.name,
            shader.attribute_stride(),
            shader.uniform_buffer_size()
        );
        self.lookup.insert(shader.name.clone(), id);
        self.shaders[id.index()] = Some(shader);
        Ok(id)
    }

    /// Destroy a shader and free its name
    pub fn destroy(&mut self, backend: &mut dyn RendererBackend, name: &str) {
        let Some(id) = self.lookup.remove(name) else {
            log::warn!("[SHADER] Destroy of unknown shader '{}'", name);
            return;
        };
        if let Some(handle) = self.shaders[id.index()].take().and_then(|shader| shader.internal) {
            backend.shader_destroy(handle);
        }
    }

    /// Id of the shader called `name`
    pub fn get_id(&self, name: &str) -> Option<ShaderId> {
        self.lookup.get(name).copied()
    }

    /// Shader by id
    pub fn get(&self, id: ShaderId) -> Option<&Shader> {
        self.shaders.get(id.index()).and_then(Option::as_ref)
    }

    /// Shader by id, mutably
    pub fn get_mut(&mut self, id: ShaderId) -> Option<&mut Shader> {
        self.shaders.get_mut(id.index()).and_then(Option::as_mut)
    }

    fn shader(&self, id: ShaderId) -> RenderResult<&Shader> {
        self.get(id)
            .ok_or_else(|| ShaderError::NotFound(format!("#{}", id.0)).into())
    }

    fn shader_mut(&mut self, id: ShaderId) -> RenderResult<&mut Shader> {
        self.get_mut(id)
            .ok_or_else(|| ShaderError::NotFound(format!("#{}", id.0)).into())
    }

    /// Bind the shader's pipeline
    pub fn use_shader(&mut self, backend: &mut dyn RendererBackend, id: ShaderId) -> RenderResult<()> {
        backend.shader_use(self.shader(id)?)
    }

    /// Target the global region
    pub fn bind_globals(&mut self, backend: &mut dyn RendererBackend, id: ShaderId) -> RenderResult<()> {
        backend.shader_bind_globals(self.shader_mut(id)?)
    }

    /// Target an instance region
    pub fn bind_instance(&mut self, backend: &mut dyn RendererBackend, id: ShaderId, instance_id: u32) -> RenderResult<()> {
        backend.shader_bind_instance(self.shader_mut(id)?, instance_id)
    }

    /// Write and bind the global descriptor set
    pub fn apply_globals(&mut self, backend: &mut dyn RendererBackend, id: ShaderId) -> RenderResult<()> {
        backend.shader_apply_globals(self.shader(id)?)
    }

    /// Write (if `needs_update`) and bind the bound instance's descriptor set
    pub fn apply_instance(&mut self, backend: &mut dyn RendererBackend, id: ShaderId, needs_update: bool) -> RenderResult<()> {
        backend.shader_apply_instance(self.shader(id)?, needs_update)
    }

    /// Reserve an instance slot seeded with one texture per instance sampler
    pub fn acquire_instance_resources(
        &mut self,
        backend: &mut dyn RendererBackend,
        id: ShaderId,
        textures: &[BoundTexture],
    ) -> RenderResult<u32> {
        backend.shader_acquire_instance_resources(self.shader(id)?, textures)
    }

    /// Return an instance slot
    pub fn release_instance_resources(
        &mut self,
        backend: &mut dyn RendererBackend,
        id: ShaderId,
        instance_id: u32,
    ) -> RenderResult<()> {
        backend.shader_release_instance_resources(self.shader(id)?, instance_id)
    }

    /// Uniform index for `name`
    pub fn uniform_index(&self, id: ShaderId, name: &str) -> RenderResult<u16> {
        let shader = self.shader(id)?;
        shader.uniform_index(name).ok_or_else(|| {
            ShaderError::UnknownUniform {
                shader: shader.name.clone(),
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Write a uniform by name
    pub fn set_uniform(
        &mut self,
        backend: &mut dyn RendererBackend,
        id: ShaderId,
        name: &str,
        value: UniformValue<'_>,
    ) -> RenderResult<()> {
        let index = self.uniform_index(id, name)?;
        self.set_uniform_by_index(backend, id, index, value)
    }

    /// Write a uniform by index.
    ///
    /// The size is checked against the declaration first. A global uniform
    /// written while an instance is bound rebinds the globals; an instance
    /// uniform requires an instance to be bound.
    pub fn set_uniform_by_index(
        &mut self,
        backend: &mut dyn RendererBackend,
        id: ShaderId,
        index: u16,
        value: UniformValue<'_>,
    ) -> RenderResult<()> {
        let shader = self.shader_mut(id)?;
        shader.expect_state(ShaderState::Initialized, "set uniforms")?;
        let uniform = shader.check_uniform_write(index, value.size()).map_err(|e| {
            log::error!("[SHADER] {}", e);
            e
        })?;
        if matches!(value, UniformValue::Sampler(_)) != uniform.is_sampler() {
            return Err(ShaderError::SizeMismatch {
                shader: shader.name.clone(),
                name: uniform.name.clone(),
                expected: uniform.size,
                actual: value.size(),
            }
            .into());
        }
        let uniform = uniform.clone();

        match uniform.scope {
            ShaderScope::Global if shader.bound_scope() != ShaderScope::Global => {
                backend.shader_bind_globals(shader)?;
            }
            ShaderScope::Instance if shader.bound_scope() != ShaderScope::Instance => {
                return Err(RenderError::RenderingFailed(format!(
                    "shader '{}': instance uniform '{}' written with no instance bound",
                    shader.name, uniform.name
                )));
            }
            _ => {}
        }
        backend.shader_set_uniform(shader, &uniform, value)
    }

    /// Assign a texture to a sampler by name
    pub fn set_sampler(
        &mut self,
        backend: &mut dyn RendererBackend,
        id: ShaderId,
        name: &str,
        texture: BoundTexture,
    ) -> RenderResult<()> {
        self.set_uniform(backend, id, name, UniformValue::Sampler(texture))
    }

    /// Destroy every shader
    pub fn shutdown(&mut self, backend: &mut dyn RendererBackend) {
        for shader in self.shaders.iter_mut().filter_map(Option::take) {
            if let Some(handle) = shader.internal {
                backend.shader_destroy(handle);
            }
        }
        self.lookup.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::RendererBackend;
    use crate::render::null::NullBackend;
    use crate::render::types::{RenderPassClearFlags, RenderPassConfig, ShaderUniformType};
    use crate::foundation::math::Vec4;

    fn backend_with_world_pass() -> NullBackend {
        let mut backend = NullBackend::new(800, 600);
        backend
            .renderpass_create(&RenderPassConfig {
                name: "Renderpass.Builtin.World".to_string(),
                prev_name: None,
                next_name: None,
                render_area: Vec4::new(0.0, 0.0, 800.0, 600.0),
                clear_colour: Vec4::zeros(),
                clear_flags: RenderPassClearFlags::DEPTH_BUFFER,
            })
            .unwrap();
        backend
    }

    fn system() -> ShaderSystem {
        ShaderSystem::new(4, 8, ShaderLimits::default(), PathBuf::from("shaders"))
    }

    #[test]
    fn test_builtin_configs_parse() {
        let config = builtin_config(BUILTIN_MATERIAL_SHADER, Path::new("shaders")).unwrap();
        assert_eq!(config.renderpass_name, "Renderpass.Builtin.World");
        assert!(config.use_instances && config.use_local);
        assert!(config.stage_files[0].starts_with("shaders"));
        assert!(builtin_config(BUILTIN_UI_SHADER, Path::new(".")).is_ok());
        assert!(builtin_config(BUILTIN_SKYBOX_SHADER, Path::new(".")).is_ok());
    }

    #[test]
    fn test_create_registers_initialized_shader() {
        let mut backend = backend_with_world_pass();
        let mut shaders = system();
        let config = builtin_config(BUILTIN_MATERIAL_SHADER, Path::new("shaders")).unwrap();
        let id = shaders.create(&mut backend, &config).unwrap();
        assert_eq!(shaders.get_id(BUILTIN_MATERIAL_SHADER), Some(id));
        let shader = shaders.get(id).unwrap();
        assert_eq!(shader.state(), ShaderState::Initialized);
        assert_eq!(shader.global_ubo_stride() % 256, 0);
        assert!(backend.shader_pipeline(shader.internal.unwrap()).is_some());

        assert!(matches!(
            shaders.create(&mut backend, &config),
            Err(RenderError::Shader(ShaderError::AlreadyExists(_)))
        ));
    }

    #[test]
    fn test_failed_build_leaves_no_trace() {
        let mut backend = backend_with_world_pass();
        let mut shaders = system();
        let mut config = builtin_config(BUILTIN_MATERIAL_SHADER, Path::new("shaders")).unwrap();
        let mut duplicate = config.uniforms[0].clone();
        duplicate.uniform_type = ShaderUniformType::Float32;
        config.uniforms.push(duplicate);

        assert!(shaders.create(&mut backend, &config).is_err());
        assert_eq!(shaders.get_id(BUILTIN_MATERIAL_SHADER), None);
        assert_eq!(backend.live_objects().2, 0);
    }

    #[test]
    fn test_missing_renderpass_rejected() {
        let mut backend = NullBackend::new(800, 600);
        let mut shaders = system();
        let config = builtin_config(BUILTIN_UI_SHADER, Path::new("shaders")).unwrap();
        assert!(matches!(
            shaders.create(&mut backend, &config),
            Err(RenderError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_set_uniform_rejects_wrong_size() {
        let mut backend = backend_with_world_pass();
        let mut shaders = system();
        let config = builtin_config(BUILTIN_MATERIAL_SHADER, Path::new("shaders")).unwrap();
        let id = shaders.create(&mut backend, &config).unwrap();
        shaders.bind_globals(&mut backend, id).unwrap();

        let bytes = [0u8; 60];
        assert!(shaders
            .set_uniform(&mut backend, id, "projection", UniformValue::Bytes(&bytes))
            .is_err());
        assert!(shaders
            .set_uniform(&mut backend, id, "missing", UniformValue::Bytes(&bytes))
            .is_err());
        let identity = [0u8; 64];
        shaders
            .set_uniform(&mut backend, id, "projection", UniformValue::Bytes(&identity))
            .unwrap();
    }

    #[test]
    fn test_instance_uniform_needs_bound_instance() {
        let mut backend = backend_with_world_pass();
        let mut shaders = system();
        let config = builtin_config(BUILTIN_MATERIAL_SHADER, Path::new("shaders")).unwrap();
        let id = shaders.create(&mut backend, &config).unwrap();
        let colour = [0u8; 16];
        assert!(shaders
            .set_uniform(&mut backend, id, "diffuse_colour", UniformValue::Bytes(&colour))
            .is_err());
    }
}

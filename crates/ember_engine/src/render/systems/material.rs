//! Material system
//!
//! Materials pair a diffuse colour and diffuse map with one instance slot in
//! their shader. They are reference counted by name and loaded from `.kmt`
//! files; anything that fails to load resolves to the default material.

use super::shader::{ShaderSystem, BUILTIN_MATERIAL_SHADER, BUILTIN_UI_SHADER};
use super::texture::TextureSystem;
use crate::assets::MaterialConfig;
use crate::foundation::math::{Mat4, Vec4};
use crate::render::backend::{RendererBackend, UniformValue};
use crate::render::types::{MaterialId, ShaderId, TextureMap, TextureUse};
use crate::render::{RenderError, RenderResult};
use std::collections::HashMap;
use std::path::PathBuf;

/// Name of the built-in fallback material
pub const DEFAULT_MATERIAL_NAME: &str = "default";

/// A material slot
#[derive(Debug, Clone)]
pub struct Material {
    /// Slot id
    pub id: MaterialId,
    /// Unique name
    pub name: String,
    /// Diffuse colour (RGBA)
    pub diffuse_colour: Vec4,
    /// Diffuse texture
    pub diffuse_map: TextureMap,
    /// Shader the material renders with
    pub shader_id: ShaderId,
    /// Instance slot in the shader
    pub internal_id: u32,
    /// Bumped when the material is (re)created
    pub generation: u32,
    /// Last frame the instance was applied
    pub render_frame_number: u64,
}

#[derive(Debug, Clone, Copy)]
struct MaterialReference {
    id: MaterialId,
    reference_count: u64,
    auto_release: bool,
}

/// Borrowed systems a material needs to be built or torn down
pub struct MaterialContext<'a> {
    /// Backend
    pub backend: &'a mut dyn RendererBackend,
    /// Texture system
    pub textures: &'a mut TextureSystem,
    /// Shader system
    pub shaders: &'a mut ShaderSystem,
}

/// Reference-counted material cache
pub struct MaterialSystem {
    materials: Vec<Option<Material>>,
    lookup: HashMap<String, MaterialReference>,
    default_material: MaterialId,
    materials_dir: PathBuf,
}

impl MaterialSystem {
    /// Create the system and the default material in slot 0
    pub fn new(ctx: &mut MaterialContext<'_>, max_materials: u32, materials_dir: PathBuf) -> RenderResult<Self> {
        if max_materials < 2 {
            return Err(RenderError::InitializationFailed(
                "material system needs room for the default material".to_string(),
            ));
        }
        let mut system = Self {
            materials: (0..max_materials).map(|_| None).collect(),
            lookup: HashMap::new(),
            default_material: MaterialId(0),
            materials_dir,
        };
        let config = MaterialConfig::new(DEFAULT_MATERIAL_NAME);
        let material = system.build(ctx, MaterialId(0), &config)?;
        system.materials[0] = Some(material);
        log::info!("[MATERIAL] Material system ready ({} slots)", max_materials);
        Ok(system)
    }

    /// Id of the default material
    pub fn default_material(&self) -> MaterialId {
        self.default_material
    }

    /// Acquire `<materials_dir>/<name>.kmt`
    pub fn acquire(&mut self, ctx: &mut MaterialContext<'_>, name: &str) -> MaterialId {
        if let Some(id) = self.add_reference(name) {
            return id;
        }
        let path = self.materials_dir.join(format!("{name}.kmt"));
        match MaterialConfig::load(&path) {
            Ok(config) => self.acquire_from_config(ctx, &config),
            Err(e) => {
                log::error!("[MATERIAL] Failed to load '{}': {}, using default", name, e);
                self.default_material
            }
        }
    }

    /// Acquire a material described in memory
    pub fn acquire_from_config(&mut self, ctx: &mut MaterialContext<'_>, config: &MaterialConfig) -> MaterialId {
        if let Some(id) = self.add_reference(&config.name) {
            return id;
        }
        let Some(index) = self.materials.iter().position(Option::is_none) else {
            log::error!("[MATERIAL] No free slot for '{}', using default", config.name);
            return self.default_material;
        };
        let id = MaterialId(index as u32);
        match self.build(ctx, id, config) {
            Ok(material) => {
                self.materials[index] = Some(material);
                self.lookup.insert(
                    config.name.clone(),
                    MaterialReference {
                        id,
                        reference_count: 1,
                        auto_release: config.auto_release,
                    },
                );
                log::debug!("[MATERIAL] '{}' acquired into slot {}", config.name, index);
                id
            }
            Err(e) => {
                log::error!("[MATERIAL] Failed to create '{}': {}, using default", config.name, e);
                self.default_material
            }
        }
    }

    fn add_reference(&mut self, name: &str) -> Option<MaterialId> {
        if name.eq_ignore_ascii_case(DEFAULT_MATERIAL_NAME) {
            return Some(self.default_material);
        }
        let reference = self.lookup.get_mut(name)?;
        reference.reference_count += 1;
        Some(reference.id)
    }

    fn build(&self, ctx: &mut MaterialContext<'_>, id: MaterialId, config: &MaterialConfig) -> RenderResult<Material> {
        let shader_name = config.shader_name.as_deref().unwrap_or(BUILTIN_MATERIAL_SHADER);
        let shader_id = ctx
            .shaders
            .get_id(shader_name)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("shader '{shader_name}'")))?;

        let mut diffuse_map = TextureMap::new(TextureUse::MapDiffuse);
        diffuse_map.texture = match &config.diffuse_map_name {
            Some(texture) if !texture.is_empty() => ctx.textures.acquire(texture, true),
            _ => ctx.textures.default_texture(),
        };

        let sampler_count = ctx
            .shaders
            .get(shader_id)
            .map_or(0, |shader| shader.instance_texture_count() as usize);
        let bound = ctx.textures.bound(diffuse_map.texture)?;
        let seeds = vec![bound; sampler_count];
        let internal_id = match ctx.shaders.acquire_instance_resources(ctx.backend, shader_id, &seeds) {
            Ok(internal_id) => internal_id,
            Err(e) => {
                release_texture(ctx, diffuse_map);
                return Err(e);
            }
        };

        Ok(Material {
            id,
            name: config.name.clone(),
            diffuse_colour: config.diffuse_colour,
            diffuse_map,
            shader_id,
            internal_id,
            generation: 0,
            render_frame_number: u64::MAX,
        })
    }

    /// Drop one reference. At zero an auto-release material returns its
    /// instance slot and texture, and its name becomes free.
    pub fn release(&mut self, ctx: &mut MaterialContext<'_>, name: &str) {
        if name.eq_ignore_ascii_case(DEFAULT_MATERIAL_NAME) {
            return;
        }
        let Some(reference) = self.lookup.get_mut(name) else {
            log::warn!("[MATERIAL] Release of unknown material '{}'", name);
            return;
        };
        reference.reference_count = reference.reference_count.saturating_sub(1);
        if reference.reference_count > 0 || !reference.auto_release {
            return;
        }
        let id = reference.id;
        self.lookup.remove(name);
        if let Some(material) = self.materials[id.index()].take() {
            destroy_material(ctx, &material);
            log::debug!("[MATERIAL] Released '{}'", name);
        }
    }

    /// Material by id
    pub fn get(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.index()).and_then(Option::as_ref)
    }

    /// Material by id, or the default material
    pub fn get_or_default(&self, id: MaterialId) -> RenderResult<&Material> {
        self.get(id)
            .or_else(|| self.get(self.default_material))
            .ok_or_else(|| RenderError::ResourceNotFound("default material".to_string()))
    }

    /// Name of the material in slot `id`
    pub fn name_of(&self, id: MaterialId) -> Option<&str> {
        self.get(id).map(|material| material.name.as_str())
    }

    /// Current reference count of a name
    pub fn reference_count(&self, name: &str) -> Option<u64> {
        self.lookup.get(name).map(|reference| reference.reference_count)
    }

    /// Stamp the material as rendered this frame. Returns true the first
    /// time per frame, meaning its instance data must be rewritten.
    pub fn mark_rendered(&mut self, id: MaterialId, frame_number: u64) -> bool {
        let id = if self.get(id).is_some() { id } else { self.default_material };
        match self.materials.get_mut(id.index()).and_then(Option::as_mut) {
            Some(material) if material.render_frame_number != frame_number => {
                material.render_frame_number = frame_number;
                true
            }
            _ => false,
        }
    }

    /// Upload per-frame globals to a shader, once per frame
    pub fn apply_global(
        backend: &mut dyn RendererBackend,
        shaders: &mut ShaderSystem,
        shader_id: ShaderId,
        projection: &Mat4,
        view: &Mat4,
        ambient_colour: &Vec4,
        frame_number: u64,
    ) -> RenderResult<()> {
        let shader = shaders
            .get(shader_id)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("shader #{}", shader_id.0)))?;
        if shader.render_frame_number == frame_number {
            return Ok(());
        }
        let has_ambient = shader.uniform_index("ambient_colour").is_some();

        shaders.bind_globals(backend, shader_id)?;
        shaders.set_uniform(backend, shader_id, "projection", UniformValue::Bytes(bytemuck::cast_slice(projection.as_slice())))?;
        shaders.set_uniform(backend, shader_id, "view", UniformValue::Bytes(bytemuck::cast_slice(view.as_slice())))?;
        if has_ambient {
            shaders.set_uniform(
                backend,
                shader_id,
                "ambient_colour",
                UniformValue::Bytes(bytemuck::cast_slice(ambient_colour.as_slice())),
            )?;
        }
        shaders.apply_globals(backend, shader_id)?;
        if let Some(shader) = shaders.get_mut(shader_id) {
            shader.render_frame_number = frame_number;
        }
        Ok(())
    }

    /// Bind a material's instance and, when `needs_update`, rewrite its
    /// colour and diffuse map
    pub fn apply_instance(
        &self,
        backend: &mut dyn RendererBackend,
        shaders: &mut ShaderSystem,
        textures: &TextureSystem,
        id: MaterialId,
        needs_update: bool,
    ) -> RenderResult<()> {
        let material = self.get_or_default(id)?;
        let shader_id = material.shader_id;
        shaders.bind_instance(backend, shader_id, material.internal_id)?;
        if needs_update {
            shaders.set_uniform(
                backend,
                shader_id,
                "diffuse_colour",
                UniformValue::Bytes(bytemuck::cast_slice(material.diffuse_colour.as_slice())),
            )?;
            let texture = textures.bound(material.diffuse_map.texture)?;
            shaders.set_sampler(backend, shader_id, "diffuse_texture", texture)?;
        }
        shaders.apply_instance(backend, shader_id, needs_update)
    }

    /// Push the model matrix for one draw
    pub fn apply_local(
        &self,
        backend: &mut dyn RendererBackend,
        shaders: &mut ShaderSystem,
        id: MaterialId,
        model: &Mat4,
    ) -> RenderResult<()> {
        let shader_id = self.get_or_default(id)?.shader_id;
        shaders.set_uniform(backend, shader_id, "model", UniformValue::Bytes(bytemuck::cast_slice(model.as_slice())))
    }

    /// Default material rendered with the UI shader, created on first use
    pub fn ui_default(&mut self, ctx: &mut MaterialContext<'_>) -> MaterialId {
        let mut config = MaterialConfig::new("default_ui");
        config.shader_name = Some(BUILTIN_UI_SHADER.to_string());
        config.auto_release = false;
        self.acquire_from_config(ctx, &config)
    }

    /// Destroy every material, the default included
    pub fn shutdown(&mut self, ctx: &mut MaterialContext<'_>) {
        for material in self.materials.iter_mut().filter_map(Option::take) {
            destroy_material(ctx, &material);
        }
        self.lookup.clear();
    }
}

fn release_texture(ctx: &mut MaterialContext<'_>, map: TextureMap) {
    if map.texture == ctx.textures.default_texture() {
        return;
    }
    let name = ctx.textures.get(map.texture).map(|texture| texture.name.clone());
    if let Some(name) = name {
        ctx.textures.release(ctx.backend, &name);
    }
}

fn destroy_material(ctx: &mut MaterialContext<'_>, material: &Material) {
    if let Err(e) = ctx
        .shaders
        .release_instance_resources(ctx.backend, material.shader_id, material.internal_id)
    {
        log::warn!("[MATERIAL] '{}': {}", material.name, e);
    }
    release_texture(ctx, material.diffuse_map);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::ImageData;
    use crate::render::null::NullBackend;
    use crate::render::shader::ShaderLimits;
    use crate::render::types::{RenderPassClearFlags, RenderPassConfig};
    use std::path::Path;

    struct Fixture {
        backend: NullBackend,
        textures: TextureSystem,
        shaders: ShaderSystem,
    }

    impl Fixture {
        fn new() -> Self {
            let mut backend = NullBackend::new(800, 600);
            for name in ["Renderpass.Builtin.World", "Renderpass.Builtin.UI", "Renderpass.Builtin.Skybox"] {
                backend
                    .renderpass_create(&RenderPassConfig {
                        name: name.to_string(),
                        prev_name: None,
                        next_name: None,
                        render_area: Vec4::new(0.0, 0.0, 800.0, 600.0),
                        clear_colour: Vec4::zeros(),
                        clear_flags: RenderPassClearFlags::empty(),
                    })
                    .unwrap();
            }
            let textures = TextureSystem::new(&mut backend, 16, PathBuf::from("/nonexistent")).unwrap();
            let mut shaders = ShaderSystem::new(4, 8, ShaderLimits::default(), PathBuf::from("shaders"));
            shaders.create_builtins(&mut backend).unwrap();
            Self {
                backend,
                textures,
                shaders,
            }
        }

        fn ctx(&mut self) -> MaterialContext<'_> {
            MaterialContext {
                backend: &mut self.backend,
                textures: &mut self.textures,
                shaders: &mut self.shaders,
            }
        }
    }

    fn write_kmt(dir: &Path, name: &str) {
        let mut config = MaterialConfig::new(name);
        config.diffuse_colour = Vec4::new(1.0, 0.0, 0.0, 1.0);
        config.diffuse_map_name = Some("crate_diffuse".to_string());
        config.save(&dir.join(format!("{name}.kmt"))).unwrap();
    }

    #[test]
    fn test_acquire_twice_shares_material() {
        let dir = tempfile::tempdir().unwrap();
        write_kmt(dir.path(), "crate");
        let mut fixture = Fixture::new();
        let mut materials = MaterialSystem::new(&mut fixture.ctx(), 8, dir.path().to_path_buf()).unwrap();

        let first = materials.acquire(&mut fixture.ctx(), "crate");
        let second = materials.acquire(&mut fixture.ctx(), "crate");
        assert_eq!(first, second);
        assert_ne!(first, materials.default_material());
        assert_eq!(materials.reference_count("crate"), Some(2));
        assert_eq!(fixture.textures.reference_count("crate_diffuse"), Some(1));

        materials.release(&mut fixture.ctx(), "crate");
        assert_eq!(materials.reference_count("crate"), Some(1));
        materials.release(&mut fixture.ctx(), "crate");
        assert_eq!(materials.reference_count("crate"), None);
        assert!(materials.get(first).is_none());
        assert_eq!(fixture.textures.reference_count("crate_diffuse"), None);
    }

    #[test]
    fn test_missing_material_falls_back_to_default() {
        let mut fixture = Fixture::new();
        let mut materials = MaterialSystem::new(&mut fixture.ctx(), 8, PathBuf::from("/nonexistent")).unwrap();
        assert_eq!(materials.acquire(&mut fixture.ctx(), "nope"), materials.default_material());
        materials.release(&mut fixture.ctx(), "nope");
    }

    #[test]
    fn test_instance_slot_reused_after_release() {
        let mut fixture = Fixture::new();
        let mut materials = MaterialSystem::new(&mut fixture.ctx(), 8, PathBuf::new()).unwrap();
        let a = materials.acquire_from_config(&mut fixture.ctx(), &MaterialConfig::new("a"));
        let slot = materials.get(a).unwrap().internal_id;
        materials.release(&mut fixture.ctx(), "a");
        let b = materials.acquire_from_config(&mut fixture.ctx(), &MaterialConfig::new("b"));
        assert_eq!(materials.get(b).unwrap().internal_id, slot);
    }

    #[test]
    fn test_mark_rendered_once_per_frame() {
        let mut fixture = Fixture::new();
        let mut materials = MaterialSystem::new(&mut fixture.ctx(), 8, PathBuf::new()).unwrap();
        let id = materials.default_material();
        assert!(materials.mark_rendered(id, 1));
        assert!(!materials.mark_rendered(id, 1));
        assert!(materials.mark_rendered(id, 2));
    }

    #[test]
    fn test_instance_sampler_rewritten_after_texture_loads() {
        let dir = tempfile::tempdir().unwrap();
        write_kmt(dir.path(), "crate");
        let mut fixture = Fixture::new();
        let mut materials = MaterialSystem::new(&mut fixture.ctx(), 8, dir.path().to_path_buf()).unwrap();
        let id = materials.acquire(&mut fixture.ctx(), "crate");
        let requests = fixture.textures.take_load_requests();
        let request = requests.iter().find(|r| r.name == "crate_diffuse").unwrap();
        let texture = materials.get(id).unwrap().diffuse_map.texture;
        let default = fixture.textures.bound(fixture.textures.default_texture()).unwrap();
        assert_eq!(fixture.textures.bound(texture).unwrap(), default);

        assert!(fixture.backend.begin_frame(0.016).unwrap());
        materials
            .apply_instance(&mut fixture.backend, &mut fixture.shaders, &fixture.textures, id, true)
            .unwrap();
        let writes = fixture.backend.stats().instance_descriptor_writes;

        let image = ImageData {
            width: 2,
            height: 2,
            channel_count: 4,
            pixels: vec![255; 16],
        };
        fixture.textures.finish_load(&mut fixture.backend, request, image).unwrap();
        let loaded = fixture.textures.bound(texture).unwrap();
        assert_ne!(loaded.handle, default.handle);

        materials
            .apply_instance(&mut fixture.backend, &mut fixture.shaders, &fixture.textures, id, true)
            .unwrap();
        assert_eq!(fixture.backend.stats().instance_descriptor_writes, writes + 1);

        // Nothing changed since the last write
        materials
            .apply_instance(&mut fixture.backend, &mut fixture.shaders, &fixture.textures, id, true)
            .unwrap();
        assert_eq!(fixture.backend.stats().instance_descriptor_writes, writes + 1);
    }

    #[test]
    fn test_ui_default_uses_ui_shader() {
        let mut fixture = Fixture::new();
        let mut materials = MaterialSystem::new(&mut fixture.ctx(), 8, PathBuf::new()).unwrap();
        let id = materials.ui_default(&mut fixture.ctx());
        let ui_shader = fixture.shaders.get_id(BUILTIN_UI_SHADER).unwrap();
        assert_eq!(materials.get(id).unwrap().shader_id, ui_shader);
        assert_eq!(materials.ui_default(&mut fixture.ctx()), id);
    }
}

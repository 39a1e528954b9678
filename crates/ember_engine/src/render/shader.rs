//! Shader declaration and uniform layout
//!
//! A [`Shader`] moves through three states:
//!
//! ```text
//! NotCreated --backend create--> Uninitialized --backend initialize--> Initialized
//! ```
//!
//! Attributes, uniforms and samplers may only be declared while
//! `Uninitialized`. Offsets are assigned by append-only accumulation within
//! each scope, so a fixed declaration sequence always produces the same
//! layout. The backend turns the layout into GPU objects and fills in the
//! aligned strides during initialize.

use crate::assets::{ShaderConfig, ShaderCullMode};
use crate::foundation::math::align_up;
use crate::render::backend::{RenderPassId, ShaderHandle};
use crate::render::types::{
    ShaderAttributeType, ShaderId, ShaderScope, ShaderStageFlags, ShaderUniformType,
};
use std::collections::HashMap;
use thiserror::Error;

/// Largest push constant block guaranteed by Vulkan
pub const MAX_PUSH_CONSTANT_SIZE: u32 = 128;

/// Cap on push constant ranges per pipeline
pub const MAX_PUSH_CONSTANT_RANGES: usize = 32;

/// Push constant ranges are aligned to this many bytes
pub const PUSH_CONSTANT_ALIGNMENT: u64 = 4;

/// Descriptor set index used by global-scope bindings
pub const GLOBAL_SET_INDEX: u8 = 0;

/// Descriptor set index used by instance-scope bindings
pub const INSTANCE_SET_INDEX: u8 = 1;

/// Binding of the uniform buffer within a descriptor set
pub const UBO_BINDING: u32 = 0;

/// Binding of the sampler array within a descriptor set
pub const SAMPLER_BINDING: u32 = 1;

/// Shader declaration and binding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShaderError {
    /// Operation not legal in the shader's current state
    #[error("shader '{shader}': cannot {operation} while {state:?}")]
    InvalidState {
        /// Shader name
        shader: String,
        /// Attempted operation
        operation: &'static str,
        /// State at the time
        state: ShaderState,
    },

    /// Uniform, sampler or attribute name already used
    #[error("shader '{shader}': duplicate name '{name}'")]
    DuplicateName {
        /// Shader name
        shader: String,
        /// Rejected name
        name: String,
    },

    /// A fixed maximum would be exceeded
    #[error("shader '{shader}': {what} limit of {max} exceeded")]
    CapacityExceeded {
        /// Shader name
        shader: String,
        /// What ran out
        what: &'static str,
        /// The limit
        max: u32,
    },

    /// Scope not enabled for this shader or not valid for the uniform type
    #[error("shader '{shader}': '{name}' cannot use {scope:?} scope: {reason}")]
    InvalidScope {
        /// Shader name
        shader: String,
        /// Uniform name
        name: String,
        /// Requested scope
        scope: ShaderScope,
        /// Why
        reason: &'static str,
    },

    /// Uniform name or index did not resolve
    #[error("shader '{shader}': no uniform '{name}'")]
    UnknownUniform {
        /// Shader name
        shader: String,
        /// Name or index that failed
        name: String,
    },

    /// Write size differs from the declared uniform size
    #[error("shader '{shader}': uniform '{name}' is {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Shader name
        shader: String,
        /// Uniform name
        name: String,
        /// Declared size
        expected: u32,
        /// Supplied size
        actual: usize,
    },

    /// A shader with this name already exists
    #[error("shader '{0}' already exists")]
    AlreadyExists(String),

    /// No shader with this name or id
    #[error("shader '{0}' not found")]
    NotFound(String),
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderState {
    /// Declared, no backend objects yet
    NotCreated,
    /// Backend structures exist, layout still open
    Uninitialized,
    /// Pipeline and uniform buffer built, layout frozen
    Initialized,
}

/// How a name table insert treats an existing key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Fail if the key exists
    InsertOnly,
    /// Replace an existing value
    Upsert,
}

/// Insert `name -> value`, honouring `mode`. Returns false when an
/// `InsertOnly` insert found the name taken.
pub fn insert_name<V>(map: &mut HashMap<String, V>, name: &str, value: V, mode: InsertMode) -> bool {
    match mode {
        InsertMode::InsertOnly if map.contains_key(name) => false,
        _ => {
            map.insert(name.to_string(), value);
            true
        }
    }
}

/// Per-shader maximums, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderLimits {
    /// Uniforms plus samplers
    pub max_uniforms: u32,
    /// Global-scope samplers
    pub max_global_textures: u32,
    /// Instance-scope samplers
    pub max_instance_textures: u32,
}

impl Default for ShaderLimits {
    fn default() -> Self {
        Self {
            max_uniforms: 128,
            max_global_textures: 31,
            max_instance_textures: 31,
        }
    }
}

/// Vertex attribute with its byte offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderAttribute {
    /// Attribute name
    pub name: String,
    /// Attribute type
    pub attribute_type: ShaderAttributeType,
    /// Size in bytes
    pub size: u32,
    /// Offset within a vertex
    pub offset: u32,
}

/// Declared uniform or sampler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderUniform {
    /// Uniform name
    pub name: String,
    /// Position in the uniform list
    pub index: u16,
    /// Sampler slot within its scope for samplers, `index` otherwise
    pub location: u16,
    /// Byte offset within the scope's buffer region or push constant block
    pub offset: u64,
    /// Size in bytes, zero for samplers
    pub size: u32,
    /// Scope
    pub scope: ShaderScope,
    /// Type
    pub uniform_type: ShaderUniformType,
}

impl ShaderUniform {
    /// Whether this is a sampler slot
    pub fn is_sampler(&self) -> bool {
        self.uniform_type == ShaderUniformType::Sampler
    }

    /// Descriptor set the uniform lives in, `None` for push constants
    pub fn set_index(&self) -> Option<u8> {
        match self.scope {
            ShaderScope::Global => Some(GLOBAL_SET_INDEX),
            ShaderScope::Instance => Some(INSTANCE_SET_INDEX),
            ShaderScope::Local => None,
        }
    }
}

/// Byte range of the push constant block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    /// Offset in bytes
    pub offset: u32,
    /// Size in bytes
    pub size: u32,
}

/// A shader's declaration, layout and binding state
#[derive(Debug, Clone)]
pub struct Shader {
    /// Slot in the shader system
    pub id: ShaderId,
    /// Unique name
    pub name: String,
    /// Render pass name the pipeline targets
    pub renderpass_name: String,
    /// Resolved render pass
    pub renderpass: Option<RenderPassId>,
    /// Stages in declaration order
    pub stages: Vec<ShaderStageFlags>,
    /// One SPIR-V file per stage
    pub stage_files: Vec<String>,
    /// Instance scope enabled
    pub use_instances: bool,
    /// Local scope (push constants) enabled
    pub use_local: bool,
    /// Face culling
    pub cull_mode: ShaderCullMode,
    /// Depth test and write
    pub depth_test: bool,
    /// Line rasterization
    pub wireframe: bool,
    /// Instance slots the uniform buffer is sized for
    pub max_instances: u32,
    /// Last frame `apply_globals` ran for this shader
    pub render_frame_number: u64,
    /// Backend object, set once created
    pub internal: Option<ShaderHandle>,

    state: ShaderState,
    limits: ShaderLimits,
    attributes: Vec<ShaderAttribute>,
    attribute_stride: u32,
    uniforms: Vec<ShaderUniform>,
    lookup: HashMap<String, u16>,
    global_ubo_size: u64,
    global_ubo_stride: u64,
    global_ubo_offset: u64,
    ubo_size: u64,
    ubo_stride: u64,
    push_constant_size: u32,
    push_constant_ranges: Vec<PushConstantRange>,
    global_texture_count: u32,
    instance_texture_count: u32,
    bound_scope: ShaderScope,
    bound_instance_id: Option<u32>,
    bound_ubo_offset: u64,
}

impl Shader {
    /// Start a shader from its parsed config; nothing is declared yet
    pub fn new(id: ShaderId, config: &ShaderConfig, limits: ShaderLimits, max_instances: u32) -> Self {
        Self {
            id,
            name: config.name.clone(),
            renderpass_name: config.renderpass_name.clone(),
            renderpass: None,
            stages: config.stages.clone(),
            stage_files: config.stage_files.clone(),
            use_instances: config.use_instances,
            use_local: config.use_local,
            cull_mode: config.cull_mode,
            depth_test: config.depth_test,
            wireframe: config.wireframe,
            max_instances,
            render_frame_number: u64::MAX,
            internal: None,
            state: ShaderState::NotCreated,
            limits,
            attributes: Vec::new(),
            attribute_stride: 0,
            uniforms: Vec::new(),
            lookup: HashMap::new(),
            global_ubo_size: 0,
            global_ubo_stride: 0,
            global_ubo_offset: 0,
            ubo_size: 0,
            ubo_stride: 0,
            push_constant_size: 0,
            push_constant_ranges: Vec::new(),
            global_texture_count: 0,
            instance_texture_count: 0,
            bound_scope: ShaderScope::Global,
            bound_instance_id: None,
            bound_ubo_offset: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> ShaderState {
        self.state
    }

    /// Limits the shader was created with
    pub fn limits(&self) -> ShaderLimits {
        self.limits
    }

    /// Record that the backend created its structures
    pub fn mark_created(&mut self, handle: ShaderHandle) -> Result<(), ShaderError> {
        self.expect_state(ShaderState::NotCreated, "create")?;
        self.internal = Some(handle);
        self.state = ShaderState::Uninitialized;
        Ok(())
    }

    /// Record that the backend finished initialize
    pub fn mark_initialized(&mut self) -> Result<(), ShaderError> {
        self.expect_state(ShaderState::Uninitialized, "initialize")?;
        self.state = ShaderState::Initialized;
        Ok(())
    }

    /// Declare every attribute and uniform in `config`, in order
    pub fn declare_from_config(&mut self, config: &ShaderConfig) -> Result<(), ShaderError> {
        for attribute in &config.attributes {
            self.add_attribute(&attribute.name, attribute.attribute_type)?;
        }
        for uniform in &config.uniforms {
            self.add_uniform(&uniform.name, uniform.scope, uniform.uniform_type)?;
        }
        Ok(())
    }

    /// Append a vertex attribute; its offset is the running attribute size
    pub fn add_attribute(&mut self, name: &str, attribute_type: ShaderAttributeType) -> Result<(), ShaderError> {
        self.expect_state(ShaderState::Uninitialized, "add attributes")?;
        if self.attributes.iter().any(|a| a.name == name) {
            return Err(self.duplicate(name));
        }
        let size = attribute_type.size();
        self.attributes.push(ShaderAttribute {
            name: name.to_string(),
            attribute_type,
            size,
            offset: self.attribute_stride,
        });
        self.attribute_stride += size;
        Ok(())
    }

    /// Declare a uniform. Samplers are routed to [`Shader::add_sampler`].
    pub fn add_uniform(
        &mut self,
        name: &str,
        scope: ShaderScope,
        uniform_type: ShaderUniformType,
    ) -> Result<(), ShaderError> {
        if uniform_type == ShaderUniformType::Sampler {
            return self.add_sampler(name, scope);
        }
        self.check_uniform_add(name, scope)?;

        let size = uniform_type.size();
        let offset = match scope {
            ShaderScope::Local => {
                if self.push_constant_ranges.len() >= MAX_PUSH_CONSTANT_RANGES {
                    return Err(self.capacity("push constant range", MAX_PUSH_CONSTANT_RANGES as u32));
                }
                let range = aligned_range(self.push_constant_size, size);
                if range.offset + range.size > MAX_PUSH_CONSTANT_SIZE {
                    return Err(self.capacity("push constant byte", MAX_PUSH_CONSTANT_SIZE));
                }
                self.push_constant_ranges.push(range);
                self.push_constant_size = range.offset + range.size;
                u64::from(range.offset)
            }
            ShaderScope::Global => {
                let offset = self.global_ubo_size;
                self.global_ubo_size += u64::from(size);
                offset
            }
            ShaderScope::Instance => {
                let offset = self.ubo_size;
                self.ubo_size += u64::from(size);
                offset
            }
        };

        let index = self.uniforms.len() as u16;
        self.push_uniform(ShaderUniform {
            name: name.to_string(),
            index,
            location: index,
            offset,
            size,
            scope,
            uniform_type,
        });
        Ok(())
    }

    /// Declare a sampler slot in the global or instance scope
    pub fn add_sampler(&mut self, name: &str, scope: ShaderScope) -> Result<(), ShaderError> {
        self.check_uniform_add(name, scope)?;
        let location = match scope {
            ShaderScope::Local => {
                return Err(self.invalid_scope(name, scope, "samplers cannot be local"));
            }
            ShaderScope::Global => {
                if self.global_texture_count + 1 > self.limits.max_global_textures {
                    return Err(self.capacity("global texture", self.limits.max_global_textures));
                }
                self.global_texture_count += 1;
                self.global_texture_count - 1
            }
            ShaderScope::Instance => {
                if self.instance_texture_count + 1 > self.limits.max_instance_textures {
                    return Err(self.capacity("instance texture", self.limits.max_instance_textures));
                }
                self.instance_texture_count += 1;
                self.instance_texture_count - 1
            }
        };

        let index = self.uniforms.len() as u16;
        self.push_uniform(ShaderUniform {
            name: name.to_string(),
            index,
            location: location as u16,
            offset: 0,
            size: 0,
            scope,
            uniform_type: ShaderUniformType::Sampler,
        });
        Ok(())
    }

    /// Round scope sizes up to `alignment` and return the uniform buffer
    /// size: `global_stride + instance_stride * max_instances`.
    pub fn compute_strides(&mut self, alignment: u64) -> u64 {
        self.global_ubo_stride = align_up(self.global_ubo_size, alignment);
        self.ubo_stride = if self.use_instances {
            align_up(self.ubo_size, alignment)
        } else {
            0
        };
        self.uniform_buffer_size()
    }

    /// Total uniform buffer size for the current strides
    pub fn uniform_buffer_size(&self) -> u64 {
        self.global_ubo_stride + self.ubo_stride * u64::from(self.max_instances)
    }

    /// Record where the global region was placed in the uniform buffer
    pub fn set_global_ubo_offset(&mut self, offset: u64) {
        self.global_ubo_offset = offset;
    }

    /// Target the global region with subsequent uniform writes
    pub fn bind_globals(&mut self) {
        self.bound_scope = ShaderScope::Global;
        self.bound_instance_id = None;
        self.bound_ubo_offset = self.global_ubo_offset;
    }

    /// Target an instance region with subsequent uniform writes
    pub fn bind_instance(&mut self, instance_id: u32, offset: u64) {
        self.bound_scope = ShaderScope::Instance;
        self.bound_instance_id = Some(instance_id);
        self.bound_ubo_offset = offset;
    }

    /// Index of the uniform called `name`
    pub fn uniform_index(&self, name: &str) -> Option<u16> {
        self.lookup.get(name).copied()
    }

    /// Uniform at `index`
    pub fn uniform(&self, index: u16) -> Option<&ShaderUniform> {
        self.uniforms.get(usize::from(index))
    }

    /// Uniform called `name`
    pub fn uniform_by_name(&self, name: &str) -> Option<&ShaderUniform> {
        self.uniform_index(name).and_then(|index| self.uniform(index))
    }

    /// Validate a write of `size` bytes to the uniform at `index`.
    ///
    /// Samplers take no bytes and only accept a size of zero.
    pub fn check_uniform_write(&self, index: u16, size: usize) -> Result<&ShaderUniform, ShaderError> {
        let uniform = self.uniform(index).ok_or_else(|| ShaderError::UnknownUniform {
            shader: self.name.clone(),
            name: format!("#{index}"),
        })?;
        if size != uniform.size as usize {
            return Err(ShaderError::SizeMismatch {
                shader: self.name.clone(),
                name: uniform.name.clone(),
                expected: uniform.size,
                actual: size,
            });
        }
        Ok(uniform)
    }

    /// Require `state`, naming `operation` in the error otherwise
    pub fn expect_state(&self, state: ShaderState, operation: &'static str) -> Result<(), ShaderError> {
        if self.state == state {
            Ok(())
        } else {
            Err(ShaderError::InvalidState {
                shader: self.name.clone(),
                operation,
                state: self.state,
            })
        }
    }

    /// Attributes in declaration order
    pub fn attributes(&self) -> &[ShaderAttribute] {
        &self.attributes
    }

    /// Bytes per vertex
    pub fn attribute_stride(&self) -> u32 {
        self.attribute_stride
    }

    /// Uniforms in declaration order
    pub fn uniforms(&self) -> &[ShaderUniform] {
        &self.uniforms
    }

    /// Unaligned global region size
    pub fn global_ubo_size(&self) -> u64 {
        self.global_ubo_size
    }

    /// Aligned global region size
    pub fn global_ubo_stride(&self) -> u64 {
        self.global_ubo_stride
    }

    /// Offset of the global region
    pub fn global_ubo_offset(&self) -> u64 {
        self.global_ubo_offset
    }

    /// Unaligned instance region size
    pub fn ubo_size(&self) -> u64 {
        self.ubo_size
    }

    /// Aligned instance region size
    pub fn ubo_stride(&self) -> u64 {
        self.ubo_stride
    }

    /// Push constant block size
    pub fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }

    /// Push constant ranges in declaration order
    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constant_ranges
    }

    /// Number of global sampler slots
    pub fn global_texture_count(&self) -> u32 {
        self.global_texture_count
    }

    /// Number of instance sampler slots
    pub fn instance_texture_count(&self) -> u32 {
        self.instance_texture_count
    }

    /// Scope targeted by uniform writes
    pub fn bound_scope(&self) -> ShaderScope {
        self.bound_scope
    }

    /// Bound instance, if any
    pub fn bound_instance_id(&self) -> Option<u32> {
        self.bound_instance_id
    }

    /// Buffer offset uniform writes are relative to
    pub fn bound_ubo_offset(&self) -> u64 {
        self.bound_ubo_offset
    }

    /// Combined stage flags
    pub fn stage_flags(&self) -> ShaderStageFlags {
        self.stages
            .iter()
            .fold(ShaderStageFlags::empty(), |acc, stage| acc | *stage)
    }

    fn check_uniform_add(&self, name: &str, scope: ShaderScope) -> Result<(), ShaderError> {
        self.expect_state(ShaderState::Uninitialized, "add uniforms")?;
        if name.is_empty() || self.lookup.contains_key(name) {
            return Err(self.duplicate(name));
        }
        if self.uniforms.len() as u32 + 1 > self.limits.max_uniforms {
            return Err(self.capacity("uniform", self.limits.max_uniforms));
        }
        match scope {
            ShaderScope::Local if !self.use_local => {
                Err(self.invalid_scope(name, scope, "shader does not use locals"))
            }
            ShaderScope::Instance if !self.use_instances => {
                Err(self.invalid_scope(name, scope, "shader does not use instances"))
            }
            _ => Ok(()),
        }
    }

    fn push_uniform(&mut self, uniform: ShaderUniform) {
        insert_name(&mut self.lookup, &uniform.name, uniform.index, InsertMode::InsertOnly);
        log::trace!(
            "[SHADER] {}: {:?} '{}' offset={} size={} location={}",
            self.name,
            uniform.scope,
            uniform.name,
            uniform.offset,
            uniform.size,
            uniform.location
        );
        self.uniforms.push(uniform);
    }

    fn duplicate(&self, name: &str) -> ShaderError {
        ShaderError::DuplicateName {
            shader: self.name.clone(),
            name: name.to_string(),
        }
    }

    fn capacity(&self, what: &'static str, max: u32) -> ShaderError {
        ShaderError::CapacityExceeded {
            shader: self.name.clone(),
            what,
            max,
        }
    }

    fn invalid_scope(&self, name: &str, scope: ShaderScope, reason: &'static str) -> ShaderError {
        ShaderError::InvalidScope {
            shader: self.name.clone(),
            name: name.to_string(),
            scope,
            reason,
        }
    }
}

/// Range starting at `offset` rounded up to 4 bytes, sized `size` rounded up to 4 bytes
fn aligned_range(offset: u32, size: u32) -> PushConstantRange {
    PushConstantRange {
        offset: align_up(u64::from(offset), PUSH_CONSTANT_ALIGNMENT) as u32,
        size: align_up(u64::from(size), PUSH_CONSTANT_ALIGNMENT) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{ShaderAttributeConfig, ShaderUniformConfig};
    use slotmap::SlotMap;

    fn handle() -> ShaderHandle {
        let mut map: SlotMap<ShaderHandle, ()> = SlotMap::with_key();
        map.insert(())
    }

    fn material_config() -> ShaderConfig {
        let attribute = |name: &str, attribute_type| ShaderAttributeConfig {
            name: name.to_string(),
            attribute_type,
        };
        let uniform = |name: &str, uniform_type, scope| ShaderUniformConfig {
            name: name.to_string(),
            uniform_type,
            scope,
        };
        ShaderConfig {
            name: "Shader.Builtin.Material".to_string(),
            renderpass_name: "Renderpass.Builtin.World".to_string(),
            stages: vec![ShaderStageFlags::VERTEX, ShaderStageFlags::FRAGMENT],
            stage_files: vec!["a.vert.spv".to_string(), "a.frag.spv".to_string()],
            use_instances: true,
            use_local: true,
            attributes: vec![
                attribute("in_position", ShaderAttributeType::Float32x3),
                attribute("in_normal", ShaderAttributeType::Float32x3),
                attribute("in_texcoord", ShaderAttributeType::Float32x2),
                attribute("in_colour", ShaderAttributeType::Float32x4),
            ],
            uniforms: vec![
                uniform("projection", ShaderUniformType::Matrix4, ShaderScope::Global),
                uniform("view", ShaderUniformType::Matrix4, ShaderScope::Global),
                uniform("ambient_colour", ShaderUniformType::Float32x4, ShaderScope::Global),
                uniform("diffuse_colour", ShaderUniformType::Float32x4, ShaderScope::Instance),
                uniform("diffuse_texture", ShaderUniformType::Sampler, ShaderScope::Instance),
                uniform("model", ShaderUniformType::Matrix4, ShaderScope::Local),
            ],
            ..ShaderConfig::default()
        }
    }

    fn created(config: &ShaderConfig, limits: ShaderLimits) -> Shader {
        let mut shader = Shader::new(ShaderId(0), config, limits, 16);
        shader.mark_created(handle()).unwrap();
        shader
    }

    fn declared(config: &ShaderConfig) -> Shader {
        let mut shader = created(config, ShaderLimits::default());
        shader.declare_from_config(config).unwrap();
        shader
    }

    #[test]
    fn test_material_layout() {
        let shader = declared(&material_config());

        assert_eq!(shader.attribute_stride(), 48);
        let offsets: Vec<u32> = shader.attributes().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32]);

        let view = shader.uniform_by_name("view").unwrap();
        assert_eq!((view.offset, view.size), (64, 64));
        let ambient = shader.uniform_by_name("ambient_colour").unwrap();
        assert_eq!(ambient.offset, 128);
        assert_eq!(shader.global_ubo_size(), 144);

        let diffuse = shader.uniform_by_name("diffuse_colour").unwrap();
        assert_eq!((diffuse.offset, diffuse.size), (0, 16));
        assert_eq!(shader.ubo_size(), 16);

        let sampler = shader.uniform_by_name("diffuse_texture").unwrap();
        assert!(sampler.is_sampler());
        assert_eq!((sampler.location, sampler.size), (0, 0));
        assert_eq!(sampler.set_index(), Some(INSTANCE_SET_INDEX));
        assert_eq!(shader.instance_texture_count(), 1);

        let model = shader.uniform_by_name("model").unwrap();
        assert_eq!(model.set_index(), None);
        assert_eq!(shader.push_constant_ranges(), &[PushConstantRange { offset: 0, size: 64 }]);
    }

    #[test]
    fn test_strides_and_buffer_size() {
        let mut shader = declared(&material_config());
        let size = shader.compute_strides(256);
        assert_eq!(shader.global_ubo_stride(), 256);
        assert_eq!(shader.ubo_stride(), 256);
        assert_eq!(size, 256 + 256 * 16);

        let size = shader.compute_strides(0);
        assert_eq!(size, 144 + 16 * 16);
    }

    #[test]
    fn test_layout_is_deterministic() {
        let config = material_config();
        let mut first = declared(&config);
        let mut second = declared(&config);
        assert_eq!(first.compute_strides(64), second.compute_strides(64));
        assert_eq!(first.uniforms(), second.uniforms());
        assert_eq!(first.attributes(), second.attributes());
        assert_eq!(first.push_constant_ranges(), second.push_constant_ranges());
        assert_eq!(first.global_ubo_stride(), second.global_ubo_stride());
    }

    #[test]
    fn test_uniforms_only_while_uninitialized() {
        let config = material_config();
        let mut shader = Shader::new(ShaderId(0), &config, ShaderLimits::default(), 4);
        assert!(matches!(
            shader.add_uniform("early", ShaderScope::Global, ShaderUniformType::Float32),
            Err(ShaderError::InvalidState { state: ShaderState::NotCreated, .. })
        ));

        shader.mark_created(handle()).unwrap();
        shader.add_uniform("projection", ShaderScope::Global, ShaderUniformType::Matrix4).unwrap();
        shader.mark_initialized().unwrap();

        assert!(matches!(
            shader.add_uniform("late", ShaderScope::Global, ShaderUniformType::Float32),
            Err(ShaderError::InvalidState { state: ShaderState::Initialized, .. })
        ));
        assert!(shader.add_sampler("late_sampler", ShaderScope::Global).is_err());
        assert!(shader.add_attribute("late_attr", ShaderAttributeType::Float32).is_err());
        assert!(shader.mark_initialized().is_err());
    }

    #[test]
    fn test_duplicate_names_across_scopes() {
        let mut shader = created(&material_config(), ShaderLimits::default());
        shader.add_uniform("colour", ShaderScope::Global, ShaderUniformType::Float32x4).unwrap();
        let result = shader.add_uniform("colour", ShaderScope::Instance, ShaderUniformType::Float32x4);
        assert!(matches!(result, Err(ShaderError::DuplicateName { .. })));
        assert!(shader.add_sampler("colour", ShaderScope::Instance).is_err());
        assert_eq!(shader.uniforms().len(), 1);
        assert_eq!(shader.ubo_size(), 0);
    }

    #[test]
    fn test_uniform_capacity_enforced() {
        let limits = ShaderLimits {
            max_uniforms: 3,
            ..ShaderLimits::default()
        };
        let mut shader = created(&material_config(), limits);
        for name in ["a", "b", "c"] {
            shader.add_uniform(name, ShaderScope::Global, ShaderUniformType::Float32).unwrap();
        }
        for name in ["d", "e", "f"] {
            assert!(matches!(
                shader.add_uniform(name, ShaderScope::Global, ShaderUniformType::Float32),
                Err(ShaderError::CapacityExceeded { max: 3, .. })
            ));
            assert!(shader.add_sampler(name, ShaderScope::Instance).is_err());
        }
        assert_eq!(shader.uniforms().len(), 3);
        assert_eq!(shader.global_ubo_size(), 12);
        assert_eq!(shader.instance_texture_count(), 0);
    }

    #[test]
    fn test_texture_capacity_enforced() {
        let limits = ShaderLimits {
            max_uniforms: 16,
            max_global_textures: 1,
            max_instance_textures: 2,
        };
        let mut shader = created(&material_config(), limits);
        shader.add_sampler("g0", ShaderScope::Global).unwrap();
        assert!(shader.add_sampler("g1", ShaderScope::Global).is_err());
        shader.add_sampler("i0", ShaderScope::Instance).unwrap();
        shader.add_sampler("i1", ShaderScope::Instance).unwrap();
        assert!(shader.add_sampler("i2", ShaderScope::Instance).is_err());
        assert!(shader.add_sampler("i3", ShaderScope::Instance).is_err());

        assert_eq!(shader.global_texture_count(), 1);
        assert_eq!(shader.instance_texture_count(), 2);
        assert_eq!(shader.uniform_by_name("i1").unwrap().location, 1);
        assert!(shader.uniform_by_name("i2").is_none());
    }

    #[test]
    fn test_scope_must_be_enabled() {
        let mut config = material_config();
        config.use_local = false;
        config.use_instances = false;
        let mut shader = created(&config, ShaderLimits::default());
        assert!(matches!(
            shader.add_uniform("model", ShaderScope::Local, ShaderUniformType::Matrix4),
            Err(ShaderError::InvalidScope { .. })
        ));
        assert!(shader.add_uniform("tint", ShaderScope::Instance, ShaderUniformType::Float32x4).is_err());
        assert!(shader.add_sampler("local_sampler", ShaderScope::Local).is_err());
        assert!(shader.uniforms().is_empty());
    }

    #[test]
    fn test_push_constants_aligned_to_four() {
        let mut shader = created(&material_config(), ShaderLimits::default());
        shader.add_uniform("flag", ShaderScope::Local, ShaderUniformType::UInt8).unwrap();
        shader.add_uniform("tint", ShaderScope::Local, ShaderUniformType::Float32x3).unwrap();
        shader.add_uniform("scale", ShaderScope::Local, ShaderUniformType::Int16).unwrap();

        assert_eq!(
            shader.push_constant_ranges(),
            &[
                PushConstantRange { offset: 0, size: 4 },
                PushConstantRange { offset: 4, size: 12 },
                PushConstantRange { offset: 16, size: 4 },
            ]
        );
        assert_eq!(shader.push_constant_size(), 20);
        assert_eq!(shader.uniform_by_name("scale").unwrap().offset, 16);
    }

    #[test]
    fn test_push_constant_block_capped() {
        let mut shader = created(&material_config(), ShaderLimits::default());
        shader.add_uniform("m0", ShaderScope::Local, ShaderUniformType::Matrix4).unwrap();
        shader.add_uniform("m1", ShaderScope::Local, ShaderUniformType::Matrix4).unwrap();
        assert!(matches!(
            shader.add_uniform("extra", ShaderScope::Local, ShaderUniformType::Float32),
            Err(ShaderError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_uniform_size_contract() {
        let shader = declared(&material_config());
        let projection = shader.uniform_index("projection").unwrap();
        assert!(shader.check_uniform_write(projection, 64).is_ok());
        for size in [0, 1, 16, 63, 65, 128] {
            assert!(matches!(
                shader.check_uniform_write(projection, size),
                Err(ShaderError::SizeMismatch { expected: 64, .. })
            ));
        }

        let sampler = shader.uniform_index("diffuse_texture").unwrap();
        assert!(shader.check_uniform_write(sampler, 0).is_ok());
        assert!(shader.check_uniform_write(sampler, 4).is_err());
        assert!(shader.check_uniform_write(99, 4).is_err());
    }

    #[test]
    fn test_bind_changes_target_offset() {
        let mut shader = declared(&material_config());
        shader.compute_strides(256);
        shader.set_global_ubo_offset(0);
        shader.bind_instance(3, 1024);
        assert_eq!(shader.bound_scope(), ShaderScope::Instance);
        assert_eq!(shader.bound_instance_id(), Some(3));
        assert_eq!(shader.bound_ubo_offset(), 1024);

        shader.bind_globals();
        assert_eq!(shader.bound_scope(), ShaderScope::Global);
        assert_eq!(shader.bound_instance_id(), None);
        assert_eq!(shader.bound_ubo_offset(), 0);
    }

    #[test]
    fn test_insert_modes() {
        let mut map = HashMap::new();
        assert!(insert_name(&mut map, "a", 1, InsertMode::InsertOnly));
        assert!(!insert_name(&mut map, "a", 2, InsertMode::InsertOnly));
        assert_eq!(map["a"], 1);
        assert!(insert_name(&mut map, "a", 3, InsertMode::Upsert));
        assert_eq!(map["a"], 3);
    }
}

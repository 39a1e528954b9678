//! `.shadercfg` parser
//!
//! ```text
//! version=1.0
//! name=Shader.Builtin.Material
//! renderpass=Renderpass.Builtin.World
//! stages=vertex,fragment
//! stagefiles=shaders/Builtin.MaterialShader.vert.spv,shaders/Builtin.MaterialShader.frag.spv
//! use_instance=1
//! use_local=1
//! attribute=vec3,in_position
//! uniform=mat4,0,projection
//! ```

use super::{key_value, parse_bool, read_text, AssetError, AssetResult};
use crate::render::types::{ShaderAttributeType, ShaderScope, ShaderStageFlags, ShaderUniformType};
use std::path::Path;

/// Face culling requested by a shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShaderCullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    #[default]
    Back,
    /// Cull everything
    FrontAndBack,
}

/// One declared vertex attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderAttributeConfig {
    /// Attribute name
    pub name: String,
    /// Attribute type
    pub attribute_type: ShaderAttributeType,
}

/// One declared uniform or sampler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderUniformConfig {
    /// Uniform name
    pub name: String,
    /// Uniform type
    pub uniform_type: ShaderUniformType,
    /// Scope
    pub scope: ShaderScope,
}

impl ShaderUniformConfig {
    /// Size in bytes (zero for samplers)
    pub fn size(&self) -> u32 {
        self.uniform_type.size()
    }
}

/// Parsed shader declaration
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderConfig {
    /// Shader name
    pub name: String,
    /// Render pass the shader's pipeline is built against
    pub renderpass_name: String,
    /// Stages in declaration order
    pub stages: Vec<ShaderStageFlags>,
    /// Stage file paths, one per stage
    pub stage_files: Vec<String>,
    /// Whether the shader has instance-scope data
    pub use_instances: bool,
    /// Whether the shader has local-scope (push constant) data
    pub use_local: bool,
    /// Vertex attributes in declaration order
    pub attributes: Vec<ShaderAttributeConfig>,
    /// Uniforms in declaration order
    pub uniforms: Vec<ShaderUniformConfig>,
    /// Face culling
    pub cull_mode: ShaderCullMode,
    /// Enable depth test and write
    pub depth_test: bool,
    /// Rasterize as lines
    pub wireframe: bool,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            renderpass_name: String::new(),
            stages: Vec::new(),
            stage_files: Vec::new(),
            use_instances: false,
            use_local: false,
            attributes: Vec::new(),
            uniforms: Vec::new(),
            cull_mode: ShaderCullMode::Back,
            depth_test: true,
            wireframe: false,
        }
    }
}

impl ShaderConfig {
    /// Combined stage flags
    pub fn stage_flags(&self) -> ShaderStageFlags {
        self.stages
            .iter()
            .fold(ShaderStageFlags::empty(), |acc, stage| acc | *stage)
    }

    /// Load and parse a `.shadercfg` file
    pub fn load(path: &Path) -> AssetResult<Self> {
        let text = read_text(path)?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Parse `.shadercfg` text. `source` labels errors.
    pub fn parse(text: &str, source: &str) -> AssetResult<Self> {
        let mut config = Self::default();
        let error = |line: usize, reason: String| AssetError::Parse {
            path: source.to_string(),
            line,
            reason,
        };

        for (index, raw) in text.lines().enumerate() {
            let line_number = index + 1;
            let (key, value) = match key_value(raw) {
                None => continue,
                Some(Ok(pair)) => pair,
                Some(Err(())) => {
                    log::warn!(
                        "[SHADER] {}:{}: expected key=value, skipping '{}'",
                        source,
                        line_number,
                        raw.trim()
                    );
                    continue;
                }
            };

            match key.as_str() {
                "version" => {}
                "name" => config.name = value.to_string(),
                "renderpass" => config.renderpass_name = value.to_string(),
                "stages" => {
                    for stage in split_list(value) {
                        match parse_stage(stage) {
                            Some(flag) => config.stages.push(flag),
                            None => log::error!(
                                "[SHADER] {}:{}: unrecognized stage '{}'",
                                source,
                                line_number,
                                stage
                            ),
                        }
                    }
                }
                "stagefiles" => {
                    config.stage_files = split_list(value).map(str::to_string).collect();
                }
                "use_instance" => config.use_instances = parse_bool(value),
                "use_local" => config.use_local = parse_bool(value),
                "cull_mode" => {
                    config.cull_mode = match value.to_ascii_lowercase().as_str() {
                        "none" => ShaderCullMode::None,
                        "front" => ShaderCullMode::Front,
                        "back" => ShaderCullMode::Back,
                        "front_and_back" => ShaderCullMode::FrontAndBack,
                        other => return Err(error(line_number, format!("unknown cull mode '{other}'"))),
                    }
                }
                "depth_test" => config.depth_test = parse_bool(value),
                "wireframe" => config.wireframe = parse_bool(value),
                "attribute" => {
                    let fields: Vec<&str> = split_list(value).collect();
                    let [type_name, name] = fields[..] else {
                        return Err(error(line_number, "attribute needs '<type>,<name>'".to_string()));
                    };
                    let attribute_type = parse_attribute_type(type_name)
                        .ok_or_else(|| error(line_number, format!("unknown attribute type '{type_name}'")))?;
                    config.attributes.push(ShaderAttributeConfig {
                        name: name.to_string(),
                        attribute_type,
                    });
                }
                "uniform" => {
                    let fields: Vec<&str> = split_list(value).collect();
                    let [type_name, scope, name] = fields[..] else {
                        return Err(error(
                            line_number,
                            "uniform needs '<type>,<scope>,<name>'".to_string(),
                        ));
                    };
                    let uniform_type = parse_uniform_type(type_name)
                        .ok_or_else(|| error(line_number, format!("unknown uniform type '{type_name}'")))?;
                    let scope = match scope {
                        "0" => ShaderScope::Global,
                        "1" => ShaderScope::Instance,
                        "2" => ShaderScope::Local,
                        other => return Err(error(line_number, format!("invalid scope '{other}'"))),
                    };
                    config.uniforms.push(ShaderUniformConfig {
                        name: name.to_string(),
                        uniform_type,
                        scope,
                    });
                }
                other => log::warn!("[SHADER] {}:{}: unknown key '{}'", source, line_number, other),
            }
        }

        if config.name.is_empty() {
            return Err(error(0, "missing 'name'".to_string()));
        }
        if config.stages.len() != config.stage_files.len() {
            return Err(error(
                0,
                format!(
                    "{} stages but {} stage files",
                    config.stages.len(),
                    config.stage_files.len()
                ),
            ));
        }
        Ok(config)
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_stage(stage: &str) -> Option<ShaderStageFlags> {
    match stage.to_ascii_lowercase().as_str() {
        "vert" | "vertex" => Some(ShaderStageFlags::VERTEX),
        "frag" | "fragment" => Some(ShaderStageFlags::FRAGMENT),
        "geom" | "geometry" => Some(ShaderStageFlags::GEOMETRY),
        "comp" | "compute" => Some(ShaderStageFlags::COMPUTE),
        _ => None,
    }
}

fn parse_attribute_type(name: &str) -> Option<ShaderAttributeType> {
    Some(match name {
        "f32" => ShaderAttributeType::Float32,
        "vec2" => ShaderAttributeType::Float32x2,
        "vec3" => ShaderAttributeType::Float32x3,
        "vec4" => ShaderAttributeType::Float32x4,
        "i8" => ShaderAttributeType::Int8,
        "i16" => ShaderAttributeType::Int16,
        "i32" => ShaderAttributeType::Int32,
        "u8" => ShaderAttributeType::UInt8,
        "u16" => ShaderAttributeType::UInt16,
        "u32" => ShaderAttributeType::UInt32,
        _ => return None,
    })
}

fn parse_uniform_type(name: &str) -> Option<ShaderUniformType> {
    Some(match name {
        "f32" => ShaderUniformType::Float32,
        "vec2" => ShaderUniformType::Float32x2,
        "vec3" => ShaderUniformType::Float32x3,
        "vec4" => ShaderUniformType::Float32x4,
        "i8" => ShaderUniformType::Int8,
        "i16" => ShaderUniformType::Int16,
        "i32" => ShaderUniformType::Int32,
        "u8" => ShaderUniformType::UInt8,
        "u16" => ShaderUniformType::UInt16,
        "u32" => ShaderUniformType::UInt32,
        "mat4" => ShaderUniformType::Matrix4,
        "samp" | "sampler" => ShaderUniformType::Sampler,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MATERIAL_SHADER: &str = "\
version=1.0
# world material
name=Shader.Builtin.Material
renderpass=Renderpass.Builtin.World
stages=vertex,fragment
stagefiles=shaders/Builtin.MaterialShader.vert.spv,shaders/Builtin.MaterialShader.frag.spv
use_instance=1
use_local=1

attribute=vec3,in_position
attribute=vec3,in_normal
attribute=vec2,in_texcoord
attribute=vec4,in_colour

uniform=mat4,0,projection
uniform=mat4,0,view
uniform=vec4,0,ambient_colour
uniform=vec4,1,diffuse_colour
uniform=samp,1,diffuse_texture
uniform=mat4,2,model
";

    #[test]
    fn test_parse_material_shader() {
        let config = ShaderConfig::parse(MATERIAL_SHADER, "test").unwrap();
        assert_eq!(config.name, "Shader.Builtin.Material");
        assert_eq!(config.renderpass_name, "Renderpass.Builtin.World");
        assert_eq!(config.stages, vec![ShaderStageFlags::VERTEX, ShaderStageFlags::FRAGMENT]);
        assert_eq!(config.stage_files.len(), 2);
        assert!(config.use_instances);
        assert!(config.use_local);
        assert_eq!(config.attributes.len(), 4);
        assert_eq!(config.attributes[2].attribute_type, ShaderAttributeType::Float32x2);
        assert_eq!(config.uniforms.len(), 6);
        assert_eq!(config.uniforms[4].uniform_type, ShaderUniformType::Sampler);
        assert_eq!(config.uniforms[4].scope, ShaderScope::Instance);
        assert_eq!(config.uniforms[5].scope, ShaderScope::Local);
        assert_eq!(config.cull_mode, ShaderCullMode::Back);
        assert!(config.depth_test);
    }

    #[test]
    fn test_unknown_stage_is_skipped() {
        let text = "name=s\nstages=vert,tess\nstagefiles=a.spv\n";
        let config = ShaderConfig::parse(text, "test").unwrap();
        assert_eq!(config.stages, vec![ShaderStageFlags::VERTEX]);
    }

    #[test]
    fn test_stage_file_count_mismatch() {
        let text = "name=s\nstages=vert,frag\nstagefiles=a.spv\n";
        assert!(ShaderConfig::parse(text, "test").is_err());
    }

    #[test]
    fn test_bad_uniform_scope() {
        let text = "name=s\nuniform=vec4,3,colour\n";
        let err = ShaderConfig::parse(text, "test").unwrap_err();
        assert!(matches!(err, AssetError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_optional_pipeline_keys() {
        let text = "name=sky\ncull_mode=front\ndepth_test=false\nwireframe=1\n";
        let config = ShaderConfig::parse(text, "test").unwrap();
        assert_eq!(config.cull_mode, ShaderCullMode::Front);
        assert!(!config.depth_test);
        assert!(config.wireframe);
    }
}

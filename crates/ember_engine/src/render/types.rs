//! Renderer-wide plain data types
//!
//! Vertex layouts, resource flags, shader declaration enums and the
//! configuration structs handed from the systems to the backend.

use crate::foundation::math::{Vec2, Vec3, Vec4};
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Identifier marking an unset generation or slot
pub const INVALID_ID: u32 = u32::MAX;

macro_rules! resource_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            /// Unset id
            pub const INVALID: Self = Self(INVALID_ID);

            /// Whether the id refers to a slot
            pub fn is_valid(self) -> bool {
                self.0 != INVALID_ID
            }

            /// Slot index
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

resource_id!(
    /// Slot in the texture system
    TextureId
);
resource_id!(
    /// Slot in the material system
    MaterialId
);
resource_id!(
    /// Slot in the geometry system
    GeometryId
);
resource_id!(
    /// Slot in the shader system
    ShaderId
);

/// 3D vertex: position, normal, texture coordinate, colour
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex3D {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub texcoord: [f32; 2],
    /// Vertex colour
    pub colour: [f32; 4],
}

impl Vertex3D {
    /// Vertex with white colour
    pub fn new(position: Vec3, normal: Vec3, texcoord: Vec2) -> Self {
        Self {
            position: position.into(),
            normal: normal.into(),
            texcoord: texcoord.into(),
            colour: [1.0; 4],
        }
    }
}

/// 2D vertex: position and texture coordinate
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex2D {
    /// Screen-space position
    pub position: [f32; 2],
    /// Texture coordinate
    pub texcoord: [f32; 2],
}

impl Vertex2D {
    /// Create a 2D vertex
    pub fn new(position: Vec2, texcoord: Vec2) -> Self {
        Self {
            position: position.into(),
            texcoord: texcoord.into(),
        }
    }
}

/// Axis-aligned bounds
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Extents3D {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

bitflags! {
    /// Texture properties
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureFlags: u8 {
        /// At least one pixel has alpha below 1
        const HAS_TRANSPARENCY = 1 << 0;
        /// Contents may be rewritten after creation
        const IS_WRITABLE = 1 << 1;
        /// Wraps an image owned elsewhere (e.g. a swapchain image)
        const IS_WRAPPED = 1 << 2;
    }
}

/// Texture dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureType {
    /// Single 2D image
    #[default]
    TwoD,
    /// Six 2D layers sampled as a cube
    Cube,
}

impl TextureType {
    /// Number of image layers
    pub fn layer_count(self) -> u32 {
        match self {
            Self::TwoD => 1,
            Self::Cube => 6,
        }
    }
}

/// What a texture map is used for in a shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureUse {
    /// Unassigned
    #[default]
    Unknown,
    /// Diffuse colour map
    MapDiffuse,
    /// Environment cube map
    MapCubemap,
}

/// Texture reference plus its use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureMap {
    /// Texture, `TextureId::INVALID` if unset
    pub texture: TextureId,
    /// Use of the map
    pub usage: TextureUse,
}

impl TextureMap {
    /// Map with a use and no texture yet
    pub fn new(usage: TextureUse) -> Self {
        Self {
            texture: TextureId::INVALID,
            usage,
        }
    }
}

bitflags! {
    /// Shader stages declared by a shader config
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStageFlags: u8 {
        /// Vertex stage
        const VERTEX = 1 << 0;
        /// Geometry stage
        const GEOMETRY = 1 << 1;
        /// Fragment stage
        const FRAGMENT = 1 << 2;
        /// Compute stage
        const COMPUTE = 1 << 3;
    }
}

impl ShaderStageFlags {
    /// File-name suffix of a single stage (`<shader>.<suffix>.spv`)
    pub fn file_suffix(self) -> Option<&'static str> {
        match self {
            s if s == Self::VERTEX => Some("vert"),
            s if s == Self::GEOMETRY => Some("geom"),
            s if s == Self::FRAGMENT => Some("frag"),
            s if s == Self::COMPUTE => Some("comp"),
            _ => None,
        }
    }
}

/// Uniform scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShaderScope {
    /// Set once per shader per frame
    Global = 0,
    /// Set once per material per frame
    Instance = 1,
    /// Set per draw through push constants
    Local = 2,
}

/// Vertex attribute types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderAttributeType {
    /// 32-bit float
    Float32,
    /// 2 x f32
    Float32x2,
    /// 3 x f32
    Float32x3,
    /// 4 x f32
    Float32x4,
    /// Signed 8-bit
    Int8,
    /// Signed 16-bit
    Int16,
    /// Signed 32-bit
    Int32,
    /// Unsigned 8-bit
    UInt8,
    /// Unsigned 16-bit
    UInt16,
    /// Unsigned 32-bit
    UInt32,
}

impl ShaderAttributeType {
    /// Size in bytes
    pub fn size(self) -> u32 {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Float32 | Self::Int32 | Self::UInt32 => 4,
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
        }
    }
}

/// Uniform types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderUniformType {
    /// 32-bit float
    Float32,
    /// 2 x f32
    Float32x2,
    /// 3 x f32
    Float32x3,
    /// 4 x f32
    Float32x4,
    /// Signed 8-bit
    Int8,
    /// Signed 16-bit
    Int16,
    /// Signed 32-bit
    Int32,
    /// Unsigned 8-bit
    UInt8,
    /// Unsigned 16-bit
    UInt16,
    /// Unsigned 32-bit
    UInt32,
    /// 4x4 f32 matrix
    Matrix4,
    /// Texture sampler (no buffer bytes)
    Sampler,
}

impl ShaderUniformType {
    /// Size in bytes, zero for samplers
    pub fn size(self) -> u32 {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Float32 | Self::Int32 | Self::UInt32 => 4,
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
            Self::Matrix4 => 64,
            Self::Sampler => 0,
        }
    }
}

bitflags! {
    /// Which attachments a render pass clears
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RenderPassClearFlags: u8 {
        /// Clear the colour attachment
        const COLOUR_BUFFER = 1 << 0;
        /// Clear depth (also creates the depth attachment)
        const DEPTH_BUFFER = 1 << 1;
        /// Clear stencil
        const STENCIL_BUFFER = 1 << 2;
    }
}

/// Render pass description
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassConfig {
    /// Unique pass name
    pub name: String,
    /// Name of the pass rendering into the same image before this one
    pub prev_name: Option<String>,
    /// Name of the pass rendering into the same image after this one
    pub next_name: Option<String>,
    /// x, y, width, height
    pub render_area: Vec4,
    /// Clear colour used when `COLOUR_BUFFER` is set
    pub clear_colour: Vec4,
    /// Clear flags
    pub clear_flags: RenderPassClearFlags,
}

impl RenderPassConfig {
    /// Whether another pass renders into the image before this one
    pub fn has_prev(&self) -> bool {
        self.prev_name.is_some()
    }

    /// Whether another pass renders into the image after this one
    pub fn has_next(&self) -> bool {
        self.next_name.is_some()
    }
}

/// Geometry upload description, produced by generators and mesh loaders
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryConfig {
    /// Size of one vertex in bytes
    pub vertex_size: u32,
    /// Number of vertices
    pub vertex_count: u32,
    /// Raw vertex bytes (`vertex_size * vertex_count`)
    pub vertices: Vec<u8>,
    /// Triangle indices
    pub indices: Vec<u32>,
    /// Bounds centre
    pub center: Vec3,
    /// Bounds
    pub extents: Extents3D,
    /// Geometry name
    pub name: String,
    /// Material to acquire for this geometry, if any
    pub material_name: Option<String>,
}

impl GeometryConfig {
    /// Build a config from 3D vertices, computing bounds
    pub fn from_vertices_3d(
        name: impl Into<String>,
        vertices: &[Vertex3D],
        indices: Vec<u32>,
        material_name: Option<String>,
    ) -> Self {
        let mut extents = Extents3D {
            min: Vec3::repeat(f32::MAX),
            max: Vec3::repeat(f32::MIN),
        };
        for vertex in vertices {
            let p = Vec3::from(vertex.position);
            extents.min = extents.min.inf(&p);
            extents.max = extents.max.sup(&p);
        }
        if vertices.is_empty() {
            extents = Extents3D::default();
        }
        Self {
            vertex_size: std::mem::size_of::<Vertex3D>() as u32,
            vertex_count: vertices.len() as u32,
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            indices,
            center: (extents.min + extents.max) * 0.5,
            extents,
            name: name.into(),
            material_name,
        }
    }

    /// Build a config from 2D vertices
    pub fn from_vertices_2d(
        name: impl Into<String>,
        vertices: &[Vertex2D],
        indices: Vec<u32>,
        material_name: Option<String>,
    ) -> Self {
        Self {
            vertex_size: std::mem::size_of::<Vertex2D>() as u32,
            vertex_count: vertices.len() as u32,
            vertices: bytemuck::cast_slice(vertices).to_vec(),
            indices,
            center: Vec3::zeros(),
            extents: Extents3D::default(),
            name: name.into(),
            material_name,
        }
    }

    /// Copy the vertex bytes out as 3D vertices, if they are 3D vertices
    pub fn vertices_3d(&self) -> Option<Vec<Vertex3D>> {
        let stride = std::mem::size_of::<Vertex3D>();
        if self.vertex_size as usize != stride || self.vertices.len() % stride != 0 {
            return None;
        }
        Some(bytemuck::pod_collect_to_vec(&self.vertices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_sizes() {
        assert_eq!(std::mem::size_of::<Vertex3D>(), 48);
        assert_eq!(std::mem::size_of::<Vertex2D>(), 16);
    }

    #[test]
    fn test_uniform_sizes() {
        assert_eq!(ShaderUniformType::Matrix4.size(), 64);
        assert_eq!(ShaderUniformType::Float32x4.size(), 16);
        assert_eq!(ShaderUniformType::Sampler.size(), 0);
        assert_eq!(ShaderAttributeType::Float32x3.size(), 12);
    }

    #[test]
    fn test_geometry_config_bounds() {
        let vertices = [
            Vertex3D::new(Vec3::new(-1.0, 0.0, -2.0), Vec3::y(), Vec2::zeros()),
            Vertex3D::new(Vec3::new(3.0, 4.0, 2.0), Vec3::y(), Vec2::zeros()),
        ];
        let config = GeometryConfig::from_vertices_3d("quad", &vertices, vec![0, 1, 0], None);
        assert_eq!(config.extents.min, Vec3::new(-1.0, 0.0, -2.0));
        assert_eq!(config.extents.max, Vec3::new(3.0, 4.0, 2.0));
        assert_eq!(config.center, Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(config.vertices.len(), 96);
        assert_eq!(config.vertices_3d().map(|v| v.len()), Some(2));
    }
}

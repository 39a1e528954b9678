//! Per-frame packets
//!
//! A [`RenderPacket`] holds one [`RenderViewPacket`] per view that draws this
//! frame. Packets are built by the views, consumed by the frontend and dropped
//! at the end of the frame.

use super::types::{GeometryId, TextureId};
use crate::foundation::math::{Mat4, Vec3, Vec4};

/// One draw: a geometry and its model matrix
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRenderData {
    /// World transform
    pub model: Mat4,
    /// Geometry to draw
    pub geometry: GeometryId,
}

impl GeometryRenderData {
    /// Draw `geometry` with `model`
    pub fn new(geometry: GeometryId, model: Mat4) -> Self {
        Self { model, geometry }
    }
}

/// Skybox draw data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkyboxRenderData {
    /// Cube texture
    pub cubemap: TextureId,
    /// Cube geometry
    pub geometry: GeometryId,
    /// Instance slot in the skybox shader
    pub instance_id: u32,
}

/// Everything one view needs to render a frame
#[derive(Debug, Clone, PartialEq)]
pub struct RenderViewPacket {
    /// Name of the view that built (and renders) the packet
    pub view_name: String,
    /// Projection matrix
    pub projection: Mat4,
    /// View matrix
    pub view: Mat4,
    /// Camera position, for distance sorting and lighting
    pub view_position: Vec3,
    /// Ambient colour
    pub ambient_colour: Vec4,
    /// Draws in submission order
    pub geometries: Vec<GeometryRenderData>,
    /// Skybox, for the skybox view
    pub skybox: Option<SkyboxRenderData>,
}

impl RenderViewPacket {
    /// Empty packet for `view_name`
    pub fn new(view_name: impl Into<String>, projection: Mat4, view: Mat4) -> Self {
        Self {
            view_name: view_name.into(),
            projection,
            view,
            view_position: Vec3::zeros(),
            ambient_colour: Vec4::new(0.25, 0.25, 0.25, 1.0),
            geometries: Vec::new(),
            skybox: None,
        }
    }
}

/// All view packets for one frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderPacket {
    /// Seconds since the previous frame
    pub delta_time: f32,
    /// Packets in render order
    pub views: Vec<RenderViewPacket>,
}

impl RenderPacket {
    /// Packet with no views
    pub fn new(delta_time: f32) -> Self {
        Self {
            delta_time,
            views: Vec::new(),
        }
    }
}

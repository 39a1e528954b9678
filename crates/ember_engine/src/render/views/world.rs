//! World view: perspective-projected meshes, transparent ones back to front

use super::{draw_material_geometries, mesh_draws, PacketData, RenderView};
use crate::core::RendererConfig;
use crate::foundation::math::{deg_to_rad, perspective, Mat4, Point3, Vec4};
use crate::render::frontend::{FrameContext, BUILTIN_WORLD_PASS};
use crate::render::packet::{GeometryRenderData, RenderViewPacket};
use crate::render::systems::RenderResources;
use crate::render::{RenderError, RenderResult};

/// 3D scene view
#[derive(Debug, Clone)]
pub struct WorldView {
    name: String,
    fov_radians: f32,
    near_clip: f32,
    far_clip: f32,
    projection: Mat4,
    ambient_colour: Vec4,
}

impl WorldView {
    /// View named `name` with the renderer's projection settings
    pub fn new(name: impl Into<String>, config: &RendererConfig, width: u32, height: u32) -> Self {
        let mut view = Self {
            name: name.into(),
            fov_radians: deg_to_rad(config.field_of_view),
            near_clip: config.near_clip,
            far_clip: config.far_clip,
            projection: Mat4::identity(),
            ambient_colour: Vec4::from(config.ambient_colour),
        };
        view.on_resize(width, height);
        view
    }

    /// Current projection matrix
    pub fn projection(&self) -> &Mat4 {
        &self.projection
    }
}

/// Opaque draws in submission order, then transparent draws farthest first
pub fn order_draws(opaque: Vec<GeometryRenderData>, mut transparent: Vec<(f32, GeometryRenderData)>) -> Vec<GeometryRenderData> {
    transparent.sort_unstable_by(|a, b| b.0.total_cmp(&a.0));
    let mut draws = opaque;
    draws.extend(transparent.into_iter().map(|(_, draw)| draw));
    draws
}

impl RenderView for WorldView {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let aspect = width as f32 / height as f32;
        self.projection = perspective(self.fov_radians, aspect, self.near_clip, self.far_clip);
    }

    fn on_build_packet(&self, resources: &RenderResources, data: &PacketData<'_>) -> RenderResult<RenderViewPacket> {
        let PacketData::World { meshes, camera } = data else {
            return Err(RenderError::RenderingFailed(format!(
                "view '{}' expects world packet data",
                self.name
            )));
        };

        let mut packet = RenderViewPacket::new(self.name.clone(), self.projection, camera.view());
        packet.view_position = camera.position();
        packet.ambient_colour = self.ambient_colour;

        let mut opaque = Vec::new();
        let mut transparent = Vec::new();
        for draw in mesh_draws(meshes) {
            let Some(geometry) = resources.geometries.get(draw.geometry) else {
                continue;
            };
            let is_transparent = resources
                .materials
                .get(geometry.material)
                .is_some_and(|material| resources.textures.has_transparency(material.diffuse_map.texture));
            if is_transparent {
                let center = draw.model.transform_point(&Point3::from(geometry.center));
                let distance = (center.coords - packet.view_position).norm();
                transparent.push((distance, draw));
            } else {
                opaque.push(draw);
            }
        }
        packet.geometries = order_draws(opaque, transparent);
        Ok(packet)
    }

    fn on_render(
        &mut self,
        packet: &RenderViewPacket,
        frame: &mut FrameContext<'_>,
        resources: &mut RenderResources,
    ) -> RenderResult<()> {
        frame.begin_pass(BUILTIN_WORLD_PASS)?;
        draw_material_geometries(packet, frame, resources)?;
        frame.end_pass(BUILTIN_WORLD_PASS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::types::GeometryId;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn draw(id: u32) -> GeometryRenderData {
        GeometryRenderData::new(GeometryId(id), Mat4::identity())
    }

    #[test]
    fn test_transparent_sorted_far_to_near_under_shuffle() {
        let opaque: Vec<_> = (0..4).map(draw).collect();
        let mut transparent: Vec<_> = (10..20).map(|id| (id as f32 * 1.5, draw(id))).collect();

        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..25 {
            transparent.shuffle(&mut rng);
            let ordered = order_draws(opaque.clone(), transparent.clone());
            let ids: Vec<u32> = ordered.iter().map(|d| d.geometry.0).collect();
            assert_eq!(&ids[..4], &[0, 1, 2, 3]);
            assert_eq!(&ids[4..], &[19, 18, 17, 16, 15, 14, 13, 12, 11, 10]);
        }
    }

    #[test]
    fn test_projection_follows_aspect() {
        let config = RendererConfig::default();
        let mut view = WorldView::new("world", &config, 800, 400);
        let wide = view.projection()[(0, 0)];
        view.on_resize(400, 400);
        let square = view.projection()[(0, 0)];
        assert!(square > wide);
        view.on_resize(0, 0);
        assert_eq!(view.projection()[(0, 0)], square);
    }
}

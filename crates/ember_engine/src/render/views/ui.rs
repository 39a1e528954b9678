//! UI view: screen-space meshes, origin at the top left

use super::{draw_material_geometries, mesh_draws, PacketData, RenderView};
use crate::foundation::math::{orthographic, Mat4};
use crate::render::frontend::{FrameContext, BUILTIN_UI_PASS};
use crate::render::packet::RenderViewPacket;
use crate::render::systems::RenderResources;
use crate::render::{RenderError, RenderResult};

const UI_NEAR: f32 = -100.0;
const UI_FAR: f32 = 100.0;

/// Screen-space view
#[derive(Debug, Clone)]
pub struct UiView {
    name: String,
    projection: Mat4,
}

impl UiView {
    /// View named `name` covering a `width` x `height` framebuffer
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        let mut view = Self {
            name: name.into(),
            projection: Mat4::identity(),
        };
        view.on_resize(width, height);
        view
    }
}

impl RenderView for UiView {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.projection = orthographic(0.0, width as f32, height as f32, 0.0, UI_NEAR, UI_FAR);
    }

    fn on_build_packet(&self, _resources: &RenderResources, data: &PacketData<'_>) -> RenderResult<RenderViewPacket> {
        let PacketData::Ui { meshes } = data else {
            return Err(RenderError::RenderingFailed(format!(
                "view '{}' expects UI packet data",
                self.name
            )));
        };
        let mut packet = RenderViewPacket::new(self.name.clone(), self.projection, Mat4::identity());
        packet.geometries = mesh_draws(meshes).collect();
        Ok(packet)
    }

    fn on_render(
        &mut self,
        packet: &RenderViewPacket,
        frame: &mut FrameContext<'_>,
        resources: &mut RenderResources,
    ) -> RenderResult<()> {
        frame.begin_pass(BUILTIN_UI_PASS)?;
        draw_material_geometries(packet, frame, resources)?;
        frame.end_pass(BUILTIN_UI_PASS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    #[test]
    fn test_projection_maps_top_left_to_clip_corner() {
        let view = UiView::new("ui", 800, 600);
        let corner = view.projection * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(corner.x, -1.0);
        assert_relative_eq!(corner.y, -1.0);
        let far = view.projection * Vec4::new(800.0, 600.0, 0.0, 1.0);
        assert_relative_eq!(far.x, 1.0);
        assert_relative_eq!(far.y, 1.0);
    }
}

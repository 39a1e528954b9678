//! Renderer frontend
//!
//! Owns the backend and the built-in render passes, tracks window size
//! changes and drives one frame per [`RendererFrontend::draw_frame`] call by
//! handing each view packet to the view that built it.

use super::backend::{RenderPassId, RenderTargetAttachment, RenderTargetId, RendererBackend};
use super::packet::RenderPacket;
use super::systems::RenderResources;
use super::types::{RenderPassClearFlags, RenderPassConfig};
use super::views::RenderViewSystem;
use super::{RenderError, RenderResult};
use crate::core::RendererConfig;
use crate::foundation::math::Vec4;

/// Skybox pass, first in the chain
pub const BUILTIN_SKYBOX_PASS: &str = "Renderpass.Builtin.Skybox";

/// World pass
pub const BUILTIN_WORLD_PASS: &str = "Renderpass.Builtin.World";

/// UI pass, last in the chain; presents
pub const BUILTIN_UI_PASS: &str = "Renderpass.Builtin.UI";

/// A built-in pass and its per-swapchain-image targets
#[derive(Debug)]
struct BuiltinPass {
    name: &'static str,
    id: RenderPassId,
    uses_depth: bool,
    targets: Vec<RenderTargetId>,
}

impl BuiltinPass {
    fn attachments(&self, image_index: usize) -> Vec<RenderTargetAttachment> {
        let mut attachments = vec![RenderTargetAttachment::WindowColour(image_index)];
        if self.uses_depth {
            attachments.push(RenderTargetAttachment::Depth);
        }
        attachments
    }
}

/// What a view gets while rendering its packet
pub struct FrameContext<'a> {
    /// Backend, inside a begun frame
    pub backend: &'a mut dyn RendererBackend,
    /// Monotonic frame counter
    pub frame_number: u64,
    /// Swapchain image the frame renders to
    pub target_index: usize,
    /// Seconds since the previous frame
    pub delta_time: f32,
    passes: &'a [BuiltinPass],
}

impl FrameContext<'_> {
    fn pass(&self, name: &str) -> RenderResult<&BuiltinPass> {
        self.passes
            .iter()
            .find(|pass| pass.name == name)
            .ok_or_else(|| RenderError::ResourceNotFound(format!("render pass '{name}'")))
    }

    /// Begin the named built-in pass on this frame's target
    pub fn begin_pass(&mut self, name: &str) -> RenderResult<()> {
        let pass = self.pass(name)?;
        let (id, target) = (pass.id, pass.targets.get(self.target_index).copied());
        let target = target.ok_or_else(|| {
            RenderError::RenderingFailed(format!("no render target {} for pass '{}'", self.target_index, name))
        })?;
        self.backend.renderpass_begin(id, target)
    }

    /// End the named built-in pass
    pub fn end_pass(&mut self, name: &str) -> RenderResult<()> {
        let id = self.pass(name)?.id;
        self.backend.renderpass_end(id)
    }
}

/// Frontend over one backend
pub struct RendererFrontend {
    backend: Box<dyn RendererBackend>,
    passes: Vec<BuiltinPass>,
    frame_number: u64,
    width: u32,
    height: u32,
    resizing: bool,
    frames_since_resize: u32,
    resize_settle_frames: u32,
}

impl RendererFrontend {
    /// Create the built-in pass chain and its render targets
    pub fn new(mut backend: Box<dyn RendererBackend>, config: &RendererConfig, width: u32, height: u32) -> RenderResult<Self> {
        let area = Vec4::new(0.0, 0.0, width as f32, height as f32);
        let clear_colour = Vec4::from(config.clear_colour);
        let chain = [
            (BUILTIN_SKYBOX_PASS, None, Some(BUILTIN_WORLD_PASS), RenderPassClearFlags::COLOUR_BUFFER, false),
            (
                BUILTIN_WORLD_PASS,
                Some(BUILTIN_SKYBOX_PASS),
                Some(BUILTIN_UI_PASS),
                RenderPassClearFlags::DEPTH_BUFFER | RenderPassClearFlags::STENCIL_BUFFER,
                true,
            ),
            (BUILTIN_UI_PASS, Some(BUILTIN_WORLD_PASS), None, RenderPassClearFlags::empty(), false),
        ];

        let mut passes = Vec::with_capacity(chain.len());
        for (name, prev, next, clear_flags, uses_depth) in chain {
            let id = backend.renderpass_create(&RenderPassConfig {
                name: name.to_string(),
                prev_name: prev.map(str::to_string),
                next_name: next.map(str::to_string),
                render_area: area,
                clear_colour,
                clear_flags,
            })?;
            passes.push(BuiltinPass {
                name,
                id,
                uses_depth,
                targets: Vec::new(),
            });
        }

        let mut frontend = Self {
            backend,
            passes,
            frame_number: 0,
            width,
            height,
            resizing: false,
            frames_since_resize: 0,
            resize_settle_frames: config.resize_settle_frames,
        };
        frontend.regenerate_render_targets()?;
        log::info!(
            "[RENDERER] Frontend ready on {} backend ({}x{})",
            frontend.backend.name(),
            width,
            height
        );
        Ok(frontend)
    }

    /// The backend
    pub fn backend(&self) -> &dyn RendererBackend {
        self.backend.as_ref()
    }

    /// The backend, mutably
    pub fn backend_mut(&mut self) -> &mut dyn RendererBackend {
        self.backend.as_mut()
    }

    /// Frames counted so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Current framebuffer size
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether a resize is waiting to be applied
    pub fn is_resizing(&self) -> bool {
        self.resizing
    }

    /// Record a window size change. It is applied by `draw_frame` once the
    /// size has stopped changing for the configured number of frames.
    pub fn on_resized(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.resizing = true;
        self.frames_since_resize = 0;
        log::debug!("[RENDERER] Resize requested to {}x{}", width, height);
    }

    /// Render one frame
    pub fn draw_frame(
        &mut self,
        packet: &RenderPacket,
        views: &mut RenderViewSystem,
        resources: &mut RenderResources,
    ) -> RenderResult<()> {
        self.frame_number += 1;

        if self.resizing {
            self.frames_since_resize += 1;
            if self.frames_since_resize >= self.resize_settle_frames {
                self.apply_resize(views)?;
            }
            return Ok(());
        }

        if !self.backend.begin_frame(packet.delta_time)? {
            if self.backend.take_render_target_refresh_request() {
                self.regenerate_render_targets()?;
            }
            return Ok(());
        }

        let target_index = self.backend.window_attachment_index();
        let mut frame = FrameContext {
            backend: self.backend.as_mut(),
            frame_number: self.frame_number,
            target_index,
            delta_time: packet.delta_time,
            passes: &self.passes,
        };
        let mut result = Ok(());
        for view_packet in &packet.views {
            if let Err(e) = views.render(view_packet, &mut frame, resources) {
                log::error!("[RENDERER] View '{}' failed: {}", view_packet.view_name, e);
                result = Err(e);
                break;
            }
        }

        self.backend.end_frame(packet.delta_time)?;
        if self.backend.take_render_target_refresh_request() {
            self.regenerate_render_targets()?;
        }
        result
    }

    fn apply_resize(&mut self, views: &mut RenderViewSystem) -> RenderResult<()> {
        let (width, height) = (self.width, self.height);
        self.backend.resized(width, height)?;
        views.on_resize(width, height);
        let area = Vec4::new(0.0, 0.0, width as f32, height as f32);
        for pass in &self.passes {
            self.backend.renderpass_set_render_area(pass.id, area)?;
        }
        self.regenerate_render_targets()?;
        self.resizing = false;
        self.frames_since_resize = 0;
        log::info!("[RENDERER] Resized to {}x{}", width, height);
        Ok(())
    }

    /// Destroy and recreate every pass's targets at the current size. With a
    /// zero-sized window the targets stay destroyed until the next resize.
    pub fn regenerate_render_targets(&mut self) -> RenderResult<()> {
        let (width, height) = (self.width, self.height);
        let image_count = self.backend.window_attachment_count();
        let backend = self.backend.as_mut();
        for pass in &mut self.passes {
            for target in pass.targets.drain(..) {
                backend.render_target_destroy(target);
            }
            if width == 0 || height == 0 {
                continue;
            }
            for image_index in 0..image_count {
                let attachments = pass.attachments(image_index);
                let target = backend.render_target_create(pass.id, &attachments, width, height)?;
                pass.targets.push(target);
            }
        }
        log::debug!("[RENDERER] Render targets regenerated ({} images)", image_count);
        Ok(())
    }

    /// Destroy the passes and shut the backend down. Resource systems must
    /// already be shut down.
    pub fn shutdown(&mut self) {
        let backend = self.backend.as_mut();
        for pass in self.passes.drain(..) {
            for target in pass.targets {
                backend.render_target_destroy(target);
            }
            backend.renderpass_destroy(pass.id);
        }
        backend.shutdown();
        log::info!("[RENDERER] Frontend shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AssetConfig;
    use crate::render::null::NullBackend;

    fn frontend(settle: u32) -> (RendererFrontend, RenderResources, RenderViewSystem) {
        let config = RendererConfig::default().with_resize_settle_frames(settle);
        let mut frontend = RendererFrontend::new(Box::new(NullBackend::new(640, 480)), &config, 640, 480).unwrap();
        let resources = RenderResources::new(frontend.backend_mut(), &config, &AssetConfig::default()).unwrap();
        (frontend, resources, RenderViewSystem::new())
    }

    fn null(frontend: &RendererFrontend) -> &NullBackend {
        frontend.backend.as_any().downcast_ref::<NullBackend>().unwrap()
    }

    #[test]
    fn test_targets_created_per_image_and_pass() {
        let (frontend, _, _) = frontend(1);
        let backend = null(&frontend);
        assert_eq!(backend.live_objects().3, 3 * 3);
        assert_eq!(frontend.passes[1].targets.len(), 3);
    }

    #[test]
    fn test_frame_number_advances_on_skipped_frames() {
        let (mut frontend, mut resources, mut views) = frontend(2);
        frontend.on_resized(0, 0);
        let packet = RenderPacket::new(0.016);
        frontend.draw_frame(&packet, &mut views, &mut resources).unwrap();
        frontend.draw_frame(&packet, &mut views, &mut resources).unwrap();
        frontend.draw_frame(&packet, &mut views, &mut resources).unwrap();
        assert_eq!(frontend.frame_number(), 3);
        assert_eq!(null(&frontend).stats().frames_begun, 0);
        assert_eq!(null(&frontend).live_objects().3, 0);
    }

    #[test]
    fn test_resize_waits_for_settle_frames() {
        let (mut frontend, mut resources, mut views) = frontend(3);
        let before = null(&frontend).stats().render_targets_created;
        frontend.on_resized(1024, 768);
        let packet = RenderPacket::new(0.016);
        frontend.draw_frame(&packet, &mut views, &mut resources).unwrap();
        frontend.draw_frame(&packet, &mut views, &mut resources).unwrap();
        assert!(frontend.is_resizing());
        assert_eq!(null(&frontend).stats().render_targets_created, before);
        frontend.draw_frame(&packet, &mut views, &mut resources).unwrap();
        assert!(!frontend.is_resizing());
        assert_eq!(null(&frontend).stats().render_targets_created, before + 9);
        assert_eq!(null(&frontend).extent(), (1024, 768));
    }

    #[test]
    fn test_stale_swapchain_regenerates_targets() {
        let (mut frontend, mut resources, mut views) = frontend(1);
        let before = null(&frontend).stats().render_targets_created;
        frontend
            .backend
            .as_any_mut()
            .downcast_mut::<NullBackend>()
            .unwrap()
            .mark_swapchain_stale();
        frontend
            .draw_frame(&RenderPacket::new(0.016), &mut views, &mut resources)
            .unwrap();
        assert_eq!(null(&frontend).stats().render_targets_created, before + 9);
        assert_eq!(null(&frontend).stats().frames_ended, 0);
    }

    #[test]
    fn test_unknown_view_fails_frame_but_ends_it() {
        let (mut frontend, mut resources, mut views) = frontend(1);
        let mut packet = RenderPacket::new(0.016);
        packet.views.push(crate::render::RenderViewPacket::new(
            "missing",
            crate::foundation::math::Mat4::identity(),
            crate::foundation::math::Mat4::identity(),
        ));
        assert!(frontend.draw_frame(&packet, &mut views, &mut resources).is_err());
        assert_eq!(null(&frontend).stats().frames_ended, 1);
    }
}

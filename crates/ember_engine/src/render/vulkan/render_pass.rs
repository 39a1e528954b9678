//! Render passes and render targets
//!
//! Passes that draw into the same swapchain image are chained through their
//! `prev`/`next` names: only the first pass may treat the image as undefined
//! and only the last one hands it to presentation.

use super::commands::CommandBuffer;
use super::{VulkanError, VulkanResult};
use crate::render::backend::{RenderPassId, RenderTargetAttachment};
use crate::render::types::{RenderPassClearFlags, RenderPassConfig};
use ash::{vk, Device};

/// How one attachment is loaded, stored and laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentPlan {
    /// Load op
    pub load_op: vk::AttachmentLoadOp,
    /// Store op
    pub store_op: vk::AttachmentStoreOp,
    /// Stencil load op
    pub stencil_load_op: vk::AttachmentLoadOp,
    /// Layout when the pass begins
    pub initial_layout: vk::ImageLayout,
    /// Layout when the pass ends
    pub final_layout: vk::ImageLayout,
}

/// Attachments a pass is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassPlan {
    /// The colour attachment
    pub colour: AttachmentPlan,
    /// The depth attachment, only when depth is cleared
    pub depth: Option<AttachmentPlan>,
}

/// Attachment setup for `config`
pub fn plan(config: &RenderPassConfig) -> RenderPassPlan {
    let flags = config.clear_flags;
    let colour = AttachmentPlan {
        load_op: if flags.contains(RenderPassClearFlags::COLOUR_BUFFER) {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::LOAD
        },
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        initial_layout: if config.has_prev() {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::UNDEFINED
        },
        final_layout: if config.has_next() {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        },
    };

    let depth = flags.contains(RenderPassClearFlags::DEPTH_BUFFER).then(|| AttachmentPlan {
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        stencil_load_op: if flags.contains(RenderPassClearFlags::STENCIL_BUFFER) {
            vk::AttachmentLoadOp::CLEAR
        } else {
            vk::AttachmentLoadOp::DONT_CARE
        },
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    });

    RenderPassPlan { colour, depth }
}

/// Clear values indexed by attachment, colour first. When only the depth
/// attachment clears, the colour slot holds an unused zeroed value.
pub fn clear_values(config: &RenderPassConfig, depth: f32, stencil: u32) -> Vec<vk::ClearValue> {
    let flags = config.clear_flags;
    let clears_depth = flags.contains(RenderPassClearFlags::DEPTH_BUFFER);
    let mut values = Vec::with_capacity(2);
    if flags.contains(RenderPassClearFlags::COLOUR_BUFFER) {
        let c = config.clear_colour;
        values.push(vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [c.x, c.y, c.z, c.w],
            },
        });
    } else if clears_depth {
        values.push(vk::ClearValue {
            color: vk::ClearColorValue { float32: [0.0; 4] },
        });
    }
    if clears_depth {
        let stencil = if flags.contains(RenderPassClearFlags::STENCIL_BUFFER) {
            stencil
        } else {
            0
        };
        values.push(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        });
    }
    values
}

fn render_area(config: &RenderPassConfig) -> vk::Rect2D {
    let area = config.render_area;
    vk::Rect2D {
        offset: vk::Offset2D {
            x: area.x as i32,
            y: area.y as i32,
        },
        extent: vk::Extent2D {
            width: area.z.max(0.0) as u32,
            height: area.w.max(0.0) as u32,
        },
    }
}

/// A single-subpass render pass
pub struct VulkanRenderPass {
    device: Device,
    handle: vk::RenderPass,
    config: RenderPassConfig,
    has_depth: bool,
    depth: f32,
    stencil: u32,
}

impl VulkanRenderPass {
    /// Create a pass writing `colour_format` and, when depth is cleared,
    /// `depth_format`
    pub fn new(
        device: &Device,
        config: &RenderPassConfig,
        colour_format: vk::Format,
        depth_format: vk::Format,
    ) -> VulkanResult<Self> {
        let plan = plan(config);
        let to_description = |attachment: &AttachmentPlan, format: vk::Format| {
            vk::AttachmentDescription::builder()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(attachment.load_op)
                .store_op(attachment.store_op)
                .stencil_load_op(attachment.stencil_load_op)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(attachment.initial_layout)
                .final_layout(attachment.final_layout)
                .build()
        };

        let mut attachments = vec![to_description(&plan.colour, colour_format)];
        let colour_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&colour_refs);
        if let Some(depth) = &plan.depth {
            attachments.push(to_description(depth, depth_format));
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        let subpasses = [subpass.build()];

        let dependencies = [vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dependency_flags: vk::DependencyFlags::empty(),
        }];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let handle = unsafe { device.create_render_pass(&create_info, None).map_err(VulkanError::Api)? };

        log::debug!(
            "[RENDERPASS] Created '{}' (depth: {}, prev: {:?}, next: {:?})",
            config.name,
            plan.depth.is_some(),
            config.prev_name,
            config.next_name
        );
        Ok(Self {
            device: device.clone(),
            handle,
            config: config.clone(),
            has_depth: plan.depth.is_some(),
            depth: 1.0,
            stencil: 0,
        })
    }

    /// Begin the pass on `framebuffer`
    pub fn begin(&self, command_buffer: &mut CommandBuffer, framebuffer: vk::Framebuffer) -> VulkanResult<()> {
        let clear_values = clear_values(&self.config, self.depth, self.stencil);
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.handle)
            .framebuffer(framebuffer)
            .render_area(render_area(&self.config))
            .clear_values(&clear_values);
        command_buffer.begin_render_pass(&begin_info)
    }

    /// End the pass
    pub fn end(&self, command_buffer: &mut CommandBuffer) -> VulkanResult<()> {
        command_buffer.end_render_pass()
    }

    /// Raw handle
    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    /// Description the pass was built from
    pub fn config(&self) -> &RenderPassConfig {
        &self.config
    }

    /// Update x, y, width, height of the render area
    pub fn set_render_area(&mut self, area: crate::foundation::math::Vec4) {
        self.config.render_area = area;
    }

    /// Whether the pass has a depth attachment
    pub fn has_depth(&self) -> bool {
        self.has_depth
    }
}

impl Drop for VulkanRenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.handle, None);
        }
    }
}

/// Framebuffer binding attachments to a pass
pub struct VulkanRenderTarget {
    device: Device,
    framebuffer: vk::Framebuffer,
    pass: RenderPassId,
    attachments: Vec<RenderTargetAttachment>,
    extent: vk::Extent2D,
}

impl VulkanRenderTarget {
    /// Create a framebuffer over `views`
    pub fn new(
        device: &Device,
        pass: RenderPassId,
        render_pass: vk::RenderPass,
        attachments: &[RenderTargetAttachment],
        views: &[vk::ImageView],
        width: u32,
        height: u32,
    ) -> VulkanResult<Self> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(views)
            .width(width)
            .height(height)
            .layers(1);
        let framebuffer = unsafe { device.create_framebuffer(&create_info, None).map_err(VulkanError::Api)? };
        Ok(Self {
            device: device.clone(),
            framebuffer,
            pass,
            attachments: attachments.to_vec(),
            extent: vk::Extent2D { width, height },
        })
    }

    /// Framebuffer handle
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Pass the target was created for
    pub fn pass(&self) -> RenderPassId {
        self.pass
    }

    /// Attachments in binding order
    pub fn attachments(&self) -> &[RenderTargetAttachment] {
        &self.attachments
    }

    /// Framebuffer size
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for VulkanRenderTarget {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;

    fn config(flags: RenderPassClearFlags, prev: Option<&str>, next: Option<&str>) -> RenderPassConfig {
        RenderPassConfig {
            name: "pass".to_string(),
            prev_name: prev.map(str::to_string),
            next_name: next.map(str::to_string),
            render_area: Vec4::new(0.0, 0.0, 1280.0, 720.0),
            clear_colour: Vec4::new(0.1, 0.2, 0.3, 1.0),
            clear_flags: flags,
        }
    }

    #[test]
    fn test_chained_pass_layouts() {
        let first = plan(&config(RenderPassClearFlags::COLOUR_BUFFER, None, Some("world")));
        assert_eq!(first.colour.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(first.colour.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(first.colour.final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert!(first.depth.is_none());

        let middle = plan(&config(
            RenderPassClearFlags::DEPTH_BUFFER | RenderPassClearFlags::STENCIL_BUFFER,
            Some("skybox"),
            Some("ui"),
        ));
        assert_eq!(middle.colour.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(middle.colour.initial_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let depth = middle.depth.unwrap();
        assert_eq!(depth.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth.stencil_load_op, vk::AttachmentLoadOp::CLEAR);

        let last = plan(&config(RenderPassClearFlags::empty(), Some("world"), None));
        assert_eq!(last.colour.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(last.colour.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert!(last.depth.is_none());
    }

    #[test]
    fn test_clear_values_follow_flags() {
        assert!(clear_values(&config(RenderPassClearFlags::empty(), None, None), 1.0, 0).is_empty());

        let colour_only = clear_values(&config(RenderPassClearFlags::COLOUR_BUFFER, None, None), 1.0, 0);
        assert_eq!(colour_only.len(), 1);
        assert_eq!(unsafe { colour_only[0].color.float32 }, [0.1, 0.2, 0.3, 1.0]);

        let all = RenderPassClearFlags::COLOUR_BUFFER
            | RenderPassClearFlags::DEPTH_BUFFER
            | RenderPassClearFlags::STENCIL_BUFFER;
        let values = clear_values(&config(all, None, None), 1.0, 7);
        assert_eq!(values.len(), 2);
        let depth = unsafe { values[1].depth_stencil };
        assert_eq!(depth.depth, 1.0);
        assert_eq!(depth.stencil, 7);
    }

    #[test]
    fn test_depth_clear_sits_at_depth_attachment_index() {
        let world = config(
            RenderPassClearFlags::DEPTH_BUFFER | RenderPassClearFlags::STENCIL_BUFFER,
            Some("skybox"),
            Some("ui"),
        );
        assert!(plan(&world).depth.is_some());

        let values = clear_values(&world, 1.0, 0);
        assert_eq!(values.len(), 2);
        assert_eq!(unsafe { values[0].color.float32 }, [0.0; 4]);
        let depth = unsafe { values[1].depth_stencil };
        assert_eq!(depth.depth, 1.0);
        assert_eq!(depth.stencil, 0);
    }
}

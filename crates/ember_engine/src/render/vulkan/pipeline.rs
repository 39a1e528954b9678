//! Graphics pipeline builder

use super::commands::CommandBuffer;
use super::{VulkanError, VulkanResult};
use crate::assets::ShaderCullMode;
use crate::render::shader::MAX_PUSH_CONSTANT_RANGES;
use ash::{vk, Device};

/// Everything a pipeline is built from
pub struct PipelineConfig<'a> {
    /// Pass the pipeline renders in
    pub render_pass: vk::RenderPass,
    /// Size of one vertex
    pub vertex_stride: u32,
    /// Per-vertex attributes
    pub attributes: &'a [vk::VertexInputAttributeDescription],
    /// Set layouts in set order
    pub descriptor_set_layouts: &'a [vk::DescriptorSetLayout],
    /// Shader stages
    pub stages: &'a [vk::PipelineShaderStageCreateInfo],
    /// Initial viewport (dynamic)
    pub viewport: vk::Viewport,
    /// Initial scissor (dynamic)
    pub scissor: vk::Rect2D,
    /// Face culling
    pub cull_mode: ShaderCullMode,
    /// Draw lines instead of filled triangles
    pub wireframe: bool,
    /// Enable depth test and write
    pub depth_test: bool,
    /// Push constant ranges
    pub push_constant_ranges: &'a [vk::PushConstantRange],
}

/// Vulkan cull flags for a shader's cull mode
pub fn cull_mode_flags(mode: ShaderCullMode) -> vk::CullModeFlags {
    match mode {
        ShaderCullMode::None => vk::CullModeFlags::NONE,
        ShaderCullMode::Front => vk::CullModeFlags::FRONT,
        ShaderCullMode::Back => vk::CullModeFlags::BACK,
        ShaderCullMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
    }
}

/// Reject more push constant ranges than a pipeline layout may carry
pub fn validate_push_constant_ranges(count: usize) -> VulkanResult<()> {
    if count > MAX_PUSH_CONSTANT_RANGES {
        log::error!(
            "[PIPELINE] {} push constant ranges requested, at most {} allowed",
            count,
            MAX_PUSH_CONSTANT_RANGES
        );
        return Err(VulkanError::InvalidOperation {
            reason: format!("{count} push constant ranges exceed the limit of {MAX_PUSH_CONSTANT_RANGES}"),
        });
    }
    Ok(())
}

/// Pipeline and its layout
pub struct VulkanPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl VulkanPipeline {
    /// Build a graphics pipeline
    pub fn new(device: &Device, config: &PipelineConfig<'_>) -> VulkanResult<Self> {
        validate_push_constant_ranges(config.push_constant_ranges.len())?;

        let viewports = [config.viewport];
        let scissors = [config.scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(if config.wireframe {
                vk::PolygonMode::LINE
            } else {
                vk::PolygonMode::FILL
            })
            .line_width(1.0)
            .cull_mode(cull_mode_flags(config.cull_mode))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let colour_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build()];
        let colour_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&colour_blend_attachments);

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::LINE_WIDTH,
        ];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: config.vertex_stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(config.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(config.descriptor_set_layouts)
            .push_constant_ranges(config.push_constant_ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None).map_err(VulkanError::Api)? };

        // Without depth testing the depth-stencil pointer stays null
        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(config.stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&colour_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(config.render_pass)
            .subpass(0)
            .base_pipeline_index(-1);
        if config.depth_test {
            pipeline_info = pipeline_info.depth_stencil_state(&depth_stencil);
        }

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines.first().copied(),
            Err((_, e)) => {
                log::error!("[PIPELINE] Creation failed: {:?}", e);
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(VulkanError::Api(e));
            }
        };
        let Some(pipeline) = pipeline else {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            return Err(VulkanError::InitializationFailed("No pipeline returned".to_string()));
        };

        log::debug!("[PIPELINE] Created graphics pipeline (depth test: {})", config.depth_test);
        Ok(Self {
            device: device.clone(),
            pipeline,
            layout,
        })
    }

    /// Bind for graphics work
    pub fn bind(&self, command_buffer: &CommandBuffer) {
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer.handle(), vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        }
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constant_range_limit() {
        assert!(validate_push_constant_ranges(0).is_ok());
        assert!(validate_push_constant_ranges(32).is_ok());
        assert!(matches!(
            validate_push_constant_ranges(33),
            Err(VulkanError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_cull_modes() {
        assert_eq!(cull_mode_flags(ShaderCullMode::default()), vk::CullModeFlags::BACK);
        assert_eq!(cull_mode_flags(ShaderCullMode::None), vk::CullModeFlags::NONE);
        assert_eq!(
            cull_mode_flags(ShaderCullMode::FrontAndBack),
            vk::CullModeFlags::FRONT_AND_BACK
        );
    }
}

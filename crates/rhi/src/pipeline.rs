//! Shader modules and graphics pipelines for dynamic rendering.
//!
//! - [`ShaderModule`] wraps a `VkShaderModule` built from SPIR-V bytes
//! - [`PipelineLayout`] and [`Pipeline`] own their handles
//! - [`GraphicsPipelineDesc`] describes the fixed-function state the mesh
//!   passes vary: blending, depth writes and culling. Everything else is
//!   fixed (triangle lists, dynamic viewport and scissor, no vertex input;
//!   vertices are pulled through buffer device addresses).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ember_rhi::device::Device;
//! use ember_rhi::pipeline::{BlendMode, GraphicsPipelineDesc, PipelineLayout, ShaderModule};
//! use ember_rhi::vk;
//!
//! # fn example(device: Arc<Device>, vert: &[u8], frag: &[u8]) -> ember_rhi::RhiResult<()> {
//! let vertex = ShaderModule::from_spirv(device.clone(), vert)?;
//! let fragment = ShaderModule::from_spirv(device.clone(), frag)?;
//! let layout = PipelineLayout::new(device.clone(), &[], &[])?;
//!
//! let pipeline = GraphicsPipelineDesc::new(&vertex, &fragment)
//!     .color_format(vk::Format::R16G16B16A16_SFLOAT)
//!     .depth_format(vk::Format::D32_SFLOAT)
//!     .blend(BlendMode::Alpha)
//!     .build(device, &layout)?;
//! # Ok(())
//! # }
//! ```

use std::io::Cursor;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult, VkResultExt};

const ENTRY_POINT: &std::ffi::CStr = c"main";

/// SPIR-V shader module. The entry point is always `main`.
pub struct ShaderModule {
    device: Arc<Device>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// # Errors
    ///
    /// [`RhiError::PipelineError`] if `bytes` is not a SPIR-V word stream.
    pub fn from_spirv(device: Arc<Device>, bytes: &[u8]) -> RhiResult<Self> {
        let code = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| RhiError::PipelineError(format!("invalid SPIR-V: {e}")))?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None) }
            .call("vkCreateShaderModule")?;

        debug!("Shader module created ({} words)", code.len());
        Ok(Self { device, module })
    }

    pub fn from_file(device: Arc<Device>, path: &std::path::Path) -> RhiResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| RhiError::PipelineError(format!("cannot read {}: {e}", path.display())))?;
        Self::from_spirv(device, &bytes)
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_shader_module(self.module, None) };
    }
}

pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn new(
        device: Arc<Device>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None) }
            .call("vkCreatePipelineLayout")?;

        debug!(
            "Pipeline layout created ({} set layout(s), {} push constant range(s))",
            set_layouts.len(),
            push_constant_ranges.len()
        );
        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_pipeline_layout(self.layout, None) };
        debug!("Pipeline layout destroyed");
    }
}

/// A graphics pipeline.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        vk::PipelineBindPoint::GRAPHICS
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe { self.device.handle().destroy_pipeline(self.pipeline, None) };
        debug!("Graphics pipeline destroyed");
    }
}

/// Color blending of the single color attachment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    #[default]
    Disabled,
    /// `src * a + dst * (1 - a)`
    Alpha,
    /// `src * a + dst`
    Additive,
}

impl BlendMode {
    pub fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let state = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        let dst = match self {
            BlendMode::Disabled => return state,
            BlendMode::Alpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            BlendMode::Additive => vk::BlendFactor::ONE,
        };
        state
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(dst)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    }
}

/// Graphics pipeline state for one color attachment and optional depth.
#[derive(Clone, Copy)]
pub struct GraphicsPipelineDesc<'a> {
    vertex: &'a ShaderModule,
    fragment: &'a ShaderModule,
    color_format: vk::Format,
    depth_format: vk::Format,
    blend: BlendMode,
    depth_write: bool,
    cull_mode: vk::CullModeFlags,
}

impl<'a> GraphicsPipelineDesc<'a> {
    pub fn new(vertex: &'a ShaderModule, fragment: &'a ShaderModule) -> Self {
        Self {
            vertex,
            fragment,
            color_format: vk::Format::UNDEFINED,
            depth_format: vk::Format::UNDEFINED,
            blend: BlendMode::Disabled,
            depth_write: true,
            cull_mode: vk::CullModeFlags::NONE,
        }
    }

    pub fn color_format(mut self, format: vk::Format) -> Self {
        self.color_format = format;
        self
    }

    /// Enables a reverse-Z depth test (`GREATER_OR_EQUAL`) against `format`.
    pub fn depth_format(mut self, format: vk::Format) -> Self {
        self.depth_format = format;
        self
    }

    pub fn blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn depth_write(mut self, enabled: bool) -> Self {
        self.depth_write = enabled;
        self
    }

    pub fn cull_mode(mut self, mode: vk::CullModeFlags) -> Self {
        self.cull_mode = mode;
        self
    }

    fn has_depth(&self) -> bool {
        self.depth_format != vk::Format::UNDEFINED
    }

    fn validate(&self) -> RhiResult<()> {
        if self.color_format == vk::Format::UNDEFINED {
            return Err(RhiError::PipelineError(
                "color attachment format is required".to_string(),
            ));
        }
        if self.has_depth() && !crate::layout::is_depth_format(self.depth_format) {
            return Err(RhiError::PipelineError(format!(
                "{:?} is not a depth format",
                self.depth_format
            )));
        }
        Ok(())
    }

    pub fn build(self, device: Arc<Device>, layout: &PipelineLayout) -> RhiResult<Pipeline> {
        self.validate()?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(self.vertex.handle())
                .name(ENTRY_POINT),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(self.fragment.handle())
                .name(ENTRY_POINT),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(self.cull_mode)
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.has_depth())
            .depth_write_enable(self.has_depth() && self.depth_write)
            .depth_compare_op(vk::CompareOp::GREATER_OR_EQUAL)
            .max_depth_bounds(1.0);

        let attachments = [self.blend.attachment_state()];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [self.color_format];
        let mut rendering =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);
        if self.has_depth() {
            rendering = rendering.depth_attachment_format(self.depth_format);
        }

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout.handle())
            .push_next(&mut rendering);

        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, result)| result)
        .call("vkCreateGraphicsPipelines")?;

        let pipeline = pipelines.into_iter().next().ok_or_else(|| {
            RhiError::PipelineError("driver returned no pipeline".to_string())
        })?;

        info!(
            "Graphics pipeline created (blend {:?}, depth write {})",
            self.blend,
            self.has_depth() && self.depth_write
        );
        Ok(Pipeline { device, pipeline })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BlendMode::Disabled, false, vk::BlendFactor::ZERO)]
    #[case(BlendMode::Alpha, true, vk::BlendFactor::ONE_MINUS_SRC_ALPHA)]
    #[case(BlendMode::Additive, true, vk::BlendFactor::ONE)]
    fn test_blend_attachment_state(
        #[case] mode: BlendMode,
        #[case] enabled: bool,
        #[case] dst: vk::BlendFactor,
    ) {
        let state = mode.attachment_state();
        assert_eq!(state.blend_enable == vk::TRUE, enabled);
        assert_eq!(state.dst_color_blend_factor, dst);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_default_blend_is_disabled() {
        assert_eq!(BlendMode::default(), BlendMode::Disabled);
    }
}

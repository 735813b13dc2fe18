//! Material passes and the mesh pipelines behind them.
//!
//! A [`MaterialInstance`] is what a draw needs to be bound: which pass it
//! belongs to (carrying the pipeline and layout handles) and its material
//! descriptor set. [`MeshMaterials`] owns the two mesh pipelines and hands
//! out instances.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use ember_rhi::descriptor::{DescriptorLayoutBuilder, DescriptorSetLayout, DescriptorWriter};
use ember_rhi::descriptor_allocator::DescriptorAllocatorGrowable;
use ember_rhi::device::Device;
use ember_rhi::pipeline::{BlendMode, GraphicsPipelineDesc, Pipeline, PipelineLayout, ShaderModule};
use ember_rhi::{RhiResult, vk};

use crate::gpu_data::{GpuDrawPushConstants, MaterialConstants};

/// Raw pipeline and layout handles for binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaterialPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// Which pass a material draws in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialPass {
    Opaque(MaterialPipeline),
    /// Blended, drawn after all opaque geometry without depth writes.
    Transparent(MaterialPipeline),
}

impl MaterialPass {
    #[inline]
    pub fn pipeline(&self) -> &MaterialPipeline {
        match self {
            MaterialPass::Opaque(p) | MaterialPass::Transparent(p) => p,
        }
    }

    #[inline]
    pub fn kind(&self) -> PassKind {
        match self {
            MaterialPass::Opaque(_) => PassKind::Opaque,
            MaterialPass::Transparent(_) => PassKind::Transparent,
        }
    }
}

/// Pass selector without the handles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PassKind {
    #[default]
    Opaque,
    Transparent,
}

/// A bindable material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaterialInstance {
    pub pass: MaterialPass,
    pub set: vk::DescriptorSet,
}

/// Inputs for the material descriptor set.
#[derive(Clone, Copy, Debug)]
pub struct MaterialResources {
    pub color_view: vk::ImageView,
    pub color_sampler: vk::Sampler,
    /// Buffer holding a [`MaterialConstants`] at `data_offset`.
    pub data_buffer: vk::Buffer,
    pub data_offset: vk::DeviceSize,
}

/// Opaque and transparent mesh pipelines sharing one layout.
///
/// Set 0 is the per-frame scene uniform, set 1 the material set
/// (binding 0: [`MaterialConstants`], binding 1: color texture). The vertex
/// stage receives [`GpuDrawPushConstants`].
pub struct MeshMaterials {
    opaque: Pipeline,
    transparent: Pipeline,
    layout: PipelineLayout,
    material_layout: DescriptorSetLayout,
}

impl MeshMaterials {
    /// Builds both pipelines from SPIR-V files.
    pub fn load(
        device: Arc<Device>,
        vertex_path: &Path,
        fragment_path: &Path,
        scene_layout: vk::DescriptorSetLayout,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> RhiResult<Self> {
        let vertex = ShaderModule::from_file(device.clone(), vertex_path)?;
        let fragment = ShaderModule::from_file(device.clone(), fragment_path)?;

        let material_layout = material_layout_builder().build(
            device.clone(),
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        )?;

        let push_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(GpuDrawPushConstants::size());
        let layout = PipelineLayout::new(
            device.clone(),
            &[scene_layout, material_layout.handle()],
            &[push_range],
        )?;

        let desc = GraphicsPipelineDesc::new(&vertex, &fragment)
            .color_format(color_format)
            .depth_format(depth_format);
        let opaque = desc.build(device.clone(), &layout)?;
        let transparent = desc
            .blend(BlendMode::Additive)
            .depth_write(false)
            .build(device, &layout)?;

        info!("Mesh materials loaded from {}", vertex_path.display());

        Ok(Self {
            opaque,
            transparent,
            layout,
            material_layout,
        })
    }

    /// Pass handles for `kind`.
    pub fn pass(&self, kind: PassKind) -> MaterialPass {
        let pipeline = |p: &Pipeline| MaterialPipeline {
            pipeline: p.handle(),
            layout: self.layout.handle(),
        };
        match kind {
            PassKind::Opaque => MaterialPass::Opaque(pipeline(&self.opaque)),
            PassKind::Transparent => MaterialPass::Transparent(pipeline(&self.transparent)),
        }
    }

    #[inline]
    pub fn material_layout(&self) -> vk::DescriptorSetLayout {
        self.material_layout.handle()
    }

    /// Allocates and fills a material set from `descriptors`.
    pub fn write_material(
        &self,
        device: &Device,
        descriptors: &mut DescriptorAllocatorGrowable,
        kind: PassKind,
        resources: &MaterialResources,
    ) -> RhiResult<MaterialInstance> {
        let set = descriptors.allocate(self.material_layout.handle())?;
        material_writes(resources).update_set(device, set);
        Ok(MaterialInstance {
            pass: self.pass(kind),
            set,
        })
    }
}

fn material_layout_builder() -> DescriptorLayoutBuilder {
    DescriptorLayoutBuilder::new()
        .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
        .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
}

fn material_writes(resources: &MaterialResources) -> DescriptorWriter {
    let mut writer = DescriptorWriter::new();
    writer
        .write_buffer(
            0,
            resources.data_buffer,
            std::mem::size_of::<MaterialConstants>() as vk::DeviceSize,
            resources.data_offset,
            vk::DescriptorType::UNIFORM_BUFFER,
        )
        .write_image(
            1,
            resources.color_view,
            resources.color_sampler,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        );
    writer
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn handles(raw: u64) -> MaterialPipeline {
        MaterialPipeline {
            pipeline: vk::Pipeline::from_raw(raw),
            layout: vk::PipelineLayout::from_raw(100),
        }
    }

    #[test]
    fn test_pass_accessors() {
        let opaque = MaterialPass::Opaque(handles(1));
        let transparent = MaterialPass::Transparent(handles(2));
        assert_eq!(opaque.kind(), PassKind::Opaque);
        assert_eq!(transparent.kind(), PassKind::Transparent);
        assert_eq!(transparent.pipeline().pipeline.as_raw(), 2);
        assert_eq!(opaque.pipeline().layout, transparent.pipeline().layout);
    }

    #[test]
    fn test_material_layout_bindings() {
        let bindings = material_layout_builder().bindings(vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn test_material_writes() {
        let resources = MaterialResources {
            color_view: vk::ImageView::from_raw(1),
            color_sampler: vk::Sampler::from_raw(2),
            data_buffer: vk::Buffer::from_raw(3),
            data_offset: 64,
        };
        assert_eq!(material_writes(&resources).len(), 2);
    }
}

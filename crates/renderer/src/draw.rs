//! Draw lists partitioned by material pass.
//!
//! Objects are pushed into a [`DrawContext`] once per frame. Opaque objects
//! are sorted to minimise rebinding and drawn first; transparent objects
//! follow in submission order. Recording skips binds whose handle matches
//! the previous draw.

use ash::vk::Handle;
use glam::Mat4;
use tracing::trace;

use ember_rhi::command::CommandBuffer;
use ember_rhi::vk;

use crate::gpu_data::GpuDrawPushConstants;
use crate::material::{MaterialInstance, MaterialPass};
use crate::mesh::GpuMeshBuffers;

/// One indexed draw.
#[derive(Clone, Copy, Debug)]
pub struct RenderObject {
    pub index_count: u32,
    pub first_index: u32,
    pub index_buffer: vk::Buffer,
    pub material: MaterialInstance,
    pub transform: Mat4,
    pub vertex_address: vk::DeviceAddress,
}

impl RenderObject {
    /// Draws all of `mesh` with `material` at `transform`.
    pub fn from_mesh(mesh: &GpuMeshBuffers, material: MaterialInstance, transform: Mat4) -> Self {
        Self {
            index_count: mesh.index_count,
            first_index: 0,
            index_buffer: mesh.index_buffer.handle(),
            material,
            transform,
            vertex_address: mesh.vertex_address,
        }
    }
}

/// Counters from one [`DrawContext::record`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub draws: u32,
    pub triangles: u32,
    pub pipeline_binds: u32,
    pub material_binds: u32,
    pub index_buffer_binds: u32,
}

/// Which binds a draw needs given the previous one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BindChanges {
    pub pipeline: bool,
    pub material: bool,
    pub index_buffer: bool,
}

/// Last bound handles while recording a draw list.
#[derive(Clone, Copy, Debug, Default)]
pub struct BindState {
    pipeline: Option<vk::Pipeline>,
    material: Option<vk::DescriptorSet>,
    index_buffer: Option<vk::Buffer>,
}

impl BindState {
    /// Records `object`'s handles as bound and reports which ones changed.
    ///
    /// A pipeline change also invalidates the material set.
    pub fn update(&mut self, object: &RenderObject) -> BindChanges {
        let pipeline = object.material.pass.pipeline().pipeline;
        let changes = BindChanges {
            pipeline: self.pipeline != Some(pipeline),
            material: self.pipeline != Some(pipeline)
                || self.material != Some(object.material.set),
            index_buffer: self.index_buffer != Some(object.index_buffer),
        };
        self.pipeline = Some(pipeline);
        self.material = Some(object.material.set);
        self.index_buffer = Some(object.index_buffer);
        changes
    }
}

/// Per-frame draw lists.
#[derive(Debug, Default)]
pub struct DrawContext {
    opaque: Vec<RenderObject>,
    transparent: Vec<RenderObject>,
}

impl DrawContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, object: RenderObject) {
        match object.material.pass {
            MaterialPass::Opaque(_) => self.opaque.push(object),
            MaterialPass::Transparent(_) => self.transparent.push(object),
        }
    }

    pub fn clear(&mut self) {
        self.opaque.clear();
        self.transparent.clear();
    }

    #[inline]
    pub fn opaque(&self) -> &[RenderObject] {
        &self.opaque
    }

    #[inline]
    pub fn transparent(&self) -> &[RenderObject] {
        &self.transparent
    }

    pub fn len(&self) -> usize {
        self.opaque.len() + self.transparent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Groups opaque draws by pipeline, then material set, then index buffer.
    pub fn sort_opaque(&mut self) {
        self.opaque.sort_by_key(|o| {
            (
                o.material.pass.pipeline().pipeline.as_raw(),
                o.material.set.as_raw(),
                o.index_buffer.as_raw(),
            )
        });
    }

    /// Opaque draws followed by transparent ones.
    pub fn draw_order(&self) -> impl Iterator<Item = &RenderObject> {
        self.opaque.iter().chain(self.transparent.iter())
    }

    /// Records every draw. Set 0 is bound to `scene_set` whenever the
    /// pipeline changes.
    pub fn record(&self, cmd: &CommandBuffer, scene_set: vk::DescriptorSet) -> DrawStats {
        let mut stats = DrawStats::default();
        let mut state = BindState::default();

        for object in self.draw_order() {
            let handles = object.material.pass.pipeline();
            let changes = state.update(object);

            if changes.pipeline {
                cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, handles.pipeline);
                cmd.bind_descriptor_sets(
                    vk::PipelineBindPoint::GRAPHICS,
                    handles.layout,
                    0,
                    &[scene_set],
                );
                stats.pipeline_binds += 1;
            }
            if changes.material {
                cmd.bind_descriptor_sets(
                    vk::PipelineBindPoint::GRAPHICS,
                    handles.layout,
                    1,
                    &[object.material.set],
                );
                stats.material_binds += 1;
            }
            if changes.index_buffer {
                cmd.bind_index_buffer(object.index_buffer, 0);
                stats.index_buffer_binds += 1;
            }

            cmd.push_constants(
                handles.layout,
                vk::ShaderStageFlags::VERTEX,
                &GpuDrawPushConstants::new(object.transform, object.vertex_address),
            );
            cmd.draw_indexed(object.index_count, object.first_index);

            stats.draws += 1;
            stats.triangles += object.index_count / 3;
        }

        trace!("Recorded {} draws", stats.draws);
        stats
    }
}

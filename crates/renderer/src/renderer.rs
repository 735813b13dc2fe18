//! Main renderer orchestration.
//!
//! [`Renderer`] ties the frame ring, upload path and material passes to a
//! window. Each [`render_frame`](Renderer::render_frame):
//!
//! 1. recreates the swapchain and offscreen targets if a resize is pending,
//! 2. begins a frame on the ring (skipping it on a stale surface),
//! 3. writes the scene uniforms through the slot's descriptor allocator,
//! 4. clears the draw image and begins dynamic rendering with depth,
//! 5. hands the caller a [`FrameRecorder`] to queue draws,
//! 6. records the draw lists, blits the draw image to the swapchain image
//!    and presents.
//!
//! # Example
//!
//! ```no_run
//! use ember_core::RendererConfig;
//! use ember_platform::Window;
//! use ember_renderer::{MeshData, PassKind, Renderer};
//! use glam::Mat4;
//!
//! # fn example(window: &Window) -> ember_rhi::RhiResult<()> {
//! let mut renderer = Renderer::new(window, &RendererConfig::default())?;
//! let cube = renderer.upload_mesh(&MeshData::cube())?;
//!
//! renderer.render_frame(|frame| {
//!     if let Some(material) = frame.default_material(PassKind::Opaque) {
//!         frame.draw(cube, material, Mat4::IDENTITY)?;
//!     }
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use glam::Mat4;
use tracing::{debug, error, info};

use ember_core::RendererConfig;
use ember_platform::Window;
use ember_rhi::buffer::{AllocatedBuffer, BufferUsage};
use ember_rhi::command::CommandBuffer;
use ember_rhi::deletion_queue::{DeletionQueue, Release};
use ember_rhi::descriptor::{DescriptorLayoutBuilder, DescriptorSetLayout, DescriptorWriter};
use ember_rhi::descriptor_allocator::{DescriptorAllocatorGrowable, PoolSizeRatio};
use ember_rhi::device::Device;
use ember_rhi::image::{AllocatedImage, ImageDesc};
use ember_rhi::immediate::ImmediateSubmit;
use ember_rhi::swapchain::Swapchain;
use ember_rhi::{RhiError, RhiResult, VkResultExt, vk};
use ember_scene::{NodeId, SceneError, SceneGraph};

use crate::context::{GpuContext, present_mode};
use crate::draw::{DrawContext, DrawStats, RenderObject};
use crate::frame_manager::{FrameManager, FrameSettings};
use crate::gpu_data::{MaterialConstants, SceneData};
use crate::material::{MaterialInstance, MaterialResources, MeshMaterials, PassKind};
use crate::mesh::{GpuMeshBuffers, MeshData, MeshHandle};
use crate::upload;

/// Format of the offscreen color target.
pub const DRAW_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Format of the depth target.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

const GLOBAL_DESCRIPTOR_SETS: u32 = 10;
const GLOBAL_DESCRIPTOR_RATIOS: [PoolSizeRatio; 2] = [
    PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 1.0),
    PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1.0),
];

/// Built-in textures and samplers.
///
/// The samplers live in the main deletion queue; the images are owned here.
struct DefaultTextures {
    white: AllocatedImage,
    checkerboard: AllocatedImage,
    linear: vk::Sampler,
    nearest: vk::Sampler,
}

impl DefaultTextures {
    fn new(
        device: &Arc<Device>,
        immediate: &mut ImmediateSubmit,
        deletion_queue: &mut DeletionQueue,
    ) -> RhiResult<Self> {
        let one = vk::Extent2D {
            width: 1,
            height: 1,
        };
        let sixteen = vk::Extent2D {
            width: 16,
            height: 16,
        };
        let texture = |name, extent| {
            ImageDesc::new_2d(
                name,
                vk::Format::R8G8B8A8_UNORM,
                extent,
                vk::ImageUsageFlags::SAMPLED,
            )
        };

        let white_texel = upload::pack_rgba8([1.0; 4]);
        let white = upload::upload_image(
            device,
            immediate,
            bytemuck::bytes_of(&white_texel),
            &texture("white texture", one),
        )?;
        let checkerboard = upload::upload_image(
            device,
            immediate,
            bytemuck::cast_slice(&upload::checkerboard()),
            &texture("checkerboard texture", sixteen),
        )?;

        let linear = create_sampler(device, vk::Filter::LINEAR)?;
        deletion_queue.push(Release::Sampler(linear));
        let nearest = create_sampler(device, vk::Filter::NEAREST)?;
        deletion_queue.push(Release::Sampler(nearest));

        Ok(Self {
            white,
            checkerboard,
            linear,
            nearest,
        })
    }
}

fn create_sampler(device: &Device, filter: vk::Filter) -> RhiResult<vk::Sampler> {
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter);
    let sampler =
        unsafe { device.handle().create_sampler(&info, None) }.call("vkCreateSampler")?;
    debug!("Sampler created ({:?})", filter);
    Ok(sampler)
}

/// Default opaque and transparent materials built once pipelines exist.
#[derive(Clone, Copy, Debug)]
struct DefaultMaterials {
    opaque: MaterialInstance,
    transparent: MaterialInstance,
}

impl DefaultMaterials {
    fn get(&self, kind: PassKind) -> MaterialInstance {
        match kind {
            PassKind::Opaque => self.opaque,
            PassKind::Transparent => self.transparent,
        }
    }
}

/// Handed to the `render_frame` callback while the draw image is bound for
/// rendering.
pub struct FrameRecorder<'a> {
    cmd: &'a CommandBuffer,
    draw_context: &'a mut DrawContext,
    meshes: &'a [GpuMeshBuffers],
    default_materials: Option<DefaultMaterials>,
    extent: vk::Extent2D,
    frame_number: u64,
}

impl FrameRecorder<'_> {
    /// Command buffer inside the active rendering scope.
    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        self.cmd
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// `None` until [`Renderer::load_materials`] has succeeded.
    pub fn default_material(&self, kind: PassKind) -> Option<MaterialInstance> {
        self.default_materials.map(|m| m.get(kind))
    }

    /// Queues `mesh` for drawing with `material` at `transform`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] for a handle from another renderer.
    pub fn draw(
        &mut self,
        mesh: MeshHandle,
        material: MaterialInstance,
        transform: Mat4,
    ) -> RhiResult<()> {
        let buffers = self
            .meshes
            .get(mesh.index())
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown mesh {}", mesh.index())))?;
        self.draw_context
            .push(RenderObject::from_mesh(buffers, material, transform));
        Ok(())
    }

    /// Queues `mesh` at the cached world transform of `node`, as of the
    /// graph's last `update_world_transforms`.
    pub fn draw_node(
        &mut self,
        graph: &SceneGraph,
        node: NodeId,
        mesh: MeshHandle,
        material: MaterialInstance,
    ) -> RhiResult<()> {
        let world = graph.cached_world(node).ok_or_else(|| {
            RhiError::InvalidHandle(SceneError::UnknownNode(node).to_string())
        })?;
        self.draw(mesh, material, world)
    }

    pub fn queued(&self) -> usize {
        self.draw_context.len()
    }
}

/// Window renderer.
///
/// Fields drop in declaration order after [`Drop`] has waited for the device
/// and flushed the main deletion queue; the context goes last.
pub struct Renderer {
    frames: FrameManager,
    immediate: ImmediateSubmit,
    draw_context: DrawContext,
    meshes: Vec<GpuMeshBuffers>,
    materials: Option<MeshMaterials>,
    default_materials: Option<DefaultMaterials>,
    material_data: AllocatedBuffer,
    global_descriptors: DescriptorAllocatorGrowable,
    textures: DefaultTextures,
    scene_layout: DescriptorSetLayout,
    scene_data: SceneData,
    draw_image: AllocatedImage,
    depth_image: AllocatedImage,
    swapchain: Swapchain,
    main_deletion_queue: DeletionQueue,
    pending_extent: Option<vk::Extent2D>,
    clear_color: [f32; 4],
    last_stats: DrawStats,
    context: GpuContext,
}

impl Renderer {
    pub fn new(window: &Window, config: &RendererConfig) -> RhiResult<Self> {
        check_config(config)?;

        let context = GpuContext::new(window, config)?;
        let device = context.device().clone();

        let (width, height) = window.extent();
        let swapchain = Swapchain::new(
            context.instance(),
            device.clone(),
            context.surface().handle(),
            vk::Extent2D { width, height },
            present_mode(config.present_mode),
        )?;
        let (draw_image, depth_image) = create_render_targets(&device, swapchain.extent())?;

        let mut main_deletion_queue = DeletionQueue::new();
        let mut immediate = ImmediateSubmit::new(device.clone(), config.immediate_submit_timeout)?;
        let textures = DefaultTextures::new(&device, &mut immediate, &mut main_deletion_queue)?;

        let scene_layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .build(
                device.clone(),
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )?;
        let global_descriptors = DescriptorAllocatorGrowable::new(
            device.clone(),
            GLOBAL_DESCRIPTOR_SETS,
            &GLOBAL_DESCRIPTOR_RATIOS,
        )?;
        let material_data = AllocatedBuffer::with_data(
            device.clone(),
            BufferUsage::Uniform,
            &[MaterialConstants::default()],
        )?;

        let frames = FrameManager::new(device, FrameSettings::from(config))?;

        info!(
            "Renderer initialized: {}x{}",
            swapchain.extent().width,
            swapchain.extent().height
        );

        Ok(Self {
            frames,
            immediate,
            draw_context: DrawContext::new(),
            meshes: Vec::new(),
            materials: None,
            default_materials: None,
            material_data,
            global_descriptors,
            textures,
            scene_layout,
            scene_data: SceneData::default(),
            draw_image,
            depth_image,
            swapchain,
            main_deletion_queue,
            pending_extent: None,
            clear_color: config.clear_color,
            last_stats: DrawStats::default(),
            context,
        })
    }

    /// Builds the mesh pipelines from SPIR-V files and the default materials.
    pub fn load_materials(&mut self, vertex_path: &Path, fragment_path: &Path) -> RhiResult<()> {
        let device = self.context.device().clone();
        let materials = MeshMaterials::load(
            device.clone(),
            vertex_path,
            fragment_path,
            self.scene_layout.handle(),
            DRAW_FORMAT,
            DEPTH_FORMAT,
        )?;

        let resources = |view, sampler| MaterialResources {
            color_view: view,
            color_sampler: sampler,
            data_buffer: self.material_data.handle(),
            data_offset: 0,
        };
        let opaque = materials.write_material(
            &device,
            &mut self.global_descriptors,
            PassKind::Opaque,
            &resources(self.textures.white.view(), self.textures.linear),
        )?;
        let transparent = materials.write_material(
            &device,
            &mut self.global_descriptors,
            PassKind::Transparent,
            &resources(self.textures.checkerboard.view(), self.textures.nearest),
        )?;

        // Replaced pipelines may still be referenced by frames in flight.
        if self.materials.is_some() {
            device.wait_idle()?;
        }
        self.materials = Some(materials);
        self.default_materials = Some(DefaultMaterials {
            opaque,
            transparent,
        });
        Ok(())
    }

    /// Uploads `mesh` and returns a handle for [`FrameRecorder::draw`].
    pub fn upload_mesh(&mut self, mesh: &MeshData) -> RhiResult<MeshHandle> {
        let buffers = upload::upload_mesh(
            self.context.device(),
            &mut self.immediate,
            &mesh.vertices,
            &mesh.indices,
        )?;
        self.meshes.push(buffers);
        Ok(MeshHandle(self.meshes.len() - 1))
    }

    pub fn default_material(&self, kind: PassKind) -> Option<MaterialInstance> {
        self.default_materials.map(|m| m.get(kind))
    }

    pub fn set_camera(&mut self, view: Mat4, proj: Mat4) {
        self.scene_data.set_camera(view, proj);
    }

    pub fn scene_data_mut(&mut self) -> &mut SceneData {
        &mut self.scene_data
    }

    /// Records a new window size; the swapchain is rebuilt on the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        debug!("Resize requested: {}x{}", width, height);
        self.pending_extent = Some(vk::Extent2D { width, height });
        self.frames.request_resize();
    }

    /// Renders one frame. Returns `false` when the frame was skipped
    /// (minimized window or stale surface).
    pub fn render_frame<F>(&mut self, record: F) -> RhiResult<bool>
    where
        F: FnOnce(&mut FrameRecorder<'_>) -> RhiResult<()>,
    {
        if self.frames.resize_requested() && !self.recreate_swapchain()? {
            return Ok(false);
        }

        let Some(image_index) = self.frames.begin_frame(&self.swapchain)? else {
            return Ok(false);
        };

        let device = self.context.device().clone();
        let cmd = CommandBuffer::from_handle(
            device.clone(),
            self.frames.current_frame().command_buffer(),
        );
        let scene_set = self.write_scene_data(&device)?;

        let draw_extent = self.draw_image.extent_2d();
        self.draw_image
            .discard_to(&cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        cmd.clear_color_image(
            self.draw_image.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            self.clear_color,
        );
        self.draw_image
            .transition_to(&cmd, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)?;
        self.depth_image
            .discard_to(&cmd, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)?;

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(self.draw_image.view())
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)];
        // Reverse-Z: far plane at 0.
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.depth_image.view())
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 0.0,
                    stencil: 0,
                },
            });
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: draw_extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        cmd.begin_rendering(&rendering_info);
        cmd.set_viewport_and_scissor(draw_extent);

        self.draw_context.clear();
        let mut recorder = FrameRecorder {
            cmd: &cmd,
            draw_context: &mut self.draw_context,
            meshes: &self.meshes,
            default_materials: self.default_materials,
            extent: draw_extent,
            frame_number: self.frames.frame_number(),
        };
        record(&mut recorder)?;

        self.draw_context.sort_opaque();
        self.last_stats = self.draw_context.record(&cmd, scene_set);
        cmd.end_rendering();

        let swapchain_image = self.swapchain.image(image_index).ok_or_else(|| {
            RhiError::InvalidHandle(format!("swapchain image {image_index} out of range"))
        })?;
        self.draw_image
            .transition_to(&cmd, vk::ImageLayout::TRANSFER_SRC_OPTIMAL)?;
        cmd.transition_image(
            swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageAspectFlags::COLOR,
        )?;
        cmd.blit_image(
            self.draw_image.handle(),
            swapchain_image,
            draw_extent,
            self.swapchain.extent(),
        );
        cmd.transition_image(
            swapchain_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageAspectFlags::COLOR,
        )?;

        self.frames.end_frame(&self.swapchain)?;
        Ok(true)
    }

    /// Writes this frame's scene uniforms into a transient buffer and set.
    fn write_scene_data(&mut self, device: &Arc<Device>) -> RhiResult<vk::DescriptorSet> {
        let buffer =
            AllocatedBuffer::with_data(device.clone(), BufferUsage::Uniform, &[self.scene_data])?;

        let frame = self.frames.current_frame_mut();
        let set = frame.descriptors().allocate(self.scene_layout.handle())?;
        DescriptorWriter::new()
            .write_buffer(
                0,
                buffer.handle(),
                SceneData::size() as vk::DeviceSize,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
            )
            .update_set(device, set);

        buffer.retire(frame.deletion_queue());
        Ok(set)
    }

    /// Rebuilds the swapchain and render targets. Returns `false` while the
    /// window has no area.
    fn recreate_swapchain(&mut self) -> RhiResult<bool> {
        let extent = self.pending_extent.unwrap_or(self.swapchain.extent());
        if extent.width == 0 || extent.height == 0 {
            return Ok(false);
        }

        self.swapchain.recreate(extent)?;
        let (draw_image, depth_image) =
            create_render_targets(self.context.device(), self.swapchain.extent())?;
        self.draw_image = draw_image;
        self.depth_image = depth_image;
        self.frames.reset_semaphores()?;
        self.pending_extent = None;
        Ok(true)
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        extent.width as f32 / extent.height.max(1) as f32
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }

    /// Draw counters of the last rendered frame.
    #[inline]
    pub fn last_stats(&self) -> DrawStats {
        self.last_stats
    }

    #[inline]
    pub fn context(&self) -> &GpuContext {
        &self.context
    }
}

fn create_render_targets(
    device: &Arc<Device>,
    extent: vk::Extent2D,
) -> RhiResult<(AllocatedImage, AllocatedImage)> {
    let draw_image = AllocatedImage::new(
        device.clone(),
        &ImageDesc::new_2d(
            "draw image",
            DRAW_FORMAT,
            extent,
            vk::ImageUsageFlags::COLOR_ATTACHMENT
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
        ),
    )?;
    let depth_image = AllocatedImage::new(
        device.clone(),
        &ImageDesc::new_2d(
            "depth image",
            DEPTH_FORMAT,
            extent,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        ),
    )?;
    Ok((draw_image, depth_image))
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.context.device().wait_idle() {
            error!("Failed to wait for device idle during renderer drop: {}", e);
        }
        self.main_deletion_queue.flush(self.context.device().as_ref());
        info!(
            "Renderer destroyed after {} frames",
            self.frames.frame_number()
        );
    }
}

/// Rejects a configuration before any Vulkan object is created.
fn check_config(config: &RendererConfig) -> RhiResult<()> {
    config
        .validate()
        .map_err(|e| RhiError::InvalidConfig(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_config_is_reported_as_config_error() {
        let mut config = RendererConfig::default();
        config.initial_descriptor_sets = 0;

        let err = check_config(&config).unwrap_err();
        assert!(matches!(err, RhiError::InvalidConfig(_)));
        assert!(err.to_string().contains("initial_descriptor_sets"));
    }

    #[test]
    fn test_default_config_passes() {
        assert!(check_config(&RendererConfig::default()).is_ok());
    }
}

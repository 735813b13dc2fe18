//! Data laid out for the GPU.
//!
//! All structures are `#[repr(C)]` and implement `bytemuck::Pod` so they can
//! be copied straight into mapped buffers or push-constant ranges.
//!
//! - [`Vertex`] is read from a storage buffer through its device address
//! - [`GpuDrawPushConstants`] carries the per-draw world matrix and that address
//! - [`SceneData`] is the per-frame uniform block bound at set 0
//! - [`MaterialConstants`] is the per-material uniform block bound at set 1
//!
//! ```
//! use ember_renderer::gpu_data::{GpuDrawPushConstants, SceneData};
//! use glam::{Mat4, Vec3};
//!
//! let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
//! let proj = Mat4::perspective_rh(70.0_f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
//! let scene = SceneData::new(view, proj);
//! assert_eq!(scene.view_proj, proj * view);
//!
//! let push = GpuDrawPushConstants::new(Mat4::IDENTITY, 0x1000);
//! assert_eq!(bytemuck::bytes_of(&push).len(), 80);
//! ```

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Interleaved vertex as stored in the vertex storage buffer.
///
/// UV coordinates are split across the padding slots of the two `Vec3`s so
/// the struct packs into three 16-byte rows.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0      | 12   | position |
/// | 12     | 4    | uv_x |
/// | 16     | 12   | normal |
/// | 28     | 4    | uv_y |
/// | 32     | 16   | color |
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub uv_x: f32,
    pub normal: Vec3,
    pub uv_y: f32,
    pub color: Vec4,
}

impl Vertex {
    #[inline]
    pub fn new(position: Vec3, normal: Vec3, uv: [f32; 2], color: Vec4) -> Self {
        Self {
            position,
            uv_x: uv[0],
            normal,
            uv_y: uv[1],
            color,
        }
    }
}

/// Push constants for a single indexed draw.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0      | 64   | world_matrix |
/// | 64     | 8    | vertex_buffer |
/// | 72     | 8    | _padding |
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GpuDrawPushConstants {
    pub world_matrix: Mat4,
    /// Device address of the mesh's vertex buffer.
    pub vertex_buffer: u64,
    pub _padding: u64,
}

impl GpuDrawPushConstants {
    #[inline]
    pub fn new(world_matrix: Mat4, vertex_buffer: u64) -> Self {
        Self {
            world_matrix,
            vertex_buffer,
            _padding: 0,
        }
    }

    #[inline]
    pub const fn size() -> u32 {
        std::mem::size_of::<Self>() as u32
    }
}

/// Per-frame scene uniforms.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0      | 64   | view |
/// | 64     | 64   | proj |
/// | 128    | 64   | view_proj |
/// | 192    | 16   | ambient_color |
/// | 208    | 16   | sunlight_direction (w = intensity) |
/// | 224    | 16   | sunlight_color |
///
/// Total size: 240 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SceneData {
    pub view: Mat4,
    pub proj: Mat4,
    /// Pre-computed as `proj * view`.
    pub view_proj: Mat4,
    pub ambient_color: Vec4,
    pub sunlight_direction: Vec4,
    pub sunlight_color: Vec4,
}

impl Default for SceneData {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

impl SceneData {
    /// Scene uniforms with a dim white ambient term and an overhead sun.
    pub fn new(view: Mat4, proj: Mat4) -> Self {
        Self {
            view,
            proj,
            view_proj: proj * view,
            ambient_color: Vec4::splat(0.1),
            sunlight_direction: Vec4::new(0.0, 1.0, 0.5, 1.0),
            sunlight_color: Vec4::ONE,
        }
    }

    /// Replaces both camera matrices and recomputes `view_proj`.
    #[inline]
    pub fn set_camera(&mut self, view: Mat4, proj: Mat4) {
        self.view = view;
        self.proj = proj;
        self.view_proj = proj * view;
    }

    #[inline]
    pub const fn size() -> usize {
        std::mem::size_of::<Self>()
    }
}

/// Per-material uniforms.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0      | 16   | color_factors |
/// | 16     | 16   | metal_rough_factors |
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub color_factors: Vec4,
    /// `x` metallic, `y` roughness; `zw` unused.
    pub metal_rough_factors: Vec4,
}

impl Default for MaterialConstants {
    fn default() -> Self {
        Self {
            color_factors: Vec4::ONE,
            metal_rough_factors: Vec4::new(1.0, 0.5, 0.0, 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_size() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
        assert_eq!(std::mem::offset_of!(Vertex, normal), 16);
        assert_eq!(std::mem::offset_of!(Vertex, color), 32);
    }

    #[test]
    fn test_vertex_new_splits_uv() {
        let v = Vertex::new(Vec3::X, Vec3::Y, [0.25, 0.75], Vec4::ONE);
        assert_eq!(v.uv_x, 0.25);
        assert_eq!(v.uv_y, 0.75);
    }

    #[test]
    fn test_push_constants_size() {
        assert_eq!(GpuDrawPushConstants::size(), 80);
        assert_eq!(std::mem::offset_of!(GpuDrawPushConstants, vertex_buffer), 64);
        // Vulkan guarantees at least 128 bytes of push constants.
        assert!(GpuDrawPushConstants::size() <= 128);
    }

    #[test]
    fn test_scene_data_size() {
        assert_eq!(SceneData::size(), 240);
        assert_eq!(SceneData::size() % 16, 0);
    }

    #[test]
    fn test_scene_data_set_camera() {
        let mut scene = SceneData::default();
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        let proj = Mat4::perspective_rh(1.0, 1.5, 0.1, 10.0);
        scene.set_camera(view, proj);
        assert_eq!(scene.view_proj, proj * view);
    }

    #[test]
    fn test_material_constants_size() {
        assert_eq!(std::mem::size_of::<MaterialConstants>(), 32);
    }

    #[test]
    fn test_bytemuck_cast() {
        let vertices = [Vertex::default(); 3];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 3 * 48);
    }
}

//! CPU-side mesh data and its GPU buffers.

use glam::{Vec3, Vec4};

use ember_rhi::buffer::AllocatedBuffer;
use ember_rhi::deletion_queue::DeletionQueue;
use ember_rhi::vk;

use crate::gpu_data::Vertex;

/// Indexed triangle list.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Unit cube centered on the origin, four vertices per face so each face
    /// keeps its own normal.
    pub fn cube() -> Self {
        const FACES: [(Vec3, Vec3, Vec3); 6] = [
            // normal, u axis, v axis
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];
        const CORNERS: [(f32, f32); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, u, v) in FACES {
            let base = vertices.len() as u32;
            let color = (normal.abs() * 0.5 + Vec3::splat(0.5)).extend(1.0);
            for (su, sv) in CORNERS {
                let position = (normal + u * su + v * sv) * 0.5;
                let uv = [(su + 1.0) * 0.5, 1.0 - (sv + 1.0) * 0.5];
                vertices.push(Vertex::new(position, normal, uv, color));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self { vertices, indices }
    }

    /// Two triangles in the XY plane facing +Z.
    pub fn quad() -> Self {
        let vertices = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)]
            .into_iter()
            .map(|(x, y)| {
                Vertex::new(
                    Vec3::new(x, y, 0.0),
                    Vec3::Z,
                    [x + 0.5, 0.5 - y],
                    Vec4::ONE,
                )
            })
            .collect();
        Self {
            vertices,
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Index and vertex buffers for one uploaded mesh.
pub struct GpuMeshBuffers {
    pub index_buffer: AllocatedBuffer,
    pub vertex_buffer: AllocatedBuffer,
    pub vertex_address: vk::DeviceAddress,
    pub index_count: u32,
}

impl GpuMeshBuffers {
    /// Hands both buffers to `queue` for destruction once the GPU is done.
    pub fn retire(self, queue: &mut DeletionQueue) {
        self.index_buffer.retire(queue);
        self.vertex_buffer.retire(queue);
    }
}

/// Index of a mesh owned by the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub(crate) usize);

impl MeshHandle {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_counts() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.index_count(), 36);
        assert!(cube.indices.iter().all(|&i| (i as usize) < cube.vertices.len()));
    }

    #[test]
    fn test_cube_faces_wind_along_normal() {
        let cube = MeshData::cube();
        for tri in cube.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|k| cube.vertices[tri[k] as usize]);
            let face_normal = (b.position - a.position).cross(c.position - a.position);
            assert!(face_normal.dot(a.normal) > 0.0);
        }
    }

    #[test]
    fn test_cube_fits_unit_box() {
        let cube = MeshData::cube();
        for v in &cube.vertices {
            assert!(v.position.abs().max_element() <= 0.5 + 1e-6);
            assert!((v.normal.length() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_quad() {
        let quad = MeshData::quad();
        assert_eq!(quad.vertices.len(), 4);
        assert_eq!(quad.index_count(), 6);
        assert!(!quad.is_empty());
        assert!(MeshData::default().is_empty());
    }
}

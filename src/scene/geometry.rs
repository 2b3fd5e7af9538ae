use bytemuck::{Pod, Zeroable};
use ultraviolet::Vec3;

use super::Vertex;

/// Triangle mesh with interleaved vertex data as reported by its producer.
///
/// The producer states the stride of `vertex_data`; the BLAS compiler refuses meshes whose stride
/// does not match [`Vertex::STRIDE`].
#[derive(Clone, Debug, PartialEq)]
pub struct TriangleMesh {
    pub name: String,
    pub vertex_data: Vec<u8>,
    pub vertex_stride: u32,
    pub indices: Vec<u32>,
}

impl TriangleMesh {
    pub fn new(name: impl Into<String>, vertices: &[Vertex], indices: Vec<u32>) -> Self {
        Self {
            name: name.into(),
            vertex_data: bytemuck::cast_slice(vertices).to_vec(),
            vertex_stride: Vertex::STRIDE,
            indices,
        }
    }

    /// Axis aligned cube centered at the origin with an edge length of `size`.
    /// Every face has its own four vertices so normals and UVs stay per face.
    pub fn cube(name: impl Into<String>, size: f32) -> Self {
        // (normal, u axis, v axis) with u x v == normal, so faces wind counter-clockwise
        let faces = [
            (Vec3::unit_x(), -Vec3::unit_z(), Vec3::unit_y()),
            (-Vec3::unit_x(), Vec3::unit_z(), Vec3::unit_y()),
            (Vec3::unit_y(), Vec3::unit_x(), -Vec3::unit_z()),
            (-Vec3::unit_y(), Vec3::unit_x(), Vec3::unit_z()),
            (Vec3::unit_z(), Vec3::unit_x(), Vec3::unit_y()),
            (-Vec3::unit_z(), -Vec3::unit_x(), Vec3::unit_y()),
        ];
        let corners: [(f32, f32); 4] = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        let half = size * 0.5;

        let mut vertices = Vec::with_capacity(faces.len() * corners.len());
        let mut indices = Vec::with_capacity(faces.len() * 6);
        for (normal, u_axis, v_axis) in faces {
            let base = vertices.len() as u32;
            for (s, t) in corners {
                let position =
                    (normal + u_axis * (2.0 * s - 1.0) + v_axis * (2.0 * t - 1.0)) * half;
                vertices.push(Vertex {
                    position: [position.x, position.y, position.z],
                    normal: [normal.x, normal.y, normal.z],
                    uv: [s, 1.0 - t],
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new(name, &vertices, indices)
    }

    pub fn vertex_count(&self) -> u32 {
        if self.vertex_stride == 0 {
            return 0;
        }
        (self.vertex_data.len() / self.vertex_stride as usize) as u32
    }

    pub fn triangle_count(&self) -> u32 {
        (self.indices.len() / 3) as u32
    }

    /// Decodes the interleaved data. Only meaningful once the stride has been validated.
    pub fn vertices(&self) -> Vec<Vertex> {
        self.vertex_data
            .chunks_exact(Vertex::STRIDE as usize)
            .map(bytemuck::pod_read_unaligned::<Vertex>)
            .collect()
    }
}

/// Axis aligned box for a procedural primitive, laid out as the intersection shader reads it.
#[derive(Clone, Debug, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct BoxAttribs {
    pub min: [f32; 3],
    pub max: [f32; 3],
    pub padding: [f32; 2],
}

impl BoxAttribs {
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self {
            min,
            max,
            padding: [0.0; 2],
        }
    }

    pub fn cube(half_extent: f32) -> Self {
        Self::new([-half_extent; 3], [half_extent; 3])
    }
}

/// Immutable input of a BLAS build.
#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Triangles(TriangleMesh),
    /// Bounding volumes whose surface is found by an intersection shader.
    Procedural { name: String, boxes: Vec<BoxAttribs> },
}

impl Geometry {
    pub fn name(&self) -> &str {
        match self {
            Geometry::Triangles(mesh) => &mesh.name,
            Geometry::Procedural { name, .. } => name,
        }
    }

    pub fn primitive_count(&self) -> u32 {
        match self {
            Geometry::Triangles(mesh) => mesh.triangle_count(),
            Geometry::Procedural { boxes, .. } => boxes.len() as u32,
        }
    }
}

/// Per-mesh shading data read by closest hit shaders: a UV and normal per vertex and the vertex
/// indices of every triangle.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshAttribs {
    pub uvs: Vec<[f32; 4]>,
    pub normals: Vec<[f32; 4]>,
    pub primitives: Vec<[u32; 4]>,
}

impl MeshAttribs {
    pub fn from_mesh(mesh: &TriangleMesh) -> Self {
        let vertices = mesh.vertices();
        Self {
            uvs: vertices
                .iter()
                .map(|v| [v.uv[0], v.uv[1], 0.0, 0.0])
                .collect(),
            normals: vertices
                .iter()
                .map(|v| [v.normal[0], v.normal[1], v.normal[2], 0.0])
                .collect(),
            primitives: mesh
                .indices
                .chunks_exact(3)
                .map(|tri| [tri[0], tri[1], tri[2], 0])
                .collect(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            (self.uvs.len() + self.normals.len() + self.primitives.len()) * 16,
        );
        bytes.extend_from_slice(bytemuck::cast_slice(&self.uvs));
        bytes.extend_from_slice(bytemuck::cast_slice(&self.normals));
        bytes.extend_from_slice(bytemuck::cast_slice(&self.primitives));
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
        [
            a[1] * b[2] - a[2] * b[1],
            a[2] * b[0] - a[0] * b[2],
            a[0] * b[1] - a[1] * b[0],
        ]
    }

    #[test]
    fn cube_has_a_quad_per_face() {
        let cube = TriangleMesh::cube("Cube", 2.0);
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);
        assert_eq!(cube.vertex_stride, Vertex::STRIDE);
        assert!(cube.indices.iter().all(|&i| i < 24));
    }

    #[test]
    fn cube_vertices_lie_on_the_surface() {
        let cube = TriangleMesh::cube("Cube", 2.0);
        for vertex in cube.vertices() {
            let max = vertex
                .position
                .iter()
                .fold(0.0f32, |acc, c| acc.max(c.abs()));
            assert!((max - 1.0).abs() < 1e-6);
            // the face normal points along the axis the vertex sits on
            let along_normal: f32 = vertex
                .position
                .iter()
                .zip(vertex.normal)
                .map(|(p, n)| p * n)
                .sum();
            assert!((along_normal - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn cube_triangles_face_outwards() {
        let cube = TriangleMesh::cube("Cube", 2.0);
        let vertices = cube.vertices();
        for tri in cube.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| vertices[i as usize]);
            let e1 = [0usize, 1, 2].map(|k| b.position[k] - a.position[k]);
            let e2 = [0usize, 1, 2].map(|k| c.position[k] - a.position[k]);
            let n = cross(e1, e2);
            let dot: f32 = n.iter().zip(a.normal).map(|(x, y)| x * y).sum();
            assert!(dot > 0.0);
        }
    }

    #[test]
    fn attribs_cover_every_vertex_and_triangle() {
        let cube = TriangleMesh::cube("Cube", 2.0);
        let attribs = MeshAttribs::from_mesh(&cube);
        assert_eq!(attribs.uvs.len(), 24);
        assert_eq!(attribs.normals.len(), 24);
        assert_eq!(attribs.primitives.len(), 12);
        assert_eq!(attribs.to_bytes().len(), (24 + 24 + 12) * 16);
    }

    #[test]
    fn box_attribs_are_16_byte_aligned() {
        assert_eq!(BoxAttribs::STRIDE % 16, 0);
        let unit = BoxAttribs::cube(2.5);
        assert_eq!(unit.min, [-2.5; 3]);
        assert_eq!(unit.max, [2.5; 3]);
    }
}

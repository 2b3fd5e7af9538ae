use bytemuck::{Pod, Zeroable};

use crate::device::VertexFormat;

/// Interleaved vertex of a triangle mesh, as consumed by closest hit shaders.
#[derive(Clone, Debug, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    /// Stride the BLAS triangle descriptor declares for interleaved mesh data.
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;

    /// Acceleration structures only read positions.
    pub const POSITION_FORMAT: VertexFormat = VertexFormat::Float32x3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaved_layout_is_tightly_packed() {
        assert_eq!(Vertex::STRIDE, 32);
        assert_eq!(Vertex::POSITION_FORMAT.size(), 12);
    }
}

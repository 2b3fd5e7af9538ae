use serde::{Deserialize, Serialize};
use ultraviolet::{Mat3, Vec3};

use crate::device::BlasHandle;

/// Ray visibility bitmask of an instance. A ray only considers instances whose mask shares a bit
/// with the ray's own mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeometryMask(pub u8);

impl GeometryMask {
    pub const NONE: GeometryMask = GeometryMask(0x00);
    pub const OPAQUE: GeometryMask = GeometryMask(0x01);
    pub const TRANSPARENT: GeometryMask = GeometryMask(0x02);
    pub const ALL: GeometryMask = GeometryMask(0xFF);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn intersects(self, other: GeometryMask) -> bool {
        self.0 & other.0 != 0
    }
}

/// Semantic group of an instance. Decides its mask and which hit groups shade it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceKind {
    Cube,
    Sphere,
    Ground,
    Glass,
}

/// Row-major 3x4 affine transform: rotation/scale in the first three columns, translation in
/// the fourth. This is the layout acceleration structure instances consume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceTransform {
    pub matrix: [f32; 12],
}

impl InstanceTransform {
    pub fn identity() -> Self {
        Self::new(Mat3::identity(), Vec3::zero())
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(Mat3::identity(), translation)
    }

    pub fn new(linear: Mat3, translation: Vec3) -> Self {
        let [c0, c1, c2] = linear.cols;
        Self {
            matrix: [
                c0.x, c1.x, c2.x, translation.x, //
                c0.y, c1.y, c2.y, translation.y, //
                c0.z, c1.z, c2.z, translation.z,
            ],
        }
    }

    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.matrix[3], self.matrix[7], self.matrix[11])
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        let m = &self.matrix;
        Vec3::new(
            m[0] * point.x + m[1] * point.y + m[2] * point.z + m[3],
            m[4] * point.x + m[5] * point.y + m[6] * point.z + m[7],
            m[8] * point.x + m[9] * point.y + m[10] * point.z + m[11],
        )
    }

    pub fn to_bytes(&self) -> [u8; 48] {
        let mut bytes = [0u8; 48];
        bytes.copy_from_slice(bytemuck::cast_slice(&self.matrix));
        bytes
    }
}

/// One entry of the TLAS for the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    /// Stable identity of the slot, unique within a frame.
    pub name: String,
    pub kind: InstanceKind,
    pub blas: BlasHandle,
    pub transform: InstanceTransform,
    pub mask: GeometryMask,
    /// Passed to shaders as the instance's custom index.
    pub shading_id: u32,
}

impl Instance {
    pub fn is_visible_to(&self, ray_mask: GeometryMask) -> bool {
        self.mask.intersects(ray_mask)
    }
}

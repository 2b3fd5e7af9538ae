//! The narrow interface the subsystem consumes from the surrounding renderer.
//!
//! Everything that touches GPU objects goes through [`RayTracingDevice`]. Handles are plain
//! ids owned by the device; the components of this crate only hold them.

use crate::error::{RayTracingError, Result};
use crate::scene::Instance;
use crate::settings::FrameConstants;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlasHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TlasHandle(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SbtHandle(pub usize);

/// Ray types traced by the ray generation program. The discriminant is the ray's slot in the
/// miss table and its offset inside an instance's hit group records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RayType {
    Primary = 0,
    Shadow = 1,
}

impl RayType {
    pub const ALL: [RayType; 2] = [RayType::Primary, RayType::Shadow];

    pub fn index(self) -> u32 {
        self as u32
    }
}

/// Number of hit group records per instance, one per [`RayType`].
pub const HIT_GROUP_STRIDE: u32 = RayType::ALL.len() as u32;

/// Size of one TLAS instance record as consumed by the GPU.
pub const TLAS_INSTANCE_DATA_SIZE: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex, index or bounding box data read by acceleration structure builds.
    BuildInput,
    /// Read-only data for hit shaders.
    ShaderResource,
    Scratch,
    TlasInstances,
    Uniform,
}

#[derive(Debug, Clone)]
pub struct BufferDesc<'a> {
    pub name: &'a str,
    pub size: u64,
    pub usage: BufferUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x3,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Float32x3 => 12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Uint32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildFlags {
    pub allow_update: bool,
    pub prefer_fast_trace: bool,
}

impl BuildFlags {
    pub const FAST_TRACE: BuildFlags = BuildFlags {
        allow_update: false,
        prefer_fast_trace: true,
    };

    pub const FAST_TRACE_UPDATABLE: BuildFlags = BuildFlags {
        allow_update: true,
        prefer_fast_trace: true,
    };
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlasTriangleDesc {
    pub geometry_name: String,
    pub max_vertex_count: u32,
    pub vertex_format: VertexFormat,
    pub max_primitive_count: u32,
    pub index_type: IndexType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlasBoxDesc {
    pub geometry_name: String,
    pub max_box_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlasGeometryDesc {
    Triangles(BlasTriangleDesc),
    Boxes(BlasBoxDesc),
}

impl BlasGeometryDesc {
    pub fn geometry_name(&self) -> &str {
        match self {
            BlasGeometryDesc::Triangles(desc) => &desc.geometry_name,
            BlasGeometryDesc::Boxes(desc) => &desc.geometry_name,
        }
    }

    pub fn max_primitive_count(&self) -> u32 {
        match self {
            BlasGeometryDesc::Triangles(desc) => desc.max_primitive_count,
            BlasGeometryDesc::Boxes(desc) => desc.max_box_count,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BlasGeometryDesc::Triangles(_) => "triangles",
            BlasGeometryDesc::Boxes(_) => "boxes",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlasDesc {
    pub name: String,
    pub geometry: BlasGeometryDesc,
    pub flags: BuildFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScratchSizes {
    pub build: u64,
    pub update: u64,
}

impl ScratchSizes {
    /// A scratch buffer of this size serves both builds and updates.
    pub fn max(&self) -> u64 {
        self.build.max(self.update)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlasBuildData {
    Triangles {
        geometry_name: String,
        vertex_buffer: BufferHandle,
        vertex_stride: u32,
        vertex_count: u32,
        vertex_format: VertexFormat,
        index_buffer: BufferHandle,
        primitive_count: u32,
        index_type: IndexType,
        opaque: bool,
    },
    Boxes {
        geometry_name: String,
        box_buffer: BufferHandle,
        box_count: u32,
        box_stride: u32,
    },
}

impl BlasBuildData {
    pub fn kind(&self) -> &'static str {
        match self {
            BlasBuildData::Triangles { .. } => "triangles",
            BlasBuildData::Boxes { .. } => "boxes",
        }
    }

    pub fn geometry_name(&self) -> &str {
        match self {
            BlasBuildData::Triangles { geometry_name, .. }
            | BlasBuildData::Boxes { geometry_name, .. } => geometry_name,
        }
    }

    /// Checks that this data can be built into a BLAS created from `desc`.
    pub fn check_against(&self, desc: &BlasGeometryDesc) -> Result<()> {
        if self.geometry_name() != desc.geometry_name() {
            return Err(RayTracingError::GeometryNameMismatch {
                declared: desc.geometry_name().to_string(),
                actual: self.geometry_name().to_string(),
            });
        }
        match (desc, self) {
            (
                BlasGeometryDesc::Triangles(desc),
                BlasBuildData::Triangles {
                    geometry_name,
                    vertex_stride,
                    vertex_count,
                    vertex_format,
                    primitive_count,
                    ..
                },
            ) => {
                if *vertex_format != desc.vertex_format {
                    return Err(RayTracingError::LayoutMismatch {
                        geometry: geometry_name.clone(),
                        declared: desc.vertex_format.size(),
                        actual: vertex_format.size(),
                    });
                }
                if *vertex_stride < vertex_format.size() {
                    return Err(RayTracingError::LayoutMismatch {
                        geometry: geometry_name.clone(),
                        declared: vertex_format.size(),
                        actual: *vertex_stride,
                    });
                }
                check_count(geometry_name, "vertices", *vertex_count, desc.max_vertex_count)?;
                check_count(
                    geometry_name,
                    "triangles",
                    *primitive_count,
                    desc.max_primitive_count,
                )
            }
            (
                BlasGeometryDesc::Boxes(desc),
                BlasBuildData::Boxes {
                    geometry_name,
                    box_count,
                    ..
                },
            ) => check_count(geometry_name, "boxes", *box_count, desc.max_box_count),
            (desc, data) => Err(RayTracingError::GeometryKindMismatch {
                geometry: desc.geometry_name().to_string(),
                declared: desc.kind(),
                actual: data.kind(),
            }),
        }
    }
}

fn check_count(geometry: &str, what: &'static str, requested: u32, declared: u32) -> Result<()> {
    if requested > declared {
        return Err(RayTracingError::BuildCountExceeded {
            geometry: geometry.to_string(),
            what,
            requested,
            declared,
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BlasBuild<'a> {
    pub blas: BlasHandle,
    pub data: &'a BlasBuildData,
    pub scratch: BufferHandle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TlasDesc {
    pub name: String,
    pub max_instance_count: u32,
    pub flags: BuildFlags,
}

#[derive(Debug, Clone)]
pub struct TlasBuild<'a> {
    pub tlas: TlasHandle,
    pub instances: &'a [Instance],
    /// Refit in place instead of building from scratch.
    pub update: bool,
    pub scratch: BufferHandle,
    pub instance_buffer: BufferHandle,
    pub hit_group_stride: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRays {
    pub sbt: SbtHandle,
    pub width: u32,
    pub height: u32,
}

/// Ray tracing related limits reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Ray generation, miss and hit shaders can be used as standalone pipeline stages.
    pub standalone_shaders: bool,
    pub max_recursion_depth: u32,
    pub shader_group_handle_size: u32,
    pub shader_group_handle_alignment: u32,
    pub shader_group_base_alignment: u32,
    pub max_instance_count: u64,
}

impl DeviceCapabilities {
    pub fn unsupported() -> Self {
        Self {
            standalone_shaders: false,
            max_recursion_depth: 0,
            shader_group_handle_size: 0,
            shader_group_handle_alignment: 1,
            shader_group_base_alignment: 1,
            max_instance_count: 0,
        }
    }
}

/// Operations of the graphics device the subsystem relies on.
///
/// Commands are recorded on a single command stream. Implementations insert the barriers that
/// order acceleration structure builds before their consumers.
pub trait RayTracingDevice {
    fn capabilities(&self) -> DeviceCapabilities;

    fn create_buffer(&mut self, desc: &BufferDesc<'_>, data: Option<&[u8]>)
        -> Result<BufferHandle>;

    fn create_blas(&mut self, desc: &BlasDesc) -> Result<BlasHandle>;

    fn blas_scratch_sizes(&self, blas: BlasHandle) -> Result<ScratchSizes>;

    fn build_blas(&mut self, build: &BlasBuild<'_>) -> Result<()>;

    fn create_tlas(&mut self, desc: &TlasDesc) -> Result<TlasHandle>;

    fn tlas_scratch_sizes(&self, tlas: TlasHandle) -> Result<ScratchSizes>;

    fn build_tlas(&mut self, build: &TlasBuild<'_>) -> Result<()>;

    fn create_sbt(&mut self, name: &str) -> Result<SbtHandle>;

    fn bind_ray_gen_shader(&mut self, sbt: SbtHandle, group: &str) -> Result<()>;

    fn bind_miss_shader(&mut self, sbt: SbtHandle, group: &str, ray_type: RayType) -> Result<()>;

    /// Binds `group` to the record of `instance` for `ray_type`. `None` leaves the record empty,
    /// so the ray falls through to any-hit-less default traversal.
    fn bind_hit_group_for_instance(
        &mut self,
        sbt: SbtHandle,
        tlas: TlasHandle,
        instance: &str,
        ray_type: RayType,
        group: Option<&str>,
    ) -> Result<()>;

    /// Binds `group` to the `ray_type` record of every instance in `tlas`.
    fn bind_hit_group_for_tlas(
        &mut self,
        sbt: SbtHandle,
        tlas: TlasHandle,
        ray_type: RayType,
        group: Option<&str>,
    ) -> Result<()>;

    /// Uploads the bound records so the table can be used for tracing.
    fn update_sbt(&mut self, sbt: SbtHandle) -> Result<()>;

    fn update_constants(&mut self, constants: &FrameConstants) -> Result<()>;

    fn trace_rays(&mut self, trace: &TraceRays) -> Result<()>;
}

use thiserror::Error;

use crate::device::RayType;

/// Failures of the acceleration structure and binding table subsystem.
///
/// None of these are retried. They abort initialization or the current frame.
#[derive(Debug, Error)]
pub enum RayTracingError {
    #[error("ray tracing shaders are not supported by the device")]
    Unsupported,

    #[error("{requested} instances exceed the TLAS capacity of {capacity}")]
    CapacityExceeded { requested: usize, capacity: usize },

    #[error("instance \"{instance}\" is not part of the current TLAS ({ray_type:?} rays)")]
    BindingInconsistency { instance: String, ray_type: RayType },

    #[error(
        "geometry \"{geometry}\" has a vertex layout of {actual} bytes, but the BLAS declares {declared}"
    )]
    LayoutMismatch {
        geometry: String,
        declared: u32,
        actual: u32,
    },

    #[error("geometry \"{geometry}\" indexes vertex {index}, but has only {vertex_count} vertices")]
    IndexOutOfRange {
        geometry: String,
        index: u32,
        vertex_count: u32,
    },

    #[error("build data for \"{geometry}\" holds {actual}, but the BLAS was created for {declared}")]
    GeometryKindMismatch {
        geometry: String,
        declared: &'static str,
        actual: &'static str,
    },

    #[error("build data names geometry \"{actual}\", but the BLAS was created for \"{declared}\"")]
    GeometryNameMismatch { declared: String, actual: String },

    #[error("geometry \"{geometry}\" builds {requested} {what}, but the BLAS allows at most {declared}")]
    BuildCountExceeded {
        geometry: String,
        what: &'static str,
        requested: u32,
        declared: u32,
    },

    #[error("TLAS update requested before the TLAS was built")]
    UpdateBeforeBuild,

    #[error("TLAS was not created with update support")]
    UpdateNotAllowed,

    #[error("TLAS update changes the instance set ({built} instances built, {requested} requested)")]
    UpdateTopologyMismatch { built: usize, requested: usize },

    #[error("the TLAS has not been built yet")]
    TlasNotBuilt,

    #[error("BLAS \"{0}\" is referenced before it was built")]
    BlasNotBuilt(String),

    #[error("scratch buffer holds {actual} bytes, the build needs {required}")]
    ScratchTooSmall { required: u64, actual: u64 },

    #[error("buffer \"{buffer}\" holds {actual} bytes, {required} are needed")]
    BufferTooSmall {
        buffer: String,
        required: u64,
        actual: u64,
    },

    #[error("instance name \"{0}\" is used more than once in a frame")]
    DuplicateInstanceName(String),

    #[error("shader group \"{0}\" is not part of the ray tracing pipeline")]
    UnknownShaderGroup(String),

    #[error("no {0} is bound in the shader binding table")]
    UnboundShader(&'static str),

    #[error("shader binding table {0} has not been uploaded since its last change")]
    SbtNotUploaded(usize),

    #[error("{kind} handle {index} does not exist")]
    InvalidHandle { kind: &'static str, index: usize },

    #[error("no command buffer is being recorded")]
    NotRecording,

    #[error("Vulkan call failed: {0}")]
    Vulkan(#[from] ash::vk::Result),

    #[error("could not load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("GPU memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),
}

pub type Result<T, E = RayTracingError> = std::result::Result<T, E>;

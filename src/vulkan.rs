//! Vulkan backend of [`crate::device::RayTracingDevice`], built on ash and gpu-allocator.

pub mod acceleration_structure;
pub mod buffer;
pub mod command_pool;
pub mod context;
pub mod device;
pub mod pipeline;
pub mod shader_binding_table;

pub use context::Context;
pub use device::VulkanDevice;

/// Capabilities of the best ray tracing capable GPU, if Vulkan and such a GPU are available.
pub fn probe_capabilities() -> crate::error::Result<crate::device::DeviceCapabilities> {
    Ok(Context::new()?.capabilities())
}

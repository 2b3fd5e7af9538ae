use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;

use super::{buffer::Buffer, context::Context};
use crate::error::Result;

pub struct AccelerationStructure {
    pub inner: vk::AccelerationStructureKHR,
    pub context: Arc<Context>,
    pub buffer: Buffer,
    pub device_address: vk::DeviceAddress,
    pub build_sizes: vk::AccelerationStructureBuildSizesInfoKHR,
}

impl AccelerationStructure {
    // See https://github.com/SaschaWillems/Vulkan/blob/a467d941599a2cef5bd0eff696999bca8d75ee23/base/VulkanRaytracingSample.cpp#L149
    pub fn new(
        context: Arc<Context>,
        name: &str,
        structure_type: vk::AccelerationStructureTypeKHR,
        build_sizes: vk::AccelerationStructureBuildSizesInfoKHR,
    ) -> Result<Self> {
        let buffer = Buffer::new(
            context.clone(),
            name,
            build_sizes.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
            MemoryLocation::GpuOnly,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer.inner)
            .size(build_sizes.acceleration_structure_size)
            .ty(structure_type);

        let inner = unsafe {
            context
                .context_raytracing
                .acceleration_structure
                .create_acceleration_structure(&create_info, None)
        }?;

        let device_address = {
            let acceleration_structure_device_address_info =
                vk::AccelerationStructureDeviceAddressInfoKHR::builder()
                    .acceleration_structure(inner);

            unsafe {
                context
                    .context_raytracing
                    .acceleration_structure
                    .get_acceleration_structure_device_address(
                        &acceleration_structure_device_address_info,
                    )
            }
        };

        Ok(Self {
            inner,
            context,
            buffer,
            device_address,
            build_sizes,
        })
    }

    /// Sizes for building a structure from `geometries`, each holding at most the matching
    /// count of `max_primitive_counts`.
    pub fn build_sizes(
        context: &Context,
        structure_type: vk::AccelerationStructureTypeKHR,
        flags: vk::BuildAccelerationStructureFlagsKHR,
        geometries: &[vk::AccelerationStructureGeometryKHR],
        max_primitive_counts: &[u32],
    ) -> vk::AccelerationStructureBuildSizesInfoKHR {
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(structure_type)
            .flags(flags)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(geometries);

        unsafe {
            context
                .context_raytracing
                .acceleration_structure
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    max_primitive_counts,
                )
        }
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.context
                .context_raytracing
                .acceleration_structure
                .destroy_acceleration_structure(self.inner, None);
        }
    }
}

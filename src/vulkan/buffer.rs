use std::ops::Deref;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use crate::error::{RayTracingError, Result};
use crate::vulkan::context::Context;

/// A buffer with its own gpu-allocator allocation and a device address.
pub struct Buffer {
    pub name: String,
    pub inner: vk::Buffer,
    pub usage: vk::BufferUsageFlags,
    pub size: vk::DeviceSize,
    pub device_address: vk::DeviceAddress,
    allocation: Option<Allocation>,
    context: Arc<Context>,
}

impl Buffer {
    pub fn new(
        context: Arc<Context>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let device = &context.device;
        let usage = usage | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;

        let create_info = vk::BufferCreateInfo::builder()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&create_info, None) }?;
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = context
            .allocator
            .lock()
            .map_err(|_| RayTracingError::Vulkan(vk::Result::ERROR_UNKNOWN))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(error) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(error.into());
            }
        };

        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }?;

        let device_address = context.buffer_device_address(buffer);

        Ok(Self {
            name: name.to_string(),
            inner: buffer,
            usage,
            size,
            device_address,
            allocation: Some(allocation),
            context,
        })
    }

    /// Copies `data` to `offset` in host visible memory.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or(RayTracingError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED))?;

        let capacity = mapped.len().min(self.size as usize);
        let range = write_range(&self.name, offset, data.len(), capacity)?;
        mapped[range].copy_from_slice(data);
        Ok(())
    }
}

fn write_range(
    name: &str,
    offset: usize,
    len: usize,
    capacity: usize,
) -> Result<std::ops::Range<usize>> {
    let end = offset + len;
    if end > capacity {
        return Err(RayTracingError::BufferTooSmall {
            buffer: name.to_string(),
            required: end as u64,
            actual: capacity as u64,
        });
    }
    Ok(offset..end)
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            if let Ok(mut allocator) = self.context.allocator.lock() {
                if let Err(error) = allocator.free(allocation) {
                    log::warn!("Could not free buffer memory: {}", error);
                }
            }
        }
        unsafe { self.context.device.destroy_buffer(self.inner, None) };
    }
}

impl Deref for Buffer {
    type Target = vk::Buffer;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_past_the_end_are_buffer_errors() {
        assert_eq!(write_range("Instances", 64, 64, 128).unwrap(), 64..128);
        assert!(matches!(
            write_range("Instances", 64, 65, 128),
            Err(RayTracingError::BufferTooSmall {
                required: 129,
                actual: 128,
                ..
            })
        ));
    }
}

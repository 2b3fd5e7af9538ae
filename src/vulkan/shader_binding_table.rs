use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;

use super::{buffer::Buffer, context::Context};
use crate::device::{DeviceCapabilities, RayType, HIT_GROUP_STRIDE};
use crate::error::{RayTracingError, Result};
use crate::utility::{aligned_size, aligned_size_u64};

/// Byte offsets and strides of the ray generation, miss and hit regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbtLayout {
    pub handle_size: u32,
    pub record_stride: u32,
    pub raygen_size: u64,
    pub miss_offset: u64,
    pub miss_size: u64,
    pub hit_offset: u64,
    pub hit_size: u64,
}

impl SbtLayout {
    pub fn new(capabilities: &DeviceCapabilities, miss_count: u32, hit_count: u32) -> Self {
        let handle_size = capabilities.shader_group_handle_size;
        let base_alignment = capabilities.shader_group_base_alignment as u64;
        let record_stride =
            aligned_size(handle_size, capabilities.shader_group_handle_alignment);

        // The ray generation region's stride has to equal its size.
        let raygen_size = aligned_size_u64(record_stride as u64, base_alignment);
        let miss_size = aligned_size_u64(record_stride as u64 * miss_count as u64, base_alignment);
        let hit_size = aligned_size_u64(record_stride as u64 * hit_count as u64, base_alignment);

        Self {
            handle_size,
            record_stride,
            raygen_size,
            miss_offset: raygen_size,
            miss_size,
            hit_offset: raygen_size + miss_size,
            hit_size,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.hit_offset + self.hit_size
    }
}

/// Host copy of the records, holding pipeline shader group indices. Empty records stay zeroed.
#[derive(Debug, Clone, Default)]
pub struct SbtRecords {
    pub ray_gen: Option<u32>,
    pub miss: [Option<u32>; RayType::ALL.len()],
    /// Indexed by `instance * HIT_GROUP_STRIDE + ray type`.
    pub hit: Vec<Option<u32>>,
}

impl SbtRecords {
    pub fn set_hit(&mut self, instance: usize, ray_type: RayType, group: Option<u32>) {
        let index = instance * HIT_GROUP_STRIDE as usize + ray_type.index() as usize;
        if self.hit.len() <= index {
            self.hit.resize(index + 1, None);
        }
        self.hit[index] = group;
    }

    /// Resizes the hit records to `instance_count` instances.
    pub fn resize_hits(&mut self, instance_count: usize) {
        self.hit
            .resize(instance_count * HIT_GROUP_STRIDE as usize, None);
    }

    /// Lays the records out as uploaded to the GPU. `handles` holds the handles of all shader
    /// groups of the pipeline, tightly packed.
    pub fn to_bytes(&self, layout: &SbtLayout, handles: &[u8]) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; layout.total_size() as usize];
        let stride = layout.record_stride as usize;

        let mut write = |offset: usize, group: Option<u32>| -> Result<()> {
            let Some(group) = group else {
                return Ok(());
            };
            let handle_size = layout.handle_size as usize;
            let start = group as usize * handle_size;
            let handle = handles
                .get(start..start + handle_size)
                .ok_or_else(|| RayTracingError::UnknownShaderGroup(format!("#{}", group)))?;
            bytes[offset..offset + handle_size].copy_from_slice(handle);
            Ok(())
        };

        write(0, self.ray_gen)?;
        for (i, group) in self.miss.iter().enumerate() {
            write(layout.miss_offset as usize + i * stride, *group)?;
        }
        for (i, group) in self.hit.iter().enumerate() {
            write(layout.hit_offset as usize + i * stride, *group)?;
        }
        Ok(bytes)
    }
}

pub struct ShaderBindingTable {
    pub name: String,
    pub records: SbtRecords,
    buffer: Option<Buffer>,
    layout: Option<SbtLayout>,
}

impl ShaderBindingTable {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: SbtRecords::default(),
            buffer: None,
            layout: None,
        }
    }

    pub fn is_uploaded(&self) -> bool {
        self.buffer.is_some()
    }

    /// Writes the records to a host visible buffer, growing it when needed.
    pub fn upload(&mut self, context: &Arc<Context>, handles: &[u8]) -> Result<()> {
        let capabilities = context.capabilities();
        let layout = SbtLayout::new(
            &capabilities,
            RayType::ALL.len() as u32,
            self.records.hit.len() as u32,
        );
        let bytes = self.records.to_bytes(&layout, handles)?;

        let fits = self
            .buffer
            .as_ref()
            .is_some_and(|buffer| buffer.size >= layout.total_size());
        if !fits {
            self.buffer = Some(Buffer::new(
                context.clone(),
                &self.name,
                layout.total_size(),
                vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR,
                MemoryLocation::CpuToGpu,
            )?);
        }
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.write(0, &bytes)?;
        }
        self.layout = Some(layout);
        Ok(())
    }

    /// Raygen, miss, hit and callable regions for `cmd_trace_rays`.
    pub fn regions(&self) -> Option<[vk::StridedDeviceAddressRegionKHR; 4]> {
        let (buffer, layout) = (self.buffer.as_ref()?, self.layout.as_ref()?);
        let base = buffer.device_address;
        let stride = layout.record_stride as vk::DeviceSize;

        let raygen = vk::StridedDeviceAddressRegionKHR {
            device_address: base,
            stride: layout.raygen_size,
            size: layout.raygen_size,
        };
        let miss = vk::StridedDeviceAddressRegionKHR {
            device_address: base + layout.miss_offset,
            stride,
            size: layout.miss_size,
        };
        let hit = vk::StridedDeviceAddressRegionKHR {
            device_address: if layout.hit_size > 0 {
                base + layout.hit_offset
            } else {
                0
            },
            stride,
            size: layout.hit_size,
        };
        Some([raygen, miss, hit, vk::StridedDeviceAddressRegionKHR::default()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities() -> DeviceCapabilities {
        DeviceCapabilities {
            standalone_shaders: true,
            max_recursion_depth: 31,
            shader_group_handle_size: 32,
            shader_group_handle_alignment: 32,
            shader_group_base_alignment: 64,
            max_instance_count: 1 << 24,
        }
    }

    #[test]
    fn regions_start_on_base_alignment() {
        let layout = SbtLayout::new(&capabilities(), 2, 68);
        assert_eq!(layout.record_stride, 32);
        assert_eq!(layout.raygen_size, 64);
        assert_eq!(layout.miss_offset, 64);
        assert_eq!(layout.miss_size, 64);
        assert_eq!(layout.hit_offset, 128);
        assert_eq!(layout.hit_size, 68 * 32);
        assert_eq!(layout.total_size() % 64, 0);
    }

    #[test]
    fn small_handles_are_padded_to_the_handle_alignment() {
        let layout = SbtLayout::new(
            &DeviceCapabilities {
                shader_group_handle_size: 16,
                ..capabilities()
            },
            2,
            3,
        );
        assert_eq!(layout.record_stride, 32);
        assert_eq!(layout.hit_size, 128);
    }

    #[test]
    fn records_copy_handles_and_leave_defaults_zeroed() {
        let layout = SbtLayout::new(&capabilities(), 2, 4);
        let handles: Vec<u8> = (0..4u8)
            .flat_map(|group| std::iter::repeat(group + 1).take(32))
            .collect();

        let mut records = SbtRecords {
            ray_gen: Some(0),
            miss: [Some(1), Some(2)],
            hit: Vec::new(),
        };
        records.resize_hits(2);
        records.set_hit(1, RayType::Shadow, Some(3));

        let bytes = records.to_bytes(&layout, &handles).unwrap();
        assert!(bytes[0..32].iter().all(|b| *b == 1));
        assert!(bytes[64..96].iter().all(|b| *b == 2));
        assert!(bytes[96..128].iter().all(|b| *b == 3));

        let hit = layout.hit_offset as usize;
        assert!(bytes[hit..hit + 96].iter().all(|b| *b == 0));
        assert!(bytes[hit + 96..hit + 128].iter().all(|b| *b == 4));
    }

    #[test]
    fn unknown_group_is_rejected() {
        let layout = SbtLayout::new(&capabilities(), 2, 0);
        let records = SbtRecords {
            ray_gen: Some(9),
            ..SbtRecords::default()
        };
        assert!(matches!(
            records.to_bytes(&layout, &[0; 64]),
            Err(RayTracingError::UnknownShaderGroup(_))
        ));
    }
}

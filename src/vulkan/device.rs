use std::collections::HashSet;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;

use super::acceleration_structure::AccelerationStructure;
use super::buffer::Buffer;
use super::command_pool::CommandPool;
use super::context::Context;
use super::shader_binding_table::ShaderBindingTable;
use crate::device::{
    BlasBuild, BlasBuildData, BlasDesc, BlasGeometryDesc, BlasHandle, BufferDesc, BufferHandle,
    BufferUsage, BuildFlags, DeviceCapabilities, IndexType, RayTracingDevice, RayType, SbtHandle,
    ScratchSizes, TlasBuild, TlasDesc, TlasHandle, TraceRays, VertexFormat,
    TLAS_INSTANCE_DATA_SIZE,
};
use crate::error::{RayTracingError, Result};
use crate::scene::Instance;
use crate::settings::FrameConstants;
use crate::utility::aligned_size_u64;

struct VulkanBlas {
    desc: BlasDesc,
    structure: AccelerationStructure,
    built: bool,
}

struct VulkanTlas {
    desc: TlasDesc,
    structure: AccelerationStructure,
    built: bool,
    /// Name and BLAS of every instance of the last build.
    instances: Vec<(String, BlasHandle)>,
}

/// [`RayTracingDevice`] on top of Vulkan's ray tracing pipeline.
///
/// Commands go to the command buffer passed to [`VulkanDevice::begin_recording`]. Submitting it
/// and binding the descriptor sets of the pipeline layout is up to the caller.
pub struct VulkanDevice {
    context: Arc<Context>,
    pipeline: vk::Pipeline,
    shader_groups: Vec<String>,
    group_handles: Vec<u8>,
    command_buffer: Option<vk::CommandBuffer>,
    buffers: Vec<Buffer>,
    blases: Vec<VulkanBlas>,
    tlases: Vec<VulkanTlas>,
    sbts: Vec<ShaderBindingTable>,
    constants: Option<Buffer>,
}

impl VulkanDevice {
    /// `shader_groups` names the groups of `pipeline` in creation order.
    pub fn new(context: Arc<Context>, pipeline: vk::Pipeline, shader_groups: &[&str]) -> Result<Self> {
        let handle_size = context.capabilities().shader_group_handle_size as usize;
        let group_count = shader_groups.len() as u32;

        let group_handles = unsafe {
            context
                .context_raytracing
                .ray_tracing_pipeline
                .get_ray_tracing_shader_group_handles(
                    pipeline,
                    0,
                    group_count,
                    group_count as usize * handle_size,
                )
        }?;

        Ok(Self {
            context,
            pipeline,
            shader_groups: shader_groups.iter().map(|name| name.to_string()).collect(),
            group_handles,
            command_buffer: None,
            buffers: Vec::new(),
            blases: Vec::new(),
            tlases: Vec::new(),
            sbts: Vec::new(),
            constants: None,
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn begin_recording(&mut self, command_buffer: vk::CommandBuffer) {
        self.command_buffer = Some(command_buffer);
    }

    pub fn finish_recording(&mut self) -> Option<vk::CommandBuffer> {
        self.command_buffer.take()
    }

    /// Records with `record` into a one time command buffer of `pool` and waits until the GPU
    /// has executed it. Meant for setup work like compiling geometry.
    pub fn submit_now<T>(
        &mut self,
        pool: &CommandPool,
        record: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let previous = self.command_buffer;
        let result = pool.one_time_submit(|command_buffer| {
            self.begin_recording(command_buffer);
            record(self)
        });
        self.command_buffer = previous;
        result
    }

    /// The uniform buffer holding the latest [`FrameConstants`].
    pub fn constants_buffer(&self) -> Option<vk::Buffer> {
        self.constants.as_ref().map(|buffer| buffer.inner)
    }

    pub fn tlas(&self, tlas: TlasHandle) -> Option<vk::AccelerationStructureKHR> {
        self.tlases.get(tlas.0).map(|entry| entry.structure.inner)
    }

    pub fn buffer(&self, buffer: BufferHandle) -> Option<vk::Buffer> {
        self.buffers.get(buffer.0).map(|entry| entry.inner)
    }

    fn recording(&self) -> Result<vk::CommandBuffer> {
        self.command_buffer.ok_or(RayTracingError::NotRecording)
    }

    fn buffer_entry(&self, buffer: BufferHandle) -> Result<&Buffer> {
        self.buffers.get(buffer.0).ok_or(RayTracingError::InvalidHandle {
            kind: "buffer",
            index: buffer.0,
        })
    }

    fn blas_entry(&self, blas: BlasHandle) -> Result<&VulkanBlas> {
        self.blases.get(blas.0).ok_or(RayTracingError::InvalidHandle {
            kind: "BLAS",
            index: blas.0,
        })
    }

    fn tlas_entry(&self, tlas: TlasHandle) -> Result<&VulkanTlas> {
        self.tlases.get(tlas.0).ok_or(RayTracingError::InvalidHandle {
            kind: "TLAS",
            index: tlas.0,
        })
    }

    fn sbt_mut(&mut self, sbt: SbtHandle) -> Result<&mut ShaderBindingTable> {
        self.sbts.get_mut(sbt.0).ok_or(RayTracingError::InvalidHandle {
            kind: "SBT",
            index: sbt.0,
        })
    }

    fn group_index(&self, group: &str) -> Result<u32> {
        self.shader_groups
            .iter()
            .position(|name| name == group)
            .map(|index| index as u32)
            .ok_or_else(|| RayTracingError::UnknownShaderGroup(group.to_string()))
    }

    fn optional_group_index(&self, group: Option<&str>) -> Result<Option<u32>> {
        group.map(|group| self.group_index(group)).transpose()
    }

    /// Aligned scratch address, after checking that `required` bytes fit behind it.
    fn scratch_address(&self, scratch: BufferHandle, required: u64) -> Result<vk::DeviceAddress> {
        let buffer = self.buffer_entry(scratch)?;
        let address = aligned_size_u64(buffer.device_address, self.context.scratch_alignment());
        let usable = buffer
            .size
            .saturating_sub(address - buffer.device_address);
        if usable < required {
            return Err(RayTracingError::ScratchTooSmall {
                required,
                actual: usable,
            });
        }
        Ok(address)
    }

    /// Makes finished builds visible to later builds and to the ray tracing shaders.
    fn acceleration_structure_barrier(&self, command_buffer: vk::CommandBuffer) {
        let barrier = vk::MemoryBarrier2::builder()
            .src_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
            .src_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR)
            .dst_stage_mask(
                vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
                    | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            )
            .dst_access_mask(
                vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                    | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
            )
            .build();
        let dependency_info =
            vk::DependencyInfo::builder().memory_barriers(std::slice::from_ref(&barrier));

        unsafe {
            self.context
                .synchronisation2_loader
                .cmd_pipeline_barrier2(command_buffer, &dependency_info)
        };
    }

    fn instance_data(&self, build: &TlasBuild<'_>) -> Result<Vec<u8>> {
        let mut names = HashSet::with_capacity(build.instances.len());
        let mut data = Vec::with_capacity(build.instances.len() * TLAS_INSTANCE_DATA_SIZE as usize);

        for (index, instance) in build.instances.iter().enumerate() {
            if !names.insert(instance.name.as_str()) {
                return Err(RayTracingError::DuplicateInstanceName(
                    instance.name.clone(),
                ));
            }
            let blas = self.blas_entry(instance.blas)?;
            if !blas.built {
                return Err(RayTracingError::BlasNotBuilt(instance.name.clone()));
            }

            let record = instance_record(
                instance,
                blas.structure.device_address,
                index as u32 * build.hit_group_stride,
            );
            data.extend_from_slice(instance_bytes(&record));
        }
        Ok(data)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if let Err(error) = unsafe { self.context.device.device_wait_idle() } {
            log::warn!("Could not wait for the device: {}", error);
        }
    }
}

fn build_flags(flags: BuildFlags) -> vk::BuildAccelerationStructureFlagsKHR {
    let mut result = vk::BuildAccelerationStructureFlagsKHR::empty();
    if flags.allow_update {
        result |= vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE;
    }
    if flags.prefer_fast_trace {
        result |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
    } else {
        result |= vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD;
    }
    result
}

fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
    }
}

fn index_type(index_type: IndexType) -> vk::IndexType {
    match index_type {
        IndexType::Uint32 => vk::IndexType::UINT32,
    }
}

fn buffer_usage(usage: BufferUsage) -> (vk::BufferUsageFlags, MemoryLocation) {
    match usage {
        BufferUsage::BuildInput => (
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryLocation::CpuToGpu,
        ),
        BufferUsage::ShaderResource => {
            (vk::BufferUsageFlags::STORAGE_BUFFER, MemoryLocation::CpuToGpu)
        }
        BufferUsage::Scratch => (vk::BufferUsageFlags::STORAGE_BUFFER, MemoryLocation::GpuOnly),
        BufferUsage::TlasInstances => (
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            MemoryLocation::CpuToGpu,
        ),
        BufferUsage::Uniform => (vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu),
    }
}

fn device_address(address: vk::DeviceAddress) -> vk::DeviceOrHostAddressConstKHR {
    vk::DeviceOrHostAddressConstKHR {
        device_address: address,
    }
}

fn triangles_geometry(
    vertex_address: vk::DeviceAddress,
    vertex_stride: u32,
    vertex_count: u32,
    format: VertexFormat,
    index_address: vk::DeviceAddress,
    indices: IndexType,
    opaque: bool,
) -> vk::AccelerationStructureGeometryKHR {
    let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
        .vertex_format(vertex_format(format))
        .vertex_data(device_address(vertex_address))
        .vertex_stride(vertex_stride as vk::DeviceSize)
        .max_vertex(vertex_count.saturating_sub(1))
        .index_type(index_type(indices))
        .index_data(device_address(index_address))
        .build();

    let flags = if opaque {
        vk::GeometryFlagsKHR::OPAQUE
    } else {
        vk::GeometryFlagsKHR::empty()
    };

    vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
        .flags(flags)
        .build()
}

fn boxes_geometry(box_address: vk::DeviceAddress, box_stride: u32) -> vk::AccelerationStructureGeometryKHR {
    let aabbs = vk::AccelerationStructureGeometryAabbsDataKHR::builder()
        .data(device_address(box_address))
        .stride(box_stride as vk::DeviceSize)
        .build();

    vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::AABBS)
        .geometry(vk::AccelerationStructureGeometryDataKHR { aabbs })
        .build()
}

fn instances_geometry(instance_address: vk::DeviceAddress) -> vk::AccelerationStructureGeometryKHR {
    let instances = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
        .array_of_pointers(false)
        .data(device_address(instance_address))
        .build();

    vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
        .build()
}

fn instance_record(
    instance: &Instance,
    blas_address: vk::DeviceAddress,
    hit_group_offset: u32,
) -> vk::AccelerationStructureInstanceKHR {
    vk::AccelerationStructureInstanceKHR {
        transform: vk::TransformMatrixKHR {
            matrix: instance.transform.matrix,
        },
        instance_custom_index_and_mask: vk::Packed24_8::new(
            instance.shading_id,
            instance.mask.bits(),
        ),
        instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
            hit_group_offset,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
        ),
        acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
            device_handle: blas_address,
        },
    }
}

fn instance_bytes(record: &vk::AccelerationStructureInstanceKHR) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            (record as *const vk::AccelerationStructureInstanceKHR).cast::<u8>(),
            std::mem::size_of::<vk::AccelerationStructureInstanceKHR>(),
        )
    }
}

impl RayTracingDevice for VulkanDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.context.capabilities()
    }

    fn create_buffer(
        &mut self,
        desc: &BufferDesc<'_>,
        data: Option<&[u8]>,
    ) -> Result<BufferHandle> {
        let (usage, location) = buffer_usage(desc.usage);
        let size = match desc.usage {
            BufferUsage::Scratch => desc.size + self.context.scratch_alignment(),
            _ => desc.size,
        };

        let mut buffer = Buffer::new(self.context.clone(), desc.name, size, usage, location)?;
        if let Some(data) = data {
            buffer.write(0, data)?;
        }

        let handle = BufferHandle(self.buffers.len());
        self.buffers.push(buffer);
        log::trace!("Created buffer {} ({} bytes)", desc.name, size);
        Ok(handle)
    }

    fn create_blas(&mut self, desc: &BlasDesc) -> Result<BlasHandle> {
        let geometry = match &desc.geometry {
            BlasGeometryDesc::Triangles(triangles) => triangles_geometry(
                0,
                triangles.vertex_format.size(),
                triangles.max_vertex_count,
                triangles.vertex_format,
                0,
                triangles.index_type,
                true,
            ),
            BlasGeometryDesc::Boxes(_) => {
                boxes_geometry(0, std::mem::size_of::<vk::AabbPositionsKHR>() as u32)
            }
        };

        let build_sizes = AccelerationStructure::build_sizes(
            &self.context,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            build_flags(desc.flags),
            std::slice::from_ref(&geometry),
            &[desc.geometry.max_primitive_count()],
        );
        let structure = AccelerationStructure::new(
            self.context.clone(),
            &desc.name,
            vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            build_sizes,
        )?;

        let blas = BlasHandle(self.blases.len());
        self.blases.push(VulkanBlas {
            desc: desc.clone(),
            structure,
            built: false,
        });
        Ok(blas)
    }

    fn blas_scratch_sizes(&self, blas: BlasHandle) -> Result<ScratchSizes> {
        let entry = self.blas_entry(blas)?;
        let sizes = entry.structure.build_sizes;
        Ok(ScratchSizes {
            build: sizes.build_scratch_size,
            update: if entry.desc.flags.allow_update {
                sizes.update_scratch_size
            } else {
                0
            },
        })
    }

    fn build_blas(&mut self, build: &BlasBuild<'_>) -> Result<()> {
        let command_buffer = self.recording()?;
        let entry = self.blas_entry(build.blas)?;
        let scratch_address =
            self.scratch_address(build.scratch, entry.structure.build_sizes.build_scratch_size)?;

        build.data.check_against(&entry.desc.geometry)?;
        let (geometry, primitive_count) = match build.data {
            BlasBuildData::Triangles {
                vertex_buffer,
                vertex_stride,
                vertex_count,
                vertex_format,
                index_buffer,
                primitive_count,
                index_type,
                opaque,
                ..
            } => {
                let geometry = triangles_geometry(
                    self.buffer_entry(*vertex_buffer)?.device_address,
                    *vertex_stride,
                    *vertex_count,
                    *vertex_format,
                    self.buffer_entry(*index_buffer)?.device_address,
                    *index_type,
                    *opaque,
                );
                (geometry, *primitive_count)
            }
            BlasBuildData::Boxes {
                box_buffer,
                box_count,
                box_stride,
                ..
            } => {
                let geometry =
                    boxes_geometry(self.buffer_entry(*box_buffer)?.device_address, *box_stride);
                (geometry, *box_count)
            }
        };

        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
            .flags(build_flags(entry.desc.flags))
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .dst_acceleration_structure(entry.structure.inner)
            .geometries(std::slice::from_ref(&geometry))
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch_address,
            })
            .build();

        let build_range_info = vk::AccelerationStructureBuildRangeInfoKHR::builder()
            .primitive_count(primitive_count)
            .build();

        unsafe {
            self.context
                .context_raytracing
                .acceleration_structure
                .cmd_build_acceleration_structures(
                    command_buffer,
                    std::slice::from_ref(&build_info),
                    &[std::slice::from_ref(&build_range_info)],
                )
        };
        self.acceleration_structure_barrier(command_buffer);

        self.blases[build.blas.0].built = true;
        Ok(())
    }

    fn create_tlas(&mut self, desc: &TlasDesc) -> Result<TlasHandle> {
        let capabilities = self.context.capabilities();
        if desc.max_instance_count as u64 > capabilities.max_instance_count {
            return Err(RayTracingError::CapacityExceeded {
                requested: desc.max_instance_count as usize,
                capacity: capabilities.max_instance_count as usize,
            });
        }

        let geometry = instances_geometry(0);
        let build_sizes = AccelerationStructure::build_sizes(
            &self.context,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            build_flags(desc.flags),
            std::slice::from_ref(&geometry),
            &[desc.max_instance_count],
        );
        let structure = AccelerationStructure::new(
            self.context.clone(),
            &desc.name,
            vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            build_sizes,
        )?;

        let tlas = TlasHandle(self.tlases.len());
        self.tlases.push(VulkanTlas {
            desc: desc.clone(),
            structure,
            built: false,
            instances: Vec::new(),
        });
        Ok(tlas)
    }

    fn tlas_scratch_sizes(&self, tlas: TlasHandle) -> Result<ScratchSizes> {
        let entry = self.tlas_entry(tlas)?;
        let sizes = entry.structure.build_sizes;
        Ok(ScratchSizes {
            build: sizes.build_scratch_size,
            update: if entry.desc.flags.allow_update {
                sizes.update_scratch_size
            } else {
                0
            },
        })
    }

    fn build_tlas(&mut self, build: &TlasBuild<'_>) -> Result<()> {
        let command_buffer = self.recording()?;
        let entry = self.tlas_entry(build.tlas)?;

        if build.update {
            if !entry.built {
                return Err(RayTracingError::UpdateBeforeBuild);
            }
            if !entry.desc.flags.allow_update {
                return Err(RayTracingError::UpdateNotAllowed);
            }
            let same_topology = entry.instances.len() == build.instances.len()
                && entry
                    .instances
                    .iter()
                    .zip(build.instances)
                    .all(|((name, blas), instance)| *name == instance.name && *blas == instance.blas);
            if !same_topology {
                return Err(RayTracingError::UpdateTopologyMismatch {
                    built: entry.instances.len(),
                    requested: build.instances.len(),
                });
            }
        }
        if build.instances.len() > entry.desc.max_instance_count as usize {
            return Err(RayTracingError::CapacityExceeded {
                requested: build.instances.len(),
                capacity: entry.desc.max_instance_count as usize,
            });
        }

        let scratch_size = if build.update {
            entry.structure.build_sizes.update_scratch_size
        } else {
            entry.structure.build_sizes.build_scratch_size
        };
        let scratch_address = self.scratch_address(build.scratch, scratch_size)?;

        let data = self.instance_data(build)?;
        let instance_buffer = self
            .buffers
            .get_mut(build.instance_buffer.0)
            .ok_or(RayTracingError::InvalidHandle {
                kind: "buffer",
                index: build.instance_buffer.0,
            })?;
        instance_buffer.write(0, &data)?;
        let instance_address = instance_buffer.device_address;

        let entry = &self.tlases[build.tlas.0];
        let (mode, src) = if build.update {
            (
                vk::BuildAccelerationStructureModeKHR::UPDATE,
                entry.structure.inner,
            )
        } else {
            (
                vk::BuildAccelerationStructureModeKHR::BUILD,
                vk::AccelerationStructureKHR::null(),
            )
        };

        let geometry = instances_geometry(instance_address);
        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(build_flags(entry.desc.flags))
            .mode(mode)
            .src_acceleration_structure(src)
            .dst_acceleration_structure(entry.structure.inner)
            .geometries(std::slice::from_ref(&geometry))
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch_address,
            })
            .build();

        let build_range_info = vk::AccelerationStructureBuildRangeInfoKHR::builder()
            .primitive_count(build.instances.len() as u32)
            .build();

        unsafe {
            self.context
                .context_raytracing
                .acceleration_structure
                .cmd_build_acceleration_structures(
                    command_buffer,
                    std::slice::from_ref(&build_info),
                    &[std::slice::from_ref(&build_range_info)],
                )
        };
        self.acceleration_structure_barrier(command_buffer);

        let entry = &mut self.tlases[build.tlas.0];
        entry.built = true;
        entry.instances = build
            .instances
            .iter()
            .map(|instance| (instance.name.clone(), instance.blas))
            .collect();
        Ok(())
    }

    fn create_sbt(&mut self, name: &str) -> Result<SbtHandle> {
        let sbt = SbtHandle(self.sbts.len());
        self.sbts.push(ShaderBindingTable::new(name));
        Ok(sbt)
    }

    fn bind_ray_gen_shader(&mut self, sbt: SbtHandle, group: &str) -> Result<()> {
        let group = self.group_index(group)?;
        self.sbt_mut(sbt)?.records.ray_gen = Some(group);
        Ok(())
    }

    fn bind_miss_shader(&mut self, sbt: SbtHandle, group: &str, ray_type: RayType) -> Result<()> {
        let group = self.group_index(group)?;
        self.sbt_mut(sbt)?.records.miss[ray_type.index() as usize] = Some(group);
        Ok(())
    }

    fn bind_hit_group_for_instance(
        &mut self,
        sbt: SbtHandle,
        tlas: TlasHandle,
        instance: &str,
        ray_type: RayType,
        group: Option<&str>,
    ) -> Result<()> {
        let group = self.optional_group_index(group)?;
        let entry = self.tlas_entry(tlas)?;
        let instance_count = entry.instances.len();
        let index = entry
            .instances
            .iter()
            .position(|(name, _)| name == instance)
            .ok_or_else(|| RayTracingError::BindingInconsistency {
                instance: instance.to_string(),
                ray_type,
            })?;

        let records = &mut self.sbt_mut(sbt)?.records;
        records.resize_hits(instance_count);
        records.set_hit(index, ray_type, group);
        Ok(())
    }

    fn bind_hit_group_for_tlas(
        &mut self,
        sbt: SbtHandle,
        tlas: TlasHandle,
        ray_type: RayType,
        group: Option<&str>,
    ) -> Result<()> {
        let group = self.optional_group_index(group)?;
        let instance_count = self.tlas_entry(tlas)?.instances.len();

        let records = &mut self.sbt_mut(sbt)?.records;
        records.resize_hits(instance_count);
        for index in 0..instance_count {
            records.set_hit(index, ray_type, group);
        }
        Ok(())
    }

    fn update_sbt(&mut self, sbt: SbtHandle) -> Result<()> {
        let context = self.context.clone();
        let table = self.sbts.get_mut(sbt.0).ok_or(RayTracingError::InvalidHandle {
            kind: "SBT",
            index: sbt.0,
        })?;
        table.upload(&context, &self.group_handles)
    }

    fn update_constants(&mut self, constants: &FrameConstants) -> Result<()> {
        let bytes = bytemuck::bytes_of(constants);
        if self.constants.is_none() {
            self.constants = Some(Buffer::new(
                self.context.clone(),
                "Ray tracing constants",
                bytes.len() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
            )?);
        }
        if let Some(buffer) = self.constants.as_mut() {
            buffer.write(0, bytes)?;
        }
        Ok(())
    }

    fn trace_rays(&mut self, trace: &TraceRays) -> Result<()> {
        let command_buffer = self.recording()?;
        let [raygen, miss, hit, callable] = self
            .sbts
            .get(trace.sbt.0)
            .ok_or(RayTracingError::InvalidHandle {
                kind: "SBT",
                index: trace.sbt.0,
            })?
            .regions()
            .ok_or(RayTracingError::SbtNotUploaded(trace.sbt.0))?;

        unsafe {
            self.context.device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.pipeline,
            );
            self.context
                .context_raytracing
                .ray_tracing_pipeline
                .cmd_trace_rays(
                    command_buffer,
                    &raygen,
                    &miss,
                    &hit,
                    &callable,
                    trace.width,
                    trace.height,
                    1,
                );
        }
        Ok(())
    }
}

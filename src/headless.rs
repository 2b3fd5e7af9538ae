//! A CPU-only [`RayTracingDevice`].
//!
//! It performs no ray tracing. It checks every call against the rules a GPU backend relies on
//! and records the resulting command stream, which makes it the device of choice for tests and
//! for running the frame loop without a ray tracing capable GPU.

use std::collections::{HashMap, HashSet};

use crate::device::{
    BlasBuild, BlasBuildData, BlasDesc, BlasHandle, BufferDesc, BufferHandle,
    BufferUsage, DeviceCapabilities, RayTracingDevice, RayType, SbtHandle, ScratchSizes, TlasBuild,
    TlasDesc, TlasHandle, TraceRays, TLAS_INSTANCE_DATA_SIZE,
};
use crate::error::{RayTracingError, Result};
use crate::pipeline::SHADER_GROUPS;
use crate::scene::{GeometryMask, InstanceTransform};
use crate::settings::FrameConstants;
use crate::utility::aligned_size_u64;

/// Everything the device was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    CreateBuffer {
        buffer: BufferHandle,
        name: String,
        size: u64,
    },
    BuildBlas {
        blas: BlasHandle,
        scratch: BufferHandle,
        primitive_count: u32,
    },
    BuildTlas {
        tlas: TlasHandle,
        update: bool,
        instance_count: usize,
    },
    BindRayGenShader {
        sbt: SbtHandle,
        group: String,
    },
    BindMissShader {
        sbt: SbtHandle,
        group: String,
        ray_type: RayType,
    },
    BindHitGroupForInstance {
        sbt: SbtHandle,
        instance: String,
        ray_type: RayType,
        group: Option<String>,
    },
    BindHitGroupForTlas {
        sbt: SbtHandle,
        ray_type: RayType,
        group: Option<String>,
    },
    UpdateSbt {
        sbt: SbtHandle,
    },
    UpdateConstants,
    TraceRays {
        sbt: SbtHandle,
        width: u32,
        height: u32,
    },
}

#[derive(Debug, Clone)]
pub struct HeadlessBuffer {
    pub name: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
struct HeadlessBlas {
    desc: BlasDesc,
    built: bool,
}

/// A TLAS instance as the GPU would see it.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    pub name: String,
    pub blas: BlasHandle,
    pub transform: InstanceTransform,
    pub mask: GeometryMask,
    pub custom_index: u32,
    /// First hit group record of the instance.
    pub hit_group_offset: u32,
}

#[derive(Debug, Clone)]
struct HeadlessTlas {
    desc: TlasDesc,
    built: bool,
    instances: Vec<InstanceRecord>,
}

#[derive(Debug, Clone, Default)]
struct HeadlessSbt {
    ray_gen: Option<String>,
    miss: [Option<String>; 2],
    tlas: Option<TlasHandle>,
    /// Indexed by hit group offset plus ray type.
    hit_records: Vec<Option<String>>,
    uploaded: bool,
}

pub struct HeadlessDevice {
    capabilities: DeviceCapabilities,
    shader_groups: HashSet<String>,
    buffers: Vec<HeadlessBuffer>,
    blases: Vec<HeadlessBlas>,
    tlases: Vec<HeadlessTlas>,
    sbts: Vec<HeadlessSbt>,
    constants: Option<FrameConstants>,
    commands: Vec<DeviceCommand>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::with_capabilities(Self::default_capabilities())
    }

    pub fn with_capabilities(capabilities: DeviceCapabilities) -> Self {
        Self {
            capabilities,
            shader_groups: SHADER_GROUPS
                .iter()
                .map(|group| group.name.to_string())
                .collect(),
            buffers: Vec::new(),
            blases: Vec::new(),
            tlases: Vec::new(),
            sbts: Vec::new(),
            constants: None,
            commands: Vec::new(),
        }
    }

    /// Limits in the range of current desktop GPUs.
    pub fn default_capabilities() -> DeviceCapabilities {
        DeviceCapabilities {
            standalone_shaders: true,
            max_recursion_depth: 31,
            shader_group_handle_size: 32,
            shader_group_handle_alignment: 32,
            shader_group_base_alignment: 64,
            max_instance_count: 1 << 24,
        }
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn buffer(&self, buffer: BufferHandle) -> Option<&HeadlessBuffer> {
        self.buffers.get(buffer.0)
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_blas_built(&self, blas: BlasHandle) -> bool {
        self.blases.get(blas.0).is_some_and(|b| b.built)
    }

    /// Instance records of the last build or update of `tlas`.
    pub fn tlas_instances(&self, tlas: TlasHandle) -> Option<&[InstanceRecord]> {
        self.tlases.get(tlas.0).map(|t| t.instances.as_slice())
    }

    pub fn constants(&self) -> Option<&FrameConstants> {
        self.constants.as_ref()
    }

    /// Hit group a ray of `ray_type` runs when it hits `instance`.
    ///
    /// `None` if the instance is not part of the bound TLAS, `Some(None)` if the record is empty.
    pub fn resolve_hit_group(
        &self,
        sbt: SbtHandle,
        instance: &str,
        ray_type: RayType,
    ) -> Option<Option<String>> {
        let table = self.sbts.get(sbt.0)?;
        let tlas = self.tlases.get(table.tlas?.0)?;
        let record = tlas.instances.iter().find(|r| r.name == instance)?;
        let index = (record.hit_group_offset + ray_type.index()) as usize;
        Some(table.hit_records.get(index).cloned().flatten())
    }

    fn buffer_entry(&self, buffer: BufferHandle) -> Result<&HeadlessBuffer> {
        self.buffers
            .get(buffer.0)
            .ok_or(RayTracingError::InvalidHandle {
                kind: "buffer",
                index: buffer.0,
            })
    }

    fn check_buffer(&self, buffer: BufferHandle, min_size: u64) -> Result<&HeadlessBuffer> {
        let entry = self.buffer_entry(buffer)?;
        if entry.size < min_size {
            return Err(RayTracingError::BufferTooSmall {
                buffer: entry.name.clone(),
                required: min_size,
                actual: entry.size,
            });
        }
        Ok(entry)
    }

    fn check_scratch(&self, buffer: BufferHandle, min_size: u64) -> Result<()> {
        let entry = self.buffer_entry(buffer)?;
        if entry.size < min_size {
            return Err(RayTracingError::ScratchTooSmall {
                required: min_size,
                actual: entry.size,
            });
        }
        Ok(())
    }

    /// Rejects uploaded indices that point past the last vertex of the build.
    fn check_indices(
        &self,
        geometry: &str,
        index_buffer: BufferHandle,
        primitive_count: u32,
        vertex_count: u32,
    ) -> Result<()> {
        let Some(data) = self.buffer_entry(index_buffer)?.data.as_deref() else {
            return Ok(());
        };
        let used = 12 * primitive_count as usize;
        let out_of_range = data[..used.min(data.len())]
            .chunks_exact(4)
            .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .find(|&index| index >= vertex_count);
        match out_of_range {
            Some(index) => Err(RayTracingError::IndexOutOfRange {
                geometry: geometry.to_string(),
                index,
                vertex_count,
            }),
            None => Ok(()),
        }
    }

    fn check_shader_group(&self, group: &str) -> Result<()> {
        if self.shader_groups.contains(group) {
            Ok(())
        } else {
            Err(RayTracingError::UnknownShaderGroup(group.to_string()))
        }
    }

    fn sbt_mut(&mut self, sbt: SbtHandle) -> Result<&mut HeadlessSbt> {
        self.sbts.get_mut(sbt.0).ok_or(RayTracingError::InvalidHandle {
            kind: "SBT",
            index: sbt.0,
        })
    }

    fn tlas_ref(&self, tlas: TlasHandle) -> Result<&HeadlessTlas> {
        self.tlases.get(tlas.0).ok_or(RayTracingError::InvalidHandle {
            kind: "TLAS",
            index: tlas.0,
        })
    }

    /// Points `sbt` at `tlas` and sizes its hit records for the instances of the TLAS.
    fn attach_tlas(&mut self, sbt: SbtHandle, tlas: TlasHandle) -> Result<()> {
        let record_count = self
            .tlas_ref(tlas)?
            .instances
            .iter()
            .map(|r| (r.hit_group_offset + RayType::ALL.len() as u32) as usize)
            .max()
            .unwrap_or(0);
        let table = self.sbt_mut(sbt)?;
        if table.tlas != Some(tlas) {
            table.tlas = Some(tlas);
            table.hit_records.clear();
        }
        table.hit_records.resize(record_count, None);
        table.uploaded = false;
        Ok(())
    }
}

impl RayTracingDevice for HeadlessDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_buffer(
        &mut self,
        desc: &BufferDesc<'_>,
        data: Option<&[u8]>,
    ) -> Result<BufferHandle> {
        if let Some(data) = data {
            if data.len() as u64 > desc.size {
                return Err(RayTracingError::BufferTooSmall {
                    buffer: desc.name.to_string(),
                    required: data.len() as u64,
                    actual: desc.size,
                });
            }
        }
        let buffer = BufferHandle(self.buffers.len());
        self.buffers.push(HeadlessBuffer {
            name: desc.name.to_string(),
            size: desc.size,
            usage: desc.usage,
            data: data.map(<[u8]>::to_vec),
        });
        self.commands.push(DeviceCommand::CreateBuffer {
            buffer,
            name: desc.name.to_string(),
            size: desc.size,
        });
        Ok(buffer)
    }

    fn create_blas(&mut self, desc: &BlasDesc) -> Result<BlasHandle> {
        let blas = BlasHandle(self.blases.len());
        self.blases.push(HeadlessBlas {
            desc: desc.clone(),
            built: false,
        });
        Ok(blas)
    }

    fn blas_scratch_sizes(&self, blas: BlasHandle) -> Result<ScratchSizes> {
        let entry = self.blases.get(blas.0).ok_or(RayTracingError::InvalidHandle {
            kind: "BLAS",
            index: blas.0,
        })?;
        let primitives = entry.desc.geometry.max_primitive_count() as u64;
        Ok(ScratchSizes {
            build: aligned_size_u64(128 + 64 * primitives, 256),
            update: if entry.desc.flags.allow_update {
                aligned_size_u64(32 * primitives, 256)
            } else {
                0
            },
        })
    }

    fn build_blas(&mut self, build: &BlasBuild<'_>) -> Result<()> {
        let scratch_size = self.blas_scratch_sizes(build.blas)?.build;
        self.check_scratch(build.scratch, scratch_size)?;

        let entry = &self.blases[build.blas.0];
        build.data.check_against(&entry.desc.geometry)?;
        let primitive_count = match build.data {
            BlasBuildData::Triangles {
                geometry_name,
                vertex_buffer,
                vertex_stride,
                vertex_count,
                index_buffer,
                primitive_count,
                ..
            } => {
                self.check_buffer(*vertex_buffer, *vertex_stride as u64 * *vertex_count as u64)?;
                self.check_buffer(*index_buffer, 12 * *primitive_count as u64)?;
                self.check_indices(geometry_name, *index_buffer, *primitive_count, *vertex_count)?;
                *primitive_count
            }
            BlasBuildData::Boxes {
                box_buffer,
                box_count,
                box_stride,
                ..
            } => {
                self.check_buffer(*box_buffer, *box_stride as u64 * *box_count as u64)?;
                *box_count
            }
        };

        self.blases[build.blas.0].built = true;
        self.commands.push(DeviceCommand::BuildBlas {
            blas: build.blas,
            scratch: build.scratch,
            primitive_count,
        });
        Ok(())
    }

    fn create_tlas(&mut self, desc: &TlasDesc) -> Result<TlasHandle> {
        if desc.max_instance_count as u64 > self.capabilities.max_instance_count {
            return Err(RayTracingError::CapacityExceeded {
                requested: desc.max_instance_count as usize,
                capacity: self.capabilities.max_instance_count as usize,
            });
        }
        let tlas = TlasHandle(self.tlases.len());
        self.tlases.push(HeadlessTlas {
            desc: desc.clone(),
            built: false,
            instances: Vec::new(),
        });
        Ok(tlas)
    }

    fn tlas_scratch_sizes(&self, tlas: TlasHandle) -> Result<ScratchSizes> {
        let entry = self.tlas_ref(tlas)?;
        let instances = entry.desc.max_instance_count as u64;
        Ok(ScratchSizes {
            build: aligned_size_u64(256 + 128 * instances, 256),
            update: if entry.desc.flags.allow_update {
                aligned_size_u64(64 * instances, 256)
            } else {
                0
            },
        })
    }

    fn build_tlas(&mut self, build: &TlasBuild<'_>) -> Result<()> {
        let sizes = self.tlas_scratch_sizes(build.tlas)?;
        let entry = self.tlas_ref(build.tlas)?;

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
                    .all(|(record, instance)| {
                        record.name == instance.name && record.blas == instance.blas
                    });
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
            sizes.update
        } else {
            sizes.build
        };
        self.check_scratch(build.scratch, scratch_size)?;
        self.check_buffer(
            build.instance_buffer,
            TLAS_INSTANCE_DATA_SIZE * build.instances.len() as u64,
        )?;

        let mut names = HashSet::with_capacity(build.instances.len());
        let mut records = Vec::with_capacity(build.instances.len());
        for (index, instance) in build.instances.iter().enumerate() {
            if !names.insert(instance.name.as_str()) {
                return Err(RayTracingError::DuplicateInstanceName(
                    instance.name.clone(),
                ));
            }
            if !self.is_blas_built(instance.blas) {
                return Err(RayTracingError::BlasNotBuilt(instance.name.clone()));
            }
            records.push(InstanceRecord {
                name: instance.name.clone(),
                blas: instance.blas,
                transform: instance.transform,
                mask: instance.mask,
                custom_index: instance.shading_id,
                hit_group_offset: index as u32 * build.hit_group_stride,
            });
        }

        let entry = &mut self.tlases[build.tlas.0];
        entry.built = true;
        entry.instances = records;
        self.commands.push(DeviceCommand::BuildTlas {
            tlas: build.tlas,
            update: build.update,
            instance_count: build.instances.len(),
        });
        Ok(())
    }

    fn create_sbt(&mut self, _name: &str) -> Result<SbtHandle> {
        let sbt = SbtHandle(self.sbts.len());
        self.sbts.push(HeadlessSbt::default());
        Ok(sbt)
    }

    fn bind_ray_gen_shader(&mut self, sbt: SbtHandle, group: &str) -> Result<()> {
        self.check_shader_group(group)?;
        let table = self.sbt_mut(sbt)?;
        table.ray_gen = Some(group.to_string());
        table.uploaded = false;
        self.commands.push(DeviceCommand::BindRayGenShader {
            sbt,
            group: group.to_string(),
        });
        Ok(())
    }

    fn bind_miss_shader(&mut self, sbt: SbtHandle, group: &str, ray_type: RayType) -> Result<()> {
        self.check_shader_group(group)?;
        let table = self.sbt_mut(sbt)?;
        table.miss[ray_type.index() as usize] = Some(group.to_string());
        table.uploaded = false;
        self.commands.push(DeviceCommand::BindMissShader {
            sbt,
            group: group.to_string(),
            ray_type,
        });
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
        if let Some(group) = group {
            self.check_shader_group(group)?;
        }
        let offset = self
            .tlas_ref(tlas)?
            .instances
            .iter()
            .find(|record| record.name == instance)
            .map(|record| record.hit_group_offset)
            .ok_or_else(|| RayTracingError::BindingInconsistency {
                instance: instance.to_string(),
                ray_type,
            })?;
        self.attach_tlas(sbt, tlas)?;

        let table = self.sbt_mut(sbt)?;
        table.hit_records[(offset + ray_type.index()) as usize] = group.map(str::to_string);
        self.commands.push(DeviceCommand::BindHitGroupForInstance {
            sbt,
            instance: instance.to_string(),
            ray_type,
            group: group.map(str::to_string),
        });
        Ok(())
    }

    fn bind_hit_group_for_tlas(
        &mut self,
        sbt: SbtHandle,
        tlas: TlasHandle,
        ray_type: RayType,
        group: Option<&str>,
    ) -> Result<()> {
        if let Some(group) = group {
            self.check_shader_group(group)?;
        }
        let offsets: Vec<u32> = self
            .tlas_ref(tlas)?
            .instances
            .iter()
            .map(|record| record.hit_group_offset)
            .collect();
        self.attach_tlas(sbt, tlas)?;

        let table = self.sbt_mut(sbt)?;
        for offset in offsets {
            table.hit_records[(offset + ray_type.index()) as usize] = group.map(str::to_string);
        }
        self.commands.push(DeviceCommand::BindHitGroupForTlas {
            sbt,
            ray_type,
            group: group.map(str::to_string),
        });
        Ok(())
    }

    fn update_sbt(&mut self, sbt: SbtHandle) -> Result<()> {
        let table = self.sbt_mut(sbt)?;
        if let Some(group) = table.ray_gen.as_ref() {
            log::trace!("SBT {} uploaded with ray generation shader {}", sbt.0, group);
        }
        table.uploaded = true;
        self.commands.push(DeviceCommand::UpdateSbt { sbt });
        Ok(())
    }

    fn update_constants(&mut self, constants: &FrameConstants) -> Result<()> {
        self.constants = Some(*constants);
        self.commands.push(DeviceCommand::UpdateConstants);
        Ok(())
    }

    fn trace_rays(&mut self, trace: &TraceRays) -> Result<()> {
        let table = self.sbt_mut(trace.sbt)?;
        if !table.uploaded {
            return Err(RayTracingError::SbtNotUploaded(trace.sbt.0));
        }
        let unbound = match (&table.ray_gen, &table.miss) {
            (None, _) => Some("ray generation shader"),
            (_, [None, _] | [_, None]) => Some("miss shader"),
            _ => None,
        };
        if let Some(kind) = unbound {
            return Err(RayTracingError::UnboundShader(kind));
        }
        self.commands.push(DeviceCommand::TraceRays {
            sbt: trace.sbt,
            width: trace.width,
            height: trace.height,
        });
        Ok(())
    }
}

/// Number of commands of each kind, handy for frame level assertions.
pub fn command_histogram(commands: &[DeviceCommand]) -> HashMap<&'static str, usize> {
    let mut histogram = HashMap::new();
    for command in commands {
        let key = match command {
            DeviceCommand::CreateBuffer { .. } => "create_buffer",
            DeviceCommand::BuildBlas { .. } => "build_blas",
            DeviceCommand::BuildTlas { update: false, .. } => "build_tlas",
            DeviceCommand::BuildTlas { update: true, .. } => "update_tlas",
            DeviceCommand::BindRayGenShader { .. } => "bind_ray_gen",
            DeviceCommand::BindMissShader { .. } => "bind_miss",
            DeviceCommand::BindHitGroupForInstance { .. } => "bind_hit_group_for_instance",
            DeviceCommand::BindHitGroupForTlas { .. } => "bind_hit_group_for_tlas",
            DeviceCommand::UpdateSbt { .. } => "update_sbt",
            DeviceCommand::UpdateConstants => "update_constants",
            DeviceCommand::TraceRays { .. } => "trace_rays",
        };
        *histogram.entry(key).or_insert(0) += 1;
    }
    histogram
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{
        BlasBoxDesc, BlasGeometryDesc, BlasTriangleDesc, BuildFlags, IndexType, VertexFormat,
    };
    use crate::scene::{Instance, InstanceKind};

    fn built_box_blas(device: &mut HeadlessDevice) -> BlasHandle {
        let blas = device
            .create_blas(&BlasDesc {
                name: "Box".to_string(),
                geometry: BlasGeometryDesc::Boxes(BlasBoxDesc {
                    geometry_name: "Box".to_string(),
                    max_box_count: 1,
                }),
                flags: BuildFlags::FAST_TRACE,
            })
            .unwrap();
        let boxes = device
            .create_buffer(
                &BufferDesc {
                    name: "boxes",
                    size: 32,
                    usage: BufferUsage::BuildInput,
                },
                Some(&[0u8; 32]),
            )
            .unwrap();
        let scratch_size = device.blas_scratch_sizes(blas).unwrap().build;
        let scratch = device
            .create_buffer(
                &BufferDesc {
                    name: "scratch",
                    size: scratch_size,
                    usage: BufferUsage::Scratch,
                },
                None,
            )
            .unwrap();
        device
            .build_blas(&BlasBuild {
                blas,
                data: &BlasBuildData::Boxes {
                    geometry_name: "Box".to_string(),
                    box_buffer: boxes,
                    box_count: 1,
                    box_stride: 32,
                },
                scratch,
            })
            .unwrap();
        blas
    }

    fn buffer(device: &mut HeadlessDevice, size: u64, usage: BufferUsage) -> BufferHandle {
        device
            .create_buffer(
                &BufferDesc {
                    name: "buffer",
                    size,
                    usage,
                },
                None,
            )
            .unwrap()
    }

    fn instance(name: &str, blas: BlasHandle) -> Instance {
        Instance {
            name: name.to_string(),
            kind: InstanceKind::Sphere,
            blas,
            transform: InstanceTransform::identity(),
            mask: GeometryMask::OPAQUE,
            shading_id: 0,
        }
    }

    #[test]
    fn small_scratch_is_rejected() {
        let mut device = HeadlessDevice::new();
        let blas = device
            .create_blas(&BlasDesc {
                name: "Box".to_string(),
                geometry: BlasGeometryDesc::Boxes(BlasBoxDesc {
                    geometry_name: "Box".to_string(),
                    max_box_count: 1,
                }),
                flags: BuildFlags::FAST_TRACE,
            })
            .unwrap();
        let boxes = buffer(&mut device, 32, BufferUsage::BuildInput);
        let scratch = buffer(&mut device, 1, BufferUsage::Scratch);

        let error = device
            .build_blas(&BlasBuild {
                blas,
                data: &BlasBuildData::Boxes {
                    geometry_name: "Box".to_string(),
                    box_buffer: boxes,
                    box_count: 1,
                    box_stride: 32,
                },
                scratch,
            })
            .unwrap_err();
        assert!(matches!(error, RayTracingError::ScratchTooSmall { .. }));
        assert!(!device.is_blas_built(blas));
    }

    #[test]
    fn tlas_rejects_unbuilt_blas_and_early_updates() {
        let mut device = HeadlessDevice::new();
        let built = built_box_blas(&mut device);
        let unbuilt = device
            .create_blas(&BlasDesc {
                name: "Other".to_string(),
                geometry: BlasGeometryDesc::Boxes(BlasBoxDesc {
                    geometry_name: "Other".to_string(),
                    max_box_count: 1,
                }),
                flags: BuildFlags::FAST_TRACE,
            })
            .unwrap();
        let tlas = device
            .create_tlas(&TlasDesc {
                name: "TLAS".to_string(),
                max_instance_count: 2,
                flags: BuildFlags::FAST_TRACE_UPDATABLE,
            })
            .unwrap();
        let scratch_size = device.tlas_scratch_sizes(tlas).unwrap().max();
        let scratch = buffer(&mut device, scratch_size, BufferUsage::Scratch);
        let instance_buffer = buffer(&mut device, 128, BufferUsage::TlasInstances);

        let instances = [instance("a", built)];
        let update = TlasBuild {
            tlas,
            instances: &instances,
            update: true,
            scratch,
            instance_buffer,
            hit_group_stride: 2,
        };
        assert!(matches!(
            device.build_tlas(&update),
            Err(RayTracingError::UpdateBeforeBuild)
        ));

        let bad = [instance("a", built), instance("b", unbuilt)];
        assert!(matches!(
            device.build_tlas(&TlasBuild {
                instances: &bad,
                update: false,
                ..update.clone()
            }),
            Err(RayTracingError::BlasNotBuilt(name)) if name == "b"
        ));

        device
            .build_tlas(&TlasBuild {
                update: false,
                ..update.clone()
            })
            .unwrap();
        device.build_tlas(&update).unwrap();
        assert_eq!(device.tlas_instances(tlas).unwrap().len(), 1);
    }

    #[test]
    fn records_are_strided_per_instance() {
        let mut device = HeadlessDevice::new();
        let blas = built_box_blas(&mut device);
        let tlas = device
            .create_tlas(&TlasDesc {
                name: "TLAS".to_string(),
                max_instance_count: 2,
                flags: BuildFlags::FAST_TRACE,
            })
            .unwrap();
        let scratch_size = device.tlas_scratch_sizes(tlas).unwrap().max();
        let scratch = buffer(&mut device, scratch_size, BufferUsage::Scratch);
        let instance_buffer = buffer(&mut device, 128, BufferUsage::TlasInstances);
        let instances = [instance("a", blas), instance("b", blas)];
        device
            .build_tlas(&TlasBuild {
                tlas,
                instances: &instances,
                update: false,
                scratch,
                instance_buffer,
                hit_group_stride: 2,
            })
            .unwrap();

        let sbt = device.create_sbt("SBT").unwrap();
        device
            .bind_hit_group_for_tlas(sbt, tlas, RayType::Primary, Some("GroundHit"))
            .unwrap();
        device
            .bind_hit_group_for_instance(sbt, tlas, "b", RayType::Shadow, Some("SphereShadowHit"))
            .unwrap();

        assert_eq!(
            device.resolve_hit_group(sbt, "a", RayType::Primary),
            Some(Some("GroundHit".to_string()))
        );
        assert_eq!(device.resolve_hit_group(sbt, "a", RayType::Shadow), Some(None));
        assert_eq!(
            device.resolve_hit_group(sbt, "b", RayType::Shadow),
            Some(Some("SphereShadowHit".to_string()))
        );
        assert_eq!(device.resolve_hit_group(sbt, "c", RayType::Shadow), None);

        assert!(matches!(
            device.bind_hit_group_for_instance(sbt, tlas, "c", RayType::Primary, None),
            Err(RayTracingError::BindingInconsistency { .. })
        ));
        assert!(matches!(
            device.bind_ray_gen_shader(sbt, "NotAShader"),
            Err(RayTracingError::UnknownShaderGroup(_))
        ));
    }

    #[test]
    fn tracing_needs_an_uploaded_table() {
        let mut device = HeadlessDevice::new();
        let sbt = device.create_sbt("SBT").unwrap();
        let trace = TraceRays {
            sbt,
            width: 4,
            height: 4,
        };
        assert!(matches!(
            device.trace_rays(&trace),
            Err(RayTracingError::SbtNotUploaded(index)) if index == sbt.0
        ));

        device.bind_ray_gen_shader(sbt, "Main").unwrap();
        device.update_sbt(sbt).unwrap();
        assert!(matches!(
            device.trace_rays(&trace),
            Err(RayTracingError::UnboundShader("miss shader"))
        ));

        device
            .bind_miss_shader(sbt, "PrimaryMiss", RayType::Primary)
            .unwrap();
        device
            .bind_miss_shader(sbt, "ShadowMiss", RayType::Shadow)
            .unwrap();
        assert!(matches!(
            device.trace_rays(&trace),
            Err(RayTracingError::SbtNotUploaded(_))
        ));
        device.update_sbt(sbt).unwrap();
        device.trace_rays(&trace).unwrap();

        let histogram = command_histogram(device.commands());
        assert_eq!(histogram["bind_miss"], 2);
        assert_eq!(histogram["trace_rays"], 1);
    }

    fn triangle_blas(device: &mut HeadlessDevice, max_vertex_count: u32) -> BlasHandle {
        device
            .create_blas(&BlasDesc {
                name: "Triangle".to_string(),
                geometry: BlasGeometryDesc::Triangles(BlasTriangleDesc {
                    geometry_name: "Triangle".to_string(),
                    max_vertex_count,
                    vertex_format: VertexFormat::Float32x3,
                    max_primitive_count: 1,
                    index_type: IndexType::Uint32,
                }),
                flags: BuildFlags::FAST_TRACE,
            })
            .unwrap()
    }

    fn triangle_data(
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
        vertex_count: u32,
    ) -> BlasBuildData {
        BlasBuildData::Triangles {
            geometry_name: "Triangle".to_string(),
            vertex_buffer,
            vertex_stride: 12,
            vertex_count,
            vertex_format: VertexFormat::Float32x3,
            index_buffer,
            primitive_count: 1,
            index_type: IndexType::Uint32,
            opaque: true,
        }
    }

    fn scratch_for(device: &mut HeadlessDevice, blas: BlasHandle) -> BufferHandle {
        let size = device.blas_scratch_sizes(blas).unwrap().build;
        buffer(device, size, BufferUsage::Scratch)
    }

    fn indices(device: &mut HeadlessDevice, indices: &[u32]) -> BufferHandle {
        let bytes: Vec<u8> = indices.iter().flat_map(|i| i.to_le_bytes()).collect();
        device
            .create_buffer(
                &BufferDesc {
                    name: "indices",
                    size: bytes.len() as u64,
                    usage: BufferUsage::BuildInput,
                },
                Some(&bytes),
            )
            .unwrap()
    }

    #[test]
    fn small_build_inputs_are_not_scratch_errors() {
        let mut device = HeadlessDevice::new();
        let blas = triangle_blas(&mut device, 3);
        let scratch = scratch_for(&mut device, blas);
        let vertices = buffer(&mut device, 24, BufferUsage::BuildInput);
        let indices = indices(&mut device, &[0, 1, 2]);

        let error = device
            .build_blas(&BlasBuild {
                blas,
                data: &triangle_data(vertices, indices, 3),
                scratch,
            })
            .unwrap_err();
        assert!(matches!(
            error,
            RayTracingError::BufferTooSmall {
                required: 36,
                actual: 24,
                ..
            }
        ));

        let error = device
            .create_buffer(
                &BufferDesc {
                    name: "overfull",
                    size: 4,
                    usage: BufferUsage::BuildInput,
                },
                Some(&[0u8; 8]),
            )
            .unwrap_err();
        assert!(matches!(
            error,
            RayTracingError::BufferTooSmall { buffer, .. } if buffer == "overfull"
        ));
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let mut device = HeadlessDevice::new();
        let blas = triangle_blas(&mut device, 3);
        let scratch = scratch_for(&mut device, blas);
        let vertices = buffer(&mut device, 36, BufferUsage::BuildInput);
        let indices = indices(&mut device, &[0, 1, 99]);

        let error = device
            .build_blas(&BlasBuild {
                blas,
                data: &triangle_data(vertices, indices, 3),
                scratch,
            })
            .unwrap_err();
        assert!(matches!(
            error,
            RayTracingError::IndexOutOfRange {
                index: 99,
                vertex_count: 3,
                ..
            }
        ));
        assert!(!device.is_blas_built(blas));
    }

    #[test]
    fn build_data_must_fit_the_declared_blas() {
        let mut device = HeadlessDevice::new();
        let blas = triangle_blas(&mut device, 3);
        let scratch = scratch_for(&mut device, blas);
        let vertices = buffer(&mut device, 48, BufferUsage::BuildInput);
        let indices = indices(&mut device, &[0, 1, 2]);

        let error = device
            .build_blas(&BlasBuild {
                blas,
                data: &triangle_data(vertices, indices, 4),
                scratch,
            })
            .unwrap_err();
        assert!(matches!(
            error,
            RayTracingError::BuildCountExceeded {
                what: "vertices",
                requested: 4,
                declared: 3,
                ..
            }
        ));

        let error = device
            .build_blas(&BlasBuild {
                blas,
                data: &BlasBuildData::Boxes {
                    geometry_name: "Triangle".to_string(),
                    box_buffer: vertices,
                    box_count: 1,
                    box_stride: 24,
                },
                scratch,
            })
            .unwrap_err();
        assert!(matches!(
            error,
            RayTracingError::GeometryKindMismatch {
                declared: "triangles",
                actual: "boxes",
                ..
            }
        ));
    }
}

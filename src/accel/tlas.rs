use std::collections::HashSet;

use crate::device::{
    BufferDesc, BufferHandle, BufferUsage, BuildFlags, RayTracingDevice, TlasBuild, TlasDesc,
    TlasHandle, HIT_GROUP_STRIDE, TLAS_INSTANCE_DATA_SIZE,
};
use crate::error::{RayTracingError, Result};
use crate::scene::{GeometryMask, Instance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlasState {
    Uninitialized,
    Built,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Build,
    Update,
}

/// Outcome of one [`SceneAccelerator::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: BuildMode,
    pub instance_count: usize,
    /// The instance set differs from the previous build, so bindings keyed by instance are stale.
    pub topology_changed: bool,
}

#[derive(Debug, Clone, Copy)]
struct TlasResources {
    tlas: TlasHandle,
    scratch: BufferHandle,
    instance_buffer: BufferHandle,
}

/// Owns the single TLAS of the scene together with its scratch and instance buffers.
///
/// The TLAS is created lazily on the first sync with room for `capacity` instances and is never
/// reallocated. The first sync always builds; later syncs refit in place as long as the ordered
/// list of instance names and BLAS references stays the same.
pub struct SceneAccelerator {
    name: String,
    capacity: usize,
    flags: BuildFlags,
    resources: Option<TlasResources>,
    state: TlasState,
    instances: Vec<Instance>,
    topology_generation: u64,
}

impl SceneAccelerator {
    pub fn new(capacity: usize) -> Self {
        Self::with_flags(capacity, BuildFlags::FAST_TRACE_UPDATABLE)
    }

    pub fn with_flags(capacity: usize, flags: BuildFlags) -> Self {
        Self {
            name: "TLAS".to_string(),
            capacity,
            flags,
            resources: None,
            state: TlasState::Uninitialized,
            instances: Vec::new(),
            topology_generation: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> TlasState {
        self.state
    }

    pub fn tlas(&self) -> Option<TlasHandle> {
        match self.state {
            TlasState::Uninitialized => None,
            TlasState::Built | TlasState::Updated => self.resources.map(|r| r.tlas),
        }
    }

    /// Incremented by every build that changes the instance set.
    pub fn topology_generation(&self) -> u64 {
        self.topology_generation
    }

    /// Instances of the last successful build or update.
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.iter().any(|instance| instance.name == name)
    }

    /// Instances a ray traced with `ray_mask` can hit.
    pub fn instances_visible_to(&self, ray_mask: GeometryMask) -> impl Iterator<Item = &Instance> {
        self.instances
            .iter()
            .filter(move |instance| instance.is_visible_to(ray_mask))
    }

    /// Brings the TLAS in line with `instances`, refitting when possible.
    pub fn sync<D: RayTracingDevice + ?Sized>(
        &mut self,
        device: &mut D,
        instances: Vec<Instance>,
    ) -> Result<SyncReport> {
        let mode = match self.state {
            TlasState::Uninitialized => BuildMode::Build,
            TlasState::Built | TlasState::Updated => {
                if self.flags.allow_update && self.same_topology(&instances) {
                    BuildMode::Update
                } else {
                    BuildMode::Build
                }
            }
        };
        self.submit(device, instances, mode)
    }

    /// Records a build or update of the TLAS with exactly the given mode.
    pub fn submit<D: RayTracingDevice + ?Sized>(
        &mut self,
        device: &mut D,
        instances: Vec<Instance>,
        mode: BuildMode,
    ) -> Result<SyncReport> {
        if instances.len() > self.capacity {
            return Err(RayTracingError::CapacityExceeded {
                requested: instances.len(),
                capacity: self.capacity,
            });
        }
        check_unique_names(&instances)?;

        if mode == BuildMode::Update {
            if self.state == TlasState::Uninitialized {
                return Err(RayTracingError::UpdateBeforeBuild);
            }
            if !self.flags.allow_update {
                return Err(RayTracingError::UpdateNotAllowed);
            }
            if !self.same_topology(&instances) {
                return Err(RayTracingError::UpdateTopologyMismatch {
                    built: self.instances.len(),
                    requested: instances.len(),
                });
            }
        }

        let resources = self.get_or_create_resources(device)?;
        let topology_changed =
            self.state != TlasState::Uninitialized && !self.same_topology(&instances);

        device.build_tlas(&TlasBuild {
            tlas: resources.tlas,
            instances: &instances,
            update: mode == BuildMode::Update,
            scratch: resources.scratch,
            instance_buffer: resources.instance_buffer,
            hit_group_stride: HIT_GROUP_STRIDE,
        })?;

        match (self.state, mode) {
            (TlasState::Uninitialized, _) => log::info!(
                "Built {} with {} of {} instances",
                self.name,
                instances.len(),
                self.capacity
            ),
            (_, BuildMode::Build) => log::debug!(
                "Rebuilt {} with {} instances (topology changed: {})",
                self.name,
                instances.len(),
                topology_changed
            ),
            (_, BuildMode::Update) => log::debug!("Updated {}", self.name),
        }

        if self.state == TlasState::Uninitialized || topology_changed {
            self.topology_generation += 1;
        }
        self.state = match mode {
            BuildMode::Build => TlasState::Built,
            BuildMode::Update => TlasState::Updated,
        };
        let instance_count = instances.len();
        self.instances = instances;

        Ok(SyncReport {
            mode,
            instance_count,
            topology_changed,
        })
    }

    fn same_topology(&self, instances: &[Instance]) -> bool {
        self.instances.len() == instances.len()
            && self
                .instances
                .iter()
                .zip(instances)
                .all(|(a, b)| a.name == b.name && a.blas == b.blas)
    }

    fn get_or_create_resources<D: RayTracingDevice + ?Sized>(
        &mut self,
        device: &mut D,
    ) -> Result<TlasResources> {
        if let Some(resources) = self.resources {
            return Ok(resources);
        }

        let max_instance_count = device.capabilities().max_instance_count;
        if self.capacity as u64 > max_instance_count {
            return Err(RayTracingError::CapacityExceeded {
                requested: self.capacity,
                capacity: max_instance_count as usize,
            });
        }

        let tlas = device.create_tlas(&TlasDesc {
            name: self.name.clone(),
            max_instance_count: self.capacity as u32,
            flags: self.flags,
        })?;
        let scratch_size = device.tlas_scratch_sizes(tlas)?.max();
        let scratch = device.create_buffer(
            &BufferDesc {
                name: "TLAS Scratch Buffer",
                size: scratch_size,
                usage: BufferUsage::Scratch,
            },
            None,
        )?;
        let instance_buffer = device.create_buffer(
            &BufferDesc {
                name: "TLAS Instance Buffer",
                size: TLAS_INSTANCE_DATA_SIZE * self.capacity as u64,
                usage: BufferUsage::TlasInstances,
            },
            None,
        )?;

        let resources = TlasResources {
            tlas,
            scratch,
            instance_buffer,
        };
        self.resources = Some(resources);
        Ok(resources)
    }
}

fn check_unique_names(instances: &[Instance]) -> Result<()> {
    let mut names = HashSet::with_capacity(instances.len());
    for instance in instances {
        if !names.insert(instance.name.as_str()) {
            return Err(RayTracingError::DuplicateInstanceName(
                instance.name.clone(),
            ));
        }
    }
    Ok(())
}

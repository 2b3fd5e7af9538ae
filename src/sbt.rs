use std::collections::HashMap;

use crate::accel::SceneAccelerator;
use crate::device::{RayTracingDevice, RayType, SbtHandle, TlasHandle};
use crate::error::{RayTracingError, Result};
use crate::pipeline::{
    CUBE_PRIMARY_HIT, GLASS_PRIMARY_HIT, GROUND_HIT, PRIMARY_MISS_SHADER, RAY_GEN_SHADER,
    SHADOW_MISS_SHADER, SPHERE_PRIMARY_HIT, SPHERE_SHADOW_HIT,
};
use crate::scene::{Instance, InstanceKind};

/// What a (ray type, instance) record of the table resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitGroupBinding {
    Custom(String),
    /// No geometry specific hit group. Hits are accepted without running a hit shader.
    Default,
}

/// Hit group shading `kind` for primary rays.
pub fn primary_hit_group(kind: InstanceKind) -> &'static str {
    match kind {
        InstanceKind::Cube => CUBE_PRIMARY_HIT,
        InstanceKind::Sphere => SPHERE_PRIMARY_HIT,
        InstanceKind::Ground => GROUND_HIT,
        InstanceKind::Glass => GLASS_PRIMARY_HIT,
    }
}

/// Hit group for shadow rays. Only procedural spheres need one, since their surface is found by
/// the intersection shader; everything else uses the table wide default.
pub fn shadow_hit_group(kind: InstanceKind) -> Option<&'static str> {
    match kind {
        InstanceKind::Sphere => Some(SPHERE_SHADOW_HIT),
        InstanceKind::Cube | InstanceKind::Ground | InstanceKind::Glass => None,
    }
}

pub fn hit_group(kind: InstanceKind, ray_type: RayType) -> Option<&'static str> {
    match ray_type {
        RayType::Primary => Some(primary_hit_group(kind)),
        RayType::Shadow => shadow_hit_group(kind),
    }
}

/// Host side view of the bound shader binding table.
#[derive(Debug, Clone)]
pub struct ShaderBindingTable {
    handle: SbtHandle,
    tlas: TlasHandle,
    ray_gen: String,
    miss: [String; 2],
    entries: HashMap<(RayType, String), HitGroupBinding>,
}

impl ShaderBindingTable {
    pub fn handle(&self) -> SbtHandle {
        self.handle
    }

    pub fn tlas(&self) -> TlasHandle {
        self.tlas
    }

    pub fn ray_gen_shader(&self) -> &str {
        &self.ray_gen
    }

    pub fn miss_shader(&self, ray_type: RayType) -> &str {
        &self.miss[ray_type.index() as usize]
    }

    pub fn resolve(&self, ray_type: RayType, instance: &str) -> Option<&HitGroupBinding> {
        self.entries.get(&(ray_type, instance.to_string()))
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }
}

/// Owns the shader binding table and keeps it consistent with the TLAS instance set.
///
/// The table is created once. Whenever the instance set changes it is re-bound in full.
#[derive(Default)]
pub struct BindingTableManager {
    table: Option<ShaderBindingTable>,
    bound_generation: Option<u64>,
}

impl BindingTableManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> Option<&ShaderBindingTable> {
        self.table.as_ref()
    }

    /// The table was never bound or the accelerator has rebuilt with a different instance set.
    pub fn needs_rebind(&self, accelerator: &SceneAccelerator) -> bool {
        match (&self.table, self.bound_generation) {
            (Some(table), Some(generation)) => {
                generation != accelerator.topology_generation()
                    || Some(table.tlas) != accelerator.tlas()
            }
            _ => true,
        }
    }

    pub fn bind<D: RayTracingDevice + ?Sized>(
        &mut self,
        device: &mut D,
        accelerator: &SceneAccelerator,
        instances: &[Instance],
    ) -> Result<&ShaderBindingTable> {
        let tlas = accelerator.tlas().ok_or(RayTracingError::TlasNotBuilt)?;
        for instance in instances {
            if !accelerator.contains(&instance.name) {
                return Err(RayTracingError::BindingInconsistency {
                    instance: instance.name.clone(),
                    ray_type: RayType::Primary,
                });
            }
        }

        let sbt = match &self.table {
            Some(table) => table.handle,
            None => device.create_sbt("SBT")?,
        };

        device.bind_ray_gen_shader(sbt, RAY_GEN_SHADER)?;
        device.bind_miss_shader(sbt, PRIMARY_MISS_SHADER, RayType::Primary)?;
        device.bind_miss_shader(sbt, SHADOW_MISS_SHADER, RayType::Shadow)?;

        let mut entries = HashMap::with_capacity(accelerator.instances().len() * 2);
        for ray_type in RayType::ALL {
            device.bind_hit_group_for_tlas(sbt, tlas, ray_type, None)?;
            for instance in accelerator.instances() {
                entries.insert((ray_type, instance.name.clone()), HitGroupBinding::Default);
            }
        }

        for instance in instances {
            for ray_type in RayType::ALL {
                if let Some(group) = hit_group(instance.kind, ray_type) {
                    device.bind_hit_group_for_instance(
                        sbt,
                        tlas,
                        &instance.name,
                        ray_type,
                        Some(group),
                    )?;
                    entries.insert(
                        (ray_type, instance.name.clone()),
                        HitGroupBinding::Custom(group.to_string()),
                    );
                }
            }
        }

        device.update_sbt(sbt)?;
        log::debug!(
            "Bound {} hit group records for {} instances",
            entries.len(),
            instances.len()
        );

        self.bound_generation = Some(accelerator.topology_generation());
        Ok(&*self.table.insert(ShaderBindingTable {
            handle: sbt,
            tlas,
            ray_gen: RAY_GEN_SHADER.to_string(),
            miss: [
                PRIMARY_MISS_SHADER.to_string(),
                SHADOW_MISS_SHADER.to_string(),
            ],
            entries,
        }))
    }
}

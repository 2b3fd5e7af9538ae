//! Limits and shader group layout of the ray tracing pipeline.
//!
//! Shader compilation happens elsewhere; this module only fixes the numbers the pipeline is
//! created with and the names its shader groups are bound by.

use bytemuck::{Pod, Zeroable};

use crate::device::DeviceCapabilities;

pub const RAY_GEN_SHADER: &str = "Main";
pub const PRIMARY_MISS_SHADER: &str = "PrimaryMiss";
pub const SHADOW_MISS_SHADER: &str = "ShadowMiss";
pub const CUBE_PRIMARY_HIT: &str = "CubePrimaryHit";
pub const GROUND_HIT: &str = "GroundHit";
pub const GLASS_PRIMARY_HIT: &str = "GlassPrimaryHit";
pub const SPHERE_PRIMARY_HIT: &str = "SpherePrimaryHit";
pub const SPHERE_SHADOW_HIT: &str = "SphereShadowHit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderGroupKind {
    /// Ray generation or miss shader.
    General,
    /// Closest hit (and optionally any hit) on triangle geometry.
    TrianglesHit,
    /// Intersection shader plus hit shaders on procedural boxes.
    ProceduralHit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderGroup {
    pub name: &'static str,
    pub kind: ShaderGroupKind,
}

/// Shader groups of the pipeline, in the order the pipeline is created with.
pub const SHADER_GROUPS: [ShaderGroup; 8] = [
    ShaderGroup {
        name: RAY_GEN_SHADER,
        kind: ShaderGroupKind::General,
    },
    ShaderGroup {
        name: PRIMARY_MISS_SHADER,
        kind: ShaderGroupKind::General,
    },
    ShaderGroup {
        name: SHADOW_MISS_SHADER,
        kind: ShaderGroupKind::General,
    },
    ShaderGroup {
        name: CUBE_PRIMARY_HIT,
        kind: ShaderGroupKind::TrianglesHit,
    },
    ShaderGroup {
        name: GROUND_HIT,
        kind: ShaderGroupKind::TrianglesHit,
    },
    ShaderGroup {
        name: GLASS_PRIMARY_HIT,
        kind: ShaderGroupKind::TrianglesHit,
    },
    ShaderGroup {
        name: SPHERE_PRIMARY_HIT,
        kind: ShaderGroupKind::ProceduralHit,
    },
    ShaderGroup {
        name: SPHERE_SHADOW_HIT,
        kind: ShaderGroupKind::ProceduralHit,
    },
];

pub fn shader_group_index(name: &str) -> Option<usize> {
    SHADER_GROUPS.iter().position(|group| group.name == name)
}

/// Payload of primary rays.
#[derive(Clone, Debug, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct PrimaryRayPayload {
    pub color: [f32; 3],
    pub depth: f32,
    pub recursion: u32,
}

/// Payload of shadow rays.
#[derive(Clone, Debug, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ShadowRayPayload {
    pub shading: f32,
    pub recursion: u32,
}

/// Barycentrics reported for triangle hits.
#[derive(Clone, Debug, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TriangleHitAttribs {
    pub barycentrics: [f32; 2],
}

/// Surface normal reported by the sphere intersection shader.
#[derive(Clone, Debug, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ProceduralHitAttribs {
    pub normal: [f32; 3],
}

pub const PAYLOAD_SIZES: [u32; 2] = [
    std::mem::size_of::<PrimaryRayPayload>() as u32,
    std::mem::size_of::<ShadowRayPayload>() as u32,
];

pub const ATTRIBUTE_SIZES: [u32; 2] = [
    std::mem::size_of::<TriangleHitAttribs>() as u32,
    std::mem::size_of::<ProceduralHitAttribs>() as u32,
];

/// Requested recursion depth when nothing is configured.
pub const DEFAULT_RECURSION_DEPTH: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLimits {
    pub max_recursion_depth: u32,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
}

pub struct PipelineLimiter;

impl PipelineLimiter {
    pub fn clamp(requested: u32, device_max: u32) -> u32 {
        requested.min(device_max)
    }

    pub fn limits(requested_recursion_depth: u32, capabilities: &DeviceCapabilities) -> PipelineLimits {
        let max_recursion_depth =
            Self::clamp(requested_recursion_depth, capabilities.max_recursion_depth);
        if max_recursion_depth < requested_recursion_depth {
            log::info!(
                "Recursion depth {} clamped to the device limit of {}",
                requested_recursion_depth,
                max_recursion_depth
            );
        }

        PipelineLimits {
            max_recursion_depth,
            max_payload_size: PAYLOAD_SIZES.into_iter().max().unwrap_or(0),
            max_attribute_size: ATTRIBUTE_SIZES.into_iter().max().unwrap_or(0),
        }
    }
}

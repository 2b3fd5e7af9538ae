use ash::vk;

use super::context::Context;
use crate::error::{RayTracingError, Result};
use crate::pipeline::{PipelineLimits, ShaderGroup, ShaderGroupKind};

/// Stage indices of one shader group. Unused stages stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStages {
    pub general: Option<u32>,
    pub closest_hit: Option<u32>,
    pub any_hit: Option<u32>,
    pub intersection: Option<u32>,
}

pub fn shader_group_create_info(
    group: &ShaderGroup,
    stages: GroupStages,
) -> vk::RayTracingShaderGroupCreateInfoKHR {
    let ty = match group.kind {
        ShaderGroupKind::General => vk::RayTracingShaderGroupTypeKHR::GENERAL,
        ShaderGroupKind::TrianglesHit => vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP,
        ShaderGroupKind::ProceduralHit => vk::RayTracingShaderGroupTypeKHR::PROCEDURAL_HIT_GROUP,
    };
    let unused = |stage: Option<u32>| stage.unwrap_or(vk::SHADER_UNUSED_KHR);

    vk::RayTracingShaderGroupCreateInfoKHR::builder()
        .ty(ty)
        .general_shader(unused(stages.general))
        .closest_hit_shader(unused(stages.closest_hit))
        .any_hit_shader(unused(stages.any_hit))
        .intersection_shader(unused(stages.intersection))
        .build()
}

/// Creates the ray tracing pipeline with the recursion depth of `limits`.
///
/// `groups` must be in the order of [`crate::pipeline::SHADER_GROUPS`].
pub fn create_ray_tracing_pipeline(
    context: &Context,
    layout: vk::PipelineLayout,
    stages: &[vk::PipelineShaderStageCreateInfo],
    groups: &[vk::RayTracingShaderGroupCreateInfoKHR],
    limits: &PipelineLimits,
) -> Result<vk::Pipeline> {
    let create_info = vk::RayTracingPipelineCreateInfoKHR::builder()
        .stages(stages)
        .groups(groups)
        .max_pipeline_ray_recursion_depth(limits.max_recursion_depth)
        .layout(layout)
        .build();

    let pipelines = unsafe {
        context
            .context_raytracing
            .ray_tracing_pipeline
            .create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
    }?;

    pipelines
        .into_iter()
        .next()
        .ok_or(RayTracingError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED))
}

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use ultraviolet::Vec3;

use crate::camera::Camera;
use crate::pipeline::PipelineLimits;

pub const MAX_SHADOW_PCF: u32 = 16;
pub const MAX_SPHERE_REFLECTION_BLUR: u32 = 16;
pub const MAX_INDEX_OF_REFRACTION: f32 = 2.0;
pub const MAX_DISPERSION: f32 = 0.5;
pub const MAX_GLASS_ABSORPTION: f32 = 2.0;
pub const MAX_DISPERSION_SAMPLES: u32 = 16;
pub const NUM_LIGHTS: usize = 2;
pub const NUM_DISC_POINTS: usize = 8;

/// Recursion depth the UI starts with, if the pipeline allows it.
pub const INITIAL_MAX_RECURSION: u32 = 6;

/// Wavelength as RGB, with the index of refraction interpolation factor in `w`.
pub const DISPERSION_SAMPLES: [[f32; 4]; MAX_DISPERSION_SAMPLES as usize] = [
    [0.140000, 0.000000, 0.266667, 0.53],
    [0.130031, 0.037556, 0.612267, 0.25],
    [0.100123, 0.213556, 0.785067, 0.16],
    [0.050277, 0.533556, 0.785067, 0.00],
    [0.000000, 0.843297, 0.619682, 0.13],
    [0.000000, 0.927410, 0.431834, 0.38],
    [0.000000, 0.972325, 0.270893, 0.27],
    [0.000000, 0.978042, 0.136858, 0.19],
    [0.324000, 0.944560, 0.029730, 0.47],
    [0.777600, 0.871879, 0.000000, 0.64],
    [0.972000, 0.762222, 0.000000, 0.77],
    [0.971835, 0.482222, 0.000000, 0.62],
    [0.886744, 0.202222, 0.000000, 0.73],
    [0.715967, 0.000000, 0.000000, 0.68],
    [0.459920, 0.000000, 0.000000, 0.91],
    [0.218000, 0.000000, 0.000000, 0.99],
];

/// Random points on a disc, two per entry, for soft shadow sampling.
pub const DISC_POINTS: [[f32; 4]; NUM_DISC_POINTS] = [
    [0.0, 0.0, 0.9, -0.9],
    [-0.8, 1.0, -1.1, -0.8],
    [1.5, 1.2, -2.1, 0.7],
    [0.1, -2.2, -0.2, 2.4],
    [2.4, -0.3, -3.0, 2.8],
    [2.0, -2.6, 0.7, 3.5],
    [-3.2, -1.6, 3.4, 2.2],
    [-1.8, -3.2, -1.1, 3.6],
];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: Vec3,
    pub color: [f32; 3],
}

/// User facing render parameters, edited by the settings window and read every frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RenderSettings {
    pub animate: bool,
    pub shadow_pcf: u32,
    pub max_recursion: u32,
    /// One entry per ring cube; hidden cubes stay in the TLAS with an empty mask.
    pub enable_cubes: Vec<bool>,

    pub sphere_reflection_color_mask: [f32; 3],
    pub sphere_reflection_blur: u32,

    pub glass_reflection_color_mask: [f32; 3],
    pub glass_absorption: f32,
    pub glass_material_color: [f32; 3],
    pub glass_index_of_refraction: f32,
    pub glass_enable_dispersion: bool,
    pub dispersion_factor: f32,
    /// Always a power of two.
    pub dispersion_sample_count: u32,

    pub ambient_color: [f32; 3],
    pub lights: [Light; NUM_LIGHTS],
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self::new(crate::scene::NUM_LOCAL_CUBES)
    }
}

impl RenderSettings {
    pub fn new(num_cubes: usize) -> Self {
        Self {
            animate: true,
            shadow_pcf: 1,
            max_recursion: INITIAL_MAX_RECURSION,
            enable_cubes: vec![true; num_cubes],
            sphere_reflection_color_mask: [0.81, 1.0, 0.45],
            sphere_reflection_blur: 1,
            glass_reflection_color_mask: [0.22, 0.83, 0.93],
            glass_absorption: 0.5,
            glass_material_color: [0.33, 0.93, 0.29],
            glass_index_of_refraction: 1.5,
            glass_enable_dispersion: false,
            dispersion_factor: 0.02,
            dispersion_sample_count: 4,
            ambient_color: [0.015; 3],
            lights: [
                Light {
                    position: Vec3::new(8.0, 8.0, 0.0),
                    color: [1.0, 0.8, 0.8],
                },
                Light {
                    position: Vec3::new(0.0, 4.0, -5.0),
                    color: [0.85, 1.0, 0.85],
                },
            ],
        }
    }

    /// Brings every value back into the range the UI allows.
    pub fn clamp_to(&mut self, limits: &PipelineLimits, num_cubes: usize) {
        self.max_recursion = self.max_recursion.min(limits.max_recursion_depth);
        self.shadow_pcf = self.shadow_pcf.min(MAX_SHADOW_PCF);
        self.sphere_reflection_blur = self
            .sphere_reflection_blur
            .clamp(1, MAX_SPHERE_REFLECTION_BLUR);
        self.glass_absorption = self.glass_absorption.clamp(0.0, MAX_GLASS_ABSORPTION);
        self.glass_index_of_refraction = self
            .glass_index_of_refraction
            .clamp(1.0, MAX_INDEX_OF_REFRACTION);
        self.dispersion_factor = self.dispersion_factor.clamp(0.0, MAX_DISPERSION);
        self.dispersion_sample_count = self
            .dispersion_sample_count
            .clamp(2, MAX_DISPERSION_SAMPLES)
            .next_power_of_two();
        self.enable_cubes.resize(num_cubes, true);
    }

    /// Index of refraction for the first and last dispersion sample.
    pub fn index_of_refraction_range(&self) -> [f32; 2] {
        let ior = self.glass_index_of_refraction;
        if self.glass_enable_dispersion {
            [ior, ior + self.dispersion_factor]
        } else {
            [ior, ior]
        }
    }
}

/// Per-frame shader constants, laid out like the uniform block of the ray tracing shaders.
#[derive(Clone, Debug, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct FrameConstants {
    pub camera_pos: [f32; 4],
    pub inv_view_proj: [[f32; 4]; 4],

    pub clip_planes: [f32; 2],
    pub shadow_pcf: u32,
    pub max_recursion: u32,

    pub sphere_reflection_color_mask: [f32; 3],
    pub sphere_reflection_blur: u32,

    pub glass_reflection_color_mask: [f32; 3],
    pub glass_absorption: f32,
    pub glass_material_color: [f32; 4],
    pub glass_index_of_refraction: [f32; 2],
    pub glass_enable_dispersion: u32,
    pub dispersion_sample_count: u32,
    pub dispersion_samples: [[f32; 4]; MAX_DISPERSION_SAMPLES as usize],

    pub ambient_color: [f32; 4],
    pub light_pos: [[f32; 4]; NUM_LIGHTS],
    pub light_color: [[f32; 4]; NUM_LIGHTS],
    pub disc_points: [[f32; 4]; NUM_DISC_POINTS],
}

impl FrameConstants {
    pub fn new(settings: &RenderSettings, camera: &Camera) -> Self {
        let inv_view_proj = camera.view_projection().inversed();
        let position = camera.position;

        Self {
            camera_pos: [position.x, position.y, position.z, 1.0],
            inv_view_proj: inv_view_proj.cols.map(|c| [c.x, c.y, c.z, c.w]),
            clip_planes: camera.clip_planes(),
            shadow_pcf: settings.shadow_pcf,
            max_recursion: settings.max_recursion,
            sphere_reflection_color_mask: settings.sphere_reflection_color_mask,
            sphere_reflection_blur: settings.sphere_reflection_blur,
            glass_reflection_color_mask: settings.glass_reflection_color_mask,
            glass_absorption: settings.glass_absorption,
            glass_material_color: extend(settings.glass_material_color),
            glass_index_of_refraction: settings.index_of_refraction_range(),
            glass_enable_dispersion: settings.glass_enable_dispersion as u32,
            dispersion_sample_count: settings.dispersion_sample_count,
            dispersion_samples: DISPERSION_SAMPLES,
            ambient_color: extend(settings.ambient_color),
            light_pos: settings.lights.map(|light| {
                let p = light.position;
                [p.x, p.y, p.z, 0.0]
            }),
            light_color: settings.lights.map(|light| extend(light.color)),
            disc_points: DISC_POINTS,
        }
    }
}

fn extend(v: [f32; 3]) -> [f32; 4] {
    [v[0], v[1], v[2], 0.0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<FrameConstants>() % 16, 0);
        assert_eq!(std::mem::size_of::<FrameConstants>(), 624);
    }

    #[test]
    fn clamping_keeps_ui_ranges() {
        let limits = PipelineLimits {
            max_recursion_depth: 3,
            max_payload_size: 20,
            max_attribute_size: 12,
        };
        let mut settings = RenderSettings {
            shadow_pcf: 40,
            sphere_reflection_blur: 0,
            glass_index_of_refraction: 3.0,
            dispersion_sample_count: 5,
            enable_cubes: vec![false; 2],
            ..RenderSettings::default()
        };
        settings.clamp_to(&limits, 4);

        assert_eq!(settings.max_recursion, 3);
        assert_eq!(settings.shadow_pcf, MAX_SHADOW_PCF);
        assert_eq!(settings.sphere_reflection_blur, 1);
        assert_eq!(settings.glass_index_of_refraction, MAX_INDEX_OF_REFRACTION);
        assert_eq!(settings.dispersion_sample_count, 8);
        assert_eq!(settings.enable_cubes, vec![false, false, true, true]);
    }

    #[test]
    fn dispersion_spreads_the_index_of_refraction() {
        let mut settings = RenderSettings::default();
        assert_eq!(settings.index_of_refraction_range(), [1.5, 1.5]);
        settings.glass_enable_dispersion = true;
        settings.dispersion_factor = 0.25;
        assert_eq!(settings.index_of_refraction_range(), [1.5, 1.75]);
    }

    #[test]
    fn frame_constants_carry_settings() {
        let settings = RenderSettings::default();
        let camera = Camera::default();
        let constants = FrameConstants::new(&settings, &camera);

        assert_eq!(constants.camera_pos, [7.0, -0.5, -16.5, 1.0]);
        assert_eq!(constants.clip_planes, [0.1, 100.0]);
        assert_eq!(constants.max_recursion, INITIAL_MAX_RECURSION);
        assert_eq!(constants.light_pos[1], [0.0, 4.0, -5.0, 0.0]);
        assert_eq!(constants.disc_points, DISC_POINTS);
        assert_eq!(bytemuck::bytes_of(&constants).len(), 624);
    }
}

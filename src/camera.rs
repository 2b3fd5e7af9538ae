use std::f32::consts::PI;

use ultraviolet::{projection, Mat4, Rotor3, Vec3};

/// The camera may not go below this height, the ground is just underneath.
pub const MIN_CAMERA_HEIGHT: f32 = -5.7;

#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub orientation: Rotor3,
    pub settings: CameraSettings,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSettings {
    pub z_near: f32,
    pub z_far: f32,
    pub fov: f32,
    pub aspect_ratio: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            z_near: 0.1,
            z_far: 100.0,
            fov: PI / 4.0,
            aspect_ratio: 1.0,
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::looking_at(
            Vec3::new(7.0, -0.5, -16.5),
            Vec3::new(0.0, -2.0, 0.0),
            CameraSettings::default(),
        )
    }
}

impl Camera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            position: Vec3::zero(),
            orientation: Rotor3::identity(),
            settings,
        }
    }

    pub fn looking_at(position: Vec3, target: Vec3, settings: CameraSettings) -> Self {
        let direction = (target - position).normalized();
        Self {
            position,
            orientation: Rotor3::from_rotation_between(Camera::forward(), direction),
            settings,
        }
    }

    /// Positions the camera
    pub fn view_matrix(&self) -> Mat4 {
        let cam_direction = self.orientation * Camera::forward();
        let target = self.position + cam_direction;

        Mat4::look_at(self.position, target, Camera::up())
    }

    pub fn projection_matrix(&self) -> Mat4 {
        projection::rh_yup::perspective_vk(
            self.settings.fov,
            self.settings.aspect_ratio,
            self.settings.z_near,
            self.settings.z_far,
        )
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn clip_planes(&self) -> [f32; 2] {
        [self.settings.z_near, self.settings.z_far]
    }

    /// Ignores degenerate sizes, like a minimized window.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.settings.aspect_ratio = width as f32 / height as f32;
    }

    pub fn keep_above_ground(&mut self) {
        self.position.y = self.position.y.max(MIN_CAMERA_HEIGHT);
    }

    /// in world-space
    pub const fn forward() -> Vec3 {
        Vec3::new(0.0, 0.0, -1.0)
    }

    /// in world-space
    pub const fn up() -> Vec3 {
        Vec3::new(0.0, 1.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_ignores_zero_sizes() {
        let mut camera = Camera::default();
        camera.resize(1280, 720);
        assert_eq!(camera.settings.aspect_ratio, 1280.0 / 720.0);
        camera.resize(0, 720);
        assert_eq!(camera.settings.aspect_ratio, 1280.0 / 720.0);
    }

    #[test]
    fn camera_stays_above_ground() {
        let mut camera = Camera::default();
        camera.position.y = -10.0;
        camera.keep_above_ground();
        assert_eq!(camera.position.y, MIN_CAMERA_HEIGHT);
    }

    #[test]
    fn looks_towards_its_target() {
        let camera = Camera::looking_at(
            Vec3::zero(),
            Vec3::new(10.0, 0.0, 0.0),
            CameraSettings::default(),
        );
        let direction = camera.orientation * Camera::forward();
        assert!((direction - Vec3::unit_x()).mag() < 1e-4);
    }
}

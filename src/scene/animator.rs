use std::f32::consts::PI;

use ultraviolet::{Mat3, Vec3};

use super::{GeometryMask, Instance, InstanceKind, InstanceTransform};
use crate::device::BlasHandle;

pub const NUM_LOCAL_CUBES: usize = 16;
pub const NUM_LOCAL_SPHERES: usize = 16;
/// Number of cube textures; ring cubes cycle through them via their shading id.
pub const NUM_TEXTURES: u32 = 4;

const CUBE_RING_RADIUS: f32 = 5.0;
const SPHERE_RING_RADIUS: f32 = 7.0;
const SPHERE_RING_HEIGHT: f32 = -2.0;

pub const GROUND_INSTANCE_NAME: &str = "Ground Instance";
pub const GLASS_INSTANCE_NAME: &str = "Glass Instance";

pub fn cube_instance_name(index: usize) -> String {
    format!("Cube Instance {}", index + 1)
}

pub fn sphere_instance_name(index: usize) -> String {
    format!("Sphere Instance {}", index + 1)
}

/// Produces the instance list of the scene for a point in animation time.
///
/// The list always has the same length, names and BLAS references, in the order cubes, spheres,
/// ground, glass. Only transforms depend on the time, and visibility toggles only clear masks,
/// so consecutive frames keep the TLAS topology.
#[derive(Debug, Clone)]
pub struct InstanceAnimator {
    cube_blas: BlasHandle,
    sphere_blas: BlasHandle,
    num_cubes: usize,
    num_spheres: usize,
}

impl InstanceAnimator {
    pub fn new(
        cube_blas: BlasHandle,
        sphere_blas: BlasHandle,
        num_cubes: usize,
        num_spheres: usize,
    ) -> Self {
        Self {
            cube_blas,
            sphere_blas,
            num_cubes,
            num_spheres,
        }
    }

    pub fn num_cubes(&self) -> usize {
        self.num_cubes
    }

    pub fn num_spheres(&self) -> usize {
        self.num_spheres
    }

    /// Ring cubes and spheres plus the ground and the glass cube.
    pub fn instance_count(&self) -> usize {
        self.num_cubes + self.num_spheres + 2
    }

    pub fn animate(&self, time: f32) -> Vec<Instance> {
        self.animate_with_visibility(time, &[])
    }

    /// Like [`InstanceAnimator::animate`], but ring cubes whose entry in `visible_cubes` is
    /// `false` get an empty mask. Missing entries count as visible.
    pub fn animate_with_visibility(&self, time: f32, visible_cubes: &[bool]) -> Vec<Instance> {
        let mut instances = Vec::with_capacity(self.instance_count());

        for i in 0..self.num_cubes {
            let angle = ring_angle(i, self.num_cubes);
            let position = Vec3::new(
                angle.cos() * CUBE_RING_RADIUS,
                (time + i as f32).sin(),
                angle.sin() * CUBE_RING_RADIUS,
            );
            let visible = visible_cubes.get(i).copied().unwrap_or(true);
            instances.push(Instance {
                name: cube_instance_name(i),
                kind: InstanceKind::Cube,
                blas: self.cube_blas,
                transform: InstanceTransform::new(
                    Mat3::from_rotation_y(angle + time),
                    position,
                ),
                mask: if visible {
                    GeometryMask::OPAQUE
                } else {
                    GeometryMask::NONE
                },
                shading_id: i as u32 % NUM_TEXTURES,
            });
        }

        for i in 0..self.num_spheres {
            let angle = ring_angle(i, self.num_spheres);
            instances.push(Instance {
                name: sphere_instance_name(i),
                kind: InstanceKind::Sphere,
                blas: self.sphere_blas,
                transform: InstanceTransform::from_translation(Vec3::new(
                    angle.cos() * SPHERE_RING_RADIUS,
                    SPHERE_RING_HEIGHT,
                    angle.sin() * SPHERE_RING_RADIUS,
                )),
                mask: GeometryMask::OPAQUE,
                shading_id: 0,
            });
        }

        instances.push(Instance {
            name: GROUND_INSTANCE_NAME.to_string(),
            kind: InstanceKind::Ground,
            blas: self.cube_blas,
            transform: InstanceTransform::new(
                scale(Vec3::new(100.0, 0.1, 100.0)),
                Vec3::new(0.0, -6.0, 0.0),
            ),
            mask: GeometryMask::OPAQUE,
            shading_id: 0,
        });

        instances.push(Instance {
            name: GLASS_INSTANCE_NAME.to_string(),
            kind: InstanceKind::Glass,
            blas: self.cube_blas,
            transform: InstanceTransform::new(
                scale(Vec3::broadcast(1.5)) * Mat3::from_rotation_y(time * PI * 0.25),
                Vec3::new(3.0, -4.0, -5.0),
            ),
            mask: GeometryMask::TRANSPARENT,
            shading_id: 0,
        });

        instances
    }
}

fn scale(factors: Vec3) -> Mat3 {
    Mat3::new(
        Vec3::unit_x() * factors.x,
        Vec3::unit_y() * factors.y,
        Vec3::unit_z() * factors.z,
    )
}

fn ring_angle(index: usize, count: usize) -> f32 {
    2.0 * PI * index as f32 / count as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn animator() -> InstanceAnimator {
        InstanceAnimator::new(BlasHandle(0), BlasHandle(1), NUM_LOCAL_CUBES, NUM_LOCAL_SPHERES)
    }

    #[test]
    fn produces_the_full_ring_scene() {
        let instances = animator().animate(0.0);
        assert_eq!(instances.len(), 34);
        assert_eq!(instances[0].name, "Cube Instance 1");
        assert_eq!(instances[15].name, "Cube Instance 16");
        assert_eq!(instances[16].name, "Sphere Instance 1");
        assert_eq!(instances[31].name, "Sphere Instance 16");
        assert_eq!(instances[32].name, GROUND_INSTANCE_NAME);
        assert_eq!(instances[33].name, GLASS_INSTANCE_NAME);
        assert_eq!(instances[33].mask, GeometryMask::TRANSPARENT);
        assert!(instances[..33].iter().all(|i| i.mask == GeometryMask::OPAQUE));
    }

    #[test]
    fn same_time_gives_identical_transforms() {
        let animator = animator();
        let a = animator.animate(1.25);
        let b = animator.animate(1.25);
        for (a, b) in a.iter().zip(&b) {
            assert_eq!(a.transform.to_bytes(), b.transform.to_bytes());
        }
    }

    #[test]
    fn topology_does_not_depend_on_time() {
        let animator = animator();
        let a = animator.animate(0.0);
        let b = animator.animate(42.0);
        let key = |i: &Instance| (i.name.clone(), i.blas, i.kind);
        assert_eq!(
            a.iter().map(key).collect::<Vec<_>>(),
            b.iter().map(key).collect::<Vec<_>>()
        );
        assert_ne!(a[0].transform, b[0].transform);
    }

    #[test]
    fn ring_cubes_bob_and_cycle_textures() {
        let instances = animator().animate(0.5);
        for (i, cube) in instances[..NUM_LOCAL_CUBES].iter().enumerate() {
            let p = cube.transform.translation();
            assert!(((p.x * p.x + p.z * p.z).sqrt() - 5.0).abs() < 1e-4);
            assert!((p.y - (0.5 + i as f32).sin()).abs() < 1e-6);
            assert_eq!(cube.shading_id, i as u32 % NUM_TEXTURES);
        }
        for sphere in &instances[NUM_LOCAL_CUBES..NUM_LOCAL_CUBES + NUM_LOCAL_SPHERES] {
            let p = sphere.transform.translation();
            assert!(((p.x * p.x + p.z * p.z).sqrt() - 7.0).abs() < 1e-4);
            assert_eq!(p.y, -2.0);
        }
    }

    #[test]
    fn ground_is_a_flat_slab() {
        let ground = &animator().animate(3.0)[32];
        assert_eq!(
            ground.transform.matrix,
            [100.0, 0.0, 0.0, 0.0, 0.0, 0.1, 0.0, -6.0, 0.0, 0.0, 100.0, 0.0]
        );
    }

    #[test]
    fn hidden_cubes_keep_their_slot() {
        let mut visible = vec![true; NUM_LOCAL_CUBES];
        visible[3] = false;
        let instances = animator().animate_with_visibility(0.0, &visible);
        assert_eq!(instances.len(), 34);
        assert_eq!(instances[3].name, "Cube Instance 4");
        assert_eq!(instances[3].mask, GeometryMask::NONE);
        assert_eq!(instances[4].mask, GeometryMask::OPAQUE);
    }
}

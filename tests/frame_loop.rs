use ring_tracer::accel::BuildMode;
use ring_tracer::camera::Camera;
use ring_tracer::config::Config;
use ring_tracer::device::{RayType, TlasBuild, HIT_GROUP_STRIDE};
use ring_tracer::headless::{command_histogram, DeviceCommand, HeadlessDevice};
use ring_tracer::sbt::HitGroupBinding;
use ring_tracer::scene::{
    cube_instance_name, sphere_instance_name, GeometryMask, InstanceKind, GLASS_INSTANCE_NAME,
    GROUND_INSTANCE_NAME,
};
use ring_tracer::{RayTracingError, RayTracingRenderer, SceneAccelerator};

fn renderer(device: &mut HeadlessDevice) -> RayTracingRenderer {
    RayTracingRenderer::initialize(device, &Config::default()).unwrap()
}

#[test]
fn default_scene_has_34_named_instances() {
    let mut device = HeadlessDevice::new();
    let renderer = renderer(&mut device);
    let accelerator = renderer.accelerator().unwrap();

    assert_eq!(accelerator.instances().len(), 34);
    for i in 0..16 {
        assert!(accelerator.contains(&cube_instance_name(i)));
        assert!(accelerator.contains(&sphere_instance_name(i)));
    }
    assert!(accelerator.contains(GROUND_INSTANCE_NAME));
    assert!(accelerator.contains(GLASS_INSTANCE_NAME));
}

#[test]
fn first_frame_builds_and_later_frames_update() {
    let mut device = HeadlessDevice::new();
    let mut renderer = renderer(&mut device);
    let camera = Camera::default();

    let builds: Vec<bool> = device
        .commands()
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::BuildTlas { update, .. } => Some(*update),
            _ => None,
        })
        .collect();
    assert_eq!(builds, vec![false]);

    for frame in 1..=10 {
        let report = renderer
            .sync_and_render(&mut device, frame as f32 * 0.1, &camera)
            .unwrap()
            .unwrap();
        assert_eq!(report.sync.mode, BuildMode::Update);
        assert_eq!(report.sync.instance_count, 34);
        assert!(!report.sync.topology_changed);
    }

    let histogram = command_histogram(device.commands());
    assert_eq!(histogram["build_tlas"], 1);
    assert_eq!(histogram["update_tlas"], 10);
    assert_eq!(histogram["build_blas"], 2);
    assert_eq!(histogram["update_sbt"], 1);
}

#[test]
fn too_small_capacity_fails_initialization() {
    let mut device = HeadlessDevice::new();
    let mut config = Config::default();
    config.scene.tlas_capacity = 33;

    let error = RayTracingRenderer::initialize(&mut device, &config)
        .err()
        .unwrap();
    assert!(matches!(
        error,
        RayTracingError::CapacityExceeded {
            requested: 34,
            capacity: 33
        }
    ));
}

fn device_mask(
    device: &HeadlessDevice,
    renderer: &RayTracingRenderer,
    name: &str,
) -> GeometryMask {
    let tlas = renderer.accelerator().unwrap().tlas().unwrap();
    device
        .tlas_instances(tlas)
        .unwrap()
        .iter()
        .find(|record| record.name == name)
        .unwrap()
        .mask
}

#[test]
fn ray_masks_separate_ground_and_glass() {
    let mut device = HeadlessDevice::new();
    let mut renderer = renderer(&mut device);
    let camera = Camera::default();

    assert_eq!(
        device_mask(&device, &renderer, GROUND_INSTANCE_NAME),
        GeometryMask::OPAQUE
    );
    assert_eq!(
        device_mask(&device, &renderer, GLASS_INSTANCE_NAME),
        GeometryMask::TRANSPARENT
    );

    for frame in 0..20 {
        renderer
            .sync_and_render(&mut device, frame as f32 * 0.37, &camera)
            .unwrap();
        let accelerator = renderer.accelerator().unwrap();

        assert!(accelerator
            .instances_visible_to(GeometryMask::TRANSPARENT)
            .all(|instance| instance.name != GROUND_INSTANCE_NAME));
        assert!(accelerator
            .instances_visible_to(GeometryMask::OPAQUE)
            .all(|instance| instance.name != GLASS_INSTANCE_NAME));
        assert!(accelerator
            .instances_visible_to(GeometryMask::TRANSPARENT)
            .any(|instance| instance.name == GLASS_INSTANCE_NAME));

        let records = device.tlas_instances(accelerator.tlas().unwrap()).unwrap();
        assert_eq!(records.len(), accelerator.instances().len());
        for (record, instance) in records.iter().zip(accelerator.instances()) {
            assert_eq!(record.name, instance.name);
            assert_eq!(record.mask, instance.mask);
        }
        assert_eq!(
            device_mask(&device, &renderer, GROUND_INSTANCE_NAME),
            GeometryMask::OPAQUE
        );
        assert_eq!(
            device_mask(&device, &renderer, GLASS_INSTANCE_NAME),
            GeometryMask::TRANSPARENT
        );
    }
}

#[test]
fn every_instance_and_ray_type_resolves() {
    let mut device = HeadlessDevice::new();
    let renderer = renderer(&mut device);
    let table = renderer.binding_table().unwrap();
    let accelerator = renderer.accelerator().unwrap();

    assert_eq!(
        table.entry_count(),
        accelerator.instances().len() * HIT_GROUP_STRIDE as usize
    );
    for instance in accelerator.instances() {
        for ray_type in RayType::ALL {
            let binding = table.resolve(ray_type, &instance.name).unwrap();
            let on_device = device
                .resolve_hit_group(table.handle(), &instance.name, ray_type)
                .unwrap();

            match binding {
                HitGroupBinding::Custom(group) => {
                    assert_eq!(on_device.as_deref(), Some(group.as_str()))
                }
                HitGroupBinding::Default => assert_eq!(on_device, None),
            }
            if ray_type == RayType::Shadow && instance.kind != InstanceKind::Sphere {
                assert_eq!(binding, &HitGroupBinding::Default);
            }
        }
    }
}

#[test]
fn hiding_a_cube_keeps_the_instance_set() {
    let mut device = HeadlessDevice::new();
    let mut renderer = renderer(&mut device);
    renderer.settings_mut().enable_cubes[3] = false;

    let report = renderer
        .sync_and_render(&mut device, 0.5, &Camera::default())
        .unwrap()
        .unwrap();
    assert_eq!(report.sync.mode, BuildMode::Update);
    assert!(!report.rebound);

    let hidden = renderer
        .accelerator()
        .unwrap()
        .instances()
        .iter()
        .find(|instance| instance.name == cube_instance_name(3))
        .unwrap();
    assert_eq!(hidden.mask, GeometryMask::NONE);
    assert_eq!(
        device_mask(&device, &renderer, &cube_instance_name(3)),
        GeometryMask::NONE
    );
    assert_eq!(
        device_mask(&device, &renderer, &cube_instance_name(2)),
        GeometryMask::OPAQUE
    );

    renderer.settings_mut().enable_cubes[3] = true;
    renderer
        .sync_and_render(&mut device, 0.6, &Camera::default())
        .unwrap()
        .unwrap();
    assert_eq!(
        device_mask(&device, &renderer, &cube_instance_name(3)),
        GeometryMask::OPAQUE
    );
}

#[test]
fn update_before_build_is_rejected() {
    let mut device = HeadlessDevice::new();
    let mut accelerator = SceneAccelerator::new(34);

    let error = accelerator
        .submit(&mut device, Vec::new(), BuildMode::Update)
        .unwrap_err();
    assert!(matches!(error, RayTracingError::UpdateBeforeBuild));
    assert!(accelerator.tlas().is_none());
}

#[test]
fn device_rejects_updates_of_unbuilt_structures() {
    use ring_tracer::device::{BufferDesc, BufferUsage, RayTracingDevice, TlasDesc};
    use ring_tracer::device::BuildFlags;

    let mut device = HeadlessDevice::new();
    let tlas = device
        .create_tlas(&TlasDesc {
            name: "TLAS".to_string(),
            max_instance_count: 4,
            flags: BuildFlags::FAST_TRACE_UPDATABLE,
        })
        .unwrap();
    let sizes = device.tlas_scratch_sizes(tlas).unwrap();
    let scratch = device
        .create_buffer(
            &BufferDesc {
                name: "Scratch",
                size: sizes.max(),
                usage: BufferUsage::Scratch,
            },
            None,
        )
        .unwrap();
    let instance_buffer = device
        .create_buffer(
            &BufferDesc {
                name: "Instances",
                size: 4 * 64,
                usage: BufferUsage::TlasInstances,
            },
            None,
        )
        .unwrap();

    let error = device
        .build_tlas(&TlasBuild {
            tlas,
            instances: &[],
            update: true,
            scratch,
            instance_buffer,
            hit_group_stride: HIT_GROUP_STRIDE,
        })
        .unwrap_err();
    assert!(matches!(error, RayTracingError::UpdateBeforeBuild));
}

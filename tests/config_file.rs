use ring_tracer::camera::Camera;
use ring_tracer::config::ConfigFileLoader;
use ring_tracer::headless::HeadlessDevice;
use ring_tracer::RayTracingRenderer;

#[test]
fn smaller_ring_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{
            "scene": { "num_cubes": 4, "num_spheres": 6, "tlas_capacity": 12, "resolution": [320, 200] },
            "settings": { "shadow_pcf": 3 }
        }"#,
    )
    .unwrap();

    let mut loader = ConfigFileLoader::new(&path);
    let config = loader.load_config().unwrap().clone();
    assert_eq!(config.settings.shadow_pcf, 3);

    let mut device = HeadlessDevice::new();
    let mut renderer = RayTracingRenderer::initialize(&mut device, &config).unwrap();
    assert_eq!(renderer.accelerator().unwrap().instances().len(), 12);
    assert_eq!(renderer.settings().enable_cubes.len(), 4);

    let report = renderer
        .sync_and_render(&mut device, 1.0, &Camera::default())
        .unwrap()
        .unwrap();
    assert_eq!((report.width, report.height), (320, 200));
    assert_eq!(device.constants().unwrap().shadow_pcf, 3);
}

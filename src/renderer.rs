use crate::accel::{CompiledGeometry, GeometryCompiler, SceneAccelerator, SyncReport};
use crate::camera::Camera;
use crate::config::Config;
use crate::device::{RayTracingDevice, TraceRays};
use crate::error::{RayTracingError, Result};
use crate::pipeline::{PipelineLimiter, PipelineLimits};
use crate::sbt::{BindingTableManager, ShaderBindingTable};
use crate::scene::{BoxAttribs, Geometry, InstanceAnimator, TriangleMesh};
use crate::settings::{FrameConstants, RenderSettings};
use crate::time::AnimationClock;

/// Edge length of the ring cubes.
pub const CUBE_SIZE: f32 = 2.0;
/// Half extent of the box the sphere intersection shader runs in.
pub const SPHERE_BOX_HALF_EXTENT: f32 = 2.5;

/// What one call of [`RayTracingRenderer::sync_and_render`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub sync: SyncReport,
    /// The shader binding table was re-bound this frame.
    pub rebound: bool,
    pub width: u32,
    pub height: u32,
}

struct SceneState {
    cube: CompiledGeometry,
    sphere: CompiledGeometry,
    animator: InstanceAnimator,
    accelerator: SceneAccelerator,
    bindings: BindingTableManager,
    limits: PipelineLimits,
}

/// Drives the per-frame flow: animate instances, sync the TLAS, keep the binding table in line
/// and dispatch the rays.
///
/// Devices without standalone ray tracing shaders put the renderer into an unsupported state in
/// which frames are skipped.
pub struct RayTracingRenderer {
    scene: Option<SceneState>,
    settings: RenderSettings,
    clock: AnimationClock,
    extent: [u32; 2],
}

impl RayTracingRenderer {
    pub fn initialize<D: RayTracingDevice + ?Sized>(device: &mut D, config: &Config) -> Result<Self> {
        Self::initialize_with_cube(device, config, TriangleMesh::cube("Cube", CUBE_SIZE))
    }

    /// Like [`RayTracingRenderer::initialize`], with `cube_mesh` standing in for the ring cubes,
    /// the ground and the glass cube.
    pub fn initialize_with_cube<D: RayTracingDevice + ?Sized>(
        device: &mut D,
        config: &Config,
        cube_mesh: TriangleMesh,
    ) -> Result<Self> {
        let mut renderer = Self {
            scene: None,
            settings: config.settings.clone(),
            clock: AnimationClock::new(config.scene.max_animation_time_delta),
            extent: config.scene.resolution,
        };

        let capabilities = device.capabilities();
        if !capabilities.standalone_shaders {
            log::warn!("{}, ray traced frames are skipped", RayTracingError::Unsupported);
            return Ok(renderer);
        }

        let limits =
            PipelineLimiter::limits(config.scene.requested_recursion_depth, &capabilities);
        renderer
            .settings
            .clamp_to(&limits, config.scene.num_cubes);

        let scene = Self::create_scene(device, config, cube_mesh, limits).map_err(|error| {
            log::error!("Could not initialize ray tracing: {}", error);
            error
        })?;
        log::info!(
            "Ray tracing initialized: {} instances, recursion depth {}, payload {} bytes, attributes {} bytes",
            scene.animator.instance_count(),
            limits.max_recursion_depth,
            limits.max_payload_size,
            limits.max_attribute_size
        );
        renderer.scene = Some(scene);
        Ok(renderer)
    }

    fn create_scene<D: RayTracingDevice + ?Sized>(
        device: &mut D,
        config: &Config,
        cube_mesh: TriangleMesh,
        limits: PipelineLimits,
    ) -> Result<SceneState> {
        let cube = GeometryCompiler::compile(device, Geometry::Triangles(cube_mesh))?;
        let sphere = GeometryCompiler::compile(
            device,
            Geometry::Procedural {
                name: "Sphere".to_string(),
                boxes: vec![BoxAttribs::cube(SPHERE_BOX_HALF_EXTENT)],
            },
        )?;

        let animator = InstanceAnimator::new(
            cube.handle(),
            sphere.handle(),
            config.scene.num_cubes,
            config.scene.num_spheres,
        );
        let mut accelerator = SceneAccelerator::new(config.scene.tlas_capacity);
        let instances = animator.animate_with_visibility(0.0, &config.settings.enable_cubes);
        accelerator.sync(device, instances)?;

        let mut bindings = BindingTableManager::new();
        bindings.bind(device, &accelerator, accelerator.instances())?;

        Ok(SceneState {
            cube,
            sphere,
            animator,
            accelerator,
            bindings,
            limits,
        })
    }

    pub fn is_supported(&self) -> bool {
        self.scene.is_some()
    }

    pub fn limits(&self) -> Option<PipelineLimits> {
        self.scene.as_ref().map(|scene| scene.limits)
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Read again at the start of every frame.
    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        &mut self.settings
    }

    pub fn animation_time(&self) -> f32 {
        self.clock.time()
    }

    pub fn accelerator(&self) -> Option<&SceneAccelerator> {
        self.scene.as_ref().map(|scene| &scene.accelerator)
    }

    pub fn binding_table(&self) -> Option<&ShaderBindingTable> {
        self.scene.as_ref().and_then(|scene| scene.bindings.table())
    }

    pub fn geometries(&self) -> Option<[&CompiledGeometry; 2]> {
        self.scene
            .as_ref()
            .map(|scene| [&scene.cube, &scene.sphere])
    }

    pub fn extent(&self) -> [u32; 2] {
        self.extent
    }

    /// Advances the animation clock by the wall clock time since the last frame.
    pub fn update(&mut self, elapsed_seconds: f64) {
        self.clock.advance(elapsed_seconds, self.settings.animate);
    }

    /// Zero sizes, like those of a minimized window, are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.extent = [width, height];
    }

    /// Renders at the animation clock's current time.
    pub fn render<D: RayTracingDevice + ?Sized>(
        &mut self,
        device: &mut D,
        camera: &Camera,
    ) -> Result<Option<FrameReport>> {
        let time = self.clock.time();
        self.sync_and_render(device, time, camera)
    }

    /// Records one frame. Returns `None` if ray tracing is unsupported.
    pub fn sync_and_render<D: RayTracingDevice + ?Sized>(
        &mut self,
        device: &mut D,
        time: f32,
        camera: &Camera,
    ) -> Result<Option<FrameReport>> {
        let Some(scene) = self.scene.as_mut() else {
            return Ok(None);
        };

        self.settings
            .clamp_to(&scene.limits, scene.animator.num_cubes());
        let instances = scene
            .animator
            .animate_with_visibility(time, &self.settings.enable_cubes);

        let result = Self::record_frame(scene, device, instances, &self.settings, camera, self.extent);
        if let Err(error) = &result {
            log::error!("Frame at t={:.3} failed: {}", time, error);
        }
        result.map(Some)
    }

    fn record_frame<D: RayTracingDevice + ?Sized>(
        scene: &mut SceneState,
        device: &mut D,
        instances: Vec<crate::scene::Instance>,
        settings: &RenderSettings,
        camera: &Camera,
        extent: [u32; 2],
    ) -> Result<FrameReport> {
        let sync = scene.accelerator.sync(device, instances)?;

        let rebound = scene.bindings.needs_rebind(&scene.accelerator);
        let sbt = if rebound {
            scene
                .bindings
                .bind(device, &scene.accelerator, scene.accelerator.instances())?
                .handle()
        } else {
            scene
                .bindings
                .table()
                .ok_or(RayTracingError::TlasNotBuilt)?
                .handle()
        };

        device.update_constants(&FrameConstants::new(settings, camera))?;
        device.trace_rays(&TraceRays {
            sbt,
            width: extent[0],
            height: extent[1],
        })?;

        log::debug!(
            "Frame: {:?} of {} instances, rebound: {}",
            sync.mode,
            sync.instance_count,
            rebound
        );
        Ok(FrameReport {
            sync,
            rebound,
            width: extent[0],
            height: extent[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::BuildMode;
    use crate::device::DeviceCapabilities;
    use crate::headless::{command_histogram, HeadlessDevice};

    #[test]
    fn unsupported_device_skips_frames() {
        let mut device = HeadlessDevice::with_capabilities(DeviceCapabilities::unsupported());
        let mut renderer = RayTracingRenderer::initialize(&mut device, &Config::default()).unwrap();

        assert!(!renderer.is_supported());
        let report = renderer
            .sync_and_render(&mut device, 0.0, &Camera::default())
            .unwrap();
        assert_eq!(report, None);
        assert!(device.commands().is_empty());
    }

    #[test]
    fn frames_update_and_trace() {
        let mut device = HeadlessDevice::new();
        let mut renderer = RayTracingRenderer::initialize(&mut device, &Config::default()).unwrap();
        device.take_commands();

        let camera = Camera::default();
        for frame in 0..3 {
            renderer.update(1.0 / 60.0);
            let report = renderer.render(&mut device, &camera).unwrap().unwrap();
            assert_eq!(report.sync.mode, BuildMode::Update);
            assert!(!report.rebound, "frame {} rebound the SBT", frame);
        }

        let histogram = command_histogram(device.commands());
        assert_eq!(histogram["update_tlas"], 3);
        assert_eq!(histogram["trace_rays"], 3);
        assert_eq!(histogram["update_constants"], 3);
        assert_eq!(histogram.get("build_tlas"), None);
        assert_eq!(histogram.get("create_buffer"), None);
    }

    #[test]
    fn recursion_is_clamped_to_the_device() {
        let mut device = HeadlessDevice::with_capabilities(DeviceCapabilities {
            max_recursion_depth: 2,
            ..HeadlessDevice::default_capabilities()
        });
        let mut renderer = RayTracingRenderer::initialize(&mut device, &Config::default()).unwrap();
        assert_eq!(renderer.limits().unwrap().max_recursion_depth, 2);
        assert_eq!(renderer.settings().max_recursion, 2);

        renderer.settings_mut().max_recursion = 10;
        renderer
            .sync_and_render(&mut device, 0.0, &Camera::default())
            .unwrap();
        assert_eq!(device.constants().unwrap().max_recursion, 2);
    }

    #[test]
    fn resize_sets_the_dispatch_extent() {
        let mut device = HeadlessDevice::new();
        let mut renderer = RayTracingRenderer::initialize(&mut device, &Config::default()).unwrap();
        renderer.resize(640, 480);
        renderer.resize(0, 0);

        let report = renderer
            .sync_and_render(&mut device, 0.0, &Camera::default())
            .unwrap()
            .unwrap();
        assert_eq!((report.width, report.height), (640, 480));
    }

    #[test]
    fn paused_animation_keeps_time() {
        let mut device = HeadlessDevice::new();
        let mut renderer = RayTracingRenderer::initialize(&mut device, &Config::default()).unwrap();
        renderer.settings_mut().animate = false;
        renderer.update(1.0);
        assert_eq!(renderer.animation_time(), 0.0);
    }
}

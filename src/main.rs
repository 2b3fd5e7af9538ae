use std::path::PathBuf;

use anyhow::Context as _;
use ring_tracer::camera::Camera;
use ring_tracer::config::ConfigFileLoader;
use ring_tracer::headless::{command_histogram, HeadlessDevice};
use ring_tracer::scene::import::load_triangle_mesh;
use ring_tracer::time::Time;
use ring_tracer::{ui, vulkan, RayTracingRenderer};

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_FRAME_COUNT: u32 = 120;
const FRAME_TIME: f64 = 1.0 / 60.0;

/// Runs the frame loop on the headless device, with the limits of the local GPU if it supports
/// ray tracing.
///
/// Usage: `ring-tracer [config.json] [frames]`
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let frames = match args.next() {
        Some(value) => value
            .parse::<u32>()
            .with_context(|| format!("Invalid frame count {}", value))?,
        None => DEFAULT_FRAME_COUNT,
    };

    let mut config_loader = ConfigFileLoader::new(&config_path);
    let config = config_loader.get_or_load_config()?.clone();

    let capabilities = match vulkan::probe_capabilities() {
        Ok(capabilities) => {
            log::info!("Using the limits of the local GPU: {:?}", capabilities);
            capabilities
        }
        Err(error) => {
            log::warn!("No ray tracing GPU available ({}), using default limits", error);
            HeadlessDevice::default_capabilities()
        }
    };
    let mut device = HeadlessDevice::with_capabilities(capabilities);

    let mut renderer = match &config.scene.cube_mesh_path {
        Some(path) => {
            let mesh = load_triangle_mesh(path)?;
            RayTracingRenderer::initialize_with_cube(&mut device, &config, mesh)?
        }
        None => RayTracingRenderer::initialize(&mut device, &config)?,
    };

    let mut camera = Camera::default();
    let [width, height] = renderer.extent();
    camera.resize(width, height);

    let egui_context = egui::Context::default();
    let mut time = Time::new();
    let mut rendered = 0;
    for frame in 0..frames {
        let max_recursion = renderer
            .limits()
            .map_or(0, |limits| limits.max_recursion_depth);
        let _ = egui_context.run(egui::RawInput::default(), |ctx| {
            ui::settings_window(ctx, renderer.settings_mut(), max_recursion);
        });

        renderer.update(FRAME_TIME);
        camera.keep_above_ground();

        let Some(report) = renderer.render(&mut device, &camera)? else {
            log::warn!("Ray tracing is not supported, no frames rendered");
            break;
        };
        time.update();
        log::debug!(
            "Frame {}: {:?} of {} instances, rebound {}, recorded in {:?}",
            frame,
            report.sync.mode,
            report.sync.instance_count,
            report.rebound,
            time.delta()
        );
        rendered += 1;
    }

    let mut histogram: Vec<_> = command_histogram(device.commands()).into_iter().collect();
    histogram.sort();
    println!(
        "Rendered {} frames at t={:.3}s",
        rendered,
        renderer.animation_time()
    );
    for (command, count) in histogram {
        println!("{:>28}: {}", command, count);
    }

    Ok(())
}

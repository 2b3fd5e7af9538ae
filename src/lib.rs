//! Ray traced scene of a ring of animated cubes and spheres around a glass cube.
//!
//! The crate keeps the acceleration structures, the shader binding table and the ray tracing
//! pipeline limits in line with the animated scene. All GPU work goes through
//! [`device::RayTracingDevice`], implemented for Vulkan in [`vulkan`] and without a GPU in
//! [`headless`].

pub mod accel;
pub mod camera;
pub mod config;
pub mod device;
pub mod error;
pub mod headless;
pub mod pipeline;
pub mod renderer;
pub mod sbt;
pub mod scene;
pub mod settings;
pub mod time;
pub mod ui;
pub mod utility;
pub mod vulkan;

pub use accel::{BuildMode, GeometryCompiler, SceneAccelerator, SyncReport, TlasState};
pub use error::{RayTracingError, Result};
pub use pipeline::{PipelineLimiter, PipelineLimits};
pub use renderer::{FrameReport, RayTracingRenderer};
pub use sbt::BindingTableManager;
pub use scene::InstanceAnimator;

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::pipeline::DEFAULT_RECURSION_DEPTH;
use crate::scene::{NUM_LOCAL_CUBES, NUM_LOCAL_SPHERES};
use crate::settings::RenderSettings;
use crate::time::DEFAULT_MAX_ANIMATION_TIME_DELTA;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub scene: SceneConfig,
    pub settings: RenderSettings,
}

impl Default for Config {
    fn default() -> Self {
        let scene = SceneConfig::default();
        Self {
            settings: RenderSettings::new(scene.num_cubes),
            scene,
        }
    }
}

/// Scene shape and pipeline requests. Fixed for the lifetime of a renderer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SceneConfig {
    pub num_cubes: usize,
    pub num_spheres: usize,
    /// Capacity of the TLAS. Must hold the cubes, the spheres, the ground and the glass cube.
    pub tlas_capacity: usize,
    pub requested_recursion_depth: u32,
    pub max_animation_time_delta: f64,
    pub resolution: [u32; 2],
    /// Optional glTF file whose first mesh replaces the procedural cube.
    pub cube_mesh_path: Option<PathBuf>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            num_cubes: NUM_LOCAL_CUBES,
            num_spheres: NUM_LOCAL_SPHERES,
            tlas_capacity: NUM_LOCAL_CUBES + NUM_LOCAL_SPHERES + 2,
            requested_recursion_depth: DEFAULT_RECURSION_DEPTH,
            max_animation_time_delta: DEFAULT_MAX_ANIMATION_TIME_DELTA,
            resolution: [1280, 720],
            cube_mesh_path: None,
        }
    }
}

impl SceneConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.max_animation_time_delta.is_finite() && self.max_animation_time_delta >= 0.0,
            "max_animation_time_delta must be a non-negative number of seconds, got {}",
            self.max_animation_time_delta
        );
        Ok(())
    }
}

impl Config {
    pub fn from_str(value: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(value).context("Invalid config file")?;
        config.scene.validate()?;
        Ok(config)
    }
}

pub struct ConfigFileLoader {
    pub path: PathBuf,
    config: Option<Config>,
}

impl ConfigFileLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().into(),
            config: None,
        }
    }

    /// Reads the config file. A missing file is replaced by the defaults, which are written back.
    pub fn load_config(&mut self) -> anyhow::Result<&mut Config> {
        let config = match std::fs::read_to_string(&self.path) {
            Ok(content) => Config::from_str(&content)
                .with_context(|| format!("Could not parse {}", self.path.display()))?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                log::warn!(
                    "No config at {}, writing the defaults",
                    self.path.display()
                );
                let config = Config::default();
                self.config = Some(config.clone());
                self.save_config()?;
                config
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("Could not read {}", self.path.display()))
            }
        };
        Ok(self.config.insert(config))
    }

    pub fn get_or_load_config(&mut self) -> anyhow::Result<&mut Config> {
        if self.config.is_none() {
            self.load_config()?;
        }
        self.config
            .as_mut()
            .context("Config was not loaded")
    }

    pub fn save_config(&self) -> anyhow::Result<()> {
        if let Some(config) = &self.config {
            let content = serde_json::to_string_pretty(config)?;
            std::fs::write(&self.path, content)
                .with_context(|| format!("Could not write {}", self.path.display()))?;
        }
        Ok(())
    }
}

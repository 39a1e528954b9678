//! # Unified Configuration System
//!
//! Configuration for the engine loop, the renderer, asset lookup and the job
//! system. Every section has sensible defaults, builder-style setters and a
//! `validate` method that is run before any subsystem allocates storage.
//!
//! ## Configuration Categories
//!
//! - **Engine Config**: log level, debug features, frame pacing
//! - **Renderer Config**: backend choice, validation layers, resource table sizes
//! - **Asset Config**: where shaders, textures, materials and models live
//! - **Job Config**: worker pool size and result queue capacity

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use crate::config::{Config, ConfigError};

/// Which renderer backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Vulkan backend, requires a window surface
    Vulkan,
    /// Headless backend that records what it was asked to do
    Null,
}

/// # Engine Configuration
///
/// Core engine behavior: logging, debug features and frame pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
    /// Whether to enable debug features
    pub debug_mode: bool,
    /// Target FPS for frame rate limiting
    pub target_fps: Option<u32>,
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            debug_mode: cfg!(debug_assertions),
            target_fps: None,
        }
    }

    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set target FPS
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        const LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];
        if !LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            return Err(format!("Unknown log level: {}", self.log_level));
        }
        if self.target_fps == Some(0) {
            return Err("Target FPS must be greater than zero".to_string());
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// # Renderer Configuration
///
/// Backend selection plus the fixed sizes of the renderer's resource tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Backend to construct
    pub backend: BackendKind,
    /// Whether to enable Vulkan validation layers (`None` = debug builds only)
    pub enable_validation: Option<bool>,
    /// Require a discrete GPU during device selection
    pub require_discrete_gpu: bool,
    /// Maximum number of textures held by the texture system
    pub max_textures: u32,
    /// Maximum number of materials held by the material system
    pub max_materials: u32,
    /// Maximum number of geometries held by the geometry system
    pub max_geometries: u32,
    /// Maximum number of shaders held by the shader system
    pub max_shaders: u32,
    /// Maximum instances per shader (one per material using it)
    pub max_shader_instances: u32,
    /// Maximum combined uniform + sampler count per shader
    pub max_uniforms: u32,
    /// Maximum global-scope textures per shader
    pub max_global_textures: u32,
    /// Maximum instance-scope textures per shader
    pub max_instance_textures: u32,
    /// Vertex buffer size shared by all geometry, in bytes
    pub vertex_buffer_size: u64,
    /// Index buffer size shared by all geometry, in bytes
    pub index_buffer_size: u64,
    /// Frames to wait for a resize to settle before rebuilding render targets
    pub resize_settle_frames: u32,
    /// Swapchain clear colour (RGBA)
    pub clear_colour: [f32; 4],
    /// Ambient light colour handed to world packets (RGBA)
    pub ambient_colour: [f32; 4],
    /// Vertical field of view in degrees
    pub field_of_view: f32,
    /// Near clip plane
    pub near_clip: f32,
    /// Far clip plane
    pub far_clip: f32,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            backend: BackendKind::Vulkan,
            enable_validation: None,
            require_discrete_gpu: false,
            max_textures: 65536,
            max_materials: 4096,
            max_geometries: 4096,
            max_shaders: 1024,
            max_shader_instances: 1024,
            max_uniforms: 128,
            max_global_textures: 31,
            max_instance_textures: 31,
            vertex_buffer_size: 64 * 1024 * 1024,
            index_buffer_size: 16 * 1024 * 1024,
            resize_settle_frames: 30,
            clear_colour: [0.0, 0.0, 0.2, 1.0],
            ambient_colour: [0.25, 0.25, 0.25, 1.0],
            field_of_view: 45.0,
            near_clip: 0.1,
            far_clip: 1000.0,
        }
    }

    /// Choose the backend
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the number of frames a resize must settle for
    pub fn with_resize_settle_frames(mut self, frames: u32) -> Self {
        self.resize_settle_frames = frames;
        self
    }

    /// Set the resource table sizes
    pub fn with_capacities(mut self, textures: u32, materials: u32, geometries: u32) -> Self {
        self.max_textures = textures;
        self.max_materials = materials;
        self.max_geometries = geometries;
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }
        for (name, value) in [
            ("max_textures", self.max_textures),
            ("max_materials", self.max_materials),
            ("max_geometries", self.max_geometries),
            ("max_shaders", self.max_shaders),
            ("max_shader_instances", self.max_shader_instances),
            ("max_uniforms", self.max_uniforms),
        ] {
            if value == 0 {
                return Err(format!("{name} must be at least 1"));
            }
        }
        if self.vertex_buffer_size == 0 || self.index_buffer_size == 0 {
            return Err("Geometry buffer sizes must be non-zero".to_string());
        }
        if !(self.near_clip > 0.0 && self.far_clip > self.near_clip) {
            return Err(format!(
                "Clip planes must satisfy 0 < near < far (near {}, far {})",
                self.near_clip, self.far_clip
            ));
        }
        if !(self.field_of_view > 0.0 && self.field_of_view < 180.0) {
            return Err(format!("Field of view out of range: {}", self.field_of_view));
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Ember Application")
    }
}

/// # Asset Configuration
///
/// Where the loaders look for their files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Base directory for assets
    pub assets_dir: PathBuf,
}

impl AssetConfig {
    /// Create a new asset configuration
    pub fn new() -> Self {
        Self {
            assets_dir: PathBuf::from("assets"),
        }
    }

    /// Set assets directory
    pub fn with_assets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.assets_dir = dir.into();
        self
    }

    /// Directory holding `.shadercfg` files and compiled `.spv` stages
    pub fn shaders_dir(&self) -> PathBuf {
        self.assets_dir.join("shaders")
    }

    /// Directory holding images
    pub fn textures_dir(&self) -> PathBuf {
        self.assets_dir.join("textures")
    }

    /// Directory holding `.kmt` material files
    pub fn materials_dir(&self) -> PathBuf {
        self.assets_dir.join("materials")
    }

    /// Directory holding `.obj` and `.ksm` meshes
    pub fn models_dir(&self) -> PathBuf {
        self.assets_dir.join("models")
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// # Job System Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Number of worker threads (`0` = one less than available cores, at least 1)
    pub worker_threads: usize,
    /// Capacity of the completed-job results queue
    pub result_capacity: usize,
}

impl JobConfig {
    /// Resolve the worker thread count
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .clamp(1, 15)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_threads > 32 {
            return Err(format!("Too many worker threads: {}", self.worker_threads));
        }
        if self.result_capacity == 0 {
            return Err("Result capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            result_capacity: 512,
        }
    }
}

/// # Complete Application Configuration
///
/// Top-level configuration that encompasses all engine subsystems.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Engine core configuration
    pub engine: EngineConfig,
    /// Rendering system configuration
    pub renderer: RendererConfig,
    /// Asset system configuration
    pub assets: AssetConfig,
    /// Job system configuration
    pub jobs: JobConfig,
}

impl ApplicationConfig {
    /// Create a new application configuration with defaults
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            renderer: RendererConfig::new(app_name),
            ..Default::default()
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate().map_err(ConfigError::Invalid)?;
        self.renderer.validate().map_err(ConfigError::Invalid)?;
        self.jobs.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

impl Config for ApplicationConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = ApplicationConfig::new("Test");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_clip_planes_rejected() {
        let mut config = RendererConfig::default();
        config.near_clip = 10.0;
        config.far_clip = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = RendererConfig::default().with_capacities(0, 10, 10);
        let err = config.validate().unwrap_err();
        assert!(err.contains("max_textures"));
    }

    #[test]
    fn test_toml_round_trip_preserves_backend() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");

        let config = ApplicationConfig {
            renderer: RendererConfig::new("Roundtrip").with_backend(BackendKind::Null),
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();

        let loaded = ApplicationConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.renderer.backend, BackendKind::Null);
        assert_eq!(loaded.renderer.application_name, "Roundtrip");
    }

    #[test]
    fn test_ron_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.ron");
        ApplicationConfig::default().save_to_file(&path).unwrap();
        assert!(ApplicationConfig::load_from_file(&path).is_ok());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.ini");
        let result = ApplicationConfig::default().save_to_file(&path);
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ApplicationConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.jobs.result_capacity, 512);
    }
}

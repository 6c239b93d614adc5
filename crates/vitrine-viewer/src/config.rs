//! Configuration loading

use anyhow::{Context, Result};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use vitrine_core::effect::{PulseParams, PulseParamsUpdate};
use vitrine_core::registry::default_mirror_faces;
use vitrine_core::{OptimizationLevel, PerspectiveCamera, Precision, ReflectorFace};
use vitrine_loader::decoder::DEFAULT_DECODER_PATH;
use vitrine_loader::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub viewer: ViewerConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    /// Overrides applied on top of the profile's pulse parameters
    #[serde(default)]
    pub effect: PulseParamsUpdate,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub post: PostConfig,
}

/// Device class the viewer tunes itself for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Desktop,
    Mobile,
}

impl Profile {
    pub fn optimization_level(self) -> OptimizationLevel {
        match self {
            Self::Desktop => OptimizationLevel::Medium,
            Self::Mobile => OptimizationLevel::Low,
        }
    }

    /// Shader precision pinned on decorated objects after setup
    pub fn component_precision(self) -> Precision {
        match self {
            Self::Desktop => Precision::Mediump,
            Self::Mobile => Precision::Lowp,
        }
    }

    pub fn target_fps(self) -> u32 {
        match self {
            Self::Desktop => 60,
            Self::Mobile => 30,
        }
    }

    pub fn pulse_params(self) -> PulseParams {
        let (count, glow_strength, glow_spread) = match self {
            Self::Desktop => (5.0, 3.5, 3.0),
            Self::Mobile => (3.0, 2.5, 2.0),
        };
        PulseParams {
            color: Vec3::new(0.0, 0.5, 1.0),
            speed: 0.5,
            count,
            width: 0.1,
            glow_strength,
            glow_spread,
        }
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "desktop" => Ok(Self::Desktop),
            "mobile" => Ok(Self::Mobile),
            other => Err(format!("unknown profile: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Model path, relative to the asset root
    #[serde(default = "default_model_path")]
    pub model_path: String,
    /// Video shown on the video plane
    #[serde(default = "default_video_url")]
    pub video_url: String,
    /// Directory or http(s) base URL that asset paths resolve against
    #[serde(default = "default_asset_root")]
    pub asset_root: String,
    #[serde(default)]
    pub profile: Profile,
    /// Overrides the profile's frame rate
    #[serde(default)]
    pub target_fps: Option<u32>,
    /// Frames to render before exiting (0 runs until interrupted)
    #[serde(default)]
    pub frames: u64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            video_url: default_video_url(),
            asset_root: default_asset_root(),
            profile: Profile::default(),
            target_fps: None,
            frames: 0,
            width: default_width(),
            height: default_height(),
        }
    }
}

impl ViewerConfig {
    pub fn fps(&self) -> u32 {
        self.target_fps.unwrap_or_else(|| self.profile.target_fps()).max(1)
    }
}

fn default_model_path() -> String {
    "./model/model.gltf".to_string()
}

fn default_video_url() -> String {
    vitrine_core::video::DEFAULT_VIDEO_URL.to_string()
}

fn default_asset_root() -> String {
    "./public".to_string()
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff before each retry; the last entry repeats
    #[serde(default = "default_retry_delays")]
    pub retry_delays_ms: Vec<u64>,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    /// Overrides the profile's optimization level
    #[serde(default)]
    pub optimization_level: Option<OptimizationLevel>,
    /// Mesh decompression decoder location
    #[serde(default = "default_decoder_path")]
    pub decoder_path: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delays_ms: default_retry_delays(),
            use_cache: true,
            optimization_level: None,
            decoder_path: default_decoder_path(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

impl LoaderConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_millis(&self.retry_delays_ms)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delays() -> Vec<u64> {
    vec![1000, 2000, 5000]
}

fn default_true() -> bool {
    true
}

fn default_decoder_path() -> String {
    DEFAULT_DECODER_PATH.to_string()
}

fn default_http_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_position")]
    pub position: Vec3,
    #[serde(default)]
    pub target: Vec3,
    /// Vertical field of view in degrees
    #[serde(default = "default_fov")]
    pub fov: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: default_camera_position(),
            target: Vec3::ZERO,
            fov: default_fov(),
            near: default_near(),
            far: default_far(),
        }
    }
}

impl CameraConfig {
    pub fn camera(&self, width: u32, height: u32) -> PerspectiveCamera {
        let mut camera = PerspectiveCamera {
            position: self.position,
            target: self.target,
            fov: self.fov,
            near: self.near,
            far: self.far,
            ..PerspectiveCamera::default()
        };
        camera.resize(width as f32, height as f32);
        camera
    }
}

fn default_camera_position() -> Vec3 {
    PerspectiveCamera::default().position
}

fn default_fov() -> f32 {
    17.0
}

fn default_near() -> f32 {
    0.01
}

fn default_far() -> f32 {
    1000.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Reflective faces around the mirror anchor, at most three are used
    #[serde(default = "default_mirror_faces", rename = "face")]
    pub faces: Vec<ReflectorFace>,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            faces: default_mirror_faces(),
        }
    }
}

/// Settings of the screen-space passes, handed to the renderer as-is
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostConfig {
    pub fxaa: bool,
    pub fog_color: Vec3,
    pub fog_density: f32,
    pub vignette_strength: f32,
    pub vignette_radius: f32,
    pub brightness: f32,
    pub glow_strength: f32,
    pub glow_radius: f32,
    pub glow_intensity: f32,
    pub chromatic_aberration: f32,
}

impl Default for PostConfig {
    fn default() -> Self {
        Self {
            fxaa: true,
            fog_color: Vec3::splat(0x11 as f32 / 255.0),
            fog_density: 0.05,
            vignette_strength: 0.3,
            vignette_radius: 0.85,
            brightness: 1.2,
            glow_strength: 0.4,
            glow_radius: 2.0,
            glow_intensity: 0.4,
            chromatic_aberration: 0.002,
        }
    }
}

impl Config {
    pub fn optimization_level(&self) -> OptimizationLevel {
        self.loader
            .optimization_level
            .unwrap_or_else(|| self.viewer.profile.optimization_level())
    }

    /// Profile pulse parameters with the `[effect]` overrides applied
    pub fn pulse_params(&self) -> PulseParams {
        let mut params = self.viewer.profile.pulse_params();
        params.apply(&self.effect);
        params
    }
}

/// Load configuration from file, falling back to defaults when it is missing
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default()).context("Failed to serialize config")?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Saved default configuration");
    Ok(())
}

//! Vitrine Viewer - Showroom scene orchestration
//!
//! - TOML configuration with desktop and mobile profiles
//! - Scene manager: model loading, decoration, frame loop and teardown
//! - Renderer boundary with a headless implementation and post-process passes

pub mod config;
pub mod renderer;
pub mod scene;

pub use config::{load_config, save_default_config, Config, Profile};
pub use renderer::{HeadlessRenderer, PostChain, PostPass, Renderer};
pub use scene::{LogOverlay, SceneManager};

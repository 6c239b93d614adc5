//! Scene manager
//!
//! Owns the live scene and everything decorating it: the loaded model, the
//! mirror faces, the video plane handler and the cable pulse effect. Setup
//! attaches the loaded model to the live scene first and decorates the live
//! copy, so node ids held by the effect and the video handler stay valid
//! until teardown.

use anyhow::{Context, Result};
use glam::Vec2;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use vitrine_core::registry;
use vitrine_core::{
    dispose_graph, optimize_components, CablePulseEffect, Node, NodeId, PerspectiveCamera, PlaybackOverlay, Pointer,
    ResourceTracker, SceneGraph, VideoPlayback, VideoSource,
};
use vitrine_loader::{AssetLoader, LoadOptions, LoaderService};

use crate::config::Config;
use crate::renderer::{Frame, PostChain, Renderer};

/// Render order given to the cables before the pulse effect takes over
const CABLES_RENDER_ORDER: i32 = 1;

/// Overlay that only logs; used when no UI is attached
#[derive(Debug, Default)]
pub struct LogOverlay {
    open: bool,
}

impl PlaybackOverlay for LogOverlay {
    fn open(&mut self, source: &VideoSource) {
        self.open = true;
        info!(url = %source.url, at = source.current_time, "Video overlay opened");
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            info!("Video overlay closed");
        }
    }

    fn dispose(&mut self) {
        debug!("Video overlay disposed");
    }
}

pub struct SceneManager<L, R> {
    config: Config,
    service: LoaderService<L>,
    tracker: ResourceTracker,
    scene: SceneGraph,
    camera: PerspectiveCamera,
    renderer: R,
    post: PostChain,
    effect: Option<CablePulseEffect>,
    video: VideoPlayback,
    model_roots: Vec<NodeId>,
    torn_down: bool,
}

impl<L: AssetLoader, R: Renderer> SceneManager<L, R> {
    pub fn new(config: Config, service: LoaderService<L>, renderer: R, pixel_ratio: f32) -> Self {
        let tracker = service.cache().tracker().clone();
        let (width, height) = (config.viewer.width, config.viewer.height);
        let camera = config.camera.camera(width, height);
        let post = PostChain::new(config.post, width, height, pixel_ratio);
        Self {
            config,
            service,
            tracker,
            scene: SceneGraph::new(),
            camera,
            renderer,
            post,
            effect: None,
            video: VideoPlayback::new(),
            model_roots: Vec::new(),
            torn_down: false,
        }
    }

    /// Load the model and build the live scene
    pub async fn setup(&mut self, overlay: Box<dyn PlaybackOverlay>) -> Result<()> {
        let path = self.config.viewer.model_path.clone();
        let level = self.config.optimization_level();
        let options = LoadOptions::default()
            .use_cache(self.config.loader.use_cache)
            .max_retries(self.config.loader.max_retries)
            .optimization_level(level)
            .with_progress(|percent, event| {
                debug!(percent, loaded = event.loaded, total = ?event.total, "Loading model");
            })
            .with_error(|e| error!(error = %e, "Model could not be loaded"));

        info!(path = %path, level = %level, "Loading model");
        let model = self
            .service
            .cache()
            .load(&path, options)
            .await
            .with_context(|| format!("Failed to load model {}", path))?;

        let stage = self.scene.add_root(Node::new("Stage"));
        self.model_roots = self.scene.attach_graph(Some(stage), &model.scene);
        self.decorate(overlay);

        info!(
            nodes = self.scene.len(),
            animations = model.animations.len(),
            live_resources = self.tracker.live_count(),
            "Scene ready"
        );
        Ok(())
    }

    fn decorate(&mut self, overlay: Box<dyn PlaybackOverlay>) {
        let mut components = Vec::new();
        components.extend(registry::prepare_bench(&mut self.scene));
        components.extend(registry::prepare_mirror(
            &mut self.scene,
            &self.config.mirror.faces,
            &self.tracker,
        ));
        components.extend(registry::prepare_ground(&mut self.scene));
        components.extend(registry::prepare_wall(&mut self.scene));

        let video_plane = self.video.install(
            &mut self.scene,
            &self.config.viewer.video_url,
            overlay,
            self.tracker.clone(),
        );
        components.extend(video_plane);
        components.extend(self.video.handler().and_then(|h| h.hit_plane()));

        let cables = registry::prepare_cables(&mut self.scene, &self.tracker);
        components.extend(cables);

        // Before the effect swaps in its shader
        let precision = self.config.viewer.profile.component_precision();
        optimize_components(&mut self.scene, &components, precision);

        let Some(cables) = cables else {
            return;
        };
        if let Some(node) = self.scene.get_mut(cables) {
            node.render_order = CABLES_RENDER_ORDER;
        }
        let mut effect = CablePulseEffect::new(self.config.pulse_params(), self.tracker.clone());
        match effect.install(&mut self.scene, cables) {
            Ok(()) => self.effect = Some(effect),
            Err(e) => warn!(error = %e, "Cable pulse effect not installed"),
        }
    }

    /// Render one frame
    pub fn frame(&mut self) {
        self.post.tick();
        let frame = Frame {
            scene: &self.scene,
            camera: &self.camera,
            post: &self.post,
        };
        self.renderer.render(&frame);
    }

    pub fn pointer_move(&mut self, pointer: &Pointer) {
        let uv = Vec2::new(
            pointer.x / pointer.viewport_width,
            1.0 - pointer.y / pointer.viewport_height,
        );
        self.post.set_mouse(uv);
    }

    /// Route a click to the video plane. Returns true when it opened playback.
    pub fn click(&mut self, pointer: &Pointer) -> bool {
        self.video.handle_click(&self.scene, &self.camera, pointer)
    }

    pub fn resize(&mut self, width: u32, height: u32, pixel_ratio: f32) {
        self.camera.resize(width as f32, height as f32);
        self.renderer.resize(width, height, pixel_ratio);
        self.post.resize(width, height, pixel_ratio);
    }

    /// Render at the target frame rate until `frames` frames are drawn
    /// (0 means no limit) or `shutdown` resolves. Returns the frames drawn.
    pub async fn run_until<F: Future>(&mut self, frames: u64, shutdown: F) -> u64 {
        let fps = self.config.viewer.fps();
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(fps)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(fps, frames, "Starting frame loop");
        let mut rendered = 0;
        while frames == 0 || rendered < frames {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    self.frame();
                    rendered += 1;
                }
            }
        }
        rendered
    }

    /// Release everything the scene holds, then the loader. Safe to call
    /// more than once.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(mut effect) = self.effect.take() {
            effect.dispose(&mut self.scene);
        }
        self.video.dispose(&mut self.scene);

        let stats = dispose_graph(&self.scene, &self.tracker);
        self.scene = SceneGraph::new();
        self.model_roots.clear();
        self.renderer.dispose();

        let unloaded = self.service.teardown().await;
        info!(
            released = stats.total(),
            unloaded,
            live_resources = self.tracker.live_count(),
            "Scene torn down"
        );
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn model_roots(&self) -> &[NodeId] {
        &self.model_roots
    }

    pub fn camera(&self) -> &PerspectiveCamera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut PerspectiveCamera {
        &mut self.camera
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn post(&self) -> &PostChain {
        &self.post
    }

    pub fn effect(&self) -> Option<&CablePulseEffect> {
        self.effect.as_ref()
    }

    pub fn video(&self) -> &VideoPlayback {
        &self.video
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    pub fn service(&self) -> &LoaderService<L> {
        &self.service
    }
}

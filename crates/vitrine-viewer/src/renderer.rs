//! Renderer boundary and the post-process pass list
//!
//! Drawing itself happens behind [`Renderer`]. The viewer hands it the live
//! scene, the camera and the passes to run after the scene pass; the
//! headless implementation records what it was asked to draw.

use glam::Vec2;
use tracing::{debug, info};

use vitrine_core::{NodeId, PerspectiveCamera, SceneGraph};

use crate::config::PostConfig;

/// Upper bound applied to the device pixel ratio
pub const MAX_PIXEL_RATIO: f32 = 2.0;

/// Composite pass clock step per rendered frame
const COMPOSITE_TIME_STEP: f32 = 0.01;

/// One mesh submitted for drawing
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    pub node: NodeId,
    pub name: String,
    pub render_order: i32,
    pub transparent: bool,
}

/// Visible meshes in submission order: opaque before transparent, each group
/// sorted by render order. Ties keep traversal order.
pub fn draw_list(graph: &SceneGraph) -> Vec<DrawItem> {
    let mut items: Vec<DrawItem> = graph
        .meshes()
        .into_iter()
        .filter(|&id| is_visible(graph, id))
        .filter_map(|id| {
            let node = graph.get(id)?;
            let mesh = node.mesh.as_ref()?;
            if !mesh.material.iter().any(|m| m.visible) {
                return None;
            }
            Some(DrawItem {
                node: id,
                name: node.name.clone(),
                render_order: node.render_order,
                transparent: mesh.material.iter().any(|m| m.transparent),
            })
        })
        .collect();
    items.sort_by_key(|item| (item.transparent, item.render_order));
    items
}

fn is_visible(graph: &SceneGraph, id: NodeId) -> bool {
    let mut current = Some(id);
    while let Some(cid) = current {
        match graph.get(cid) {
            Some(node) if node.visible => current = node.parent,
            _ => return false,
        }
    }
    true
}

/// Uniforms of the final full-screen composite
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeUniforms {
    pub settings: PostConfig,
    pub time: f32,
    /// Pointer in UV space, y up
    pub mouse: Vec2,
    pub prev_mouse: Vec2,
    pub resolution: Vec2,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostPass {
    /// Draw the scene into the composer target
    Render,
    /// Anti-aliasing; `resolution` is one over the drawing buffer size
    Fxaa { resolution: Vec2 },
    Composite(CompositeUniforms),
}

/// Passes run after the scene is drawn, in order
#[derive(Debug, Clone, PartialEq)]
pub struct PostChain {
    passes: Vec<PostPass>,
}

impl PostChain {
    pub fn new(settings: PostConfig, width: u32, height: u32, pixel_ratio: f32) -> Self {
        let mut passes = vec![PostPass::Render];
        if settings.fxaa {
            passes.push(PostPass::Fxaa {
                resolution: fxaa_resolution(width, height, pixel_ratio),
            });
        }
        passes.push(PostPass::Composite(CompositeUniforms {
            settings,
            time: 0.0,
            mouse: Vec2::splat(0.5),
            prev_mouse: Vec2::splat(0.5),
            resolution: Vec2::new(width as f32, height as f32),
        }));
        Self { passes }
    }

    pub fn passes(&self) -> &[PostPass] {
        &self.passes
    }

    pub fn composite(&self) -> Option<&CompositeUniforms> {
        self.passes.iter().find_map(|p| match p {
            PostPass::Composite(c) => Some(c),
            _ => None,
        })
    }

    fn composite_mut(&mut self) -> Option<&mut CompositeUniforms> {
        self.passes.iter_mut().find_map(|p| match p {
            PostPass::Composite(c) => Some(c),
            _ => None,
        })
    }

    /// Advance the composite clock by one frame
    pub fn tick(&mut self) {
        if let Some(composite) = self.composite_mut() {
            composite.time += COMPOSITE_TIME_STEP;
        }
    }

    /// Record a pointer move, given in UV space
    pub fn set_mouse(&mut self, uv: Vec2) {
        if let Some(composite) = self.composite_mut() {
            composite.prev_mouse = composite.mouse;
            composite.mouse = uv;
        }
    }

    pub fn resize(&mut self, width: u32, height: u32, pixel_ratio: f32) {
        for pass in &mut self.passes {
            match pass {
                PostPass::Render => {}
                PostPass::Fxaa { resolution } => {
                    *resolution = fxaa_resolution(width, height, pixel_ratio);
                }
                PostPass::Composite(c) => {
                    c.resolution = Vec2::new(width as f32, height as f32);
                }
            }
        }
    }
}

fn fxaa_resolution(width: u32, height: u32, pixel_ratio: f32) -> Vec2 {
    let ratio = pixel_ratio.clamp(f32::EPSILON, MAX_PIXEL_RATIO);
    Vec2::new(
        1.0 / (width.max(1) as f32 * ratio),
        1.0 / (height.max(1) as f32 * ratio),
    )
}

/// Everything the renderer needs for one frame
pub struct Frame<'a> {
    pub scene: &'a SceneGraph,
    pub camera: &'a PerspectiveCamera,
    pub post: &'a PostChain,
}

pub trait Renderer: Send {
    fn resize(&mut self, width: u32, height: u32, pixel_ratio: f32);
    fn render(&mut self, frame: &Frame<'_>);
    /// Release the drawing context. Rendering after this is ignored.
    fn dispose(&mut self);
}

/// Renderer that draws nothing and keeps the last frame's submissions
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    size: (u32, u32),
    pixel_ratio: f32,
    frames: u64,
    last_draw: Vec<DrawItem>,
    last_passes: Vec<PostPass>,
    disposed: bool,
}

impl HeadlessRenderer {
    pub fn new(width: u32, height: u32, pixel_ratio: f32) -> Self {
        Self {
            size: (width, height),
            pixel_ratio: pixel_ratio.min(MAX_PIXEL_RATIO),
            ..Default::default()
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn last_draw(&self) -> &[DrawItem] {
        &self.last_draw
    }

    pub fn last_passes(&self) -> &[PostPass] {
        &self.last_passes
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Renderer for HeadlessRenderer {
    fn resize(&mut self, width: u32, height: u32, pixel_ratio: f32) {
        self.size = (width, height);
        self.pixel_ratio = pixel_ratio.min(MAX_PIXEL_RATIO);
        debug!(width, height, pixel_ratio = self.pixel_ratio, "Renderer resized");
    }

    fn render(&mut self, frame: &Frame<'_>) {
        if self.disposed {
            return;
        }
        self.last_draw = draw_list(frame.scene);
        self.last_passes = frame.post.passes().to_vec();
        self.frames += 1;
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.last_draw.clear();
            info!(frames = self.frames, "Renderer disposed");
        }
    }
}

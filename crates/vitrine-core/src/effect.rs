//! Cable pulse effect
//!
//! Replaces a mesh's material with an animated shader: bright bands travel
//! along the UV x axis while a rim term lights grazing edges. The effect owns
//! the clock task driving the `time` uniform and puts the original material
//! back on dispose.

use glam::Vec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::graph::{NodeId, SceneGraph};
use crate::material::{
    BlendFactor, Blending, Material, MaterialKind, MaterialSlot, ShaderMaterial, SharedUniforms,
    Side, UniformValue,
};
use crate::resources::{ResourceKind, ResourceTracker};

/// Render order of the cable and its mesh descendants while the effect runs
pub const EFFECT_RENDER_ORDER: i32 = 2000;

const TICK: Duration = Duration::from_millis(16);
const ALPHA_TEST: f32 = 0.2;

pub const PULSE_VERTEX_SHADER: &str = r#"
varying vec2 vUv;
varying vec3 vNormal;
varying vec3 vViewPosition;

void main() {
    vUv = uv;
    vNormal = normalize(normalMatrix * normal);
    vec4 mvPosition = modelViewMatrix * vec4(position, 1.0);
    vViewPosition = -mvPosition.xyz;
    gl_Position = projectionMatrix * mvPosition;
}
"#;

pub const PULSE_FRAGMENT_SHADER: &str = r#"
uniform float time;
uniform vec3 energyColor;
uniform float pulseSpeed;
uniform float numberOfPulses;
uniform float pulseWidth;
uniform float glowStrength;
uniform float glowSpread;

varying vec2 vUv;
varying vec3 vNormal;
varying vec3 vViewPosition;

void main() {
    float phase = fract(vUv.x * numberOfPulses - time * pulseSpeed);
    float pulse = smoothstep(0.0, pulseWidth, phase)
                * smoothstep(pulseWidth * 2.0, pulseWidth, phase);

    vec3 viewDirection = normalize(vViewPosition);
    float rim = pow(1.0 - abs(dot(vNormal, viewDirection)), glowSpread);

    float alpha = max(pulse * 0.8, rim * 0.3);
    alpha = smoothstep(0.1, 1.0, alpha);

    vec3 color = energyColor * (pulse + rim * 0.5) * glowStrength;
    gl_FragColor = vec4(color * alpha, alpha);
}
"#;

#[derive(Debug, Error)]
pub enum EffectError {
    #[error("node {0} has no mesh")]
    NotAMesh(NodeId),

    #[error("effect is already installed")]
    AlreadyInstalled,

    #[error("effect clock needs a running tokio runtime")]
    NoRuntime,

    #[error("effect has been disposed")]
    Disposed,
}

/// Pulse appearance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseParams {
    pub color: Vec3,
    /// Band travel speed in UV units per second
    pub speed: f32,
    /// Bands visible along the cable at once
    pub count: f32,
    /// Band edge softness, as a fraction of one band period
    pub width: f32,
    pub glow_strength: f32,
    /// Rim falloff exponent
    pub glow_spread: f32,
}

impl Default for PulseParams {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            speed: 0.5,
            count: 3.0,
            width: 0.1,
            glow_strength: 1.5,
            glow_spread: 2.0,
        }
    }
}

/// Partial parameter update; `None` keeps the current value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseParamsUpdate {
    pub color: Option<Vec3>,
    pub speed: Option<f32>,
    pub count: Option<f32>,
    pub width: Option<f32>,
    pub glow_strength: Option<f32>,
    pub glow_spread: Option<f32>,
}

impl PulseParams {
    pub fn apply(&mut self, update: &PulseParamsUpdate) {
        if let Some(v) = update.color {
            self.color = v;
        }
        if let Some(v) = update.speed {
            self.speed = v;
        }
        if let Some(v) = update.count {
            self.count = v;
        }
        if let Some(v) = update.width {
            if v > 0.0 && v.is_finite() {
                self.width = v;
            } else {
                warn!(width = v, "Ignoring non-positive pulse width");
            }
        }
        if let Some(v) = update.glow_strength {
            self.glow_strength = v;
        }
        if let Some(v) = update.glow_spread {
            self.glow_spread = v;
        }
    }

    fn write_uniforms(&self, uniforms: &mut BTreeMap<String, UniformValue>) {
        uniforms.insert("energyColor".into(), UniformValue::Vec3(self.color));
        uniforms.insert("pulseSpeed".into(), UniformValue::Float(self.speed));
        uniforms.insert("numberOfPulses".into(), UniformValue::Float(self.count));
        uniforms.insert("pulseWidth".into(), UniformValue::Float(self.width));
        uniforms.insert("glowStrength".into(), UniformValue::Float(self.glow_strength));
        uniforms.insert("glowSpread".into(), UniformValue::Float(self.glow_spread));
    }

    /// Premultiplied RGBA the fragment shader produces for a surface point
    /// at `uv_x` whose normal makes cosine `n_dot_v` with the view direction
    pub fn sample(&self, uv_x: f32, n_dot_v: f32, time: f32) -> [f32; 4] {
        let phase = (uv_x * self.count - time * self.speed).rem_euclid(1.0);
        // A band needs a positive width; otherwise only the rim glows
        let pulse = if self.width > 0.0 {
            smoothstep(0.0, self.width, phase) * smoothstep(self.width * 2.0, self.width, phase)
        } else {
            0.0
        };
        let rim = (1.0 - n_dot_v.abs()).max(0.0).powf(self.glow_spread);

        let alpha = smoothstep(0.1, 1.0, (pulse * 0.8).max(rim * 0.3));
        let color = self.color * (pulse + rim * 0.5) * self.glow_strength * alpha;
        [color.x, color.y, color.z, alpha]
    }
}

/// Equal edges degrade to a step at `edge0`
fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge0 == edge1 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

enum EffectState {
    Uninitialized,
    Installed {
        node: NodeId,
        original: MaterialSlot,
        material: Arc<Material>,
        clock: JoinHandle<()>,
    },
    Disposed,
}

/// Animated pulse overlay for one mesh node
pub struct CablePulseEffect {
    params: PulseParams,
    uniforms: SharedUniforms,
    tracker: ResourceTracker,
    state: EffectState,
}

impl CablePulseEffect {
    pub fn new(params: PulseParams, tracker: ResourceTracker) -> Self {
        let mut uniforms = BTreeMap::new();
        uniforms.insert("time".to_string(), UniformValue::Float(0.0));
        params.write_uniforms(&mut uniforms);
        Self {
            params,
            uniforms: Arc::new(RwLock::new(uniforms)),
            tracker,
            state: EffectState::Uninitialized,
        }
    }

    pub fn params(&self) -> &PulseParams {
        &self.params
    }

    pub fn is_installed(&self) -> bool {
        matches!(self.state, EffectState::Installed { .. })
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.state, EffectState::Disposed)
    }

    /// The shader material while installed
    pub fn material(&self) -> Option<&Arc<Material>> {
        match &self.state {
            EffectState::Installed { material, .. } => Some(material),
            _ => None,
        }
    }

    /// Swap the pulse shader onto `node` and start its clock.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn install(&mut self, graph: &mut SceneGraph, node: NodeId) -> Result<(), EffectError> {
        match self.state {
            EffectState::Installed { .. } => return Err(EffectError::AlreadyInstalled),
            EffectState::Disposed => return Err(EffectError::Disposed),
            EffectState::Uninitialized => {}
        }

        if !graph.get(node).is_some_and(|n| n.is_mesh()) {
            return Err(EffectError::NotAMesh(node));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| EffectError::NoRuntime)?;

        let material = Arc::new(Material {
            transparent: true,
            blending: Blending::Custom {
                src: BlendFactor::One,
                dst: BlendFactor::OneMinusSrcAlpha,
            },
            depth_write: false,
            depth_test: true,
            side: Side::Double,
            ..Material::new(MaterialKind::Shader(ShaderMaterial {
                vertex_shader: PULSE_VERTEX_SHADER,
                fragment_shader: PULSE_FRAGMENT_SHADER,
                uniforms: self.uniforms.clone(),
                alpha_test: ALPHA_TEST,
            }))
        });
        self.tracker.register(material.id, ResourceKind::Material);

        let original = {
            let Some(mesh) = graph.get_mut(node).and_then(|n| n.mesh.as_mut()) else {
                return Err(EffectError::NotAMesh(node));
            };
            std::mem::replace(&mut mesh.material, MaterialSlot::Single(material.clone()))
        };

        for id in graph.descendants(node) {
            if let Some(n) = graph.get_mut(id) {
                if id == node || n.is_mesh() {
                    n.render_order = EFFECT_RENDER_ORDER;
                }
            }
        }
        if let Some(parent) = graph.get(node).and_then(|n| n.parent) {
            if let Some(p) = graph.get_mut(parent) {
                p.render_order = EFFECT_RENDER_ORDER - 1;
            }
        }

        let clock = runtime.spawn(run_clock(self.uniforms.clone()));

        info!(node = %node, material = %material.id, "Cable pulse effect installed");
        self.state = EffectState::Installed {
            node,
            original,
            material,
            clock,
        };
        Ok(())
    }

    /// Merge `update` into the parameters; live uniforms change immediately
    pub fn update_params(&mut self, update: &PulseParamsUpdate) {
        self.params.apply(update);
        self.params.write_uniforms(&mut self.uniforms.write());
        debug!(?update, "Pulse parameters updated");
    }

    /// Current value of the `time` uniform
    pub fn elapsed(&self) -> f32 {
        self.uniforms
            .read()
            .get("time")
            .and_then(UniformValue::as_float)
            .unwrap_or(0.0)
    }

    /// Stop the clock, release the shader and put the original material back.
    /// Calling this again, or before install, does nothing.
    pub fn dispose(&mut self, graph: &mut SceneGraph) {
        let (node, original, material, clock) =
            match std::mem::replace(&mut self.state, EffectState::Disposed) {
                EffectState::Installed {
                    node,
                    original,
                    material,
                    clock,
                } => (node, original, material, clock),
                other => {
                    self.state = other;
                    return;
                }
            };

        clock.abort();
        self.tracker.dispose(material.id);
        if let Some(mesh) = graph.get_mut(node).and_then(|n| n.mesh.as_mut()) {
            mesh.material = original;
        }
        info!(node = %node, "Cable pulse effect disposed");
    }
}

impl Drop for CablePulseEffect {
    fn drop(&mut self) {
        if let EffectState::Installed { clock, .. } = &self.state {
            clock.abort();
        }
    }
}

async fn run_clock(uniforms: SharedUniforms) {
    let start = Instant::now();
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let elapsed = start.elapsed().as_secs_f32();
        uniforms
            .write()
            .insert("time".to_string(), UniformValue::Float(elapsed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::graph::{MeshData, Node};

    fn cable_scene() -> (SceneGraph, NodeId, NodeId, NodeId) {
        let mut graph = SceneGraph::new();
        let root = graph.add_root(Node::new("Scene"));
        let mesh = || MeshData {
            geometry: Arc::new(Geometry::plane(1.0, 1.0)),
            material: MaterialSlot::Single(Arc::new(Material::basic([0.2, 0.2, 0.2, 1.0]))),
        };
        let cables = graph.add_child(root, Node::new("Cables").with_mesh(mesh()));
        let strand = graph.add_child(cables, Node::new("Strand").with_mesh(mesh()));
        (graph, root, cables, strand)
    }

    fn material_of(graph: &SceneGraph, id: NodeId) -> MaterialSlot {
        graph.get(id).unwrap().mesh.as_ref().unwrap().material.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_and_dispose_restores_material() {
        let (mut graph, root, cables, strand) = cable_scene();
        let tracker = ResourceTracker::new();
        let before = material_of(&graph, cables);

        let mut effect = CablePulseEffect::new(PulseParams::default(), tracker.clone());
        effect.install(&mut graph, cables).unwrap();

        let installed = material_of(&graph, cables);
        assert!(!installed.ptr_eq(&before));
        let shader = installed.first().unwrap();
        assert!(shader.transparent);
        assert!(!shader.depth_write);
        assert_eq!(shader.side, Side::Double);
        assert_eq!(shader.as_shader().unwrap().alpha_test, ALPHA_TEST);
        assert_eq!(graph.get(cables).unwrap().render_order, EFFECT_RENDER_ORDER);
        assert_eq!(graph.get(strand).unwrap().render_order, EFFECT_RENDER_ORDER);
        assert_eq!(graph.get(root).unwrap().render_order, EFFECT_RENDER_ORDER - 1);
        assert!(tracker.is_live(shader.id));

        let shader_id = shader.id;
        effect.dispose(&mut graph);
        assert!(material_of(&graph, cables).ptr_eq(&before));
        assert!(!tracker.is_live(shader_id));
        assert!(effect.is_disposed());

        // Second dispose is a no-op
        effect.dispose(&mut graph);
        assert!(material_of(&graph, cables).ptr_eq(&before));
        assert_eq!(tracker.disposed_count(), 1);
    }

    #[tokio::test]
    async fn test_dispose_without_install_is_noop() {
        let (mut graph, _, cables, _) = cable_scene();
        let before = material_of(&graph, cables);
        let mut effect = CablePulseEffect::new(PulseParams::default(), ResourceTracker::new());
        effect.dispose(&mut graph);
        assert!(material_of(&graph, cables).ptr_eq(&before));
        assert!(!effect.is_installed());
    }

    #[tokio::test]
    async fn test_install_errors() {
        let (mut graph, root, cables, _) = cable_scene();
        let mut effect = CablePulseEffect::new(PulseParams::default(), ResourceTracker::new());

        assert!(matches!(
            effect.install(&mut graph, root),
            Err(EffectError::NotAMesh(_))
        ));
        effect.install(&mut graph, cables).unwrap();
        assert!(matches!(
            effect.install(&mut graph, cables),
            Err(EffectError::AlreadyInstalled)
        ));
        effect.dispose(&mut graph);
        assert!(matches!(
            effect.install(&mut graph, cables),
            Err(EffectError::Disposed)
        ));
    }

    #[test]
    fn test_install_outside_runtime() {
        let (mut graph, _, cables, _) = cable_scene();
        let before = material_of(&graph, cables);
        let mut effect = CablePulseEffect::new(PulseParams::default(), ResourceTracker::new());
        assert!(matches!(
            effect.install(&mut graph, cables),
            Err(EffectError::NoRuntime)
        ));
        assert!(material_of(&graph, cables).ptr_eq(&before));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_tracks_elapsed_time() {
        let (mut graph, _, cables, _) = cable_scene();
        let mut effect = CablePulseEffect::new(PulseParams::default(), ResourceTracker::new());
        effect.install(&mut graph, cables).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        let t = effect.elapsed();
        assert!((0.95..=1.001).contains(&t), "time uniform was {t}");

        effect.dispose(&mut graph);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(effect.elapsed() <= t + 0.02);
    }

    #[tokio::test]
    async fn test_update_params_is_partial_and_live() {
        let (mut graph, _, cables, _) = cable_scene();
        let mut effect = CablePulseEffect::new(PulseParams::default(), ResourceTracker::new());
        effect.install(&mut graph, cables).unwrap();

        effect.update_params(&PulseParamsUpdate {
            count: Some(5.0),
            glow_strength: Some(3.5),
            ..Default::default()
        });

        let slot = material_of(&graph, cables);
        let shader = slot.first().unwrap().as_shader().unwrap();
        assert_eq!(shader.float("numberOfPulses"), Some(5.0));
        assert_eq!(shader.float("glowStrength"), Some(3.5));
        assert_eq!(shader.float("pulseSpeed"), Some(0.5));
        assert_eq!(shader.vec3("energyColor"), Some(Vec3::ONE));
        assert_eq!(effect.params().width, 0.1);
        effect.dispose(&mut graph);
    }

    #[test]
    fn test_sample_thresholds_and_premultiplies() {
        let params = PulseParams::default();

        // Facing the viewer between bands: nothing survives the threshold
        assert_eq!(params.sample(0.5 / 3.0, 1.0, 0.0), [0.0; 4]);

        // Band center: phase == width
        let [r, g, b, a] = params.sample(0.1 / 3.0, 1.0, 0.0);
        assert!(a > 0.5);
        assert!((r - params.glow_strength * a).abs() < 1e-5);
        assert_eq!(r, g);
        assert_eq!(g, b);

        // Grazing angle lights the rim even without a band
        let [_, _, _, rim_alpha] = params.sample(0.5 / 3.0, 0.0, 0.0);
        assert!(rim_alpha > 0.0);
    }

    #[test]
    fn test_zero_width_has_no_band() {
        let params = PulseParams {
            width: 0.0,
            ..Default::default()
        };
        for i in 0..=30 {
            let uv = i as f32 / 30.0;
            let facing = params.sample(uv, 1.0, 0.0);
            assert!(facing.iter().all(|c| c.is_finite()));
            assert_eq!(facing, [0.0; 4]);
            assert!(params.sample(uv, 0.0, 1.5).iter().all(|c| c.is_finite()));
        }

        assert_eq!(smoothstep(0.5, 0.5, 0.4), 0.0);
        assert_eq!(smoothstep(0.5, 0.5, 0.5), 1.0);
    }

    #[test]
    fn test_apply_rejects_non_positive_width() {
        let mut params = PulseParams::default();
        for width in [0.0, -0.2, f32::NAN] {
            params.apply(&PulseParamsUpdate {
                width: Some(width),
                count: Some(4.0),
                ..Default::default()
            });
            assert_eq!(params.width, 0.1);
        }
        assert_eq!(params.count, 4.0);
        params.apply(&PulseParamsUpdate {
            width: Some(0.2),
            ..Default::default()
        });
        assert_eq!(params.width, 0.2);
    }
}

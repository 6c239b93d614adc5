//! Scene object registry
//!
//! Looks up the named objects of the showroom model and prepares them for the
//! live scene. Every function tolerates a missing node and returns `None`;
//! callers skip that object. Nothing here touches the model cache.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::geometry::Geometry;
use crate::graph::{MeshData, Node, NodeId, SceneGraph, Transform};
use crate::material::{Material, MaterialKind, MaterialSlot, ReflectorMaterial, Texture, TextureSource};
use crate::resources::{ResourceKind, ResourceTracker};

pub const GROUND: &str = "Ground";
pub const WALL: &str = "Wall";
pub const BENCH: &str = "banc";
pub const MIRROR: &str = "Reflector";
pub const CABLES: &str = "Cables";
pub const VIDEO_PLANE: &str = "VideoPlane";

/// Reflective faces a mirror anchor can carry
pub const MAX_REFLECTOR_FACES: usize = 3;

/// Find a node by name
pub fn lookup(graph: &SceneGraph, name: &str) -> Option<NodeId> {
    let found = graph.find_by_name(name);
    if found.is_none() {
        debug!(name = %name, "Scene object not present in model");
    }
    found
}

fn prepare_shadowed(graph: &mut SceneGraph, name: &str) -> Option<NodeId> {
    let id = lookup(graph, name)?;
    let node = graph.get_mut(id)?;
    node.cast_shadow = true;
    node.receive_shadow = true;
    Some(id)
}

pub fn prepare_ground(graph: &mut SceneGraph) -> Option<NodeId> {
    prepare_shadowed(graph, GROUND)
}

pub fn prepare_wall(graph: &mut SceneGraph) -> Option<NodeId> {
    prepare_shadowed(graph, WALL)
}

pub fn prepare_bench(graph: &mut SceneGraph) -> Option<NodeId> {
    prepare_shadowed(graph, BENCH)
}

/// Enable shadows on the cables and give them private material copies.
///
/// The copies keep the cable pulse effect from ever touching materials that
/// the model cache still hands out to other consumers.
pub fn prepare_cables(graph: &mut SceneGraph, tracker: &ResourceTracker) -> Option<NodeId> {
    let id = prepare_shadowed(graph, CABLES)?;
    if let Some(mesh) = graph.get_mut(id).and_then(|n| n.mesh.as_mut()) {
        mesh.material = mesh.material.map(|m| {
            let copy = Arc::new(m.duplicate());
            tracker.register(copy.id, ResourceKind::Material);
            copy
        });
    }
    Some(id)
}

/// One planar reflective surface attached to the mirror anchor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReflectorFace {
    /// Width and height of the face
    pub size: [f32; 2],
    /// Added to the anchor's position
    #[serde(default)]
    pub position_offset: Vec3,
    /// Added to the anchor's Euler rotation
    #[serde(default)]
    pub rotation_offset: Vec3,
}

impl Default for ReflectorFace {
    fn default() -> Self {
        Self {
            size: [0.3, 0.3],
            position_offset: Vec3::ZERO,
            rotation_offset: Vec3::ZERO,
        }
    }
}

/// Front, back and top faces of the showroom mirror
pub fn default_mirror_faces() -> Vec<ReflectorFace> {
    vec![
        ReflectorFace {
            size: [2.0, 2.2],
            position_offset: Vec3::new(-2.0, 0.1, 1.0),
            rotation_offset: Vec3::ZERO,
        },
        ReflectorFace {
            size: [2.0, 2.2],
            position_offset: Vec3::new(-2.0, 0.1, -1.0),
            rotation_offset: Vec3::new(0.0, PI, 0.0),
        },
        ReflectorFace {
            size: [2.0, 2.0],
            position_offset: Vec3::new(-2.0, 1.12, 0.0),
            rotation_offset: Vec3::new(FRAC_PI_2, PI, 0.0),
        },
    ]
}

/// Reflection color and render-target scale shared by all faces
const REFLECTOR_COLOR: [f32; 3] = [0x7f as f32 / 255.0; 3];
const REFLECTOR_CLIP_BIAS: f32 = 0.003;
const REFLECTOR_TEXTURE_SCALE: f32 = 0.5;

/// Enable shadows on the mirror anchor and add up to three reflective faces
/// as its children.
pub fn prepare_mirror(
    graph: &mut SceneGraph,
    faces: &[ReflectorFace],
    tracker: &ResourceTracker,
) -> Option<NodeId> {
    let id = prepare_shadowed(graph, MIRROR)?;
    let anchor = graph.get(id)?.transform;

    if faces.len() > MAX_REFLECTOR_FACES {
        warn!(
            requested = faces.len(),
            max = MAX_REFLECTOR_FACES,
            "Too many mirror faces, extra faces ignored"
        );
    }

    for (i, face) in faces.iter().take(MAX_REFLECTOR_FACES).enumerate() {
        let geometry = Geometry::plane(face.size[0], face.size[1]);
        let target = Texture::new(TextureSource::RenderTarget {
            scale: REFLECTOR_TEXTURE_SCALE,
        });
        let material = Material::new(MaterialKind::Reflector(ReflectorMaterial {
            color: REFLECTOR_COLOR,
            clip_bias: REFLECTOR_CLIP_BIAS,
            recursion: 0,
            target,
        }));

        tracker.register(geometry.id, ResourceKind::Geometry);
        tracker.register(material.id, ResourceKind::Material);
        for texture in material.texture_slots() {
            tracker.register(texture.id, ResourceKind::Texture);
        }

        let transform = Transform {
            position: anchor.position + face.position_offset,
            rotation: anchor.rotation + face.rotation_offset,
            scale: Vec3::ONE,
        };
        let node = Node::new(format!("{}Face{}", MIRROR, i))
            .with_transform(transform)
            .with_mesh(MeshData {
                geometry: Arc::new(geometry),
                material: MaterialSlot::Single(Arc::new(material)),
            });
        graph.add_child(id, node);
    }

    Some(id)
}

//! Loaded model: scene graph plus the side tables an asset carries

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::graph::SceneGraph;
use crate::resources::{ResourceId, ResourceKind, ResourceTracker};

/// Named animation clip (playback itself is handled by the renderer)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationClip {
    pub name: String,
    /// Length in seconds
    #[serde(default)]
    pub duration: f32,
    #[serde(default)]
    pub channels: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Projection {
    Perspective {
        yfov: f32,
        aspect: Option<f32>,
        znear: f32,
        zfar: Option<f32>,
    },
    Orthographic {
        xmag: f32,
        ymag: f32,
        znear: f32,
        zfar: f32,
    },
}

/// Camera defined inside an asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDef {
    pub name: Option<String>,
    pub projection: Projection,
}

/// Asset-level information
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    #[serde(default)]
    pub generator: Option<String>,
    #[serde(default)]
    pub version: String,
    /// Size of the source asset in bytes
    #[serde(default)]
    pub byte_size: usize,
    /// SHA256 of the source asset, hex encoded
    #[serde(default)]
    pub sha256: Option<String>,
}

/// A decoded 3D asset
#[derive(Debug, Clone, Default)]
pub struct LoadedModel {
    pub scene: SceneGraph,
    pub animations: Vec<AnimationClip>,
    pub cameras: Vec<CameraDef>,
    pub metadata: AssetMetadata,
}

impl LoadedModel {
    pub fn new(scene: SceneGraph) -> Self {
        Self {
            scene,
            ..Default::default()
        }
    }
}

/// Counts of what a disposal sweep released
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisposeStats {
    pub geometries: usize,
    pub materials: usize,
    pub textures: usize,
}

impl DisposeStats {
    pub fn total(&self) -> usize {
        self.geometries + self.materials + self.textures
    }
}

/// Record every geometry, material and owned texture of the graph as live
pub fn register_graph(graph: &SceneGraph, tracker: &ResourceTracker) {
    for id in graph.traverse() {
        let Some(mesh) = graph.get(id).and_then(|n| n.mesh.as_ref()) else {
            continue;
        };
        tracker.register(mesh.geometry.id, ResourceKind::Geometry);
        for material in mesh.material.iter() {
            tracker.register(material.id, ResourceKind::Material);
            for texture in material.texture_slots() {
                tracker.register(texture.id, ResourceKind::Texture);
            }
        }
    }
}

/// Release the geometry, materials and owned textures of every reachable mesh.
///
/// Resources shared between meshes are released once.
pub fn dispose_graph(graph: &SceneGraph, tracker: &ResourceTracker) -> DisposeStats {
    let mut seen: HashSet<ResourceId> = HashSet::new();
    let mut stats = DisposeStats::default();

    for id in graph.traverse() {
        let Some(mesh) = graph.get(id).and_then(|n| n.mesh.as_ref()) else {
            continue;
        };

        if seen.insert(mesh.geometry.id) && tracker.dispose(mesh.geometry.id) {
            stats.geometries += 1;
        }

        for material in mesh.material.iter() {
            if !seen.insert(material.id) {
                continue;
            }
            if tracker.dispose(material.id) {
                stats.materials += 1;
            }
            for texture in material.texture_slots() {
                if seen.insert(texture.id) && tracker.dispose(texture.id) {
                    stats.textures += 1;
                }
            }
        }
    }

    stats
}

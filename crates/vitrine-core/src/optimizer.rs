//! One-time post-load optimization of mesh nodes
//!
//! Every pass is a pure overwrite of flags and filters, so running the
//! optimizer twice leaves the graph exactly as running it once.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::geometry::{BufferUsage, Geometry};
use crate::graph::{NodeId, SceneGraph};
use crate::material::{Filter, Material, Precision};
use crate::resources::ResourceId;

/// How aggressively to prepare a model for rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl OptimizationLevel {
    pub fn precision(self) -> Precision {
        match self {
            Self::High => Precision::Highp,
            Self::Low | Self::Medium => Precision::Mediump,
        }
    }
}

impl FromStr for OptimizationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown optimization level: {}", other)),
        }
    }
}

impl std::fmt::Display for OptimizationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(name)
    }
}

/// What an optimization pass touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub meshes: usize,
    pub geometries: usize,
    pub materials: usize,
}

/// Optimize every mesh node of a graph in place
pub fn optimize_graph(graph: &mut SceneGraph, level: OptimizationLevel) -> OptimizeStats {
    let mut geometries: HashMap<ResourceId, Arc<Geometry>> = HashMap::new();
    let mut materials: HashMap<ResourceId, Arc<Material>> = HashMap::new();
    let mut stats = OptimizeStats::default();

    for id in graph.meshes() {
        let Some(node) = graph.get_mut(id) else {
            continue;
        };
        let Some(mesh) = node.mesh.as_mut() else {
            continue;
        };

        let key = mesh.geometry.id;
        optimize_shared(&mut mesh.geometry, key, &mut geometries, |g| {
            optimize_geometry(g, level)
        });
        for material in mesh.material.iter_mut() {
            let key = material.id;
            optimize_shared(material, key, &mut materials, |m| optimize_material(m, level));
        }

        node.frustum_culled = true;
        node.matrix_auto_update = false;
        node.matrix = node.transform.matrix();
        stats.meshes += 1;
    }

    stats.geometries = geometries.len();
    stats.materials = materials.len();
    debug!(
        level = %level,
        meshes = stats.meshes,
        geometries = stats.geometries,
        materials = stats.materials,
        "Optimized scene graph"
    );
    stats
}

/// Apply `f` once per resource id. Resources shared by several meshes stay
/// shared: the first mesh optimizes (copying only if the `Arc` is shared) and
/// the others adopt the result.
fn optimize_shared<T: Clone>(
    slot: &mut Arc<T>,
    key: ResourceId,
    memo: &mut HashMap<ResourceId, Arc<T>>,
    f: impl FnOnce(&mut T),
) {
    if let Some(done) = memo.get(&key) {
        *slot = Arc::clone(done);
        return;
    }
    f(Arc::make_mut(slot));
    memo.insert(key, Arc::clone(slot));
}

/// Re-optimize decorated objects and everything under them: static
/// buffers, `precision` on every material and frozen local matrices.
///
/// Runs after decoration, which adds nodes and swaps materials that the
/// whole-graph pass never saw. Nodes reachable from several roots are
/// visited once. Returns the number of meshes touched.
pub fn optimize_components(graph: &mut SceneGraph, roots: &[NodeId], precision: Precision) -> usize {
    let mut geometries: HashMap<ResourceId, Arc<Geometry>> = HashMap::new();
    let mut materials: HashMap<ResourceId, Arc<Material>> = HashMap::new();
    let mut visited = HashSet::new();
    let mut meshes = 0;

    for &root in roots {
        for id in graph.descendants(root) {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = graph.get_mut(id) else {
                continue;
            };
            node.matrix_auto_update = false;
            node.matrix = node.transform.matrix();

            let Some(mesh) = node.mesh.as_mut() else {
                continue;
            };
            let key = mesh.geometry.id;
            optimize_shared(&mut mesh.geometry, key, &mut geometries, mark_static);
            for material in mesh.material.iter_mut() {
                let key = material.id;
                optimize_shared(material, key, &mut materials, |m| {
                    m.precision = Some(precision)
                });
            }
            meshes += 1;
        }
    }

    debug!(roots = roots.len(), meshes, precision = ?precision, "Optimized components");
    meshes
}

fn mark_static(geometry: &mut Geometry) {
    for attribute in geometry.attributes.values_mut() {
        attribute.usage = BufferUsage::StaticDraw;
    }
    if let Some(index) = geometry.index.as_mut() {
        index.usage = BufferUsage::StaticDraw;
    }
}

/// Mark buffers static and, at level high, fill the bounds caches
pub fn optimize_geometry(geometry: &mut Geometry, level: OptimizationLevel) {
    mark_static(geometry);

    if level == OptimizationLevel::High {
        geometry.compute_bounding_sphere();
        geometry.compute_bounding_box();
    }
}

/// Pin precision and drop to cheap texture filtering
pub fn optimize_material(material: &mut Material, level: OptimizationLevel) {
    material.precision = Some(level.precision());

    if let Some(map) = material.primary_map_mut() {
        map.anisotropy = 1;
        map.min_filter = Filter::Linear;
    }
}

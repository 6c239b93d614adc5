//! Scene graph arena
//!
//! Nodes live in a flat arena and reference each other by [`NodeId`]. Cloning
//! a graph copies the whole node tree; geometry and materials are `Arc`s and
//! stay shared with the source graph.

use glam::{EulerRot, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::geometry::Geometry;
use crate::material::MaterialSlot;

/// Index of a node inside its [`SceneGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Local translation, XYZ Euler rotation (radians) and scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_trs(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        let (x, y, z) = rotation.to_euler(EulerRot::XYZ);
        Self {
            position,
            rotation: Vec3::new(x, y, z),
            scale,
        }
    }

    pub fn quat(&self) -> Quat {
        Quat::from_euler(EulerRot::XYZ, self.rotation.x, self.rotation.y, self.rotation.z)
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.quat(), self.position)
    }
}

/// Renderable part of a node
#[derive(Debug, Clone)]
pub struct MeshData {
    pub geometry: Arc<Geometry>,
    pub material: MaterialSlot,
}

/// A node in the scene graph
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub transform: Transform,
    /// Local matrix as last computed by [`SceneGraph::update_matrix`]
    pub matrix: Mat4,
    /// When false the renderer uses `matrix` as-is instead of recomputing it
    pub matrix_auto_update: bool,
    pub mesh: Option<MeshData>,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    pub frustum_culled: bool,
    pub render_order: i32,
    pub visible: bool,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            transform: Transform::default(),
            matrix: Mat4::IDENTITY,
            matrix_auto_update: true,
            mesh: None,
            cast_shadow: false,
            receive_shadow: false,
            frustum_culled: true,
            render_order: 0,
            visible: true,
        }
    }

    pub fn with_mesh(mut self, mesh: MeshData) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self.matrix = transform.matrix();
        self
    }

    pub fn is_mesh(&self) -> bool {
        self.mesh.is_some()
    }
}

/// Hierarchical node tree
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node at the top level
    pub fn add_root(&mut self, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = None;
        node.children.clear();
        self.nodes.push(node);
        self.roots.push(id);
        id
    }

    /// Add a node under `parent`
    pub fn add_child(&mut self, parent: NodeId, mut node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        node.parent = Some(parent);
        node.children.clear();
        self.nodes.push(node);
        if let Some(p) = self.nodes.get_mut(parent.0) {
            p.children.push(id);
        }
        id
    }

    /// Unlink a node (and its subtree) from the tree. The arena slot stays
    /// allocated but is no longer reachable by traversal.
    pub fn detach(&mut self, id: NodeId) {
        let parent = match self.nodes.get_mut(id.0) {
            Some(node) => node.parent.take(),
            None => return,
        };
        match parent {
            Some(pid) => {
                if let Some(p) = self.nodes.get_mut(pid.0) {
                    p.children.retain(|c| *c != id);
                }
            }
            None => self.roots.retain(|r| *r != id),
        }
    }

    /// Copy every reachable node of `other` into this graph under `parent`
    /// (or as roots). Returns the ids of the copied top-level nodes.
    pub fn attach_graph(&mut self, parent: Option<NodeId>, other: &SceneGraph) -> Vec<NodeId> {
        let mut attached = Vec::new();
        for &root in other.roots() {
            attached.push(self.copy_subtree(parent, other, root));
        }
        attached
    }

    fn copy_subtree(&mut self, parent: Option<NodeId>, other: &SceneGraph, id: NodeId) -> NodeId {
        let node = other.nodes[id.0].clone();
        let children = node.children.clone();
        let new_id = match parent {
            Some(p) => self.add_child(p, node),
            None => self.add_root(node),
        };
        for child in children {
            self.copy_subtree(Some(new_id), other, child);
        }
        new_id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Number of nodes reachable from the roots
    pub fn len(&self) -> usize {
        self.traverse().count()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Depth-first, pre-order walk of every reachable node
    pub fn traverse(&self) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack: Vec<NodeId> = self.roots.iter().rev().copied().collect();
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            if let Some(node) = self.nodes.get(id.0) {
                stack.extend(node.children.iter().rev().copied());
            }
            Some(id)
        })
    }

    /// Depth-first walk of `id` and everything under it
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(current.0) {
                out.push(current);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Reachable mesh nodes
    pub fn meshes(&self) -> Vec<NodeId> {
        self.traverse().filter(|id| self.nodes[id.0].is_mesh()).collect()
    }

    /// First reachable node with this name, in traversal order
    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.traverse().find(|id| self.nodes[id.0].name == name)
    }

    /// Recompute a node's local matrix from its transform
    pub fn update_matrix(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.matrix = node.transform.matrix();
        }
    }

    /// Model matrix of a node: the product of its ancestors' local matrices
    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut current = Some(id);
        while let Some(cid) = current {
            let Some(node) = self.nodes.get(cid.0) else {
                break;
            };
            let local = if node.matrix_auto_update {
                node.transform.matrix()
            } else {
                node.matrix
            };
            matrix = local * matrix;
            current = node.parent;
        }
        matrix
    }
}

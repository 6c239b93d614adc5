//! Perspective camera and pointer ray casting

use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::graph::{NodeId, SceneGraph};

/// Half-line in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Not necessarily normalized when expressed in a node's local space
    pub direction: Vec3,
}

/// Perspective camera
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveCamera {
    pub position: Vec3,
    pub target: Vec3,
    #[serde(default = "default_up")]
    pub up: Vec3,
    /// Vertical field of view in degrees
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

fn default_up() -> Vec3 {
    Vec3::Y
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(27.0, 0.5, 0.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov: 17.0,
            aspect: 16.0 / 9.0,
            near: 0.01,
            far: 1000.0,
        }
    }
}

impl PerspectiveCamera {
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov.to_radians(), self.aspect, self.near, self.far)
    }

    /// Ray through a point given in normalized device coordinates
    pub fn ray_from_ndc(&self, ndc: Vec2) -> Ray {
        let inverse = (self.projection_matrix() * self.view_matrix()).inverse();
        let near = inverse.project_point3(Vec3::new(ndc.x, ndc.y, -1.0));
        let far = inverse.project_point3(Vec3::new(ndc.x, ndc.y, 1.0));
        Ray {
            origin: self.position,
            direction: (far - near).normalize_or_zero(),
        }
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        if width > 0.0 && height > 0.0 {
            self.aspect = width / height;
        }
    }
}

/// Pointer position in client pixels, with the viewport it was measured in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pointer {
    pub x: f32,
    pub y: f32,
    pub viewport_width: f32,
    pub viewport_height: f32,
}

impl Pointer {
    /// Client pixels to NDC: x right, y up, both in [-1, 1]
    pub fn to_ndc(&self) -> Vec2 {
        Vec2::new(
            (self.x / self.viewport_width) * 2.0 - 1.0,
            -(self.y / self.viewport_height) * 2.0 + 1.0,
        )
    }
}

/// A ray hit against a node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    pub node: NodeId,
    pub distance: f32,
}

/// Intersect a ray with the geometry bounds of the given nodes, nearest first.
/// Nodes without geometry are skipped; invisible nodes still count as targets.
pub fn intersect_nodes(graph: &SceneGraph, ray: &Ray, targets: &[NodeId]) -> Vec<Intersection> {
    let mut hits: Vec<Intersection> = targets
        .iter()
        .filter_map(|&id| {
            let mesh = graph.get(id)?.mesh.as_ref()?;
            let world = graph.world_matrix(id);
            mesh.geometry
                .raycast_bounds(&world, ray)
                .map(|distance| Intersection { node: id, distance })
        })
        .collect();
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::graph::{MeshData, Node, Transform};
    use crate::material::{Material, MaterialSlot};
    use std::sync::Arc;

    #[test]
    fn test_pointer_to_ndc() {
        let pointer = Pointer {
            x: 0.0,
            y: 0.0,
            viewport_width: 800.0,
            viewport_height: 600.0,
        };
        assert_eq!(pointer.to_ndc(), Vec2::new(-1.0, 1.0));

        let center = Pointer {
            x: 400.0,
            y: 300.0,
            ..pointer
        };
        assert_eq!(center.to_ndc(), Vec2::ZERO);
    }

    #[test]
    fn test_center_ray_points_at_target() {
        let camera = PerspectiveCamera {
            position: Vec3::new(0.0, 0.0, 10.0),
            target: Vec3::ZERO,
            ..Default::default()
        };
        let ray = camera.ray_from_ndc(Vec2::ZERO);
        assert!((ray.direction - Vec3::NEG_Z).length() < 1e-4);
    }

    #[test]
    fn test_intersect_nodes_sorted() {
        let mut graph = SceneGraph::new();
        let mesh = || MeshData {
            geometry: Arc::new(Geometry::plane(2.0, 2.0)),
            material: MaterialSlot::Single(Arc::new(Material::invisible())),
        };
        let far = graph.add_root(Node::new("far").with_mesh(mesh()));
        let near = graph.add_root(
            Node::new("near")
                .with_transform(Transform {
                    position: Vec3::new(0.0, 0.0, 3.0),
                    ..Default::default()
                })
                .with_mesh(mesh()),
        );
        let empty = graph.add_root(Node::new("group"));

        let ray = Ray {
            origin: Vec3::new(0.0, 0.0, 10.0),
            direction: Vec3::NEG_Z,
        };
        let hits = intersect_nodes(&graph, &ray, &[far, near, empty]);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].node, near);
        assert!((hits[0].distance - 7.0).abs() < 1e-4);
        assert_eq!(hits[1].node, far);
    }
}

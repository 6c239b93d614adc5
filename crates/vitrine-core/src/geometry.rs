//! Geometry buffers and bounding volumes

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::camera::Ray;
use crate::resources::ResourceId;

pub const POSITION: &str = "position";
pub const NORMAL: &str = "normal";
pub const UV: &str = "uv";

/// Upload hint for a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferUsage {
    /// Written once, drawn many times
    StaticDraw,
    /// Rewritten occasionally
    #[default]
    DynamicDraw,
    /// Rewritten every frame
    StreamDraw,
}

/// A vertex attribute buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferAttribute {
    /// Components per vertex (3 for positions, 2 for uvs)
    pub item_size: usize,
    pub data: Vec<f32>,
    #[serde(default)]
    pub usage: BufferUsage,
}

impl BufferAttribute {
    pub fn new(item_size: usize, data: Vec<f32>) -> Self {
        Self {
            item_size,
            data,
            usage: BufferUsage::default(),
        }
    }

    /// Number of vertices in the buffer
    pub fn count(&self) -> usize {
        if self.item_size == 0 {
            0
        } else {
            self.data.len() / self.item_size
        }
    }

    /// Iterate the buffer as 3D points (only meaningful for item_size 3)
    pub fn iter_vec3(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.data.chunks_exact(3).map(|c| Vec3::new(c[0], c[1], c[2]))
    }
}

/// Triangle index buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexBuffer {
    pub data: Vec<u32>,
    #[serde(default)]
    pub usage: BufferUsage,
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// An inverted box that contains nothing
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.min = aabb.min.min(p);
            aabb.max = aabb.max.max(p);
        }
        aabb
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Distance along the ray to the first intersection, if any
    ///
    /// Uses the slab method; zero-thickness boxes (planes) are supported.
    pub fn intersect_ray(&self, ray: &Ray) -> Option<f32> {
        if self.is_empty() {
            return None;
        }

        let mut t_min = 0.0f32;
        let mut t_max = f32::INFINITY;

        for axis in 0..3 {
            let origin = ray.origin[axis];
            let dir = ray.direction[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);

            if dir.abs() < f32::EPSILON {
                if origin < lo || origin > hi {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / dir;
            let mut t0 = (lo - origin) * inv;
            let mut t1 = (hi - origin) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max + 1e-5 {
                return None;
            }
        }

        Some(t_min)
    }
}

/// Bounding sphere
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

/// Mesh geometry: named attribute buffers plus optional indices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub id: ResourceId,
    pub attributes: BTreeMap<String, BufferAttribute>,
    #[serde(default)]
    pub index: Option<IndexBuffer>,
    /// Cached bounds, filled eagerly by the optimizer at level "high"
    #[serde(default)]
    pub bounding_box: Option<Aabb>,
    #[serde(default)]
    pub bounding_sphere: Option<BoundingSphere>,
}

impl Geometry {
    pub fn new() -> Self {
        Self {
            id: ResourceId::next(),
            attributes: BTreeMap::new(),
            index: None,
            bounding_box: None,
            bounding_sphere: None,
        }
    }

    /// Flat rectangle in the local XY plane, facing +Z, centered on the origin
    pub fn plane(width: f32, height: f32) -> Self {
        let (hw, hh) = (width * 0.5, height * 0.5);
        let mut geometry = Self::new();
        geometry.attributes.insert(
            POSITION.to_string(),
            BufferAttribute::new(
                3,
                vec![-hw, hh, 0.0, hw, hh, 0.0, -hw, -hh, 0.0, hw, -hh, 0.0],
            ),
        );
        geometry.attributes.insert(
            NORMAL.to_string(),
            BufferAttribute::new(3, [0.0, 0.0, 1.0].repeat(4)),
        );
        geometry.attributes.insert(
            UV.to_string(),
            BufferAttribute::new(2, vec![0.0, 1.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0]),
        );
        geometry.index = Some(IndexBuffer {
            data: vec![0, 2, 1, 2, 3, 1],
            usage: BufferUsage::default(),
        });
        geometry
    }

    pub fn with_attribute(mut self, name: &str, attribute: BufferAttribute) -> Self {
        self.attributes.insert(name.to_string(), attribute);
        self
    }

    pub fn positions(&self) -> Option<&BufferAttribute> {
        self.attributes.get(POSITION)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions().map(BufferAttribute::count).unwrap_or(0)
    }

    pub fn compute_bounding_box(&mut self) {
        self.bounding_box = Some(self.local_bounds());
    }

    pub fn compute_bounding_sphere(&mut self) {
        let bounds = self.local_bounds();
        let sphere = if bounds.is_empty() {
            BoundingSphere {
                center: Vec3::ZERO,
                radius: 0.0,
            }
        } else {
            let center = bounds.center();
            let radius = self
                .positions()
                .map(|p| {
                    p.iter_vec3()
                        .map(|v| v.distance(center))
                        .fold(0.0f32, f32::max)
                })
                .unwrap_or(0.0);
            BoundingSphere { center, radius }
        };
        self.bounding_sphere = Some(sphere);
    }

    /// Local-space bounds, using the cached box when present
    pub fn local_bounds(&self) -> Aabb {
        if let Some(aabb) = self.bounding_box {
            return aabb;
        }
        match self.positions() {
            Some(p) if p.item_size == 3 => Aabb::from_points(p.iter_vec3()),
            _ => Aabb::empty(),
        }
    }

    /// Distance to the first hit of a world-space ray against these bounds
    /// placed with `world` as the model matrix
    pub fn raycast_bounds(&self, world: &Mat4, ray: &Ray) -> Option<f32> {
        let inverse = world.inverse();
        let local = Ray {
            origin: inverse.transform_point3(ray.origin),
            direction: inverse.transform_vector3(ray.direction),
        };
        let t = self.local_bounds().intersect_ray(&local)?;
        let hit = world.transform_point3(local.origin + local.direction * t);
        Some(hit.distance(ray.origin))
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new()
    }
}

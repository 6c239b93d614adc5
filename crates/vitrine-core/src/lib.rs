//! Vitrine Core - Scene graph, materials and scene decoration
//!
//! This crate holds everything that operates on an already-decoded model:
//! - Scene graph arena with transforms, meshes and render flags
//! - Materials, textures and the per-kind GPU disposal manifest
//! - GPU resource tracker used to verify teardown
//! - Model optimizer (buffer usage, precision, texture filtering, frozen matrices)
//! - Scene object registry for the named showroom objects
//! - Video plane click handling and the playback overlay slot
//! - Cable pulse effect

pub mod camera;
pub mod effect;
pub mod geometry;
pub mod graph;
pub mod material;
pub mod model;
pub mod optimizer;
pub mod registry;
pub mod resources;
pub mod video;

pub use camera::{intersect_nodes, Intersection, PerspectiveCamera, Pointer, Ray};
pub use effect::{CablePulseEffect, EffectError, PulseParams, PulseParamsUpdate};
pub use geometry::{Aabb, BufferAttribute, BufferUsage, Geometry};
pub use graph::{MeshData, Node, NodeId, SceneGraph, Transform};
pub use material::{Material, MaterialKind, MaterialSlot, Precision, Texture};
pub use model::{dispose_graph, register_graph, AssetMetadata, DisposeStats, LoadedModel};
pub use optimizer::{optimize_components, optimize_graph, OptimizationLevel, OptimizeStats};
pub use registry::ReflectorFace;
pub use resources::{ResourceId, ResourceKind, ResourceTracker};
pub use video::{PlaybackOverlay, VideoPlaneHandler, VideoPlayback, VideoSource};

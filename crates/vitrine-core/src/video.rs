//! Video plane: streaming texture, enlarged click target and playback overlay

use glam::Vec3;
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;
use tracing::{debug, info};

use crate::camera::{intersect_nodes, PerspectiveCamera, Pointer};
use crate::geometry::Geometry;
use crate::graph::{MeshData, Node, NodeId, SceneGraph, Transform};
use crate::material::{Material, MaterialKind, MaterialSlot, Side, Texture, VideoMaterial};
use crate::registry::{lookup, VIDEO_PLANE};
use crate::resources::{ResourceKind, ResourceTracker};

pub const DEFAULT_VIDEO_URL: &str = "/video/videocompress.mp4";

const VIDEO_PLANE_POSITION: Vec3 = Vec3::new(-5.0, 0.0, 0.0);
const VIDEO_PLANE_ROTATION: Vec3 = Vec3::new(FRAC_PI_2, 0.0, -FRAC_PI_2);
const HIT_PLANE_SIZE: f32 = 5.0;
const HIT_PLANE_NAME: &str = "VideoPlaneHitArea";

/// Video stream shown on the plane and handed to the overlay
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSource {
    pub url: String,
    /// Playback position in seconds
    pub current_time: f64,
}

/// Full-screen playback UI provided by the host
pub trait PlaybackOverlay: Send {
    /// Show the overlay playing `source` from its current time
    fn open(&mut self, source: &VideoSource);
    /// Hide the overlay and pause playback
    fn close(&mut self);
    /// Tear the overlay down for good
    fn dispose(&mut self);
}

/// Owns the video plane decoration and its click handling
pub struct VideoPlaneHandler {
    source: VideoSource,
    video_plane: NodeId,
    hit_plane: Option<NodeId>,
    material: Arc<Material>,
    overlay: Box<dyn PlaybackOverlay>,
    tracker: ResourceTracker,
}

impl VideoPlaneHandler {
    /// Decorate the `VideoPlane` node of `graph`. Returns `None` when the
    /// model has no video plane.
    pub fn setup(
        graph: &mut SceneGraph,
        video_url: &str,
        overlay: Box<dyn PlaybackOverlay>,
        tracker: ResourceTracker,
    ) -> Option<Self> {
        let id = lookup(graph, VIDEO_PLANE)?;

        let material = Material {
            side: Side::Double,
            tone_mapped: false,
            ..Material::new(MaterialKind::Video(VideoMaterial {
                texture: Texture::video(video_url),
            }))
        };
        tracker.register(material.id, ResourceKind::Material);
        for texture in material.texture_slots() {
            tracker.register(texture.id, ResourceKind::Texture);
        }

        let transform = Transform {
            position: VIDEO_PLANE_POSITION,
            rotation: VIDEO_PLANE_ROTATION,
            scale: Vec3::ONE,
        };

        let material = Arc::new(material);
        let parent = {
            let node = graph.get_mut(id)?;
            let material = MaterialSlot::Single(material.clone());
            match node.mesh.as_mut() {
                Some(mesh) => mesh.material = material,
                None => {
                    let geometry = Geometry::plane(1.0, 1.0);
                    tracker.register(geometry.id, ResourceKind::Geometry);
                    node.mesh = Some(MeshData {
                        geometry: Arc::new(geometry),
                        material,
                    });
                }
            }
            node.transform = transform;
            node.matrix_auto_update = false;
            node.matrix = transform.matrix();
            node.parent
        };

        let geometry = Geometry::plane(HIT_PLANE_SIZE, HIT_PLANE_SIZE);
        let hit_material = Material::invisible();
        tracker.register(geometry.id, ResourceKind::Geometry);
        tracker.register(hit_material.id, ResourceKind::Material);

        let mut hit_node = Node::new(HIT_PLANE_NAME)
            .with_transform(transform)
            .with_mesh(MeshData {
                geometry: Arc::new(geometry),
                material: MaterialSlot::Single(Arc::new(hit_material)),
            });
        hit_node.visible = false;
        hit_node.matrix_auto_update = false;
        let hit_plane = match parent {
            Some(p) => graph.add_child(p, hit_node),
            None => graph.add_root(hit_node),
        };

        info!(url = %video_url, node = %id, "Video plane ready");

        Some(Self {
            source: VideoSource {
                url: video_url.to_string(),
                current_time: 0.0,
            },
            video_plane: id,
            hit_plane: Some(hit_plane),
            material,
            overlay,
            tracker,
        })
    }

    pub fn video_plane(&self) -> NodeId {
        self.video_plane
    }

    pub fn hit_plane(&self) -> Option<NodeId> {
        self.hit_plane
    }

    pub fn source(&self) -> &VideoSource {
        &self.source
    }

    /// Track the inline video's playback position
    pub fn set_current_time(&mut self, seconds: f64) {
        self.source.current_time = seconds;
    }

    /// Ray-cast a click against the plane and its hit area; opens the
    /// overlay on a hit. Returns whether the click hit.
    pub fn handle_click(
        &mut self,
        graph: &SceneGraph,
        camera: &PerspectiveCamera,
        pointer: &Pointer,
    ) -> bool {
        let ray = camera.ray_from_ndc(pointer.to_ndc());
        let mut targets = vec![self.video_plane];
        targets.extend(self.hit_plane);

        if intersect_nodes(graph, &ray, &targets).is_empty() {
            return false;
        }

        debug!(url = %self.source.url, at = self.source.current_time, "Opening playback overlay");
        self.overlay.open(&self.source);
        true
    }

    pub fn close(&mut self) {
        self.overlay.close();
    }

    /// Close and drop the overlay, remove the hit area from `graph` and
    /// release its resources along with the video material and texture.
    /// `graph` must be the graph passed to `setup`.
    pub fn dispose(&mut self, graph: &mut SceneGraph) {
        self.overlay.close();
        self.overlay.dispose();

        self.tracker.dispose(self.material.id);
        for texture in self.material.texture_slots() {
            self.tracker.dispose(texture.id);
        }

        if let Some(hit_plane) = self.hit_plane.take() {
            graph.detach(hit_plane);
            if let Some(mesh) = graph.get(hit_plane).and_then(|n| n.mesh.as_ref()) {
                self.tracker.dispose(mesh.geometry.id);
                for material in mesh.material.iter() {
                    self.tracker.dispose(material.id);
                }
            }
        }
    }
}

/// Slot holding the one live video handler
#[derive(Default)]
pub struct VideoPlayback {
    handler: Option<VideoPlaneHandler>,
}

impl VideoPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up the video plane, disposing any previous handler first
    pub fn install(
        &mut self,
        graph: &mut SceneGraph,
        video_url: &str,
        overlay: Box<dyn PlaybackOverlay>,
        tracker: ResourceTracker,
    ) -> Option<NodeId> {
        if let Some(mut previous) = self.handler.take() {
            debug!("Replacing existing video handler");
            previous.dispose(graph);
        }
        self.handler = VideoPlaneHandler::setup(graph, video_url, overlay, tracker);
        self.handler.as_ref().map(VideoPlaneHandler::video_plane)
    }

    pub fn handler(&self) -> Option<&VideoPlaneHandler> {
        self.handler.as_ref()
    }

    pub fn handler_mut(&mut self) -> Option<&mut VideoPlaneHandler> {
        self.handler.as_mut()
    }

    pub fn handle_click(
        &mut self,
        graph: &SceneGraph,
        camera: &PerspectiveCamera,
        pointer: &Pointer,
    ) -> bool {
        match self.handler.as_mut() {
            Some(handler) => handler.handle_click(graph, camera, pointer),
            None => false,
        }
    }

    pub fn dispose(&mut self, graph: &mut SceneGraph) {
        if let Some(mut handler) = self.handler.take() {
            handler.dispose(graph);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Ray;
    use crate::model::dispose_graph;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct RecordingOverlay {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl PlaybackOverlay for RecordingOverlay {
        fn open(&mut self, source: &VideoSource) {
            self.events.lock().push(format!("open {}", source.url));
        }
        fn close(&mut self) {
            self.events.lock().push("close".into());
        }
        fn dispose(&mut self) {
            self.events.lock().push("dispose".into());
        }
    }

    fn model() -> SceneGraph {
        let mut graph = SceneGraph::new();
        let root = graph.add_root(Node::new("Scene"));
        graph.add_child(
            root,
            Node::new(VIDEO_PLANE).with_mesh(MeshData {
                geometry: Arc::new(Geometry::plane(0.5, 0.5)),
                material: MaterialSlot::Single(Arc::new(Material::basic([1.0; 4]))),
            }),
        );
        graph
    }

    /// Camera looking straight at the video plane from 10 units away
    fn facing_camera(graph: &SceneGraph, plane: NodeId) -> PerspectiveCamera {
        let world = graph.world_matrix(plane);
        let normal = world.transform_vector3(Vec3::Z).normalize();
        PerspectiveCamera {
            position: VIDEO_PLANE_POSITION + normal * 10.0,
            target: VIDEO_PLANE_POSITION,
            up: if normal.y.abs() > 0.9 { Vec3::Z } else { Vec3::Y },
            fov: 60.0,
            aspect: 1.0,
            ..Default::default()
        }
    }

    fn pointer_at(ndc_x: f32, ndc_y: f32) -> Pointer {
        Pointer {
            x: (ndc_x + 1.0) * 500.0,
            y: (1.0 - ndc_y) * 500.0,
            viewport_width: 1000.0,
            viewport_height: 1000.0,
        }
    }

    #[test]
    fn test_setup_replaces_material_and_adds_hit_area() {
        let mut graph = model();
        let tracker = ResourceTracker::new();
        let overlay = RecordingOverlay::default();
        let handler =
            VideoPlaneHandler::setup(&mut graph, DEFAULT_VIDEO_URL, Box::new(overlay), tracker.clone())
                .unwrap();

        let plane = graph.get(handler.video_plane()).unwrap();
        let material = plane.mesh.as_ref().unwrap().material.first().unwrap().clone();
        assert!(matches!(material.kind, MaterialKind::Video(_)));
        assert_eq!(material.side, Side::Double);
        assert!(!material.tone_mapped);
        assert_eq!(plane.transform.position, VIDEO_PLANE_POSITION);
        assert!(!plane.matrix_auto_update);

        let hit = graph.get(handler.hit_plane().unwrap()).unwrap();
        assert_eq!(hit.transform, plane.transform);
        assert_eq!(hit.parent, plane.parent);
        // video material + video texture + hit geometry + hit material
        assert_eq!(tracker.live_count(), 4);
    }

    #[test]
    fn test_click_opens_overlay_only_on_hit() {
        let mut graph = model();
        let overlay = RecordingOverlay::default();
        let events = overlay.events.clone();
        let mut handler = VideoPlaneHandler::setup(
            &mut graph,
            DEFAULT_VIDEO_URL,
            Box::new(overlay),
            ResourceTracker::new(),
        )
        .unwrap();
        let camera = facing_camera(&graph, handler.video_plane());

        assert!(!handler.handle_click(&graph, &camera, &pointer_at(1.0, 1.0)));
        assert!(events.lock().is_empty());

        // Off the small video plane but inside the enlarged hit area
        let pointer = pointer_at(0.2, 0.0);
        let ray: Ray = camera.ray_from_ndc(pointer.to_ndc());
        let hits = intersect_nodes(&graph, &ray, &[handler.video_plane(), handler.hit_plane().unwrap()]);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node, handler.hit_plane().unwrap());

        assert!(handler.handle_click(&graph, &camera, &pointer));
        assert_eq!(*events.lock(), vec![format!("open {}", DEFAULT_VIDEO_URL)]);
    }

    #[test]
    fn test_install_disposes_previous_handler() {
        let mut graph = model();
        let tracker = ResourceTracker::new();
        let first = RecordingOverlay::default();
        let first_events = first.events.clone();
        let mut playback = VideoPlayback::new();

        playback.install(&mut graph, DEFAULT_VIDEO_URL, Box::new(first), tracker.clone());
        let first_hit = playback.handler().unwrap().hit_plane().unwrap();

        playback.install(&mut graph, DEFAULT_VIDEO_URL, Box::new(RecordingOverlay::default()), tracker.clone());

        assert_eq!(*first_events.lock(), vec!["close".to_string(), "dispose".to_string()]);
        assert!(graph.traverse().all(|id| id != first_hit));
        assert_eq!(
            graph.traverse().filter(|id| graph.get(*id).unwrap().name == HIT_PLANE_NAME).count(),
            1
        );

        playback.dispose(&mut graph);
        assert!(playback.handler().is_none());
    }

    #[test]
    fn test_reinstall_then_teardown_leaves_nothing_live() {
        let mut graph = model();
        let tracker = ResourceTracker::new();
        let mut playback = VideoPlayback::new();

        playback.install(&mut graph, DEFAULT_VIDEO_URL, Box::new(RecordingOverlay::default()), tracker.clone());
        assert_eq!(tracker.live_count(), 4);
        playback.install(&mut graph, DEFAULT_VIDEO_URL, Box::new(RecordingOverlay::default()), tracker.clone());
        // The first handler's video material, texture and hit area are gone
        assert_eq!(tracker.live_count(), 4);

        playback.dispose(&mut graph);
        dispose_graph(&graph, &tracker);
        assert_eq!(tracker.live_count(), 0);
    }

    #[test]
    fn test_missing_video_plane() {
        let mut graph = SceneGraph::new();
        graph.add_root(Node::new("Scene"));
        let mut playback = VideoPlayback::new();
        let installed = playback.install(
            &mut graph,
            DEFAULT_VIDEO_URL,
            Box::new(RecordingOverlay::default()),
            ResourceTracker::new(),
        );
        assert!(installed.is_none());
        assert!(!playback.handle_click(&graph, &PerspectiveCamera::default(), &pointer_at(0.0, 0.0)));
    }
}

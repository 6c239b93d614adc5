//! GPU resource bookkeeping
//!
//! Geometries, materials and textures are uploaded to the GPU by the external
//! renderer. The tracker records which of them are still live so teardown can
//! prove nothing leaked across scene rebuilds.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a GPU-side resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub u64);

impl ResourceId {
    /// Allocate a fresh, process-unique id
    pub fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of GPU resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Geometry,
    Material,
    Texture,
}

#[derive(Debug, Default)]
struct TrackerState {
    live: HashMap<ResourceId, ResourceKind>,
    disposed: u64,
}

/// Shared registry of live GPU resources
///
/// Cloning the tracker yields another handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    inner: Arc<Mutex<TrackerState>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resource as live
    pub fn register(&self, id: ResourceId, kind: ResourceKind) {
        self.inner.lock().live.insert(id, kind);
    }

    /// Release a resource. Returns false if it was unknown or already disposed.
    pub fn dispose(&self, id: ResourceId) -> bool {
        let mut state = self.inner.lock();
        match state.live.remove(&id) {
            Some(kind) => {
                state.disposed += 1;
                trace!(id = %id, kind = ?kind, "Disposed GPU resource");
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self, id: ResourceId) -> bool {
        self.inner.lock().live.contains_key(&id)
    }

    /// Number of live resources
    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    /// Number of live resources of one kind
    pub fn live_count_of(&self, kind: ResourceKind) -> usize {
        self.inner.lock().live.values().filter(|k| **k == kind).count()
    }

    /// Total successful disposals since creation
    pub fn disposed_count(&self) -> u64 {
        self.inner.lock().disposed
    }
}

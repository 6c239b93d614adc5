//! Model cache
//!
//! Loads each distinct asset path once, retrying transient failures with
//! backoff, optimizes the result and keeps it until an explicit unload or
//! cleanup. Later loads of a cached path get an independent copy of the node
//! tree; geometry, materials and textures stay shared read-only through `Arc`.
//!
//! Every operation on a path runs under that path's async lock, so a
//! concurrent second load waits for the first and is served from the cache,
//! and an unload never overlaps a load of the same path.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vitrine_core::model::register_graph;
use vitrine_core::{dispose_graph, optimize_graph, LoadedModel, OptimizationLevel, ResourceTracker};

use crate::error::LoadError;
use crate::loader::AssetLoader;
use crate::retry::RetryPolicy;
use crate::source::ProgressEvent;

/// Receives `(percent, raw event)` while an asset downloads
pub type ProgressCallback = Arc<dyn Fn(f32, &ProgressEvent) + Send + Sync>;

/// Receives the final error of a failed load
pub type ErrorCallback = Arc<dyn Fn(&LoadError) + Send + Sync>;

/// Per-call load options
#[derive(Clone)]
pub struct LoadOptions {
    pub on_progress: Option<ProgressCallback>,
    pub on_error: Option<ErrorCallback>,
    pub use_cache: bool,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub optimization_level: OptimizationLevel,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            on_progress: None,
            on_error: None,
            use_cache: true,
            max_retries: 3,
            optimization_level: OptimizationLevel::Medium,
        }
    }
}

impl std::fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("use_cache", &self.use_cache)
            .field("max_retries", &self.max_retries)
            .field("optimization_level", &self.optimization_level)
            .finish()
    }
}

impl LoadOptions {
    pub fn with_progress(mut self, f: impl Fn(f32, &ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn with_error(mut self, f: impl Fn(&LoadError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn optimization_level(mut self, level: OptimizationLevel) -> Self {
        self.optimization_level = level;
        self
    }
}

/// Progress of a load that has not settled yet
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadingState {
    /// Percent in [0, 100], never decreasing
    pub progress: f32,
    pub started_at: DateTime<Utc>,
}

struct CacheEntry {
    model: LoadedModel,
    cached_at: DateTime<Utc>,
}

pub struct ModelCache<L> {
    loader: L,
    retry: RetryPolicy,
    tracker: ResourceTracker,
    entries: RwLock<HashMap<String, CacheEntry>>,
    loading: Mutex<HashMap<String, LoadingState>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Bumped by cleanup; loads that started earlier do not populate the cache
    generation: AtomicU64,
}

impl<L: AssetLoader> ModelCache<L> {
    pub fn new(loader: L, retry: RetryPolicy, tracker: ResourceTracker) -> Self {
        Self {
            loader,
            retry,
            tracker,
            entries: RwLock::new(HashMap::new()),
            loading: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `op` under the path's async lock. The lock's map entry is dropped
    /// afterwards unless another caller holds or waits on it.
    async fn with_path_lock<F: Future>(&self, path: &str, op: F) -> F::Output {
        let lock = self
            .locks
            .lock()
            .entry(path.to_string())
            .or_default()
            .clone();
        let output = {
            let _guard = lock.lock().await;
            op.await
        };

        let mut locks = self.locks.lock();
        // The map and `lock` are the only holders
        if Arc::strong_count(&lock) == 2 {
            locks.remove(path);
        }
        output
    }

    /// Paths with a live async lock
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    fn cached_copy(&self, path: &str) -> Option<LoadedModel> {
        self.entries.read().get(path).map(|entry| entry.model.clone())
    }

    /// Load `path`, from the cache when allowed.
    ///
    /// A fresh load retries transient failures per the retry policy, then
    /// optimizes the graph before returning it. Failures never create a
    /// cache entry and invoke `on_error` once.
    pub async fn load(&self, path: &str, options: LoadOptions) -> Result<LoadedModel, LoadError> {
        self.with_path_lock(path, self.load_locked(path, options)).await
    }

    async fn load_locked(&self, path: &str, options: LoadOptions) -> Result<LoadedModel, LoadError> {
        if options.use_cache {
            if let Some(model) = self.cached_copy(path) {
                debug!(path = %path, "Serving model from cache");
                return Ok(model);
            }
        }

        let generation = self.generation.load(Ordering::SeqCst);
        self.loading.lock().insert(
            path.to_string(),
            LoadingState {
                progress: 0.0,
                started_at: Utc::now(),
            },
        );
        let result = self.load_with_retry(path, &options).await;
        self.loading.lock().remove(path);

        let mut model = match result {
            Ok(model) => model,
            Err(e) => {
                error!(path = %path, attempts = e.attempts, error = %e.source, "Failed to load model");
                if let Some(on_error) = &options.on_error {
                    on_error(&e);
                }
                return Err(e);
            }
        };

        optimize_graph(&mut model.scene, options.optimization_level);
        register_graph(&model.scene, &self.tracker);

        if options.use_cache {
            if self.generation.load(Ordering::SeqCst) == generation {
                self.entries.write().insert(
                    path.to_string(),
                    CacheEntry {
                        model: model.clone(),
                        cached_at: Utc::now(),
                    },
                );
                debug!(path = %path, "Cached model");
            } else {
                warn!(path = %path, "Cache was cleaned up during load, not caching");
            }
        }

        Ok(model)
    }

    async fn load_with_retry(&self, path: &str, options: &LoadOptions) -> Result<LoadedModel, LoadError> {
        let request_id = Uuid::new_v4();
        let report = |event: ProgressEvent| {
            let Some(percent) = event.percent() else {
                return;
            };
            let percent = match self.loading.lock().get_mut(path) {
                Some(state) => {
                    state.progress = state.progress.max(percent);
                    state.progress
                }
                None => percent,
            };
            if let Some(on_progress) = &options.on_progress {
                on_progress(percent, &event);
            }
        };

        let mut attempt = 1;
        loop {
            debug!(request_id = %request_id, path = %path, attempt, "Fetching model");
            match self.loader.load(path, &report).await {
                Ok(model) => {
                    info!(
                        request_id = %request_id,
                        path = %path,
                        attempt,
                        nodes = model.scene.len(),
                        "Model loaded"
                    );
                    return Ok(model);
                }
                Err(e) if e.is_transient() && attempt <= options.max_retries => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        request_id = %request_id,
                        path = %path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Model fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(LoadError {
                        path: path.to_string(),
                        attempts: attempt,
                        source: e,
                    })
                }
            }
        }
    }

    /// Dispose a cached model's GPU resources and drop the entry. Returns
    /// whether anything was cached.
    pub async fn unload(&self, path: &str) -> bool {
        self.with_path_lock(path, async { self.dispose_entry(path) }).await
    }

    fn dispose_entry(&self, path: &str) -> bool {
        let Some(entry) = self.entries.write().remove(path) else {
            return false;
        };
        let stats = dispose_graph(&entry.model.scene, &self.tracker);
        info!(
            path = %path,
            geometries = stats.geometries,
            materials = stats.materials,
            textures = stats.textures,
            cached_for_ms = (Utc::now() - entry.cached_at).num_milliseconds(),
            "Unloaded model"
        );
        true
    }

    /// Unload every cached path. Loads still in flight finish for their
    /// callers but are not cached.
    pub async fn cleanup(&self) -> usize {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut unloaded = 0;
        for path in self.cached_paths() {
            if self.unload(&path).await {
                unloaded += 1;
            }
        }
        // Locks left by loads that were cancelled mid-flight
        self.locks.lock().retain(|_, lock| Arc::strong_count(lock) > 1);
        info!(unloaded, "Model cache cleaned up");
        unloaded
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.read().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Cached paths, sorted
    pub fn cached_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.entries.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn loading_state(&self, path: &str) -> Option<LoadingState> {
        self.loading.lock().get(path).copied()
    }

    /// Percent complete of an in-flight load of `path`
    pub fn loading_progress(&self, path: &str) -> Option<f32> {
        self.loading_state(path).map(|state| state.progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::GltfDecoder;
    use crate::error::FetchError;
    use crate::fixtures;
    use crate::source::ProgressSink;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Fails the first `failures` calls with `error`, then serves the
    /// showroom fixture after an optional simulated download time
    struct ScriptedLoader {
        calls: AtomicU32,
        failures: u32,
        error: fn() -> FetchError,
        latency: Duration,
        call_times: Mutex<Vec<Instant>>,
    }

    impl ScriptedLoader {
        fn new(failures: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                error: || FetchError::Transport("connection reset".into()),
                latency: Duration::ZERO,
                call_times: Mutex::new(Vec::new()),
            }
        }

        fn always_failing() -> Self {
            Self::new(u32::MAX)
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn gaps(&self) -> Vec<Duration> {
            let times = self.call_times.lock();
            times.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    impl AssetLoader for ScriptedLoader {
        async fn load(&self, _path: &str, progress: &ProgressSink<'_>) -> Result<LoadedModel, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.call_times.lock().push(Instant::now());
            progress(ProgressEvent { loaded: 50, total: Some(100) });
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if call <= self.failures {
                return Err((self.error)());
            }
            progress(ProgressEvent { loaded: 100, total: Some(100) });
            GltfDecoder::default().decode_slice(fixtures::embedded_showroom().as_bytes())
        }
    }

    fn cache(loader: ScriptedLoader) -> ModelCache<ScriptedLoader> {
        ModelCache::new(loader, RetryPolicy::default(), ResourceTracker::new())
    }

    fn names(model: &LoadedModel) -> Vec<String> {
        model
            .scene
            .traverse()
            .map(|id| model.scene.get(id).unwrap().name.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_second_load_is_an_independent_copy() {
        let cache = cache(ScriptedLoader::new(0));

        let first = cache.load("a.gltf", LoadOptions::default()).await.unwrap();
        let mut second = cache.load("a.gltf", LoadOptions::default()).await.unwrap();

        assert_eq!(cache.loader().calls(), 1);
        assert_eq!(names(&first), names(&second));
        assert_eq!(first.metadata, second.metadata);

        let cables = second.scene.find_by_name("Cables").unwrap();
        second.scene.get_mut(cables).unwrap().name = "Renamed".into();
        assert!(first.scene.find_by_name("Cables").is_some());

        let third = cache.load("a.gltf", LoadOptions::default()).await.unwrap();
        assert!(third.scene.find_by_name("Cables").is_some());
    }

    #[tokio::test]
    async fn test_use_cache_false_always_fetches() {
        let cache = cache(ScriptedLoader::new(0));
        let options = LoadOptions::default().use_cache(false);
        cache.load("a.gltf", options.clone()).await.unwrap();
        cache.load("a.gltf", options).await.unwrap();
        assert_eq!(cache.loader().calls(), 2);
        assert!(!cache.contains("a.gltf"));
    }

    #[tokio::test]
    async fn test_loaded_model_is_optimized() {
        let cache = cache(ScriptedLoader::new(0));
        let model = cache
            .load("a.gltf", LoadOptions::default().optimization_level(OptimizationLevel::High))
            .await
            .unwrap();
        for id in model.scene.meshes() {
            let node = model.scene.get(id).unwrap();
            assert!(!node.matrix_auto_update);
            assert!(node.frustum_culled);
            assert!(node.mesh.as_ref().unwrap().geometry.bounding_sphere.is_some());
        }
        assert_eq!(cache.tracker().live_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound_and_backoff() {
        let cache = cache(ScriptedLoader::always_failing());
        let err = cache
            .load("a.gltf", LoadOptions::default().max_retries(4))
            .await
            .unwrap_err();

        assert_eq!(cache.loader().calls(), 5);
        assert_eq!(err.attempts, 5);
        assert_eq!(err.path, "a.gltf");
        assert!(matches!(err.source, FetchError::Transport(_)));

        let expected = [1000, 2000, 5000, 5000].map(Duration::from_millis);
        let gaps = cache.loader().gaps();
        assert_eq!(gaps.len(), expected.len());
        for (gap, want) in gaps.iter().zip(expected) {
            assert!(*gap >= want && *gap < want + Duration::from_millis(10), "gap {gap:?}, want {want:?}");
        }
        assert!(!cache.contains("a.gltf"));
        assert!(cache.loading_progress("a.gltf").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_two_failures() {
        let cache = cache(ScriptedLoader::new(2));
        let started = Instant::now();

        let model = cache
            .load("a.gltf", LoadOptions::default().max_retries(2))
            .await
            .unwrap();

        assert!(model.scene.find_by_name("Cables").is_some());
        assert_eq!(cache.loader().calls(), 3);
        assert_eq!(cache.cached_paths(), vec!["a.gltf".to_string()]);

        // Attempt 2 waits the first delay and attempt 3 the second
        let expected = [1000, 2000].map(Duration::from_millis);
        let gaps = cache.loader().gaps();
        assert_eq!(gaps.len(), expected.len());
        for (gap, want) in gaps.iter().zip(expected) {
            assert!(*gap >= want && *gap < want + Duration::from_millis(10), "gap {gap:?}, want {want:?}");
        }
        let total = started.elapsed();
        assert!(total >= Duration::from_millis(3000) && total < Duration::from_millis(3010));
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let mut loader = ScriptedLoader::always_failing();
        loader.error = || FetchError::Decode("unexpected end of JSON".into());
        let cache = cache(loader);

        let errors = Arc::new(AtomicU32::new(0));
        let counter = errors.clone();
        let err = cache
            .load(
                "a.gltf",
                LoadOptions::default().with_error(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(cache.loader().calls(), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_error_called_once_after_retries() {
        let cache = cache(ScriptedLoader::always_failing());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = errors.clone();
        let options = LoadOptions::default()
            .max_retries(2)
            .with_error(move |e| seen.lock().push(e.attempts));

        assert!(cache.load("a.gltf", options).await.is_err());
        assert_eq!(*errors.lock(), vec![3]);
    }

    #[tokio::test]
    async fn test_unload_disposes_and_forces_refetch() {
        let cache = cache(ScriptedLoader::new(0));
        cache.load("a.gltf", LoadOptions::default()).await.unwrap();
        assert!(cache.tracker().live_count() > 0);

        assert!(cache.unload("a.gltf").await);
        assert!(!cache.contains("a.gltf"));
        assert_eq!(cache.tracker().live_count(), 0);
        assert!(!cache.unload("a.gltf").await);

        cache.load("a.gltf", LoadOptions::default()).await.unwrap();
        assert_eq!(cache.loader().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_path_locks_are_released() {
        let mut loader = ScriptedLoader::new(1);
        loader.latency = Duration::from_millis(100);
        let cache = cache(loader);

        // A failed load leaves no lock behind
        let err = cache.load("bad.gltf", LoadOptions::default().max_retries(0)).await;
        assert!(err.is_err());
        assert_eq!(cache.lock_count(), 0);

        let (a, b) = tokio::join!(
            cache.load("a.gltf", LoadOptions::default()),
            cache.load("a.gltf", LoadOptions::default())
        );
        assert!(a.is_ok() && b.is_ok());
        cache.load("b.gltf", LoadOptions::default()).await.unwrap();
        assert_eq!(cache.lock_count(), 0);

        assert!(cache.unload("a.gltf").await);
        assert!(!cache.unload("never-loaded.gltf").await);
        assert_eq!(cache.lock_count(), 0);

        for i in 0..20 {
            cache.load(&format!("m{i}.gltf"), LoadOptions::default()).await.unwrap();
        }
        assert_eq!(cache.cleanup().await, 21);
        assert_eq!(cache.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_unloads_everything() {
        let cache = cache(ScriptedLoader::new(0));
        cache.load("a.gltf", LoadOptions::default()).await.unwrap();
        cache.load("b.gltf", LoadOptions::default()).await.unwrap();
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.cleanup().await, 2);
        assert!(cache.is_empty());
        assert_eq!(cache.tracker().live_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_loads_coalesce() {
        let mut loader = ScriptedLoader::new(0);
        loader.latency = Duration::from_millis(100);
        let cache = cache(loader);

        let (a, b) = tokio::join!(
            cache.load("a.gltf", LoadOptions::default()),
            cache.load("a.gltf", LoadOptions::default())
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(cache.loader().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_in_flight_during_cleanup_is_not_cached() {
        let mut loader = ScriptedLoader::new(0);
        loader.latency = Duration::from_millis(100);
        let cache = cache(loader);

        let (loaded, unloaded) = tokio::join!(cache.load("a.gltf", LoadOptions::default()), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.cleanup().await
        });
        assert!(loaded.is_ok());
        assert_eq!(unloaded, 0);
        assert!(!cache.contains("a.gltf"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_is_reported_and_tracked() {
        let mut loader = ScriptedLoader::new(0);
        loader.latency = Duration::from_millis(100);
        let cache = cache(loader);

        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        let options = LoadOptions::default().with_progress(move |percent, _| sink.lock().push(percent));

        let (loaded, during) = tokio::join!(cache.load("a.gltf", options), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.loading_progress("a.gltf")
        });
        assert!(loaded.is_ok());
        assert_eq!(during, Some(50.0));
        assert_eq!(*reported.lock(), vec![50.0, 100.0]);
        assert!(cache.loading_state("a.gltf").is_none());
    }
}

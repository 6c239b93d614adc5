//! Loader service lifecycle
//!
//! The model cache is constructed once and handed to consumers explicitly.
//! Teardown cleans the cache up and empties the slot; the next access builds
//! a fresh cache. Teardown of an empty slot does nothing.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use crate::cache::ModelCache;
use crate::loader::AssetLoader;

type Factory<L> = Box<dyn Fn() -> ModelCache<L> + Send + Sync>;

pub struct LoaderService<L> {
    factory: Factory<L>,
    slot: Mutex<Option<Arc<ModelCache<L>>>>,
}

impl<L: AssetLoader> LoaderService<L> {
    /// Build the service and its first cache
    pub fn create(factory: impl Fn() -> ModelCache<L> + Send + Sync + 'static) -> Self {
        let service = Self {
            factory: Box::new(factory),
            slot: Mutex::new(None),
        };
        service.cache();
        service
    }

    /// The live cache, building a new one after a teardown
    pub fn cache(&self) -> Arc<ModelCache<L>> {
        self.slot
            .lock()
            .get_or_insert_with(|| {
                info!("Creating model loader");
                Arc::new((self.factory)())
            })
            .clone()
    }

    pub fn is_live(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Clean up and release the live cache. Returns how many models were
    /// unloaded.
    pub async fn teardown(&self) -> usize {
        let Some(cache) = self.slot.lock().take() else {
            return 0;
        };
        let unloaded = cache.cleanup().await;
        info!(unloaded, "Model loader torn down");
        unloaded
    }
}

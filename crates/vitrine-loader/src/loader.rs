//! Asset loader: source + decoder chain

use std::collections::HashMap;
use std::future::Future;
use tracing::debug;

use vitrine_core::LoadedModel;

use crate::decoder::GltfDecoder;
use crate::error::FetchError;
use crate::source::{AssetSource, ProgressSink};

/// Loads one asset by path: a single attempt, no retries, no caching
pub trait AssetLoader: Send + Sync {
    fn load(
        &self,
        path: &str,
        progress: &ProgressSink<'_>,
    ) -> impl Future<Output = Result<LoadedModel, FetchError>> + Send;
}

/// glTF/GLB loader over any byte source
#[derive(Debug, Clone)]
pub struct GltfAssetLoader<S> {
    source: S,
    decoder: GltfDecoder,
}

impl<S: AssetSource> GltfAssetLoader<S> {
    pub fn new(source: S, decoder: GltfDecoder) -> Self {
        Self { source, decoder }
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: AssetSource> AssetLoader for GltfAssetLoader<S> {
    async fn load(&self, path: &str, progress: &ProgressSink<'_>) -> Result<LoadedModel, FetchError> {
        let bytes = self.source.fetch(path, progress).await?;
        let parsed = self.decoder.parse(&bytes)?;

        let mut external = HashMap::new();
        for (index, uri) in parsed.external_buffers() {
            let resolved = self.source.resolve(path, &uri);
            debug!(path = %path, buffer = %resolved, "Fetching external buffer");
            let data = self.source.fetch(&resolved, &|_| {}).await?;
            external.insert(index, data);
        }

        self.decoder.decode(parsed, external)
    }
}

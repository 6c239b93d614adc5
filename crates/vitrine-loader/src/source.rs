//! Where asset bytes come from
//!
//! Sources report cumulative byte progress as they read so the cache can
//! forward percentages to callers.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::FetchError;

const CHUNK_SIZE: usize = 64 * 1024;

/// Reported sizes only size the first allocation up to this bound
const MAX_PREALLOCATION: u64 = 16 * CHUNK_SIZE as u64;

/// Initial buffer capacity for a body of `total` bytes. The size comes from
/// file metadata or a Content-Length header and is not trusted.
fn initial_capacity(total: Option<u64>) -> usize {
    total.map_or(0, |t| t.min(MAX_PREALLOCATION) as usize)
}

/// Cumulative progress of one fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub loaded: u64,
    /// Total size when the source knows it
    pub total: Option<u64>,
}

impl ProgressEvent {
    /// Percentage in [0, 100], if the total is known
    pub fn percent(&self) -> Option<f32> {
        match self.total {
            Some(total) if total > 0 => {
                Some((self.loaded as f64 / total as f64 * 100.0).min(100.0) as f32)
            }
            _ => None,
        }
    }
}

/// Receives progress events during a fetch
pub type ProgressSink<'a> = dyn Fn(ProgressEvent) + Send + Sync + 'a;

/// Byte source for assets, addressed by relative path
pub trait AssetSource: Send + Sync {
    fn fetch(
        &self,
        path: &str,
        progress: &ProgressSink<'_>,
    ) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;

    /// Resolve `reference` (as written inside the asset at `path`) to a path
    /// this source can fetch
    fn resolve(&self, path: &str, reference: &str) -> String {
        match path.rsplit_once('/') {
            Some((dir, _)) => format!("{}/{}", dir, reference),
            None => reference.to_string(),
        }
    }
}

fn relative(path: &str) -> &str {
    path.trim_start_matches("./").trim_start_matches('/')
}

/// Assets on the local filesystem under `root`
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(relative(path))
    }
}

impl AssetSource for FileSource {
    async fn fetch(&self, path: &str, progress: &ProgressSink<'_>) -> Result<Vec<u8>, FetchError> {
        let full = self.full_path(path);
        let io_err = |source: std::io::Error| FetchError::Io {
            path: full.display().to_string(),
            source,
        };

        let mut file = tokio::fs::File::open(&full).await.map_err(io_err)?;
        let total = file.metadata().await.map_err(io_err)?.len();
        debug!(path = %full.display(), bytes = total, "Reading asset file");

        let mut bytes = Vec::with_capacity(initial_capacity(Some(total)));
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            let n = file.read(&mut chunk).await.map_err(io_err)?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..n]);
            progress(ProgressEvent {
                loaded: bytes.len() as u64,
                total: Some(total),
            });
        }
        Ok(bytes)
    }
}

/// Assets served over HTTP(S) relative to `base_url`
#[derive(Debug, Clone)]
pub struct HttpSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    /// Absolute URLs pass through; everything else joins onto the base
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url.trim_end_matches('/'), relative(path))
    }
}

impl AssetSource for HttpSource {
    async fn fetch(&self, path: &str, progress: &ProgressSink<'_>) -> Result<Vec<u8>, FetchError> {
        let url = self.url_for(path);
        debug!(url = %url, "Requesting asset");

        let mut response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Http {
                url,
                status: response.status().as_u16(),
            });
        }

        let total = response.content_length();
        let mut bytes = Vec::with_capacity(initial_capacity(total));
        while let Some(chunk) = response.chunk().await? {
            bytes.extend_from_slice(&chunk);
            progress(ProgressEvent {
                loaded: bytes.len() as u64,
                total,
            });
        }
        Ok(bytes)
    }
}

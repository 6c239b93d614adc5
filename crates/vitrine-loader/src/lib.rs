//! Vitrine Loader - Fetching, decoding and caching of 3D models
//!
//! This crate turns asset paths into optimized scene graphs:
//! - Asset sources for the local filesystem and HTTP, with byte progress
//! - glTF/GLB decoding into the vitrine-core scene model
//! - Retry with backoff on transient failures
//! - Path-keyed model cache with explicit unload and cleanup
//! - Loader service with a create / serve / teardown lifecycle

pub mod cache;
pub mod decoder;
pub mod error;
pub mod loader;
pub mod retry;
pub mod service;
pub mod source;

#[cfg(test)]
mod fixtures;

pub use cache::{LoadOptions, LoadingState, ModelCache};
pub use decoder::{DecoderConfig, GltfDecoder};
pub use error::{FetchError, LoadError};
pub use loader::{AssetLoader, GltfAssetLoader};
pub use retry::RetryPolicy;
pub use service::LoaderService;
pub use source::{AssetSource, FileSource, HttpSource, ProgressEvent};

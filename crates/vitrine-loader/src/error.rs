//! Fetch and load errors

use thiserror::Error;

/// A single failed attempt to obtain and decode an asset
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP {status} fetching {url}")]
    Http { url: String, status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode asset: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether another attempt could succeed. Malformed assets and client
    /// errors never will.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io { .. } | Self::Transport(_) => true,
            Self::Http { status, .. } => !(400..500).contains(status),
            Self::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<gltf::Error> for FetchError {
    fn from(e: gltf::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

/// A load that failed for good
#[derive(Debug, Error)]
#[error("failed to load {path} after {attempts} attempt(s): {source}")]
pub struct LoadError {
    pub path: String,
    pub attempts: u32,
    #[source]
    pub source: FetchError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let io = FetchError::Io {
            path: "model.gltf".into(),
            source: std::io::Error::new(std::io::ErrorKind::Interrupted, "interrupted"),
        };
        assert!(io.is_transient());
        assert!(FetchError::Transport("reset".into()).is_transient());
        assert!(FetchError::Http { url: "u".into(), status: 503 }.is_transient());
        assert!(!FetchError::Http { url: "u".into(), status: 404 }.is_transient());
        assert!(!FetchError::Decode("bad json".into()).is_transient());
    }

    #[test]
    fn test_load_error_message() {
        let err = LoadError {
            path: "a.gltf".into(),
            attempts: 3,
            source: FetchError::Transport("timed out".into()),
        };
        assert_eq!(
            err.to_string(),
            "failed to load a.gltf after 3 attempt(s): transport error: timed out"
        );
    }
}

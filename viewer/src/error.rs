//! Error types for the viewer's collaborators.
//!
//! Everything here is absorbed somewhere in the core: a failed fetch turns
//! into an ungrouped state, a failed download into remote playback, a failed
//! delete into a warning. Only configuration errors stop the process.

use std::path::PathBuf;
use thiserror::Error;

/// Failure to obtain the device state from the admin API.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("state request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("state endpoint returned HTTP {0}")]
    Status(u16),

    #[error("malformed state payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Failure of a single local store operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid cache filename {0:?}")]
    InvalidName(String),

    #[error("cache directory scan failed: {0}")]
    Scan(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure to download one asset.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download of {url} failed: {reason}")]
    Other { url: String, reason: String },
}

/// Settings could not be loaded or are out of range.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

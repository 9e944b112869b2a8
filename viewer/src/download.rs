//! Asset downloads.

use crate::error::DownloadError;
use async_trait::async_trait;
use bytes::Bytes;

/// Fetches remote media.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch the full body at `url`. One attempt, no retries.
    async fn fetch(&self, url: &str) -> Result<Bytes, DownloadError>;
}

/// Downloads over HTTP(S) with a shared client.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    /// Use `client` for every download. Its timeout applies per request.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> Result<Bytes, DownloadError> {
        let http = |source| DownloadError::Http {
            url: url.to_string(),
            source,
        };

        tracing::debug!("Downloading {}", url);
        let response = self.client.get(url).send().await.map_err(http)?;
        let response = response.error_for_status().map_err(http)?;
        response.bytes().await.map_err(http)
    }
}

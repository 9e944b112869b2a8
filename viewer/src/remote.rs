//! Device state from the admin API.

use crate::assets::{DeviceState, TvState};
use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

/// Result of a successful state request.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Assigned(DeviceState),
    /// The authority does not know this device yet. Normal for a new device.
    NotAssigned,
}

/// Authority for the device state.
#[async_trait]
pub trait RemoteStateProvider: Send + Sync {
    async fn fetch_state(&self, device_id: &str) -> Result<FetchOutcome, FetchError>;
}

/// Fetches `GET {api_url}/tv-state/{device_id}`.
pub struct HttpStateProvider {
    client: Client,
    api_url: String,
}

impl HttpStateProvider {
    /// Provider for the API rooted at `api_url`.
    pub fn new(client: Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
        }
    }

    fn state_url(&self, device_id: &str) -> String {
        format!(
            "{}/tv-state/{}",
            self.api_url.trim_end_matches('/'),
            urlencoding::encode(device_id)
        )
    }
}

/// Parse a `tv-state` response body.
pub fn parse_state(body: &str) -> Result<DeviceState, FetchError> {
    let state: TvState = serde_json::from_str(body)?;
    Ok(state.into())
}

#[async_trait]
impl RemoteStateProvider for HttpStateProvider {
    async fn fetch_state(&self, device_id: &str) -> Result<FetchOutcome, FetchError> {
        let url = self.state_url(device_id);
        tracing::debug!("Fetching device state from {}", url);

        let res = self.client.get(&url).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(FetchOutcome::NotAssigned);
        }
        if !res.status().is_success() {
            return Err(FetchError::Status(res.status().as_u16()));
        }

        let body = res.text().await?;
        let state = parse_state(&body)?;
        tracing::debug!(
            grouped = state.is_grouped(),
            assets = state.assets().len(),
            priority = state.priority_stream.is_some(),
            "Fetched device state"
        );
        Ok(FetchOutcome::Assigned(state))
    }
}

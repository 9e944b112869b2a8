//! Viewer settings.
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file (`VIEWER_CONFIG`, default `viewer.toml`), then `VIEWER_*` environment
//! variables. Nested keys use a double underscore, e.g.
//! `VIEWER_RECONNECT__MAX_DELAY_MS=60000`.

use crate::error::ConfigError;
use crate::realtime::ReconnectConfig;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings of the viewer.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Base URL of the admin REST API.
    pub api_url: String,
    /// WebSocket endpoint of the push server.
    pub push_url: String,
    pub cache_dir: PathBuf,
    /// Fixed device id. When unset, one is generated and kept in `device_id_path`.
    #[serde(default)]
    pub device_id: Option<String>,
    pub device_id_path: PathBuf,
    pub default_image_duration_secs: f32,
    pub download_concurrency: usize,
    pub request_timeout_secs: u64,
    /// How long the headless surface pretends a video without a duration plays.
    pub headless_video_secs: f32,
    pub reconnect: ReconnectSettings,
}

/// Push channel backoff, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Settings {
    /// Load from the default locations.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var("VIEWER_CONFIG").unwrap_or_else(|_| "viewer.toml".into());
        Self::load_from(Some(Path::new(&file)))
    }

    /// Load with an optional settings file. A missing file is not an error.
    pub fn load_from(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("api_url", "http://localhost:9002/api")?
            .set_default("push_url", "ws://localhost:8080")?
            .set_default("cache_dir", "ad-cache")?
            .set_default("device_id_path", "tv-id")?
            .set_default("default_image_duration_secs", 10.0)?
            .set_default("download_concurrency", 1_i64)?
            .set_default("request_timeout_secs", 30_i64)?
            .set_default("headless_video_secs", 30.0)?
            .set_default("reconnect.initial_delay_ms", 1000_i64)?
            .set_default("reconnect.max_delay_ms", 30_000_i64)?
            .set_default("reconnect.multiplier", 2.0)?;

        if let Some(file) = file {
            builder =
                builder.add_source(File::from(file).format(FileFormat::Toml).required(false));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("VIEWER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.download_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "download_concurrency",
                reason: "must be at least 1".into(),
            });
        }
        if !is_positive(self.default_image_duration_secs) {
            return Err(ConfigError::Invalid {
                key: "default_image_duration_secs",
                reason: "must be positive".into(),
            });
        }
        if !is_positive(self.headless_video_secs) {
            return Err(ConfigError::Invalid {
                key: "headless_video_secs",
                reason: "must be positive".into(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "request_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        if self.reconnect.initial_delay_ms == 0 || self.reconnect.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                key: "reconnect",
                reason: "delay must be positive and multiplier at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn default_image_duration(&self) -> Duration {
        Duration::from_secs_f32(self.default_image_duration_secs)
    }

    pub fn headless_video(&self) -> Duration {
        Duration::from_secs_f32(self.headless_video_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Backoff for the push channel. `max_delay` never drops below `initial_delay`.
    pub fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(
                self.reconnect.max_delay_ms.max(self.reconnect.initial_delay_ms),
            ),
            multiplier: self.reconnect.multiplier,
        }
    }
}

fn is_positive(secs: f32) -> bool {
    secs.is_finite() && secs > 0.0
}

//! Rendering surfaces.
//!
//! A surface receives every new [`Projection`] and reports the natural end of
//! non-looping video playback through a [`CompletionSink`]. The viewer ships
//! a headless surface that logs what would be on screen.

use crate::assets::{MediaKind, StreamKind};
use crate::scheduler::{DisplayItem, DisplayMode, Event, Projection};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Reports playback completion back to the scheduler.
#[derive(Debug, Clone)]
pub struct CompletionSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl CompletionSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// The playback started for `epoch` reached its end.
    pub fn completed(&self, epoch: u64) {
        let _ = self.tx.send(Event::PlaybackCompleted { epoch });
    }
}

/// Presents projections.
pub trait PlaybackSurface: Send {
    /// Called whenever the projection changes. Playback restarts only when
    /// the epoch or the mode differs from what is already showing.
    fn present(&mut self, projection: &Projection, completions: CompletionSink);
}

/// Surface for devices without a display stack, and for diagnostics.
///
/// Videos "play" for their declared duration, or `fallback_video` when the
/// playlist gives none, then report completion.
pub struct HeadlessSurface {
    device_id: String,
    fallback_video: Duration,
    showing: Option<(DisplayMode, u64)>,
    playback: Option<AbortHandle>,
}

impl HeadlessSurface {
    pub fn new(device_id: impl Into<String>, fallback_video: Duration) -> Self {
        Self {
            device_id: device_id.into(),
            fallback_video,
            showing: None,
            playback: None,
        }
    }

    fn stop(&mut self) {
        if let Some(playback) = self.playback.take() {
            playback.abort();
        }
    }
}

impl Drop for HeadlessSurface {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PlaybackSurface for HeadlessSurface {
    fn present(&mut self, projection: &Projection, completions: CompletionSink) {
        let key = (projection.mode, projection.epoch);
        if self.showing == Some(key) {
            tracing::debug!(epoch = projection.epoch, "Source updated for current item");
            return;
        }
        self.stop();
        self.showing = Some(key);

        match (&projection.mode, &projection.item) {
            (DisplayMode::Idle, _) if !projection.grouped => {
                tracing::info!(
                    "Not assigned to a group. Register this device on the admin server: {}",
                    self.device_id
                );
            }
            (DisplayMode::Idle, _) => {
                tracing::info!("Waiting for an ad to be scheduled...");
            }
            (DisplayMode::PriorityStream, Some(DisplayItem::Stream(stream))) => {
                let how = match stream.kind {
                    StreamKind::Video => "looping video",
                    StreamKind::Youtube => "web embed",
                };
                tracing::info!("Showing priority stream {} ({})", stream.url, how);
            }
            (DisplayMode::PlaylistItem, Some(DisplayItem::Asset { asset, source })) => {
                tracing::info!(
                    epoch = projection.epoch,
                    index = ?projection.index,
                    "Showing {} {:?} from {}",
                    asset.kind.as_str(),
                    asset.name,
                    source
                );
                if asset.kind == MediaKind::Video {
                    let length = asset
                        .duration
                        .filter(|d| *d > 0.0)
                        .and_then(|d| Duration::try_from_secs_f32(d).ok())
                        .unwrap_or(self.fallback_video);
                    let epoch = projection.epoch;
                    let task = tokio::spawn(async move {
                        tokio::time::sleep(length).await;
                        completions.completed(epoch);
                    });
                    self.playback = Some(task.abort_handle());
                }
            }
            (DisplayMode::Caching, Some(DisplayItem::Asset { asset, .. })) => {
                tracing::info!("Caching {:?}...", asset.name);
            }
            _ => {
                tracing::info!("Loading...");
            }
        }
    }
}

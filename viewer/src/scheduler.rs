//! Playback scheduler.
//!
//! A single [`Scheduler`] value advanced by [`Scheduler::transition`]. The
//! transition is pure: it returns the next value plus the timer [`Effect`]s
//! the driver has to carry out. Images advance when their timer fires, videos
//! when the surface reports completion. Timers carry a token and completions
//! carry the epoch they were started under, so anything issued for a display
//! that has since been replaced is ignored.

use crate::assets::{Asset, CacheStatus, DeviceState, MediaKind, MediaSource, PriorityStream};
use crate::cache::CacheSnapshot;
use std::sync::Arc;
use std::time::Duration;

/// Where the scheduler is.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackState {
    /// No playlist and no priority stream.
    Idle,
    ShowingPriorityStream(PriorityStream),
    ShowingPlaylistItem { index: usize },
    /// The item at `index` is downloading; nothing is shown.
    WaitingForCache { index: usize },
}

/// Input to the state machine.
#[derive(Debug, Clone)]
pub enum Event {
    DeviceState(Arc<DeviceState>),
    Cache(CacheSnapshot),
    TimerFired { token: u64 },
    PlaybackCompleted { epoch: u64 },
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    CancelTimer,
    ArmTimer { delay: Duration, token: u64 },
}

/// What the presentation layer should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Idle,
    PriorityStream,
    PlaylistItem,
    Caching,
}

/// The thing on screen.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayItem {
    Asset { asset: Asset, source: MediaSource },
    Stream(PriorityStream),
}

/// Read-only view of the scheduler for rendering.
///
/// A surface restarts playback whenever `epoch` changes, even if the item is
/// the same one.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub mode: DisplayMode,
    pub item: Option<DisplayItem>,
    pub index: Option<usize>,
    pub epoch: u64,
    /// False while the device belongs to no group.
    pub grouped: bool,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Idle,
            item: None,
            index: None,
            epoch: 0,
            grouped: false,
        }
    }
}

/// Playback state machine. Advanced only through [`Scheduler::transition`].
#[derive(Debug, Clone)]
pub struct Scheduler {
    state: PlaybackState,
    device: Arc<DeviceState>,
    cache: CacheSnapshot,
    /// Play count. Bumped every time a display starts.
    epoch: u64,
    armed_timer: Option<u64>,
    next_token: u64,
    default_image_duration: Duration,
}

impl Scheduler {
    /// Idle scheduler. Images without a duration show for `default_image_duration`.
    pub fn new(default_image_duration: Duration) -> Self {
        Self {
            state: PlaybackState::Idle,
            device: Arc::new(DeviceState::ungrouped()),
            cache: CacheSnapshot::default(),
            epoch: 0,
            armed_timer: None,
            next_token: 1,
            default_image_duration,
        }
    }

    /// Current state.
    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Number of displays started so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Token of the timer that may still advance playback.
    pub fn armed_timer(&self) -> Option<u64> {
        self.armed_timer
    }

    fn assets(&self) -> &[Asset] {
        self.device.assets()
    }

    /// Apply one event.
    pub fn transition(mut self, event: Event) -> (Self, Vec<Effect>) {
        let mut effects = Vec::new();

        match event {
            Event::DeviceState(device) => {
                self.cancel_timer(&mut effects);
                let previous = self.current_asset().cloned();
                self.device = device;
                self.settle(previous, &mut effects);
            }
            Event::Cache(snapshot) => {
                self.cache = snapshot;
                match self.state {
                    PlaybackState::WaitingForCache { index } => {
                        self.enter_item(index, false, &mut effects);
                    }
                    PlaybackState::ShowingPlaylistItem { index } if self.is_downloading(index) => {
                        self.cancel_timer(&mut effects);
                        self.state = PlaybackState::WaitingForCache { index };
                    }
                    _ => {}
                }
            }
            Event::TimerFired { token } => {
                if self.armed_timer == Some(token) {
                    self.armed_timer = None;
                    if let PlaybackState::ShowingPlaylistItem { index } = self.state {
                        self.advance(index, &mut effects);
                    }
                }
            }
            Event::PlaybackCompleted { epoch } => {
                if let PlaybackState::ShowingPlaylistItem { index } = self.state {
                    let is_video = self
                        .assets()
                        .get(index)
                        .is_some_and(|a| a.kind == MediaKind::Video);
                    if epoch == self.epoch && is_video {
                        self.advance(index, &mut effects);
                    }
                }
            }
        }

        (self, effects)
    }

    /// Pick the state for a freshly applied device state.
    fn settle(&mut self, previous: Option<Asset>, effects: &mut Vec<Effect>) {
        if let Some(stream) = self.device.priority_stream.clone() {
            let continuing =
                matches!(&self.state, PlaybackState::ShowingPriorityStream(s) if *s == stream);
            if !continuing {
                self.epoch += 1;
            }
            self.state = PlaybackState::ShowingPriorityStream(stream);
            return;
        }

        let len = self.assets().len();
        if len == 0 {
            self.state = PlaybackState::Idle;
            return;
        }

        let index = match self.state {
            PlaybackState::ShowingPlaylistItem { index }
            | PlaybackState::WaitingForCache { index }
                if index < len =>
            {
                index
            }
            _ => 0,
        };
        let replaced = match (&previous, self.assets().get(index)) {
            (Some(old), Some(new)) => !old.same_playback(new),
            _ => true,
        };
        self.enter_item(index, replaced, effects);
    }

    /// Show (or wait for) the item at `index`. `restart` forces a new epoch
    /// even if that item is already on screen.
    fn enter_item(&mut self, index: usize, restart: bool, effects: &mut Vec<Effect>) {
        let Some(asset) = self.assets().get(index).cloned() else {
            self.state = PlaybackState::Idle;
            return;
        };

        if self.is_downloading(index) {
            self.state = PlaybackState::WaitingForCache { index };
            return;
        }

        let on_screen = self.state == PlaybackState::ShowingPlaylistItem { index };
        if restart || !on_screen {
            self.epoch += 1;
        }
        self.state = PlaybackState::ShowingPlaylistItem { index };

        if asset.kind == MediaKind::Image {
            let delay = asset
                .duration
                .filter(|d| *d > 0.0)
                .and_then(|d| Duration::try_from_secs_f32(d).ok())
                .unwrap_or(self.default_image_duration);
            self.arm_timer(delay, effects);
        }
    }

    fn advance(&mut self, index: usize, effects: &mut Vec<Effect>) {
        self.cancel_timer(effects);
        let len = self.assets().len();
        if len == 0 {
            self.state = PlaybackState::Idle;
            return;
        }
        self.enter_item((index + 1) % len, true, effects);
    }

    fn arm_timer(&mut self, delay: Duration, effects: &mut Vec<Effect>) {
        self.cancel_timer(effects);
        let token = self.next_token;
        self.next_token += 1;
        self.armed_timer = Some(token);
        effects.push(Effect::ArmTimer { delay, token });
    }

    fn cancel_timer(&mut self, effects: &mut Vec<Effect>) {
        if self.armed_timer.take().is_some() {
            effects.push(Effect::CancelTimer);
        }
    }

    fn is_downloading(&self, index: usize) -> bool {
        self.assets()
            .get(index)
            .is_some_and(|a| self.cache.status(&a.id) == CacheStatus::Downloading)
    }

    fn current_asset(&self) -> Option<&Asset> {
        match self.state {
            PlaybackState::ShowingPlaylistItem { index }
            | PlaybackState::WaitingForCache { index } => self.assets().get(index),
            _ => None,
        }
    }

    /// What should be on screen right now.
    pub fn projection(&self) -> Projection {
        let grouped = self.device.is_grouped();
        let (mode, item, index) = match &self.state {
            PlaybackState::Idle => (DisplayMode::Idle, None, None),
            PlaybackState::ShowingPriorityStream(stream) => (
                DisplayMode::PriorityStream,
                Some(DisplayItem::Stream(stream.clone())),
                None,
            ),
            PlaybackState::ShowingPlaylistItem { index } => match self.assets().get(*index) {
                Some(asset) => (
                    DisplayMode::PlaylistItem,
                    Some(DisplayItem::Asset {
                        source: asset.source(&self.cache.status(&asset.id)),
                        asset: asset.clone(),
                    }),
                    Some(*index),
                ),
                None => (DisplayMode::Caching, None, None),
            },
            PlaybackState::WaitingForCache { index } => {
                let item = self.assets().get(*index).map(|asset| DisplayItem::Asset {
                    source: asset.source(&CacheStatus::NotCached),
                    asset: asset.clone(),
                });
                (DisplayMode::Caching, item, Some(*index))
            }
        };

        Projection {
            mode,
            item,
            index,
            epoch: self.epoch,
            grouped,
        }
    }
}

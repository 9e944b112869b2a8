//! Drives the scheduler.
//!
//! [`Player`] is the only owner of the [`Scheduler`] value. It feeds it device
//! states, cache snapshots, timer fires and completion events one at a time,
//! carries out the returned effects, and publishes the resulting projection.

use crate::assets::DeviceState;
use crate::cache::CacheSnapshot;
use crate::clock::{CancelHandle, Clock};
use crate::scheduler::{Effect, Event, Projection, Scheduler};
use crate::surface::{CompletionSink, PlaybackSurface};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Owns the scheduler and applies its effects.
pub struct Player {
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
    surface: Box<dyn PlaybackSurface>,
    timer: Option<CancelHandle>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: Option<mpsc::UnboundedReceiver<Event>>,
    projection: watch::Sender<Projection>,
}

impl Player {
    /// Create a player. Nothing happens until [`Player::run`].
    pub fn new(
        scheduler: Scheduler,
        clock: Arc<dyn Clock>,
        surface: Box<dyn PlaybackSurface>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (projection, _) = watch::channel(scheduler.projection());
        Self {
            scheduler,
            clock,
            surface,
            timer: None,
            events_tx,
            events_rx: Some(events_rx),
            projection,
        }
    }

    /// Watch what should be on screen.
    pub fn subscribe(&self) -> watch::Receiver<Projection> {
        self.projection.subscribe()
    }

    /// Current scheduler value.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Apply one event and carry out its effects.
    pub fn handle(&mut self, event: Event) {
        let (next, effects) = self.scheduler.clone().transition(event);
        self.scheduler = next;

        for effect in effects {
            match effect {
                Effect::CancelTimer => {
                    if let Some(mut timer) = self.timer.take() {
                        timer.cancel();
                    }
                }
                Effect::ArmTimer { delay, token } => {
                    if let Some(mut timer) = self.timer.take() {
                        timer.cancel();
                    }
                    let tx = self.events_tx.clone();
                    self.timer = Some(self.clock.after(
                        delay,
                        Box::new(move || {
                            let _ = tx.send(Event::TimerFired { token });
                        }),
                    ));
                }
            }
        }

        let projection = self.scheduler.projection();
        let changed = *self.projection.borrow() != projection;
        if changed {
            tracing::debug!(
                mode = ?projection.mode,
                index = ?projection.index,
                epoch = projection.epoch,
                "Display changed"
            );
            self.surface
                .present(&projection, CompletionSink::new(self.events_tx.clone()));
            self.projection.send_replace(projection);
        }
    }

    /// Run until `cancel` fires or the device state source goes away.
    pub async fn run(
        mut self,
        mut device: watch::Receiver<Arc<DeviceState>>,
        mut cache: watch::Receiver<CacheSnapshot>,
        cancel: CancellationToken,
    ) {
        let Some(mut events) = self.events_rx.take() else {
            tracing::error!("Player is already running");
            return;
        };

        let initial = self.scheduler.projection();
        self.surface
            .present(&initial, CompletionSink::new(self.events_tx.clone()));

        let snapshot = cache.borrow_and_update().clone();
        self.handle(Event::Cache(snapshot));
        let state = device.borrow_and_update().clone();
        self.handle(Event::DeviceState(state));

        // Device updates go first so a timer that fired on the same tick is
        // judged against the new playlist.
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = device.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Device state source closed, stopping playback");
                        break;
                    }
                    let state = device.borrow_and_update().clone();
                    self.handle(Event::DeviceState(state));
                }
                changed = cache.changed() => {
                    if changed.is_err() {
                        tracing::warn!("Cache status source closed, stopping playback");
                        break;
                    }
                    let snapshot = cache.borrow_and_update().clone();
                    self.handle(Event::Cache(snapshot));
                }
                Some(event) = events.recv() => self.handle(event),
            }
        }

        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{Asset, Group, MediaKind, Playlist};
    use crate::clock::TokioClock;
    use crate::scheduler::{DisplayItem, DisplayMode};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every projection it is asked to present.
    #[derive(Clone, Default)]
    struct RecordingSurface {
        seen: Arc<Mutex<Vec<Projection>>>,
    }

    impl PlaybackSurface for RecordingSurface {
        fn present(&mut self, projection: &Projection, _completions: CompletionSink) {
            self.seen.lock().unwrap().push(projection.clone());
        }
    }

    fn state_with(assets: Vec<Asset>) -> Arc<DeviceState> {
        Arc::new(DeviceState {
            device_name: "Lobby".into(),
            group: Some(Group {
                id: "g".into(),
                name: "G".into(),
            }),
            playlist: Some(Playlist::new("p", "P", assets)),
            priority_stream: None,
        })
    }

    fn image(id: &str, order: i64, secs: f32) -> Asset {
        Asset {
            id: id.into(),
            name: id.into(),
            kind: MediaKind::Image,
            url: format!("https://cdn.example.com/{}.png", id),
            order,
            duration: Some(secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_image_replays_every_duration() {
        let surface = RecordingSurface::default();
        let seen = surface.seen.clone();
        let player = Player::new(
            Scheduler::new(Duration::from_secs(10)),
            Arc::new(TokioClock),
            Box::new(surface),
        );
        let projections = player.subscribe();

        let (_device_tx, device_rx) = watch::channel(state_with(vec![image("only", 0, 3.0)]));
        let (_cache_tx, cache_rx) = watch::channel(CacheSnapshot::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(player.run(device_rx, cache_rx, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let first = projections.borrow().epoch;
        assert_eq!(projections.borrow().mode, DisplayMode::PlaylistItem);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(projections.borrow().epoch, first + 3);
        assert_eq!(projections.borrow().index, Some(0));

        cancel.cancel();
        task.await.unwrap();
        // Idle at start, then one display per cycle.
        assert_eq!(seen.lock().unwrap().len(), 1 + 4);
    }

    fn shown_ids(seen: &Mutex<Vec<Projection>>) -> Vec<String> {
        seen.lock()
            .unwrap()
            .iter()
            .filter_map(|p| match &p.item {
                Some(DisplayItem::Asset { asset, .. }) => Some(asset.id.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn update_on_timer_tick_beats_stale_advance() {
        for _ in 0..50 {
            let start = tokio::time::Instant::now();
            let surface = RecordingSurface::default();
            let seen = surface.seen.clone();
            let player = Player::new(
                Scheduler::new(Duration::from_secs(10)),
                Arc::new(TokioClock),
                Box::new(surface),
            );

            let playlist = vec![image("a", 0, 5.0), image("b", 1, 5.0)];
            let (device_tx, device_rx) = watch::channel(state_with(playlist));
            let (_cache_tx, cache_rx) = watch::channel(CacheSnapshot::default());
            let cancel = CancellationToken::new();
            let task = tokio::spawn(player.run(device_rx, cache_rx, cancel.clone()));

            // Lands on the same tick as the 5s image timer.
            tokio::time::sleep_until(start + Duration::from_secs(5)).await;
            device_tx.send(state_with(vec![image("z", 0, 5.0)])).unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;

            cancel.cancel();
            task.await.unwrap();

            let shown = shown_ids(&seen);
            assert!(!shown.iter().any(|id| id == "b"), "replaced item shown: {:?}", shown);
            assert_eq!(shown.last().map(String::as_str), Some("z"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn update_mid_cycle_never_double_advances() {
        let assets = vec![image("a", 0, 5.0), image("b", 1, 5.0), image("c", 2, 5.0)];
        let player = Player::new(
            Scheduler::new(Duration::from_secs(10)),
            Arc::new(TokioClock),
            Box::new(RecordingSurface::default()),
        );
        let projections = player.subscribe();
        let (device_tx, device_rx) = watch::channel(state_with(assets.clone()));
        let (_cache_tx, cache_rx) = watch::channel(CacheSnapshot::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(player.run(device_rx, cache_rx, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(projections.borrow().index, Some(0));

        // Same playlist again: the 5s timer restarts instead of firing at 5s.
        device_tx.send(state_with(assets)).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(projections.borrow().index, Some(0));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(projections.borrow().index, Some(1));

        cancel.cancel();
        task.await.unwrap();
    }
}

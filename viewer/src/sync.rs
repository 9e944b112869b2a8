//! Remote state sync.
//!
//! [`SyncCoordinator`] owns the authoritative [`DeviceState`]. It fetches it
//! at startup and on every push signal, starts a cache pass when the playlist
//! actually changed, and publishes every fetched state to the scheduler.

use crate::assets::{same_assets, Asset, DeviceState};
use crate::cache::CacheManager;
use crate::realtime::PushSignal;
use crate::remote::{FetchOutcome, RemoteStateProvider};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Keeps the device state and the cache in step with the admin API.
pub struct SyncCoordinator {
    device_id: String,
    provider: Arc<dyn RemoteStateProvider>,
    cache: CacheManager,
    state: watch::Sender<Arc<DeviceState>>,
    /// Target of the last cache pass started, in display order.
    held: Option<Vec<Asset>>,
}

impl SyncCoordinator {
    /// Coordinator for `device_id`. The published state starts out ungrouped.
    pub fn new(
        device_id: impl Into<String>,
        provider: Arc<dyn RemoteStateProvider>,
        cache: CacheManager,
    ) -> Self {
        let (state, _) = watch::channel(Arc::new(DeviceState::ungrouped()));
        Self {
            device_id: device_id.into(),
            provider,
            cache,
            state,
            held: None,
        }
    }

    /// Watch published device states.
    pub fn subscribe(&self) -> watch::Receiver<Arc<DeviceState>> {
        self.state.subscribe()
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Last published state.
    pub fn current(&self) -> Arc<DeviceState> {
        self.state.borrow().clone()
    }

    /// Fetch the device state and apply it.
    pub async fn resync(&mut self) -> Arc<DeviceState> {
        let state = match self.provider.fetch_state(&self.device_id).await {
            Ok(FetchOutcome::Assigned(state)) => state,
            Ok(FetchOutcome::NotAssigned) => {
                tracing::info!(device_id = %self.device_id, "Device is not assigned yet");
                DeviceState::ungrouped()
            }
            Err(e) => {
                tracing::error!(
                    device_id = %self.device_id,
                    error = %e,
                    "Failed to fetch device state, falling back to ungrouped"
                );
                self.held = None;
                let state = Arc::new(DeviceState::ungrouped());
                self.state.send_replace(state.clone());
                return state;
            }
        };

        let target = state.assets().to_vec();
        let unchanged = self
            .held
            .as_deref()
            .is_some_and(|held| same_assets(held, &target));

        if unchanged {
            tracing::debug!("Playlist unchanged, skipping cache pass");
        } else {
            tracing::info!(
                assets = target.len(),
                playlist = state.playlist.as_ref().map(|p| p.name.as_str()).unwrap_or(""),
                "Playlist changed"
            );
            // Progress is observed through the cache snapshot.
            drop(self.cache.reconcile(target.clone()));
            self.held = Some(target);
        }

        let state = Arc::new(state);
        self.state.send_replace(state.clone());
        state
    }

    /// Resync once, then again on every push signal until `cancel` fires.
    /// Signals that pile up during a resync are folded into one.
    pub async fn run(mut self, mut signals: mpsc::Receiver<PushSignal>, cancel: CancellationToken) {
        self.resync().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                signal = signals.recv() => {
                    let Some(PushSignal::Resync) = signal else {
                        tracing::warn!("Push channel closed, no further updates");
                        cancel.cancelled().await;
                        break;
                    };
                    let mut folded = 0;
                    while signals.try_recv().is_ok() {
                        folded += 1;
                    }
                    tracing::info!(folded, "Push signal received, resyncing");
                    self.resync().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{Group, MediaKind, Playlist, PriorityStream, StreamKind};
    use crate::download::Downloader;
    use crate::error::{DownloadError, FetchError};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted fetch results, repeating the last one.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<FetchOutcome, FetchError>>>,
        last: Mutex<Option<FetchOutcome>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<FetchOutcome, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteStateProvider for ScriptedProvider {
        async fn fetch_state(&self, _device_id: &str) -> Result<FetchOutcome, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(Ok(outcome)) => {
                    *self.last.lock().unwrap() = Some(outcome.clone());
                    Ok(outcome)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or(FetchOutcome::NotAssigned)),
            }
        }
    }

    struct OkDownloader;

    #[async_trait]
    impl Downloader for OkDownloader {
        async fn fetch(&self, _url: &str) -> Result<Bytes, DownloadError> {
            Ok(Bytes::from_static(b"media"))
        }
    }

    fn asset(id: &str, order: i64) -> Asset {
        Asset {
            id: id.into(),
            name: id.into(),
            kind: MediaKind::Image,
            url: format!("https://cdn.example.com/{}.jpg", id),
            order,
            duration: Some(8.0),
        }
    }

    fn assigned(
        assets: Vec<Asset>,
        stream: Option<PriorityStream>,
    ) -> Result<FetchOutcome, FetchError> {
        Ok(FetchOutcome::Assigned(DeviceState {
            device_name: "Lobby".into(),
            group: Some(Group {
                id: "g".into(),
                name: "G".into(),
            }),
            playlist: Some(Playlist::new("p", "Spring", assets)),
            priority_stream: stream,
        }))
    }

    fn coordinator(
        script: Vec<Result<FetchOutcome, FetchError>>,
    ) -> (Arc<MemoryStore>, SyncCoordinator) {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheManager::new(store.clone(), Arc::new(OkDownloader), 1);
        let provider = Arc::new(ScriptedProvider::new(script));
        let coordinator = SyncCoordinator::new("tv-1", provider, cache);
        (store, coordinator)
    }

    #[tokio::test]
    async fn unchanged_playlist_skips_cache_pass() {
        let playlist = vec![asset("a", 0), asset("b", 1)];
        let (_store, mut sync) = coordinator(vec![
            assigned(playlist.clone(), None),
            assigned(playlist, None),
        ]);

        sync.resync().await;
        assert_eq!(sync.cache().passes_requested(), 1);

        sync.resync().await;
        assert_eq!(sync.cache().passes_requested(), 1);
    }

    #[tokio::test]
    async fn changed_playlist_starts_cache_pass() {
        let (_store, mut sync) = coordinator(vec![
            assigned(vec![asset("a", 0)], None),
            assigned(vec![asset("a", 0), asset("b", 1)], None),
        ]);

        sync.resync().await;
        sync.resync().await;
        assert_eq!(sync.cache().passes_requested(), 2);
    }

    #[tokio::test]
    async fn priority_change_is_published_without_cache_pass() {
        let playlist = vec![asset("a", 0)];
        let stream = PriorityStream {
            kind: StreamKind::Youtube,
            url: "https://youtube.com/embed/live".into(),
        };
        let (_store, mut sync) = coordinator(vec![
            assigned(playlist.clone(), None),
            assigned(playlist, Some(stream.clone())),
        ]);
        let mut states = sync.subscribe();

        sync.resync().await;
        states.borrow_and_update();
        let state = sync.resync().await;

        assert!(states.has_changed().unwrap());
        assert_eq!(state.priority_stream, Some(stream));
        assert_eq!(sync.cache().passes_requested(), 1);
    }

    #[tokio::test]
    async fn fetch_failure_reverts_to_ungrouped() {
        let playlist = vec![asset("a", 0)];
        let (_store, mut sync) = coordinator(vec![
            assigned(playlist.clone(), None),
            Err(FetchError::Status(502)),
            assigned(playlist, None),
        ]);

        sync.resync().await;
        assert!(sync.current().is_grouped());

        let state = sync.resync().await;
        assert!(!state.is_grouped());
        assert!(state.playlist.is_none());
        assert!(state.priority_stream.is_none());

        // Recovery reconciles again since nothing is held any more.
        let state = sync.resync().await;
        assert!(state.is_grouped());
        assert_eq!(sync.cache().passes_requested(), 2);
    }

    #[tokio::test]
    async fn unassigned_device_clears_cache() {
        let (store, mut sync) = coordinator(vec![
            assigned(vec![asset("a", 0)], None),
            Ok(FetchOutcome::NotAssigned),
        ]);
        let mut cache_rx = sync.cache().subscribe();

        sync.resync().await;
        while !cache_rx.borrow_and_update().status("a").is_terminal() {
            cache_rx.changed().await.unwrap();
        }
        assert_eq!(store.filenames().len(), 1);

        let state = sync.resync().await;
        assert!(!state.is_grouped());
        while cache_rx.borrow_and_update().generation < 2 {
            cache_rx.changed().await.unwrap();
        }
        assert!(store.filenames().is_empty());
    }

    #[tokio::test]
    async fn run_folds_queued_signals() {
        let provider = Arc::new(ScriptedProvider::new(vec![assigned(vec![asset("a", 0)], None)]));
        let cache = CacheManager::new(Arc::new(MemoryStore::new()), Arc::new(OkDownloader), 1);
        let sync = SyncCoordinator::new("tv-1", provider.clone(), cache);
        let states = sync.subscribe();

        let (tx, rx) = mpsc::channel(8);
        for _ in 0..5 {
            tx.send(PushSignal::Resync).await.unwrap();
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(sync.run(rx, cancel.clone()));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        task.await.unwrap();

        // Startup fetch plus one for the whole burst.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert!(states.borrow().is_grouped());
    }
}

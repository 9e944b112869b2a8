//! Asset cache for offline playback.
//!
//! Keeps the local store in step with the current playlist. Each call to
//! [`CacheManager::reconcile`] runs one pass: evict every file the playlist no
//! longer references, then make sure each asset is present, downloading what
//! is missing. Passes never overlap.

use crate::assets::{Asset, CacheStatus};
use crate::download::Downloader;
use crate::store::LocalStore;
use futures_util::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

/// Longest name segment kept from the URL.
const MAX_NAME_LEN: usize = 64;

/// Derive the cache filename for a remote URL.
///
/// The name is a short SHA-256 prefix of the full URL followed by the last
/// path segment, so two assets with the same basename on different hosts
/// never collide and the extension survives for players that sniff it.
pub fn cache_filename(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hash: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();

    let segment = url::Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments().and_then(|s| s.last().map(str::to_owned)))
        .unwrap_or_default();
    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);

    let mut name: String = decoded
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    name = name.trim_start_matches('.').to_string();
    if name.len() > MAX_NAME_LEN {
        name = name[name.len() - MAX_NAME_LEN..].to_string();
    }

    if name.is_empty() {
        hash
    } else {
        format!("{}-{}", hash, name)
    }
}

/// One status change reported by a reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub asset_id: String,
    pub status: CacheStatus,
}

/// Statuses of every asset of the latest pass.
///
/// Readers get their own `Arc`; a new pass always starts from a fresh map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSnapshot {
    pub generation: u64,
    pub statuses: Arc<HashMap<String, CacheStatus>>,
}

impl CacheSnapshot {
    /// Status of one asset; unknown assets are not cached.
    pub fn status(&self, asset_id: &str) -> CacheStatus {
        self.statuses.get(asset_id).cloned().unwrap_or_default()
    }
}

/// Counts for one finished pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub evicted: usize,
    pub already_cached: usize,
    pub downloaded: usize,
    pub fallback: usize,
}

struct Inner {
    store: Arc<dyn LocalStore>,
    downloader: Arc<dyn Downloader>,
    concurrency: usize,
    /// Held for the whole of a pass.
    pass_lock: Mutex<()>,
    /// Generation of the most recently requested pass.
    requested: AtomicU64,
    snapshot: watch::Sender<CacheSnapshot>,
    last_stats: std::sync::Mutex<Option<PassStats>>,
}

/// Reconciles the local store against a target asset set.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

impl CacheManager {
    /// Create a cache manager. `concurrency` bounds downloads within a pass;
    /// 1 processes assets strictly one after another.
    pub fn new(
        store: Arc<dyn LocalStore>,
        downloader: Arc<dyn Downloader>,
        concurrency: usize,
    ) -> Self {
        let (snapshot, _) = watch::channel(CacheSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                store,
                downloader,
                concurrency: concurrency.max(1),
                pass_lock: Mutex::new(()),
                requested: AtomicU64::new(0),
                snapshot,
                last_stats: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Watch the per-asset statuses.
    pub fn subscribe(&self) -> watch::Receiver<CacheSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Current statuses.
    pub fn snapshot(&self) -> CacheSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Number of passes requested so far.
    pub fn passes_requested(&self) -> u64 {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Counts of the last pass that ran to completion.
    pub fn last_stats(&self) -> Option<PassStats> {
        *self.inner.last_stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a pass for `target`, the full desired asset set.
    ///
    /// Returns the stream of status updates of this pass. The stream ends when
    /// the pass completes, or early if a newer pass supersedes it. Must be
    /// called from within a Tokio runtime.
    pub fn reconcile(&self, target: Vec<Asset>) -> mpsc::UnboundedReceiver<StatusUpdate> {
        let generation = self.inner.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run_pass(generation, target, tx).await;
        });
        rx
    }
}

impl Inner {
    fn is_superseded(&self, generation: u64) -> bool {
        self.requested.load(Ordering::SeqCst) > generation
    }

    async fn run_pass(
        &self,
        generation: u64,
        mut target: Vec<Asset>,
        tx: mpsc::UnboundedSender<StatusUpdate>,
    ) {
        let _pass = self.pass_lock.lock().await;
        if self.is_superseded(generation) {
            tracing::debug!(generation, "Skipping superseded cache pass");
            return;
        }

        target.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

        // Assets sharing a URL share a file and are handled together.
        let mut groups: Vec<(String, Vec<Asset>)> = Vec::new();
        let mut slot: HashMap<String, usize> = HashMap::new();
        for asset in target {
            let filename = cache_filename(&asset.url);
            match slot.get(&filename) {
                Some(&i) => groups[i].1.push(asset),
                None => {
                    slot.insert(filename.clone(), groups.len());
                    groups.push((filename, vec![asset]));
                }
            }
        }

        tracing::info!(
            generation,
            assets = groups.iter().map(|(_, a)| a.len()).sum::<usize>(),
            files = groups.len(),
            "Starting cache pass"
        );

        let wanted: HashSet<String> = slot.into_keys().collect();
        let evicted = self.evict(&wanted).await;

        let fresh = groups
            .iter()
            .flat_map(|(_, assets)| assets.iter())
            .map(|a| (a.id.clone(), CacheStatus::NotCached))
            .collect();
        self.snapshot.send_replace(CacheSnapshot {
            generation,
            statuses: Arc::new(fresh),
        });

        let outcomes: Vec<Option<Outcome>> = stream::iter(groups)
            .map(|(filename, assets)| self.process(generation, filename, assets, &tx))
            .buffered(self.concurrency)
            .collect()
            .await;

        if self.is_superseded(generation) {
            tracing::info!(generation, "Cache pass superseded, stopping early");
            return;
        }

        let mut stats = PassStats {
            evicted,
            ..PassStats::default()
        };
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Outcome::Present => stats.already_cached += 1,
                Outcome::Downloaded => stats.downloaded += 1,
                Outcome::Fallback => stats.fallback += 1,
            }
        }
        *self.last_stats.lock().unwrap_or_else(|e| e.into_inner()) = Some(stats);

        tracing::info!(
            generation,
            evicted = stats.evicted,
            cached = stats.already_cached,
            downloaded = stats.downloaded,
            fallback = stats.fallback,
            "Cache pass complete"
        );
    }

    /// Delete every stored file not in `wanted`. Failures are logged and skipped.
    async fn evict(&self, wanted: &HashSet<String>) -> usize {
        let present = match self.store.list().await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Failed to list cache, skipping eviction: {}", e);
                return 0;
            }
        };

        let mut evicted = 0;
        for filename in present.into_iter().filter(|f| !wanted.contains(f)) {
            match self.store.delete(&filename).await {
                Ok(()) => {
                    tracing::debug!("Evicted {}", filename);
                    evicted += 1;
                }
                Err(e) => tracing::warn!("Failed to evict {}: {}", filename, e),
            }
        }
        evicted
    }

    async fn process(
        &self,
        generation: u64,
        filename: String,
        assets: Vec<Asset>,
        tx: &mpsc::UnboundedSender<StatusUpdate>,
    ) -> Option<Outcome> {
        if self.is_superseded(generation) {
            return None;
        }

        let present = match self.store.exists(&filename).await {
            Ok(present) => present,
            Err(e) => {
                tracing::warn!("Failed to check {}: {}", filename, e);
                false
            }
        };

        if present {
            let status = CacheStatus::ReadyLocal(self.store.locate(&filename));
            self.emit(generation, &assets, status, tx);
            return Some(Outcome::Present);
        }

        self.emit(generation, &assets, CacheStatus::Downloading, tx);

        let url = &assets[0].url;
        let stored = match self.downloader.fetch(url).await {
            Ok(bytes) => self.store.write(&filename, &bytes).await.map_err(|e| {
                tracing::warn!("Failed to store {}: {}", filename, e);
            }),
            Err(e) => {
                tracing::warn!("Failed to download {}: {}", url, e);
                Err(())
            }
        };

        match stored {
            Ok(()) => {
                let status = CacheStatus::ReadyLocal(self.store.locate(&filename));
                self.emit(generation, &assets, status, tx);
                Some(Outcome::Downloaded)
            }
            Err(()) => {
                self.emit(generation, &assets, CacheStatus::ReadyRemoteFallback, tx);
                Some(Outcome::Fallback)
            }
        }
    }

    fn emit(
        &self,
        generation: u64,
        assets: &[Asset],
        status: CacheStatus,
        tx: &mpsc::UnboundedSender<StatusUpdate>,
    ) {
        self.snapshot.send_if_modified(|snapshot| {
            if snapshot.generation != generation {
                return false;
            }
            let statuses = Arc::make_mut(&mut snapshot.statuses);
            for asset in assets {
                statuses.insert(asset.id.clone(), status.clone());
            }
            true
        });

        for asset in assets {
            tracing::debug!(asset = %asset.id, status = ?status, "Cache status");
            // The caller may have stopped listening; progress stays visible
            // through the snapshot.
            let _ = tx.send(StatusUpdate {
                asset_id: asset.id.clone(),
                status: status.clone(),
            });
        }
    }
}

enum Outcome {
    Present,
    Downloaded,
    Fallback,
}

use anyhow::{Context, Result};
use reqwest::Client;
use signage_viewer::cache::CacheManager;
use signage_viewer::clock::TokioClock;
use signage_viewer::config::Settings;
use signage_viewer::download::HttpDownloader;
use signage_viewer::identity::load_or_create_device_id;
use signage_viewer::player::Player;
use signage_viewer::realtime::{PushChannel, WebSocketPushChannel};
use signage_viewer::remote::HttpStateProvider;
use signage_viewer::scheduler::Scheduler;
use signage_viewer::store::FsStore;
use signage_viewer::surface::HeadlessSurface;
use signage_viewer::sync::SyncCoordinator;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "signage_viewer=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load().context("Failed to load settings")?;

    let device_id = match settings.device_id.clone() {
        Some(id) => id,
        None => load_or_create_device_id(&settings.device_id_path).await?,
    };
    tracing::info!(device_id = %device_id, api = %settings.api_url, "Starting viewer");

    let client = Client::builder()
        .timeout(settings.request_timeout())
        .build()
        .context("Failed to build HTTP client")?;

    let store = FsStore::new(settings.cache_dir.clone()).context("Failed to open media cache")?;
    let cache = CacheManager::new(
        Arc::new(store),
        Arc::new(HttpDownloader::new(client.clone())),
        settings.download_concurrency,
    );
    let provider = Arc::new(HttpStateProvider::new(client, settings.api_url.clone()));
    let coordinator = SyncCoordinator::new(device_id.clone(), provider, cache.clone());

    let cancel = CancellationToken::new();
    let push = WebSocketPushChannel::new(
        settings.push_url.clone(),
        device_id.clone(),
        settings.reconnect(),
    );
    let signals = push.subscribe(cancel.clone());

    let player = Player::new(
        Scheduler::new(settings.default_image_duration()),
        Arc::new(TokioClock),
        Box::new(HeadlessSurface::new(device_id, settings.headless_video())),
    );

    let device_rx = coordinator.subscribe();
    let cache_rx = cache.subscribe();
    let sync_task = tokio::spawn(coordinator.run(signals, cancel.clone()));
    let player_task = tokio::spawn(player.run(device_rx, cache_rx, cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutting down");
    cancel.cancel();

    let (sync_result, player_result) = tokio::join!(sync_task, player_task);
    sync_result.context("Sync task panicked")?;
    player_result.context("Player task panicked")?;
    Ok(())
}

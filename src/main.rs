mod backend;
mod config;
mod credentials;
mod downloader;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use backend::{AppState, router::create_router};
use credentials::Credentials;
use downloader::{BroadcastNotifier, DownloadQueue, History, Planner};

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();
    color_eyre::install()?;

    let config = config::config();
    let settings = config.transfer.transfer_settings();
    tracing::info!(
        target_app = settings.target.as_str(),
        resource_path = %settings.resource_path.display(),
        "Model tree"
    );

    let credentials = Arc::new(Credentials::new(
        config.tokens.civitai_token.clone(),
        config.tokens.huggingface_token.clone(),
    ));
    let notifier = BroadcastNotifier::new();
    let queue = Arc::new(DownloadQueue::new(
        Planner::new(settings, credentials.clone()),
        Arc::new(History::new()),
        Arc::new(notifier.clone()),
        config.transfer.max_concurrent_downloads,
    ));

    tracing::debug!(workers = queue.concurrency(), "Download workers ready");

    let shutdown = CancellationToken::new();
    let state = Arc::new(AppState {
        queue: queue.clone(),
        notifier,
        credentials,
        model_packs_file: config.model_packs_file(),
        shutdown: shutdown.clone(),
    });

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
    tracing::info!("Listening on: {}", listener.local_addr()?);

    // Stop transfers as soon as the signal arrives, not after connections drain.
    let stopping = shutdown.clone();
    let queue_stopper = {
        let queue = queue.clone();
        tokio::spawn(async move {
            stopping.cancelled().await;
            queue.shutdown().await;
        })
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    queue_stopper.await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

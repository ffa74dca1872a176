use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use livecast_api::{create_router, ConnectionRegistry};
use livecast_core::{logging, Config, MemoryStreamStore, PersistQueue, StreamStateStore};
use livecast_rtc::{SignalingManager, StreamTrackRepository};

#[derive(Parser, Debug)]
#[command(name = "livecast-api", about = "Live stream signaling and fan-out server")]
struct Args {
    /// Path to a config file (TOML/YAML/JSON); environment variables with the
    /// LIVECAST_ prefix override it
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}");
        eprintln!("Using default configuration");
        Config::default()
    });

    logging::init_logging(&config.logging)?;

    info!("Livecast API server starting...");
    info!("HTTP address: {}", config.http_address());

    let store: Arc<dyn StreamStateStore> = Arc::new(MemoryStreamStore::new());
    let persist = PersistQueue::spawn(store.clone(), config.persist.queue_size);
    let tracks = Arc::new(StreamTrackRepository::new(persist));
    let signaling = SignalingManager::new(tracks.clone(), config.rtc.clone());
    let registry = ConnectionRegistry::new(config.hub.outbound_queue_size);

    let app = create_router(store, tracks, signaling, registry);

    let listener = tokio::net::TcpListener::bind(config.http_address()).await?;
    info!("HTTP server listening on {}", config.http_address());

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("HTTP server error: {e}");
        return Err(e.into());
    }

    info!("Livecast API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use talkie_api::AppStateInner;
use talkie_crypto::{GpgGateway, ListingFormat};
use talkie_db::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "talkie_server=debug,talkie_api=debug,talkie_db=info,talkie_crypto=info,tower_http=debug".into()),
        )
        .init();

    // Config
    let host = std::env::var("TALKIE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("TALKIE_PORT")
        .unwrap_or_else(|_| "3333".into())
        .parse()?;
    let db_path: PathBuf = std::env::var("TALKIE_DB_PATH")
        .unwrap_or_else(|_| "talkie.db".into())
        .into();
    let server_key = std::env::var("TALKIE_SERVER_KEY")
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty());
    let max_content: usize = match std::env::var("TALKIE_MAX_CONTENT_BYTES") {
        Ok(v) => v.parse()?,
        Err(_) => talkie_db::MAX_CONTENT_BYTES,
    };

    let mut gateway = GpgGateway::new();
    if let Ok(program) = std::env::var("TALKIE_GPG_PATH") {
        gateway = gateway.with_program(program);
    }
    if let Ok(homedir) = std::env::var("TALKIE_GPG_HOMEDIR") {
        gateway = gateway.with_homedir(homedir);
    }
    if let Ok(keyserver) = std::env::var("TALKIE_KEYSERVER") {
        gateway = gateway.with_keyserver(keyserver);
    }
    if let Ok(listing) = std::env::var("TALKIE_GPG_LISTING") {
        let listing: ListingFormat = listing.parse().map_err(anyhow::Error::msg)?;
        gateway = gateway.with_listing_format(listing);
    }
    info!("Using gpg at {}", gateway.program().display());

    if server_key.is_none() {
        warn!("TALKIE_SERVER_KEY is unset; encrypted listings will fail");
    }

    // Init store
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let store = Store::open(&db_path)?;

    let state = AppStateInner::new(store, Arc::new(gateway), server_key);

    let app = talkie_api::router_with_limit(state.clone(), talkie_api::body_limit(max_content))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Talkie relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.store.close();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

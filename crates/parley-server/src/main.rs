use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use parley_api::blob::LocalBlobStore;
use parley_api::state::AppStateInner;
use parley_db::Database;
use parley_gateway::Gateway;
use parley_server::build_router;
use parley_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_server=debug,parley_api=debug,parley_gateway=debug,parley_db=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Shared state; the gateway lives for the whole process
    let gateway = Gateway::new(config.gateway.clone());
    let blobs = LocalBlobStore::new(&config.upload_dir, &config.public_url);
    let state = AppStateInner::new(db, gateway, blobs, config.jwt_secret.clone());

    let app = build_router(state, config.frontend_url.as_deref())?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Parley server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

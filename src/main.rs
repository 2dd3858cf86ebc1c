use anyhow::Result;
use grid_variant_store::{api, config, repo, telemetry, NetworkStore};
use config::Config;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::load()?;

    let backend = repo::open_backend(&cfg.store).await?;
    let store = NetworkStore::new(backend);
    info!(backend = store.backend_name(), "variant store ready");

    let app = api::router(api::AppState::new(store), &cfg);
    let addr = cfg.server.socket_addr()?;

    if cfg.server.host == "0.0.0.0" {
        warn!("Server binding to 0.0.0.0; the introspection API will be reachable from the network");
    }

    info!(%addr, "starting grid variant store");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

mod app;
mod blacklist;
mod decision;
mod error;
mod ip_cache;
mod ip_extract;
mod ip_intel_client;
mod logger;
mod redirect_cache;
mod routes;
mod state;

use blacklist::CidrBlacklist;
use cloakgate_core::config::Config;
use cloakgate_store::PostgresStore;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cloakgate=info".parse()?),
        )
        .json()
        .init();

    let cfg = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let snapshot_path = std::path::Path::new(&cfg.data_dir).join("cidr_blacklist.json");

    let store = PostgresStore::connect(
        &cfg.database_url,
        cfg.db_pool_size,
        Duration::from_millis(cfg.db_pool_acquire_timeout_ms),
    )
    .await?;
    store.migrate().await?;
    info!("database connected and migrated");

    let blacklist = CidrBlacklist::load(&snapshot_path)?;
    blacklist.import(store.list_ip_ranges().await?);
    info!(ranges = blacklist.list().len(), "cidr blacklist seeded");

    let port = cfg.port;
    let state = Arc::new(AppState::new(Arc::new(store), cfg, blacklist));
    state.spawn_background_tasks();

    let app = app::build_app(Arc::clone(&state));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(port, "cloakgate listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

use std::net::SocketAddr;
use std::sync::Arc;

use allocation_service::config::Config;
use allocation_service::handlers::{self, AppState};
use allocation_service::naming::SequentialNamer;
use allocation_service::postgres::{self, PgStore};
use allocation_service::AllocationEngine;
use shared::SystemClock;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shared::logger::init_logger();

    let config = Config::from_env()?;

    let pool = postgres::create_pool(&config.database_url).await?;
    let store = PgStore::new(pool);
    store.migrate().await?;

    let engine = AllocationEngine::new(
        Arc::new(store),
        Arc::new(SystemClock),
        Arc::new(SequentialNamer),
        config.engine_config(),
    );
    let state = Arc::new(AppState { engine });
    let app = handlers::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("starting allocation service on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
    }
}

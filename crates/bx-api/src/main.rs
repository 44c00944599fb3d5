mod auth;
mod config;
mod dto;
mod error;
mod lifecycle;
mod routes;
mod state;
mod ws;

use std::sync::Arc;

use bx_infra::Secrets;
use bx_infra::ansible::AnsibleExecutor;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::lifecycle::Orchestrator;
use crate::lifecycle::notify::ConnectionHub;
use crate::lifecycle::store::{PgStore, Store};
use crate::routes::api_router;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    // Database
    let db = bx_db::create_pool(&config.database_url)
        .await
        .expect("failed to connect to database");

    bx_db::run_migrations(&db)
        .await
        .expect("failed to run migrations");

    let store = Arc::new(PgStore::new(db.clone()));

    // Providers, from the secret store
    let secrets = Secrets::new(store.secrets().await.expect("failed to load secrets"));
    let providers = bx_infra::build_providers(&secrets);
    tracing::info!(providers = ?providers.available(), "compute providers ready");

    let executor = Arc::new(AnsibleExecutor::new(
        &config.playbook_dir,
        &config.ansible_private_key,
        config.ansible_debug,
    ));
    let hub = Arc::new(ConnectionHub::new());

    let orchestrator = Orchestrator::new(
        store,
        providers,
        executor,
        hub.clone(),
        config.lifecycle(),
    );

    if let Err(e) = orchestrator.resume_pending().await {
        tracing::error!(error = %e, "failed to resume pending redirectors");
    }

    let state = AppState {
        db,
        orchestrator: orchestrator.clone(),
        hub,
        config: config.clone(),
    };

    let app = api_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .expect("failed to bind listener");

    tracing::info!(addr = %config.listen_addr, production = config.in_production, "starting boxer API");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    orchestrator.shutdown();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

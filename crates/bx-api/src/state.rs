use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::lifecycle::Orchestrator;
use crate::lifecycle::notify::ConnectionHub;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub orchestrator: Orchestrator,
    pub hub: Arc<ConnectionHub>,
    pub config: AppConfig,
}

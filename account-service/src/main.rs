//! Cache warm-up and session purge, run on deploy and from a scheduler.

use account_service::{
    cache::RedisCache,
    clock::SystemClock,
    config::AccountConfig,
    db,
    services::metrics,
    AppState, Stores,
};
use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AccountConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.common.otlp_endpoint.as_deref(),
        config.common.json_logs,
    )?;
    metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting account maintenance"
    );

    let pool = db::create_pool(&config.database, &config.storage)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
    db::migrate(&pool, &config.storage.entity_prefix)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;

    let cache = RedisCache::new(&config.redis).await?;
    let stores = Stores::postgres(&pool, &config.storage.entity_prefix);
    let state = AppState::new(config, stores, Arc::new(cache), Arc::new(SystemClock));

    state.health_check().await?;

    let seeded = state.seed_all().await?;
    let purged = state.session_service.purge_invalid().await?;

    tracing::info!(seeded, purged, "Account maintenance complete");
    tracing::debug!(metrics = %metrics::get_metrics(), "Final metrics");

    pool.close().await;
    Ok(())
}

//! PostgreSQL pool and schema setup for the maintenance binary.

use crate::config::{DatabaseConfig, StorageConfig};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Pool settings. Waiting for a connection counts against the same
/// per-operation budget the repositories enforce.
pub fn pool_options(database: &DatabaseConfig, storage: &StorageConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(database.max_connections)
        .min_connections(database.min_connections)
        .acquire_timeout(Duration::from_millis(storage.operation_timeout_ms))
        .idle_timeout(Duration::from_secs(database.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(database.max_lifetime_secs))
}

pub async fn create_pool(
    database: &DatabaseConfig,
    storage: &StorageConfig,
) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = database.max_connections,
        "Connecting to PostgreSQL"
    );
    let pool = pool_options(database, storage).connect(&database.url).await?;
    Ok(pool)
}

/// Whether the bundled migrations describe tables under `prefix`.
pub fn migrations_cover(prefix: &str) -> bool {
    prefix == StorageConfig::default().entity_prefix
}

/// Apply the bundled schema. Returns `false` when `prefix` is custom and
/// its tables have to be managed out of band.
pub async fn migrate(pool: &PgPool, prefix: &str) -> Result<bool, sqlx::migrate::MigrateError> {
    if !migrations_cover(prefix) {
        tracing::warn!(prefix, "Skipping bundled migrations for a custom entity prefix");
        return Ok(false);
    }
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(true)
}

pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

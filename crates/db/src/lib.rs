//! Database layer for ecolearn.
//!
//! sea-orm entities and migrations for the EcoLearn schema, the
//! [`PgStore`] remote store, and the Redis relay that carries insert
//! events between processes.

pub mod entities;
pub mod hub;
pub mod migrations;
pub mod pg_store;
pub mod relay;
pub mod test_utils;

pub use hub::{InsertHub, InsertRelay};
pub use pg_store::PgStore;
pub use relay::RedisRelay;

use ecolearn_common::{AppError, DatabaseConfig};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;

/// Initialize database connection.
pub async fn init(config: &DatabaseConfig) -> Result<DatabaseConnection, AppError> {
    let mut opt = ConnectOptions::new(&config.url);

    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(false);

    Database::connect(opt)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

/// Run pending migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), AppError> {
    use sea_orm_migration::MigratorTrait;
    migrations::Migrator::up(db, None)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
}

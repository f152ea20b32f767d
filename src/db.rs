//! SQLite pool construction and schema migration.

use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr};

/// Open the pool described by `cfg`, creating the database file (and its
/// parent directory) on first run.
pub async fn connect(cfg: &DatabaseConfig) -> Result<SqlitePool> {
    tracing::debug!("Connecting using raw URL => {}", cfg.url);

    let db_path = cfg
        .url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if !db_path.is_empty() && !db_path.starts_with(':') {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {:?}", parent))?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(&cfg.url)
        .with_context(|| format!("parsing database url `{}`", cfg.url))?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(cfg.acquire_timeout)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to `{}`", cfg.url))
}

/// Single-connection in-memory database that lives as long as the pool.
pub async fn memory_pool() -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
}

/// Apply the embedded schema. Safe to run on every start.
pub async fn run_migrations(db: &SqlitePool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(db).await
}

//! Database layer.
//!
//! This module provides:
//! - Connection pool management over a local SQLite file
//! - The access key store (`KeyStore`)
//! - The cluster node registry (`NodeStore`)
//!
//! Every write is a single statement, so SQLite's transaction boundary is the
//! only serialization the stores need.

mod error;
mod keys;
mod nodes;

pub use error::DbError;
pub use keys::{AccessKey, IssuedKey, KeyRecord, KeyStore};
pub use nodes::{ClusterNode, NewNode, NodeStore, NodeUpdate};

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite connection URL, e.g. `sqlite://dockward.db`.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Migration directory. When unset, the crate's own `migrations/` is used.
    pub migrations_dir: Option<PathBuf>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://dockward.db".to_string(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(5),
            migrations_dir: None,
        }
    }
}

impl DbConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://dockward.db".to_string());

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let migrations_dir = std::env::var("DB_MIGRATIONS_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Self {
            database_url,
            max_connections,
            migrations_dir,
            ..Default::default()
        }
    }
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    migrations_dir: Option<PathBuf>,
}

impl Database {
    /// Open the database file, creating it if missing.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            "Opening database"
        );

        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(DbError::Connect)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(DbError::Connect)?;

        info!("Database pool established");

        Ok(Self {
            pool,
            migrations_dir: config.migrations_dir.clone(),
        })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }

    /// Apply pending migrations from the first migration directory found.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        info!("Running database migrations");

        let candidates = migration_dirs(self.migrations_dir.as_deref());
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            if !dir.is_dir() {
                continue;
            }
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator.run(&self.pool).await.map_err(DbError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(DbError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no candidate directory exists".to_string()),
        })
    }

    /// Get an access key store handle.
    pub fn keys(&self) -> KeyStore {
        KeyStore::new(self.pool.clone())
    }

    /// Get a node registry handle.
    pub fn nodes(&self) -> NodeStore {
        NodeStore::new(self.pool.clone())
    }
}

/// Directories searched for migrations, in order.
///
/// Never the bare working directory: the updater's checkout may live there
/// and carry an unrelated `migrations/`.
fn migration_dirs(explicit: Option<&Path>) -> Vec<PathBuf> {
    match explicit {
        Some(dir) => vec![dir.to_path_buf()],
        None => vec![
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
            PathBuf::from("services/server/migrations"),
        ],
    }
}

/// Opens a fresh migrated database in a temporary directory.
#[cfg(test)]
pub(crate) async fn test_database() -> (Database, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = DbConfig {
        database_url: format!("sqlite://{}", dir.path().join("test.db").display()),
        ..Default::default()
    };
    let db = Database::connect(&config).await.unwrap();
    db.run_migrations().await.unwrap();
    (db, dir)
}

//! Database error types.

use thiserror::Error;

/// Storage-layer failures.
///
/// `Conflict` is the only variant a caller is expected to recover from; the
/// rest surface as request failures and are never retried silently.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to open the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// A unique constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}")]
    MigrationDirNotFound { tried: String, last_error: String },
}

impl DbError {
    /// Classifies a query error, turning unique violations into `Conflict`.
    pub(crate) fn from_write(err: sqlx::Error, what: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DbError::Conflict(format!("{what} already exists"))
            }
            _ => DbError::Query(err),
        }
    }
}

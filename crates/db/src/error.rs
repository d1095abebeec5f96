use provision_core::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),
}

impl From<DbError> for ProviderError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InstanceNotFound(id) => ProviderError::NotFound(id),
            DbError::Sqlx(sqlx::Error::PoolTimedOut) => ProviderError::Transient(err.to_string()),
            other => ProviderError::Permanent(other.to_string()),
        }
    }
}

use std::time::Duration;

use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool,
};
use thiserror::Error;

use crate::config::{PostgresConfig, SslMode};

/// Splits store failures into the "try later" class (pool exhausted or
/// closed, connection-level I/O) and everything else, which surfaces as a
/// query failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable")]
    Unavailable(#[source] sqlx::Error),
    #[error(transparent)]
    Query(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        if matches!(
            error,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
        ) {
            StoreError::Unavailable(error)
        } else {
            StoreError::Query(error)
        }
    }
}

pub async fn create_postgres_pool(config: &PostgresConfig) -> Result<PgPool, sqlx::Error> {
    let mut options: PgConnectOptions = config.connection_string.parse()?;
    options = options.application_name(&config.application_name);

    let ssl_mode = match config.ssl_mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
    };
    options = options.ssl_mode(ssl_mode);

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
        .connect_with(options)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeouts_classify_as_unavailable() {
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn other_errors_classify_as_query_failures() {
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
    }
}

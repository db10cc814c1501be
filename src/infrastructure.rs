pub mod core;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::domain::DataAccessError;
use crate::Database;

pub async fn connect(config: &Database) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

impl From<sqlx::Error> for DataAccessError {
    fn from(value: sqlx::Error) -> Self {
        match value {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::ConnectionError(Box::new(value)),
            sqlx::Error::RowNotFound
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_) => Self::ReadError(Box::new(value)),
            sqlx::Error::Database(_) => Self::WriteError(Box::new(value)),
            sqlx::Error::Configuration(_) => Self::ClientSideError(Box::new(value)),
            _ => Self::QueryError(Box::new(value)),
        }
    }
}

use chrono::{DateTime, Utc};
use core_types::TaskStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid database configuration: {0}")]
    ConnectionConfigError(String),

    #[error("Database query failed: {0}")]
    QueryError(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to decode stored value: {0}")]
    DecodeError(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Observation for {code} at {attempted} is not after the latest stored one at {latest}")]
    OutOfOrder {
        code: String,
        latest: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error("Refresh task {task_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

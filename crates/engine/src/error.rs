use analytics::AnalyticsError;
use core_types::CoreError;
use database::DbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    OutOfOrder(String),

    #[error("Database error: {0}")]
    Database(DbError),

    #[error("Computation failed: {0}")]
    Computation(#[from] AnalyticsError),

    #[error("Background job failed: {0}")]
    Internal(String),
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => EngineError::NotFound(what),
            out_of_order @ DbError::OutOfOrder { .. } => EngineError::OutOfOrder(out_of_order.to_string()),
            other => EngineError::Database(other),
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        EngineError::InvalidArgument(err.to_string())
    }
}

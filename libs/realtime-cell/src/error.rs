use thiserror::Error;

use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Account has been deactivated")]
    AccountDeactivated,

    #[error("Pub/sub backbone error: {0}")]
    Backbone(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<redis::RedisError> for RealtimeError {
    fn from(e: redis::RedisError) -> Self {
        RealtimeError::Backbone(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for RealtimeError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        RealtimeError::Backbone(e.to_string())
    }
}

impl From<shared_database::DatabaseError> for RealtimeError {
    fn from(e: shared_database::DatabaseError) -> Self {
        RealtimeError::Database(e.to_string())
    }
}

impl From<RealtimeError> for AppError {
    fn from(e: RealtimeError) -> Self {
        match e {
            // Same body whichever scheme came closest.
            RealtimeError::Unauthorized => AppError::Auth("Unauthorized".to_string()),
            RealtimeError::AccountDeactivated => AppError::Forbidden("Account has been deactivated".to_string()),
            RealtimeError::Backbone(msg) => AppError::ExternalService(msg),
            RealtimeError::Serialization(e) => AppError::Internal(e.to_string()),
            RealtimeError::Database(msg) => AppError::Database(msg),
        }
    }
}

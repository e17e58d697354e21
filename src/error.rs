/// Engine error type shared by the resolver, invoker, orchestrator and stores
#[derive(Debug, Clone, thiserror::Error)]
pub enum AppError {
    // Resolution errors
    #[error("Unresolved variable: {0}")]
    UnresolvedVariable(String),

    #[error("Circular variable reference: {0}")]
    CircularReference(String),

    // Invocation errors
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    // Resource errors
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Conflict(String),

    // Store errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Queue error: {0}")]
    Queue(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors raised while turning a template into a concrete request
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            AppError::UnresolvedVariable(_) | AppError::CircularReference(_)
        )
    }

    /// Transport failures the invoker retries per policy
    pub fn is_transport(&self) -> bool {
        matches!(self, AppError::Timeout(_) | AppError::Network(_))
    }

    /// Whether a worker should requeue a job that failed with this error
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Timeout(_) | AppError::Network(_) => true,
            // Transient store failures
            AppError::Database(_) => true,
            AppError::Queue(msg) | AppError::Internal(msg) => {
                msg.contains("timeout") || msg.contains("connection")
            }
            AppError::UnresolvedVariable(_)
            | AppError::CircularReference(_)
            | AppError::Validation(_)
            | AppError::NotFound(_)
            | AppError::Conflict(_) => false,
        }
    }
}

// Convenient conversions from common error types

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource".to_string()),
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::RecordNotFound(_) => AppError::NotFound("Resource".to_string()),
            sea_orm::DbErr::RecordNotInserted => {
                AppError::Conflict("Record already exists".to_string())
            }
            sea_orm::DbErr::RecordNotUpdated => AppError::NotFound("Resource".to_string()),
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Database(format!("Redis error: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            AppError::Network(err.to_string())
        } else if err.is_builder() {
            AppError::Validation(format!("Invalid request: {}", err))
        } else {
            AppError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {}", err))
    }
}

/// Result type alias used across the crate
pub type AppResult<T> = Result<T, AppError>;

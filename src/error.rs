//! Error handling module
//!
//! Crate-level error type wrapping the errors of each layer.

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Domain errors
    #[error(transparent)]
    Payment(#[from] crate::domain::PaymentError),

    #[error(transparent)]
    Collaborator(#[from] crate::collaborators::CollaboratorError),

    // Infrastructure errors
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Job(#[from] crate::jobs::JobError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Schema incomplete: missing table {0}")]
    SchemaIncomplete(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Payment(e) => e.error_code(),
            AppError::Collaborator(_) => "collaborator_error",
            AppError::Store(_) => "store_error",
            AppError::Database(_) => "database_error",
            AppError::Job(_) => "job_error",
            AppError::Config(_) => "config_error",
            AppError::SchemaIncomplete(_) => "schema_incomplete",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// The process must not keep serving payments
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::Payment(e) => e.is_fatal(),
            AppError::Job(e) => e.is_integrity_violation(),
            AppError::Config(_) | AppError::SchemaIncomplete(_) => true,
            _ => false,
        }
    }
}

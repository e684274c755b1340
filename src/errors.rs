use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::models::LeadId;

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// The referenced lead does not exist.
    LeadNotFound(LeadId),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Enrichment, registry or dialer failure (network, timeout, bad response).
    /// Always retryable.
    ProviderUnavailable(String),
    /// A pipeline run for this lead is already in flight.
    ConcurrentRunConflict(LeadId),
    /// The lead was anonymized and can no longer be written to.
    LeadAnonymized(LeadId),
    /// Scoring could not be computed from the supplied inputs.
    ScoringFailed(String),
    /// The work queue refused the job.
    QueueUnavailable(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    /// Whether a pipeline run that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::ProviderUnavailable(_) | AppError::DatabaseError(_) => true,
            AppError::WithContext { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::LeadNotFound(id) => write!(f, "Lead {} not found", id),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ProviderUnavailable(msg) => write!(f, "Provider unavailable: {}", msg),
            AppError::ConcurrentRunConflict(id) => {
                write!(f, "Pipeline run already in progress for lead {}", id)
            }
            AppError::LeadAnonymized(id) => write!(f, "Lead {} has been anonymized", id),
            AppError::ScoringFailed(msg) => write!(f, "Scoring failed: {}", msg),
            AppError::QueueUnavailable(msg) => write!(f, "Work queue unavailable: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    /// Logs errors appropriately based on their severity.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::LeadNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("Lead {} not found", id))
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ProviderUnavailable(msg) => {
                tracing::error!("Provider unavailable: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "External service error".to_string(),
                )
            }
            AppError::ConcurrentRunConflict(id) => (
                StatusCode::CONFLICT,
                format!("Pipeline already running for lead {}", id),
            ),
            AppError::LeadAnonymized(id) => (
                StatusCode::GONE,
                format!("Lead {} has been anonymized", id),
            ),
            AppError::ScoringFailed(msg) => {
                tracing::error!("Scoring failed: {}", msg);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Lead could not be scored".to_string(),
                )
            }
            AppError::QueueUnavailable(msg) => {
                tracing::warn!("Work queue unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Pipeline queue is busy, retry later".to_string(),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                // Delegate to underlying error's response
                return source.clone().into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` is simplified to `RowNotFound` during cloning.
    fn clone(&self) -> Self {
        match self {
            AppError::DatabaseError(_e) => AppError::DatabaseError(sqlx::Error::RowNotFound),
            AppError::LeadNotFound(id) => AppError::LeadNotFound(*id),
            AppError::BadRequest(msg) => AppError::BadRequest(msg.clone()),
            AppError::ProviderUnavailable(msg) => AppError::ProviderUnavailable(msg.clone()),
            AppError::ConcurrentRunConflict(id) => AppError::ConcurrentRunConflict(*id),
            AppError::LeadAnonymized(id) => AppError::LeadAnonymized(*id),
            AppError::ScoringFailed(msg) => AppError::ScoringFailed(msg.clone()),
            AppError::QueueUnavailable(msg) => AppError::QueueUnavailable(msg.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    /// Converts a `sqlx::Error` into an `AppError`.
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for AppError {
    /// Converts a `reqwest::Error` into an `AppError`.
    fn from(err: reqwest::Error) -> Self {
        AppError::ProviderUnavailable(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::ProviderUnavailable("provider call timed out".to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}

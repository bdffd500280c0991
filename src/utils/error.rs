/*
 * Error handling for the search and ingestion core: typed error kinds, HTTP status mapping,
 * and conversions from the database, cache, and HTTP client layers.
 * I'm implementing a robust error handling framework that keeps upstream failures classified
 * while presenting clean, contract-compliant responses to API consumers.
 */

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Custom Result type for consistent error handling throughout the application.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enum covering the error taxonomy of the search and ingestion core.
/// I'm organizing errors by category to enable appropriate handling and logging.
///
/// Provider errors are split into transient kinds (counted against the circuit
/// breaker, eligible for the fallback chain) and permanent kinds (surfaced to
/// the caller without fallback).
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Provider timeout: {0}")]
    ProviderTimeout(String),

    #[error("Provider rate limited: {0}")]
    ProviderRateLimited(String),

    #[error("Provider server error: {0}")]
    ProviderServerError(String),

    #[error("Provider network error: {0}")]
    ProviderNetworkError(String),

    #[error("Provider rejected request: {0}")]
    ProviderBadRequest(String),

    #[error("Provider response parse error: {0}")]
    ProviderParseError(String),

    #[error("Circuit breaker open: {0}")]
    BreakerOpen(String),

    #[error("Cache operation failed: {0}")]
    CacheError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Resource not found: {0}")]
    NotFoundError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailableError(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

/// Structured error response for API endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    pub category: ErrorCategory,
    pub retryable: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub enum ErrorCategory {
    Validation,
    ProviderTransient,
    ProviderPermanent,
    BreakerOpen,
    Cache,
    Storage,
    NotFound,
    Configuration,
    Deadline,
    Internal,
}

impl AppError {
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::ValidationError(message.into())
    }

    pub fn storage<T: Into<String>>(message: T) -> Self {
        Self::StorageError(message.into())
    }

    pub fn not_found<T: Into<String>>(resource: T) -> Self {
        Self::NotFoundError(resource.into())
    }

    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::InternalServerError(message.into())
    }

    /// Get the appropriate HTTP status code for this error
    /// I'm mapping application errors to the external interface contract:
    /// 400 validation, 429 upstream quota, 503 shedding/unavailable, 504 deadline
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::ProviderRateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ProviderTimeout(_)
            | AppError::ProviderServerError(_)
            | AppError::ProviderNetworkError(_) => StatusCode::BAD_GATEWAY,
            AppError::ProviderBadRequest(_) => StatusCode::BAD_GATEWAY,
            AppError::ProviderParseError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BreakerOpen(_) | AppError::ServiceUnavailableError(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::NotFoundError(_) => StatusCode::NOT_FOUND,
            AppError::SerializationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::CacheError(_)
            | AppError::StorageError(_)
            | AppError::ConfigurationError(_)
            | AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error category for metrics and logging
    /// I'm categorizing errors so the orchestrator can make its fallback decision
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::ValidationError(_) => ErrorCategory::Validation,
            AppError::ProviderTimeout(_)
            | AppError::ProviderRateLimited(_)
            | AppError::ProviderServerError(_)
            | AppError::ProviderNetworkError(_) => ErrorCategory::ProviderTransient,
            AppError::ProviderBadRequest(_) | AppError::ProviderParseError(_) => {
                ErrorCategory::ProviderPermanent
            }
            AppError::BreakerOpen(_) => ErrorCategory::BreakerOpen,
            AppError::CacheError(_) => ErrorCategory::Cache,
            AppError::StorageError(_) | AppError::ServiceUnavailableError(_) => {
                ErrorCategory::Storage
            }
            AppError::NotFoundError(_) => ErrorCategory::NotFound,
            AppError::SerializationError(_) => ErrorCategory::Internal,
            AppError::ConfigurationError(_) => ErrorCategory::Configuration,
            AppError::DeadlineExceeded(_) => ErrorCategory::Deadline,
            AppError::InternalServerError(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this error type is retryable
    /// I'm identifying which errors might succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::ProviderTransient
                | ErrorCategory::BreakerOpen
                | ErrorCategory::Cache
                | ErrorCategory::Deadline
        )
    }

    /// Get user-friendly error message
    /// I'm providing clean, understandable messages for end users
    pub fn user_message(&self) -> String {
        match self {
            AppError::ValidationError(msg) => format!("Invalid input: {}", msg),
            AppError::ProviderRateLimited(_) => {
                "The book catalog is rate limited right now. Please wait and try again.".to_string()
            }
            AppError::ProviderTimeout(_)
            | AppError::ProviderServerError(_)
            | AppError::ProviderNetworkError(_)
            | AppError::BreakerOpen(_) => {
                "Book search is temporarily unavailable. Please try again shortly.".to_string()
            }
            AppError::ServiceUnavailableError(_) => {
                "Book search is unavailable and no cached results exist. You can add the book manually.".to_string()
            }
            AppError::DeadlineExceeded(_) => "The search took too long. Please try again.".to_string(),
            AppError::NotFoundError(msg) => msg.clone(),
            AppError::ProviderBadRequest(msg) => msg.clone(),
            _ => "An unexpected error occurred. Please try again.".to_string(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::ProviderTimeout(_) => "PROVIDER_TIMEOUT",
            AppError::ProviderRateLimited(_) => "PROVIDER_RATE_LIMITED",
            AppError::ProviderServerError(_) => "PROVIDER_SERVER_ERROR",
            AppError::ProviderNetworkError(_) => "PROVIDER_NETWORK_ERROR",
            AppError::ProviderBadRequest(_) => "PROVIDER_BAD_REQUEST",
            AppError::ProviderParseError(_) => "PROVIDER_PARSE_ERROR",
            AppError::BreakerOpen(_) => "BREAKER_OPEN",
            AppError::CacheError(_) => "CACHE_ERROR",
            AppError::StorageError(_) => "STORAGE_ERROR",
            AppError::NotFoundError(_) => "NOT_FOUND",
            AppError::SerializationError(_) => "SERIALIZATION_ERROR",
            AppError::ConfigurationError(_) => "CONFIG_ERROR",
            AppError::ServiceUnavailableError(_) => "SERVICE_UNAVAILABLE",
            AppError::DeadlineExceeded(_) => "DEADLINE_EXCEEDED",
            AppError::InternalServerError(_) => "INTERNAL_ERROR",
        }
    }

    fn log(&self) {
        match self.category() {
            ErrorCategory::Validation | ErrorCategory::NotFound => {
                tracing::debug!("{}: {}", self.error_code(), self);
            }
            ErrorCategory::ProviderTransient
            | ErrorCategory::ProviderPermanent
            | ErrorCategory::BreakerOpen
            | ErrorCategory::Cache
            | ErrorCategory::Deadline => {
                warn!("{}: {}", self.error_code(), self);
            }
            ErrorCategory::Storage | ErrorCategory::Configuration | ErrorCategory::Internal => {
                error!("{}: {}", self.error_code(), self);
            }
        }
    }
}

/// Implementation of IntoResponse for automatic HTTP response conversion
/// I'm enabling seamless error handling in Axum route handlers
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        self.log();

        let error_response = ErrorResponse {
            error: ErrorDetails {
                code: self.error_code().to_string(),
                message: self.user_message(),
                category: self.category(),
                retryable: self.is_retryable(),
            },
            timestamp: chrono::Utc::now(),
            request_id: None,
        };

        (status_code, Json(error_response)).into_response()
    }
}

/// Conversion from sqlx::Error to AppError
/// I'm implementing automatic error conversion for database operations
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFoundError("Database record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                AppError::StorageError(format!("Database operation failed: {}", db_err.message()))
            }
            sqlx::Error::PoolTimedOut => {
                AppError::StorageError("Database connection pool timeout".to_string())
            }
            sqlx::Error::PoolClosed => {
                AppError::ServiceUnavailableError("Database pool is closed".to_string())
            }
            _ => AppError::StorageError(format!("Database error: {}", err)),
        }
    }
}

/// Conversion from reqwest::Error to AppError
/// I'm implementing automatic error conversion for HTTP client operations
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::ProviderTimeout(format!("HTTP request timeout: {}", err))
        } else if err.is_connect() {
            AppError::ProviderNetworkError(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            AppError::ProviderParseError(format!("Response decode failed: {}", err))
        } else {
            AppError::ProviderNetworkError(format!("HTTP client error: {}", err))
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(format!("JSON error: {}", err))
    }
}

/// Conversion from redis::RedisError to AppError
/// I'm implementing automatic error conversion for L1 cache operations
impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => {
                AppError::CacheError("L1 cache authentication failed".to_string())
            }
            redis::ErrorKind::TypeError => {
                AppError::SerializationError(format!("L1 cache type error: {}", err))
            }
            redis::ErrorKind::BusyLoadingError => {
                AppError::CacheError("L1 cache is loading data".to_string())
            }
            redis::ErrorKind::InvalidClientConfig => {
                AppError::ConfigurationError("Invalid L1 cache client configuration".to_string())
            }
            _ => AppError::CacheError(format!("L1 cache error: {}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::ValidationError("q too short".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::ProviderRateLimited("quota".to_string()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::ServiceUnavailableError("both providers down".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::DeadlineExceeded("3s".to_string()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_transient_vs_permanent_categories() {
        assert_eq!(
            AppError::ProviderTimeout("slow".to_string()).category(),
            ErrorCategory::ProviderTransient
        );
        assert_eq!(
            AppError::ProviderNetworkError("refused".to_string()).category(),
            ErrorCategory::ProviderTransient
        );
        assert_eq!(
            AppError::ProviderBadRequest("bad query".to_string()).category(),
            ErrorCategory::ProviderPermanent
        );
        assert_eq!(
            AppError::ProviderParseError("bad json".to_string()).category(),
            ErrorCategory::ProviderPermanent
        );
    }

    #[test]
    fn test_retryability() {
        assert!(AppError::ProviderTimeout("slow".to_string()).is_retryable());
        assert!(AppError::BreakerOpen("primary".to_string()).is_retryable());
        assert!(!AppError::ValidationError("bad".to_string()).is_retryable());
        assert!(!AppError::ProviderBadRequest("bad".to_string()).is_retryable());
    }
}

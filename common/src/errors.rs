// Error handling framework for the resource-access layer

use serde::Serialize;
use thiserror::Error;

/// Relational store errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database is not connected")]
    NotConnected,

    #[error("Connection pool exhausted after waiting {0}ms")]
    PoolExhausted(u64),

    #[error("Query failed: {cause}")]
    QueryFailed { statement: String, cause: String },

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Invalid statement: {0}")]
    InvalidStatement(String),
}

/// Cache and messaging errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Cache is not connected")]
    NotConnected,

    #[error("Counter operation on non-integer value: {0}")]
    TypeMismatch(String),

    #[error("Cache transport error: {0}")]
    Transport(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Cache command failed: {0}")]
    CommandFailed(String),

    #[error("Subscription handler failed on channel '{channel}': {cause}")]
    HandlerFailed { channel: String, cause: String },
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

/// Closed set of error codes exposed to the handler layer.
///
/// The resource layer never leaks statement text or transport detail to
/// end users; handlers map these codes onto HTTP response classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ServiceUnavailable,
    Conflict,
    InternalError,
}

impl ErrorCode {
    /// Human-readable message for each code. The mapping is total: the
    /// enum is closed and every variant has a message.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorCode::ServiceUnavailable => "The service is temporarily unavailable",
            ErrorCode::Conflict => "The request conflicts with existing data",
            ErrorCode::InternalError => "An internal error occurred",
        }
    }

    /// Map a backing-store error code (e.g. a SQLSTATE) onto the closed
    /// set. Unknown codes fall back to `InternalError`.
    pub fn from_store_code(code: &str) -> Self {
        match code {
            "23505" | "23503" => ErrorCode::Conflict,
            "57P01" | "57P02" | "57P03" | "08000" | "08003" | "08006" => {
                ErrorCode::ServiceUnavailable
            }
            _ => ErrorCode::InternalError,
        }
    }
}

/// API response error type for HTTP responses
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.user_message())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        let code = match err {
            DatabaseError::ConnectionFailed(_)
            | DatabaseError::NotConnected
            | DatabaseError::PoolExhausted(_)
            | DatabaseError::HealthCheckFailed(_) => ErrorCode::ServiceUnavailable,
            DatabaseError::QueryFailed { .. }
            | DatabaseError::TransactionFailed(_)
            | DatabaseError::InvalidStatement(_) => ErrorCode::InternalError,
        };
        ApiError::from_code(code)
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        let code = match err {
            CacheError::ConnectionFailed(_)
            | CacheError::NotConnected
            | CacheError::Transport(_) => ErrorCode::ServiceUnavailable,
            CacheError::TypeMismatch(_)
            | CacheError::Serialization(_)
            | CacheError::CommandFailed(_)
            | CacheError::HandlerFailed { .. } => ErrorCode::InternalError,
        };
        ApiError::from_code(code)
    }
}

//! Unified error handling for the PLC acquisition service
//!
//! This module provides the service-level error type used by bootstrap, configuration,
//! persistence and the HTTP control surface. The polling core keeps its own narrow
//! error enums and converts into [`PlcsrvError`] at the service boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// ErrorInfo - API error response type
// ============================================================================

/// Standard error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code (HTTP status or custom)
    pub code: u16,
    /// Stable machine-readable error identifier
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_code: String,
    /// Error message
    pub message: String,
    /// Detailed error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Field-specific errors for validation
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_errors: HashMap<String, Vec<String>>,
}

impl ErrorInfo {
    /// Create a new ErrorInfo with just a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: 500,
            error_code: String::new(),
            message: message.into(),
            details: None,
            field_errors: HashMap::new(),
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// Set the machine-readable identifier
    pub fn with_error_code(mut self, error_code: impl Into<String>) -> Self {
        self.error_code = error_code.into();
        self
    }

    /// Add details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Add a field error
    pub fn add_field_error(mut self, field: impl Into<String>, error: impl Into<String>) -> Self {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(error.into());
        self
    }
}

// ============================================================================
// PlcsrvError - Main error type
// ============================================================================

/// Main error type for the acquisition service
#[derive(Debug, Error)]
pub enum PlcsrvError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // Database Errors
    // ======================================
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    // ======================================
    // Protocol & Communication Errors
    // ======================================
    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    // ======================================
    // API & Validation Errors
    // ======================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid parameter: {param}: {reason}")]
    InvalidParameter { param: String, reason: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using PlcsrvError
pub type PlcsrvResult<T> = Result<T, PlcsrvError>;

/// Error category enum - used for classification and log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Database,
    Connection,
    Timeout,
    Validation,
    Conflict,
    Internal,
    Unknown,
}

impl PlcsrvError {
    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::Validation(_) | Self::InvalidParameter { .. } => 400,

            // 409 Conflict
            Self::InvalidState(_) => 409,

            // 502 Bad Gateway
            Self::ConnectionFailed { .. } => 502,

            // 503 Service Unavailable
            Self::StartupFailed(_) => 503,

            // 504 Gateway Timeout
            Self::Timeout(_) => 504,

            // 500 Internal Server Error
            Self::Configuration(_)
            | Self::InvalidConfig { .. }
            | Self::Database(_)
            | Self::Sqlite(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Deserialization(_)
            | Self::ShutdownError(_)
            | Self::Other(_) => 500,
        }
    }

    /// Stable identifier for API bodies and logs
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Sqlite(_) => "SQLITE_ERROR",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Deserialization(_) => "DESERIALIZATION_ERROR",
            Self::StartupFailed(_) => "STARTUP_FAILED",
            Self::ShutdownError(_) => "SHUTDOWN_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    /// Classify the error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } => ErrorCategory::Configuration,
            Self::Database(_) | Self::Sqlite(_) => ErrorCategory::Database,
            Self::ConnectionFailed { .. } => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Validation(_) | Self::InvalidParameter { .. } => ErrorCategory::Validation,
            Self::InvalidState(_) => ErrorCategory::Conflict,
            Self::Io(_)
            | Self::Serialization(_)
            | Self::Deserialization(_)
            | Self::StartupFailed(_)
            | Self::ShutdownError(_) => ErrorCategory::Internal,
            Self::Other(_) => ErrorCategory::Unknown,
        }
    }

    /// Log level used when this error is reported
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Database => Level::ERROR,
            ErrorCategory::Validation | ErrorCategory::Conflict => Level::INFO,
            _ => Level::WARN,
        }
    }

    /// Convert to API ErrorInfo for HTTP responses
    pub fn to_error_info(&self) -> ErrorInfo {
        let mut error_info = ErrorInfo::new(self.to_string())
            .with_code(self.status_code())
            .with_error_code(self.error_code());

        match self {
            Self::InvalidParameter { param, reason } => {
                error_info = error_info.add_field_error(param, reason);
            },
            Self::InvalidConfig { field, reason } => {
                error_info = error_info.add_field_error(field, reason);
            },
            Self::Validation(msg) => {
                error_info = error_info.with_details(msg.clone());
            },
            _ => {},
        }

        error_info
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for PlcsrvError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for PlcsrvError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

impl From<figment::Error> for PlcsrvError {
    fn from(err: figment::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::PlcsrvError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::PlcsrvError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr) => {
        $crate::PlcsrvError::Validation($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::PlcsrvError::Validation(format!($fmt, $($arg)*))
    };
}

#[cfg(feature = "axum-support")]
impl axum::response::IntoResponse for PlcsrvError {
    fn into_response(self) -> axum::response::Response {
        let status = axum::http::StatusCode::from_u16(self.status_code())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self.to_error_info())).into_response()
    }
}

// Tests
#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(PlcsrvError::Validation("test".into()).status_code(), 400);
        assert_eq!(PlcsrvError::InvalidState("running".into()).status_code(), 409);
        assert_eq!(
            PlcsrvError::ConnectionFailed {
                endpoint: "10.0.0.1:102".into(),
                reason: "refused".into()
            }
            .status_code(),
            502
        );
        assert_eq!(PlcsrvError::Timeout("drain".into()).status_code(), 504);
        assert_eq!(PlcsrvError::ShutdownError("test".into()).status_code(), 500);
    }

    #[test]
    fn test_error_info() {
        let error = PlcsrvError::InvalidParameter {
            param: "sampling_interval_ms".into(),
            reason: "must be positive".into(),
        };
        let info = error.to_error_info();
        assert_eq!(info.code, 400);
        assert_eq!(info.error_code, "INVALID_PARAMETER");
        assert!(info.field_errors.contains_key("sampling_interval_ms"));
    }

    #[test]
    fn test_config_error_macro() {
        let err = config_error!("bad port {}", 70000);
        assert!(matches!(err, PlcsrvError::Configuration(ref m) if m == "bad port 70000"));
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(
            PlcsrvError::Validation("x".into()).log_level(),
            tracing::Level::INFO
        );
        assert_eq!(
            PlcsrvError::Database("x".into()).log_level(),
            tracing::Level::ERROR
        );
        assert_eq!(
            PlcsrvError::Timeout("x".into()).log_level(),
            tracing::Level::WARN
        );
    }
}

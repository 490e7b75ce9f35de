/// Unified error handling for the balanza routing layer
///
/// Routing signals (no replica available, a deferred retry, an exhausted
/// retry budget) are not errors and never appear here. These variants cover
/// configuration problems and failures of the collaborators the balancer
/// consults: position readers, the job-kind registry and the retry queue.

use std::fmt;
use std::net::AddrParseError;
use thiserror::Error;

/// Main error type for balanza operations
#[derive(Debug, Error)]
pub enum BalanzaError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A primary or replica position could not be read
    #[error("Position lookup failed: {message}")]
    Position { message: String },

    /// Job-kind metadata could not be resolved
    #[error("Job registry error: {message}")]
    Registry { message: String },

    /// The delayed-retry facility rejected a job
    #[error("Retry queue error: {message}")]
    RetryQueue { message: String },

    /// Replica health probe errors
    #[error("Health check failed: {message}")]
    Health { message: String },

    /// Job envelope (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Address parsing errors
    #[error("Address parsing error: {0}")]
    AddressParse(#[from] AddrParseError),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for balanza operations
pub type BalanzaResult<T> = Result<T, BalanzaError>;

impl BalanzaError {
    pub fn position<S: Into<String>>(message: S) -> Self {
        BalanzaError::Position {
            message: message.into(),
        }
    }

    pub fn registry<S: Into<String>>(message: S) -> Self {
        BalanzaError::Registry {
            message: message.into(),
        }
    }

    pub fn retry_queue<S: Into<String>>(message: S) -> Self {
        BalanzaError::RetryQueue {
            message: message.into(),
        }
    }

    pub fn health<S: Into<String>>(message: S) -> Self {
        BalanzaError::Health {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        BalanzaError::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is transient (the same call may succeed later)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BalanzaError::Position { .. }
                | BalanzaError::RetryQueue { .. }
                | BalanzaError::Health { .. }
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            BalanzaError::Config(_) => ErrorSeverity::Critical,
            BalanzaError::Internal { .. } => ErrorSeverity::Critical,
            BalanzaError::Position { .. } => ErrorSeverity::Warning,
            BalanzaError::RetryQueue { .. } => ErrorSeverity::Warning,
            BalanzaError::Health { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}

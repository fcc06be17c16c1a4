use std::time::Duration;
use thiserror::Error;

/// Main error type for the crossbar load balancer
#[derive(Error, Debug)]
pub enum CrossbarError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Network related errors (bind, connect, socket I/O)
    #[error("Network error: {message}")]
    Network { message: String },

    /// Errors raised while relaying an HTTP message
    #[error("Proxy error: {message}")]
    Proxy { message: String },

    /// Health probe errors
    #[error("Health check error: {message}")]
    HealthCheck { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout {
        duration: Duration,
        operation: String,
    },

    /// IO related errors
    #[error("IO error: {message}")]
    Io { message: String },

    /// Internal errors that fit no other category
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CrossbarError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a proxy error
    pub fn proxy<S: Into<String>>(message: S) -> Self {
        Self::Proxy {
            message: message.into(),
        }
    }

    /// Create a health check error
    pub fn health_check<S: Into<String>>(message: S) -> Self {
        Self::HealthCheck {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(duration: Duration, operation: S) -> Self {
        Self::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error is confined to a single client connection
    pub fn is_per_connection(&self) -> bool {
        matches!(
            self,
            CrossbarError::Proxy { .. }
                | CrossbarError::Network { .. }
                | CrossbarError::Timeout { .. }
                | CrossbarError::Io { .. }
        )
    }
}

/// Result type alias for crossbar operations
pub type CrossbarResult<T> = Result<T, CrossbarError>;

impl From<std::io::Error> for CrossbarError {
    fn from(err: std::io::Error) -> Self {
        CrossbarError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for CrossbarError {
    fn from(err: serde_yaml::Error) -> Self {
        CrossbarError::config(format!("YAML parsing error: {}", err))
    }
}

impl From<reqwest::Error> for CrossbarError {
    fn from(err: reqwest::Error) -> Self {
        CrossbarError::health_check(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for CrossbarError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CrossbarError::timeout(Duration::from_secs(30), "operation")
    }
}

impl From<anyhow::Error> for CrossbarError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return CrossbarError::Io {
                message: io_err.to_string(),
            };
        }
        CrossbarError::internal(err.to_string())
    }
}

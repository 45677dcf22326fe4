//! Error types for the Coral Redis client.

use thiserror::Error;

/// Errors surfaced by [`RedisClient`](crate::RedisClient).
///
/// Every failure is returned to the caller as one of these variants; the
/// client never recovers silently beyond the bounded connect retry.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A setter received an out-of-range value.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },

    /// A command was issued before host and port were set.
    #[error("client is not configured: host and port are required")]
    NotConfigured,

    /// A connect attempt raised a transport fault, or a command's driver call
    /// signalled failure.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// Every configured connect attempt returned failure.
    #[error("could not connect to {endpoint} after {attempts} attempt(s)")]
    RetriesExhausted { endpoint: String, attempts: u32 },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Script evaluation left a driver-reported error.
    #[error("script execution failed: {0}")]
    ScriptExecutionFailed(String),
}

impl ClientError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field,
            reason: reason.into(),
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration { .. } => "invalid_configuration",
            Self::NotConfigured => "not_configured",
            Self::ConnectFailed(_) => "connect_failed",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::KeyNotFound(_) => "key_not_found",
            Self::ScriptExecutionFailed(_) => "script_execution_failed",
        }
    }
}

impl From<TransportFault> for ClientError {
    fn from(fault: TransportFault) -> Self {
        Self::ConnectFailed(fault.to_string())
    }
}

/// Low-level fault raised by a driver.
///
/// Distinct from an ordinary unsuccessful return: a fault during connect
/// aborts the connect cycle without further attempts.
#[derive(Debug, Error)]
pub enum TransportFault {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("file error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("parse error: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Telemetry initialization errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("subscriber setup failed: {0}")]
    Subscriber(String),
}

/// Top-level error type for the command line tool.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

pub type Result<T> = std::result::Result<T, ClientError>;

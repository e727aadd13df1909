use std::time::Duration;
use thiserror::Error;

/// Error code reported by a coordinator that rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorCode {
    SyntaxError,
    Invalid,
    Unauthorized,
    AlreadyExists,
    Overloaded,
    IsBootstrapping,
    ConfigError,
    ServerError,
}

impl std::fmt::Display for ServerErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerErrorCode::SyntaxError => write!(f, "syntax_error"),
            ServerErrorCode::Invalid => write!(f, "invalid"),
            ServerErrorCode::Unauthorized => write!(f, "unauthorized"),
            ServerErrorCode::AlreadyExists => write!(f, "already_exists"),
            ServerErrorCode::Overloaded => write!(f, "overloaded"),
            ServerErrorCode::IsBootstrapping => write!(f, "is_bootstrapping"),
            ServerErrorCode::ConfigError => write!(f, "config_error"),
            ServerErrorCode::ServerError => write!(f, "server_error"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("Timeout error: request timed out after {0:?}")]
    TimeoutError(Duration),

    #[error("Unavailable: {0}")]
    UnavailableError(String),

    #[error("Server error ({code}): {message}")]
    ServerError {
        code: ServerErrorCode,
        message: String,
    },

    #[error("Callback error: {0}")]
    CallbackError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Mapping error: {0}")]
    MappingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Session closed")]
    SessionClosed,
}

impl DriverError {
    pub fn server(code: ServerErrorCode, message: impl Into<String>) -> Self {
        DriverError::ServerError {
            code,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::server(ServerErrorCode::Invalid, message)
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            DriverError::TimeoutError(_) => "timeout",
            DriverError::UnavailableError(_) => "unavailable",
            DriverError::ServerError { .. } => "server_error",
            DriverError::CallbackError(_) => "callback_error",
            DriverError::InvalidRequest(_) => "invalid_request",
            DriverError::AuthenticationError(_) => "authentication",
            DriverError::MappingError(_) => "mapping",
            DriverError::ConfigError(_) => "config",
            DriverError::Cancelled => "cancelled",
            DriverError::SessionClosed => "session_closed",
        }
    }
}

impl From<anyhow::Error> for DriverError {
    fn from(err: anyhow::Error) -> Self {
        DriverError::InvalidRequest(err.to_string())
    }
}

impl From<config::ConfigError> for DriverError {
    fn from(err: config::ConfigError) -> Self {
        DriverError::ConfigError(err.to_string())
    }
}

#[cfg(feature = "scylla")]
impl From<scylla::transport::errors::QueryError> for DriverError {
    fn from(err: scylla::transport::errors::QueryError) -> Self {
        use scylla::transport::errors::{DbError, QueryError};

        // Durations left at zero are filled in with the request timeout by the session
        match err {
            QueryError::RequestTimeout(_) | QueryError::TimeoutError => {
                DriverError::TimeoutError(Duration::ZERO)
            }
            QueryError::BadQuery(bad) => DriverError::InvalidRequest(bad.to_string()),
            err @ (QueryError::IoError(_)
            | QueryError::BrokenConnection(_)
            | QueryError::ConnectionPoolError(_)
            | QueryError::UnableToAllocStreamId) => DriverError::UnavailableError(err.to_string()),
            QueryError::DbError(DbError::Unavailable { .. }, msg) => {
                DriverError::UnavailableError(msg)
            }
            QueryError::DbError(DbError::ReadTimeout { .. }, _)
            | QueryError::DbError(DbError::WriteTimeout { .. }, _) => {
                DriverError::TimeoutError(Duration::ZERO)
            }
            QueryError::DbError(DbError::SyntaxError, msg) => {
                DriverError::server(ServerErrorCode::SyntaxError, msg)
            }
            QueryError::DbError(DbError::Invalid, msg) => {
                DriverError::server(ServerErrorCode::Invalid, msg)
            }
            QueryError::DbError(DbError::Unauthorized, msg) => {
                DriverError::server(ServerErrorCode::Unauthorized, msg)
            }
            QueryError::DbError(DbError::Overloaded, msg) => {
                DriverError::server(ServerErrorCode::Overloaded, msg)
            }
            QueryError::DbError(DbError::IsBootstrapping, msg) => {
                DriverError::server(ServerErrorCode::IsBootstrapping, msg)
            }
            QueryError::DbError(_, msg) => DriverError::server(ServerErrorCode::ServerError, msg),
            other => DriverError::InvalidRequest(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_distinct() {
        let timeout = DriverError::TimeoutError(Duration::from_secs(15));
        let unavailable = DriverError::UnavailableError("no hosts".to_string());
        let server = DriverError::invalid("unknown table");

        assert_eq!(timeout.kind(), "timeout");
        assert_eq!(unavailable.kind(), "unavailable");
        assert_eq!(server.kind(), "server_error");
        assert!(server.to_string().contains("invalid"));
        assert!(timeout.to_string().contains("15s"));
    }

    #[cfg(feature = "scylla")]
    #[test]
    fn test_scylla_errors_classified() {
        use scylla::transport::errors::{BadQuery, QueryError};
        use std::sync::Arc;

        let bad = QueryError::BadQuery(BadQuery::Other("expected int, got text".to_string()));
        assert!(matches!(DriverError::from(bad), DriverError::InvalidRequest(_)));

        let io = QueryError::IoError(Arc::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        )));
        assert!(matches!(DriverError::from(io), DriverError::UnavailableError(_)));

        let timeout = QueryError::RequestTimeout("no response".to_string());
        assert_eq!(DriverError::from(timeout), DriverError::TimeoutError(Duration::ZERO));
    }
}

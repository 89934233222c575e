//! Error types for the MySQL provider.

use thiserror::Error;

/// MySQL server error code for `ER_BAD_DB_ERROR` ("Unknown database").
pub const UNKNOWN_DATABASE_ERR: u16 = 1049;

/// Errors that can occur while serving provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// The server could not be reached before the retry timeout elapsed.
    #[error("Could not connect to server: {0}")]
    Connection(String),

    /// A connect attempt was still pending when the retry budget ran out.
    #[error(transparent)]
    Timeout(#[from] crate::retry::AttemptTimedOut),

    /// The proxy could not be set up or dialed.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// An error reported by the MySQL driver or server, passed through as is.
    #[error(transparent)]
    Database(#[from] mysql_async::Error),

    /// `SHOW COLLATION` had no default row for the charset.
    #[error("Charset {0} has no default collation")]
    MissingDefaultCollation(String),

    /// The server answered with a row shape we do not understand.
    #[error("Unexpected server response: {0}")]
    UnexpectedResponse(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Invalid request from the engine.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// The MySQL server error code, if this error came from the server.
    pub fn server_code(&self) -> Option<u16> {
        match self {
            Self::Database(mysql_async::Error::Server(err)) => Some(err.code),
            _ => None,
        }
    }

    /// Whether the server reported that the database does not exist.
    pub fn is_unknown_database(&self) -> bool {
        self.server_code() == Some(UNKNOWN_DATABASE_ERR)
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Connection(msg) => tonic::Status::unavailable(msg),
            err @ ProviderError::Timeout(_) => tonic::Status::deadline_exceeded(err.to_string()),
            ProviderError::Proxy(msg) => tonic::Status::unavailable(msg),
            ProviderError::Database(err) => tonic::Status::internal(err.to_string()),
            err @ ProviderError::MissingDefaultCollation(_) => {
                tonic::Status::failed_precondition(err.to_string())
            },
            ProviderError::UnexpectedResponse(msg) => tonic::Status::internal(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::Transport(err) => {
                tonic::Status::unavailable(format!("Transport error: {}", err))
            },
            ProviderError::FailedPrecondition(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::InvalidRequest(msg) => tonic::Status::invalid_argument(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mysql_async::ServerError;

    fn server_error(code: u16, message: &str) -> ProviderError {
        ProviderError::Database(mysql_async::Error::Server(ServerError {
            code,
            message: message.to_string(),
            state: "42000".to_string(),
        }))
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("db_app".to_string());
        assert_eq!(format!("{}", err), "Resource not found: db_app");

        let err = ProviderError::Connection("connection refused".to_string());
        assert_eq!(
            format!("{}", err),
            "Could not connect to server: connection refused"
        );

        let err = ProviderError::MissingDefaultCollation("latin9".to_string());
        assert_eq!(format!("{}", err), "Charset latin9 has no default collation");
    }

    #[test]
    fn test_database_error_is_verbatim() {
        let err = server_error(1007, "Can't create database 'app'; database exists");
        let display = format!("{}", err);
        assert!(display.contains("1007"));
        assert!(display.contains("database exists"));
        assert!(!display.starts_with("Database error"));
    }

    #[test]
    fn test_unknown_database_detection() {
        assert!(server_error(UNKNOWN_DATABASE_ERR, "Unknown database 'gone'").is_unknown_database());
        assert!(!server_error(1045, "Access denied").is_unknown_database());
        assert!(!ProviderError::NotFound("gone".to_string()).is_unknown_database());
        assert_eq!(server_error(1045, "Access denied").server_code(), Some(1045));
    }

    #[test]
    fn test_error_to_status() {
        let status: tonic::Status = ProviderError::NotFound("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let status: tonic::Status = ProviderError::Validation("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status = ProviderError::Configuration("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);

        let status: tonic::Status = ProviderError::Connection("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::Unavailable);

        let status: tonic::Status = ProviderError::from(crate::retry::AttemptTimedOut {
            timeout: std::time::Duration::from_secs(1),
        })
        .into();
        assert_eq!(status.code(), tonic::Code::DeadlineExceeded);

        let status: tonic::Status = server_error(1064, "syntax").into();
        assert_eq!(status.code(), tonic::Code::Internal);

        let status: tonic::Status =
            ProviderError::MissingDefaultCollation("latin9".to_string()).into();
        assert_eq!(status.code(), tonic::Code::FailedPrecondition);
        assert!(status.message().contains("latin9"));
    }
}

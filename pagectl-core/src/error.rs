/// Structured error types for pagectl-core.
///
/// Library code returns [`PagectlError`]; the `pagectl` binary wraps it in
/// `anyhow` for context. Connection and query failures keep the underlying
/// `sqlx::Error` as their source.
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Main error type for pagectl-core operations
#[derive(Error, Debug)]
pub enum PagectlError {
    /// Could not acquire a connection to the data source
    #[error("connection error: {source}")]
    Connection {
        #[source]
        source: sqlx::Error,
    },

    /// An individual query failed
    #[error("query failed: {source}")]
    Query {
        #[source]
        source: sqlx::Error,
    },

    /// A query ran longer than the configured timeout
    #[error("query timed out after {after:?}")]
    Timeout { after: Duration },

    /// Batch or page size was zero or negative
    #[error("invalid batch size {value}: must be a positive integer")]
    InvalidBatchSize { value: i64 },

    /// Environment or connection configuration is unusable
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// Table or column name is not a plain SQL identifier
    #[error("invalid identifier '{value}': {reason}")]
    InvalidIdentifier { value: String, reason: &'static str },

    /// Result column type has no [`crate::Value`] representation
    #[error("unsupported type {type_name} for column '{column}'")]
    UnsupportedType { column: String, type_name: String },

    /// Writing output failed
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Serializing a row for output failed
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

/// Result type alias for pagectl-core operations
pub type Result<T> = std::result::Result<T, PagectlError>;

impl PagectlError {
    /// Create a connection error
    pub fn connection(source: sqlx::Error) -> Self {
        Self::Connection { source }
    }

    /// Create a query error
    pub fn query(source: sqlx::Error) -> Self {
        Self::Query { source }
    }

    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create an unsupported column type error
    pub fn unsupported_type(column: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            column: column.into(),
            type_name: type_name.into(),
        }
    }

    /// True when no connection could be acquired
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// True for errors raised before any I/O because the input was invalid
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidBatchSize { .. } | Self::Config { .. } | Self::InvalidIdentifier { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PagectlError::InvalidBatchSize { value: 0 };
        assert_eq!(
            err.to_string(),
            "invalid batch size 0: must be a positive integer"
        );

        let err = PagectlError::config("DB_PORT must be a port number");
        assert_eq!(
            err.to_string(),
            "Configuration error: DB_PORT must be a port number"
        );
    }

    #[test]
    fn test_classification() {
        let err = PagectlError::connection(sqlx::Error::Protocol("refused".into()));
        assert!(err.is_connection());
        assert!(!err.is_configuration());

        assert!(PagectlError::InvalidBatchSize { value: -3 }.is_configuration());
        assert!(!PagectlError::query(sqlx::Error::RowNotFound).is_connection());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "closed");
        let err: PagectlError = io_err.into();

        assert!(matches!(err, PagectlError::Io { .. }));
    }
}

use thiserror::Error;

/// Errors raised at the execution boundary (driver, session, transaction).
///
/// The client never retries or rewrites these; they reach the caller
/// wrapped in [`OgmError::Driver`].
#[derive(Error, Debug)]
pub enum DriverError {
    /// Statement text the backend could not parse or execute
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// Credentials rejected by the backend
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Backend could not be reached or opened
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Embedded store failures
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Stored labels or properties that are not valid JSON
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Any other failure reported by a remote backend
    #[error("Backend error: {0}")]
    Backend(String),

    /// Transaction context misuse (commit after failure, etc.)
    #[error("Transaction error: {0}")]
    Transaction(String),
}

/// Convenient Result type for driver implementations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Main error type for the mapper
#[derive(Error, Debug)]
pub enum OgmError {
    /// Bad entity descriptor or unresolvable relationship target
    #[error("Configuration error: {0}")]
    Config(String),

    /// Blank identifier, empty property map, invalid property name
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unknown or missing template placeholder
    #[error("Template error: {0}")]
    Template(String),

    /// Execution errors, passed through unchanged
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// An operation needed a driver before `connect` was called
    #[error("Client is not connected")]
    NotConnected,

    /// The connector does not speak the URI scheme
    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    /// The statement ran but the required mutation did not happen
    #[error("Write had no effect: {0}")]
    ZeroEffect(String),

    /// A result row could not be materialized into the entity type
    #[error("Mapping error: {0}")]
    Mapping(#[from] serde_json::Error),

    /// The transaction handle no longer owns the client's active transaction
    #[error("Transaction is no longer active")]
    TransactionClosed,
}

/// Convenient Result type using OgmError
pub type Result<T> = std::result::Result<T, OgmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OgmError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_driver_error_passes_through_unchanged() {
        let driver_err = DriverError::Authentication("bad token".to_string());
        let expected = driver_err.to_string();
        let ogm_err: OgmError = driver_err.into();
        assert!(matches!(ogm_err, OgmError::Driver(DriverError::Authentication(_))));
        assert_eq!(ogm_err.to_string(), expected);
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let driver_err: DriverError = rusqlite_err.into();
        assert!(matches!(driver_err, DriverError::Storage(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let ogm_err: OgmError = json_err.into();
        assert!(matches!(ogm_err, OgmError::Mapping(_)));
    }
}

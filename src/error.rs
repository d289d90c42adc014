//! WolfKV Error Types

use thiserror::Error;

/// Result type alias for WolfKV operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfKV error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // WAL errors
    #[error("WAL error: {0}")]
    Wal(String),

    #[error("WAL segment {segment} corrupted: {reason}")]
    WalCorrupted { segment: usize, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // Query errors
    #[error("{0}")]
    Query(String),

    #[error("value not found")]
    NotFound,

    #[error("write operations are not allowed on a slave")]
    ReadOnly,

    // Replication errors
    #[error("Replication error: {0}")]
    Replication(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
        )
    }

    /// Errors caused by the request itself rather than by the node
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Query(_) | Error::NotFound | Error::ReadOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(Error::NotFound.to_string(), "value not found");
        assert_eq!(
            Error::Query("invalid command FOO".into()).to_string(),
            "invalid command FOO"
        );
        assert!(Error::ConnectionTimeout("127.0.0.1:1".into()).is_retryable());
        assert!(!Error::ReadOnly.is_retryable());
        assert!(Error::ReadOnly.is_client_error());
    }
}

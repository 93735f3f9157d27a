//! WolfChat Error Types

use thiserror::Error;

/// Result type alias for WolfChat operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfChat error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to render configuration: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    // Request errors (reported back to the caller, never fatal)
    #[error("{0}")]
    Validation(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    // Replication errors
    #[error("Quorum not reached: {reached}/{required}")]
    QuorumNotReached { reached: usize, required: usize },

    // Membership errors
    #[error("Rank authority error: {0}")]
    Authority(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Corrupted frame: {0}")]
    FrameCorrupted(String),

    #[error("Frame of {length} bytes exceeds limit of {limit}")]
    FrameTooLarge { length: u32, limit: u32 },

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    // Persistence errors
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a validation error
    pub fn validation(description: impl Into<String>) -> Self {
        Error::Validation(description.into())
    }

    /// Check if this error should be reported to the caller verbatim
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::ServiceNotFound(_) | Error::QuorumNotReached { .. }
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
                | Error::Authority(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::validation("Channel already exists").is_validation());
        assert!(Error::ServiceNotFound("foo".into()).is_validation());
        assert!(!Error::Internal("boom".into()).is_validation());

        assert!(Error::ConnectionTimeout("b:5560".into()).is_retryable());
        assert!(!Error::validation("nope").is_retryable());
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = Error::validation("Destination user does not exist");
        assert_eq!(err.to_string(), "Destination user does not exist");
    }
}

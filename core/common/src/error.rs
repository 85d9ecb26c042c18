//! Common error types for driveup.

use thiserror::Error;

/// Top-level error type for upload operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No identity-provider client config was supplied or saved.
    #[error("Missing credential config: {0}")]
    MissingCredentialConfig(String),

    /// The supplied credential payload could not be parsed.
    #[error("Malformed credential payload: {0}")]
    MalformedCredentialPayload(String),

    /// Token refresh or consent failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The cancellation gate was tripped; carries the point reached.
    #[error("Cancelled at {0}")]
    Cancelled(String),

    /// A single item failed to transfer.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Remote folder resolution failed.
    #[error("Remote lookup error: {0}")]
    RemoteLookup(String),

    /// Network or remote API failure.
    #[error("Network error: {0}")]
    Network(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The remote side refused the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Building the temporary archive failed.
    #[error("Archive error: {0}")]
    Archive(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether this error is the cooperative cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Cancelled("before upload".to_string()).is_cancelled());
        assert!(!Error::Network("reset".to_string()).is_cancelled());

        assert!(Error::Network("reset".to_string()).is_retryable());
        assert!(!Error::PermissionDenied("nope".to_string()).is_retryable());
        assert!(!Error::Cancelled("x".to_string()).is_retryable());
    }

    #[test]
    fn test_display_carries_cause() {
        let err = Error::MissingCredentialConfig("paste credentials.json".to_string());
        assert_eq!(
            err.to_string(),
            "Missing credential config: paste credentials.json"
        );
    }
}

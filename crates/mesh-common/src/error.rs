//! Common error types for meshnode components.

use thiserror::Error;

/// Common errors across meshnode components
#[derive(Debug, Error)]
pub enum MeshError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Datastore connection/operation error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Peer key did not verify
    #[error("Auth error: {0}")]
    Auth(String),

    /// Checksum mismatch or missing checksum
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Field could not be encoded/decoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Outbound peer connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MeshError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::Storage(_) => 503,
            Self::Auth(_) => 401,
            Self::Integrity(_) => 400,
            Self::Encoding(_) => 400,
            Self::Connection(_) => 502,
            Self::InvalidInput(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    /// Short code used in diagnostics entries
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG",
            Self::Storage(_) => "STORAGE",
            Self::Auth(_) => "AUTH",
            Self::Integrity(_) => "INTEGRITY",
            Self::Encoding(_) => "ENCODING",
            Self::Connection(_) => "CONNECTION",
            Self::InvalidInput(_) => "INPUT",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

/// Convenience alias
pub type MeshResult<T> = Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(MeshError::Auth("bad key".into()).status_code(), 401);
        assert_eq!(MeshError::Integrity("sum".into()).status_code(), 400);
        assert_eq!(MeshError::Storage("down".into()).status_code(), 503);
    }

    #[test]
    fn test_display_includes_message() {
        let err = MeshError::Storage("connection refused".into());
        assert_eq!(err.to_string(), "Storage error: connection refused");
        assert_eq!(err.code(), "STORAGE");
    }
}

//! Error types for ringkv

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Request Errors ===
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    // === Membership Errors ===
    #[error("Ring has no members")]
    EmptyRing,

    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    // === Network Errors ===
    #[error("HTTP error: {0}")]
    Http(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is this a retryable error?
    ///
    /// Only an unreachable peer qualifies: the ring shrinks on eviction, so
    /// the owner recomputed afterwards may be a different node.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PeerUnreachable { .. })
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::PeerUnreachable { .. } | Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::EmptyRing => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::Validation("empty key".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::NotFound("k".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(Error::EmptyRing.to_http_status(), StatusCode::SERVICE_UNAVAILABLE);
        let unreachable = Error::PeerUnreachable {
            peer: "2".into(),
            reason: "timed out".into(),
        };
        assert_eq!(unreachable.to_http_status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_only_unreachable_is_retryable() {
        assert!(Error::PeerUnreachable {
            peer: "4".into(),
            reason: "connection refused".into()
        }
        .is_retryable());
        assert!(!Error::EmptyRing.is_retryable());
        assert!(!Error::NotFound("k".into()).is_retryable());
    }
}

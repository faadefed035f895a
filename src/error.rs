//! Client error types
//!
//! Every public operation of the client returns [`DriftResult`]. Component
//! errors (time index, blob stores, transport) are typed separately and mapped
//! into [`DriftError`] at the resolver and client boundary.

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// Errors surfaced to callers of the client
#[derive(Error, Debug)]
pub enum DriftError {
    /// No candidate blob store answered its liveness probe
    #[error("No blob store backend available (tried: {})", tried.join(", "))]
    BackendUnavailable { tried: Vec<String> },

    /// Time index query or blob store listing failed
    #[error("Resolution failed: {0}")]
    ResolutionFailed(String),

    /// A specific package could not be retrieved
    #[error("Failed to fetch {id}: {reason}")]
    FetchFailed { id: String, reason: String },

    /// Bytes do not decode as a package envelope
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Backend error or expired query in the middle of a walk
    #[error("Walk failed: {0}")]
    WalkFailed(String),

    /// Publish/subscribe transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A timestamp could not be normalized
    #[error("Invalid time: {0}")]
    InvalidTime(String),

    /// Start of a range lies after its stop
    #[error("Invalid time range: start must not be after stop")]
    InvalidTimeRange,

    /// Identifier does not follow `topic/timestamp_ms.dp`
    #[error("Invalid package identifier: {0}")]
    InvalidPackageId(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The executor could not run a task to completion
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Result type alias for client operations
pub type DriftResult<T> = Result<T, DriftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DriftError::BackendUnavailable {
            tried: vec!["reductstore".to_string(), "s3".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "No blob store backend available (tried: reductstore, s3)"
        );

        let err = DriftError::FetchFailed {
            id: "acc-5/1000.dp".to_string(),
            reason: "not found".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to fetch acc-5/1000.dp: not found");
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: DriftError = TransportError::Closed.into();
        assert!(matches!(err, DriftError::Transport(TransportError::Closed)));
    }
}

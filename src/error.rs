//! Error types for trestle.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by the remote side or the underlying RPC library.
///
/// These are the errors a service delivers through a failure hook or a
/// synchronous call; they convert into [`TrestleError`] when they surface
/// from an adapted operation.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Session-creation conflict reported by the remote side.
    ///
    /// `retriable` distinguishes a transient concurrency conflict from one
    /// the server marked permanent.
    #[error("Session conflict {conflict_type}: {reason}")]
    SessionConflict {
        /// Remote-reported conflict classification.
        conflict_type: String,
        /// Remote-reported reason text.
        reason: String,
        /// Whether the remote side marked the conflict as transient.
        retriable: bool,
    },

    /// Connection attempt timed out before the remote side answered.
    #[error("Connect timeout: {0}")]
    ConnectTimeout(String),

    /// Any other operation failure delivered by the remote side.
    #[error("Operation failed: {0}")]
    Operation(String),
}

impl RemoteError {
    /// True for a session conflict the remote side marked transient.
    pub fn is_retriable_conflict(&self) -> bool {
        matches!(self, RemoteError::SessionConflict { retriable: true, .. })
    }
}

/// Main error type for all trestle operations.
#[derive(Debug, Error)]
pub enum TrestleError {
    /// Invalid local state or configuration (missing credentials, active
    /// session, null or mistyped proxy). Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure delivered by the remote side through a bridged or
    /// passthrough call.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Session acquisition gave up after exhausting the retry bound.
    #[error("Session acquisition failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        /// Attempts consumed before giving up.
        attempts: u32,
        /// Last recorded failure reason.
        reason: String,
    },

    /// No operation with this name in the adapted dispatch table.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// The remote side answered with a reply shape the caller cannot use
    /// (e.g. a factory operation returning a plain value).
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// A bridged call exceeded the configured per-call timeout.
    #[error("Operation {operation} timed out after {limit:?}")]
    CallTimeout {
        /// Operation name as dispatched.
        operation: String,
        /// Configured limit that expired.
        limit: Duration,
    },

    /// The completion-routing task is gone; no bridged call can resolve.
    #[error("Completion channel closed")]
    BridgeClosed,

    /// JSON serialization error (callback-identity encoding).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using TrestleError.
pub type Result<T> = std::result::Result<T, TrestleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_conflict_detection() {
        let transient = RemoteError::SessionConflict {
            conflict_type: "glacier".into(),
            reason: "busy".into(),
            retriable: true,
        };
        let permanent = RemoteError::SessionConflict {
            conflict_type: "auth".into(),
            reason: "denied".into(),
            retriable: false,
        };
        let timeout = RemoteError::ConnectTimeout("no route".into());

        assert!(transient.is_retriable_conflict());
        assert!(!permanent.is_retriable_conflict());
        assert!(!timeout.is_retriable_conflict());
    }

    #[test]
    fn test_remote_error_converts() {
        let err: TrestleError = RemoteError::Operation("boom".into()).into();
        assert!(matches!(err, TrestleError::Remote(_)));
        assert_eq!(err.to_string(), "Operation failed: boom");
    }

    #[test]
    fn test_retries_exhausted_message() {
        let err = TrestleError::RetriesExhausted {
            attempts: 3,
            reason: "Session conflict glacier: busy".into(),
        };
        assert_eq!(
            err.to_string(),
            "Session acquisition failed after 3 attempts: Session conflict glacier: busy"
        );
    }
}

//! Error types for the backend.
//!
//! These never reach a frontend. Anything a frontend must learn about is
//! answered as a [`RequestFailure`](shardline_access::RequestFailure).

use shardline_access::{MessageType, ProxyError};
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised while driving a shard.
#[derive(Error, Debug)]
pub enum BackendError {
    /// An incoming frame could not be decoded, or a reply could not be encoded.
    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// A frame carried a response where a request was expected.
    #[error("unexpected message {0}: backends only accept requests")]
    UnexpectedMessage(MessageType),

    /// The shard actor has stopped.
    #[error("shard actor is no longer running")]
    ActorClosed,

    /// The shard actor dropped a request without answering.
    #[error("shard actor dropped the request")]
    ReplyDropped,
}

impl BackendError {
    /// Returns true if the peer sent something this backend cannot accept.
    pub fn is_peer_error(&self) -> bool {
        matches!(self, BackendError::Proxy(_) | BackendError::UnexpectedMessage(_))
    }

    /// Returns true if the backend itself is unavailable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::ActorClosed | BackendError::ReplyDropped)
    }
}

/// Failure reported by a [`DataTree`](crate::DataTree).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataTreeError {
    /// The change set touches a path that cannot currently be modified.
    #[error("conflicting modification of {path}")]
    Conflict {
        /// Offending path.
        path: String,
    },

    /// The change set is not valid against the current tree.
    #[error("invalid modification: {0}")]
    Invalid(String),

    /// The engine failed for reasons unrelated to the change set.
    #[error("data tree failure: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        let unexpected = BackendError::UnexpectedMessage(MessageType::TransactionAbortSuccess);
        assert!(unexpected.is_peer_error());
        assert!(!unexpected.is_unavailable());
        assert!(BackendError::ActorClosed.is_unavailable());
        assert!(!BackendError::ReplyDropped.is_peer_error());
    }

    #[test]
    fn error_display() {
        let err = DataTreeError::Conflict { path: "/cars/0".into() };
        assert_eq!(err.to_string(), "conflicting modification of /cars/0");
        assert!(BackendError::ActorClosed.to_string().contains("no longer running"));
    }
}
